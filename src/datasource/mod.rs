//! Config-drive datasource
//!
//! Reads the provider payload from a mounted config-drive.
//! https://docs.openstack.org/nova/latest/user/metadata.html

use crate::NetconfError;
use crate::network::NetworkData;
use serde::Deserialize;
use std::path::{Path, PathBuf};
use tokio::fs;
use tracing::{debug, info, warn};

/// Payload directory inside the config-drive
const LATEST: &str = "openstack/latest";

/// Network payload files, most preferred first
const NETWORK_PAYLOADS: &[&str] = &["network_data.json", "network_info.json"];

const VENDOR_DATA: &str = "vendor_data.json";
const META_DATA: &str = "meta_data.json";

/// Subset of `meta_data.json` this tool reads
#[derive(Debug, Clone, Default, Deserialize)]
pub struct MetaData {
    #[serde(default)]
    pub meta: serde_json::Map<String, serde_json::Value>,
}

impl MetaData {
    /// Whether the provider asked for declared interfaces to be ignored
    pub fn ignore_interfaces(&self) -> bool {
        match self.meta.get("ignore_interfaces") {
            Some(serde_json::Value::Bool(flag)) => *flag,
            Some(serde_json::Value::String(flag)) => {
                matches!(flag.to_lowercase().as_str(), "true" | "yes" | "1")
            }
            _ => false,
        }
    }
}

/// Everything read from the config-drive
#[derive(Debug, Clone, Default)]
pub struct ProviderData {
    pub network: NetworkData,
    pub metadata: MetaData,
}

/// A mounted config-drive
#[derive(Debug, Clone)]
pub struct ConfigDrive {
    dir: PathBuf,
}

impl ConfigDrive {
    /// Config-drive mounted at `mount`
    pub fn new(mount: impl AsRef<Path>) -> Self {
        Self {
            dir: mount.as_ref().join(LATEST),
        }
    }

    /// Whether anything is mounted there
    pub async fn is_available(&self) -> bool {
        fs::metadata(&self.dir).await.is_ok()
    }

    /// Load the network payload and metadata
    ///
    /// An absent drive or payload is not an error: it yields empty data,
    /// which makes every discovered device fall back to DHCP.
    pub async fn load(&self) -> Result<ProviderData, NetconfError> {
        if !self.is_available().await {
            info!("No config-drive at {}", self.dir.display());
            return Ok(ProviderData::default());
        }

        Ok(ProviderData {
            network: self.network_data().await?,
            metadata: self.metadata().await?,
        })
    }

    /// First network payload found along the fallback chain
    pub async fn network_data(&self) -> Result<NetworkData, NetconfError> {
        for name in NETWORK_PAYLOADS {
            if let Some(value) = self.read_json(name).await? {
                debug!("Using network data from {}", name);
                return Ok(parse_network(name, value));
            }
        }

        if let Some(mut vendor) = self.read_json(VENDOR_DATA).await?
            && let Some(value) = vendor.get_mut("network_info").map(serde_json::Value::take)
        {
            debug!("Using network data from {}", VENDOR_DATA);
            return Ok(parse_network(VENDOR_DATA, value));
        }

        info!("Config-drive carries no network data");
        Ok(NetworkData::default())
    }

    /// Instance metadata, empty when absent
    pub async fn metadata(&self) -> Result<MetaData, NetconfError> {
        let Some(value) = self.read_json(META_DATA).await? else {
            return Ok(MetaData::default());
        };
        Ok(serde_json::from_value(value).unwrap_or_else(|e| {
            warn!("Ignoring malformed {}: {}", META_DATA, e);
            MetaData::default()
        }))
    }

    /// Read a JSON file; missing or unparsable files yield `None`
    async fn read_json(&self, name: &str) -> Result<Option<serde_json::Value>, NetconfError> {
        let path = self.dir.join(name);
        let content = match fs::read_to_string(&path).await {
            Ok(content) => content,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(None),
            Err(e) => return Err(e.into()),
        };
        match serde_json::from_str(&content) {
            Ok(value) => Ok(Some(value)),
            Err(e) => {
                warn!("Ignoring unparsable {}: {}", path.display(), e);
                Ok(None)
            }
        }
    }
}

fn parse_network(name: &str, value: serde_json::Value) -> NetworkData {
    serde_json::from_value(value).unwrap_or_else(|e| {
        warn!("Ignoring malformed network data in {}: {}", name, e);
        NetworkData::default()
    })
}
