//! Kernel network device discovery
//!
//! Finds devices with a permanent hardware address, brings each one up and
//! waits (bounded) for carrier. Only devices that reach carrier are reported.

pub mod mock;
pub mod sysfs;

use super::SystemInterfaces;
use crate::NetconfError;
use async_trait::async_trait;
use std::io::ErrorKind;
use std::time::Duration;
use tracing::{debug, info, warn};

pub use mock::{MockDevice, MockHost};
pub use sysfs::SysfsHost;

/// `addr_assign_type` value for a burned-in address
const ADDR_ASSIGN_PERMANENT: &str = "0";

/// Access to host network state
///
/// Implemented over sysfs for real hosts and in memory for tests.
#[async_trait]
pub trait HostNetwork: Send + Sync {
    /// Names of all kernel network devices
    async fn devices(&self) -> Result<Vec<String>, NetconfError>;

    /// Read one per-device attribute (`address`, `addr_assign_type`, `carrier`)
    async fn read_attribute(&self, device: &str, attribute: &str) -> std::io::Result<String>;

    /// Administratively bring a device up
    async fn set_link_up(&self, device: &str) -> Result<(), NetconfError>;
}

/// Device discovery over a [`HostNetwork`]
pub struct DeviceProbe<'a> {
    host: &'a dyn HostNetwork,
    ignore_prefixes: Vec<String>,
    poll_interval: Duration,
    max_attempts: u32,
    bring_up: bool,
}

impl<'a> DeviceProbe<'a> {
    pub fn new(host: &'a dyn HostNetwork) -> Self {
        Self {
            host,
            ignore_prefixes: Vec::new(),
            poll_interval: Duration::from_millis(50),
            max_attempts: 100,
            bring_up: true,
        }
    }

    /// Device name prefixes to skip
    pub fn with_ignore_prefixes(mut self, prefixes: &[String]) -> Self {
        self.ignore_prefixes = prefixes.to_vec();
        self
    }

    /// Carrier polling schedule after a device is brought up
    pub fn with_polling(mut self, interval: Duration, max_attempts: u32) -> Self {
        self.poll_interval = interval;
        self.max_attempts = max_attempts;
        self
    }

    /// Whether down devices may be brought up (disabled for previews)
    pub fn with_bring_up(mut self, bring_up: bool) -> Self {
        self.bring_up = bring_up;
        self
    }

    /// Discover live devices with permanent addresses
    ///
    /// `already_managed` reports devices the OS already configures as
    /// vlans or bridges; those are never probed.
    pub async fn discover<F>(
        &self,
        want_interface: Option<&str>,
        already_managed: F,
    ) -> Result<SystemInterfaces, NetconfError>
    where
        F: Fn(&str) -> bool,
    {
        let candidates = match want_interface {
            Some(name) => vec![name.to_string()],
            None => self.host.devices().await?,
        };

        let mut found = SystemInterfaces::new();
        for device in candidates {
            if self.is_ignored(&device) {
                debug!("Ignoring device {}", device);
                continue;
            }
            if already_managed(&device) {
                debug!("Device {} is an existing vlan or bridge, skipping", device);
                continue;
            }

            let Some(mac) = self.permanent_mac(&device).await? else {
                continue;
            };
            if self.wait_for_carrier(&device).await? {
                debug!("Device {} ({}) is up", device, mac);
                found.insert(mac, device);
            } else {
                warn!("Device {} never reported carrier, excluding it", device);
            }
        }

        info!("Discovered {} live network devices", found.len());
        Ok(found)
    }

    /// Every permanent-address device, without touching link state
    ///
    /// Used to name bond slaves that a single-device run does not probe.
    /// Devices that cannot be read are left out.
    pub async fn inventory(&self) -> Result<SystemInterfaces, NetconfError> {
        let mut found = SystemInterfaces::new();
        for device in self.host.devices().await? {
            if self.is_ignored(&device) {
                continue;
            }
            match self.permanent_mac(&device).await {
                Ok(Some(mac)) => {
                    found.insert(mac, device);
                }
                Ok(None) => {}
                Err(e) => debug!("Leaving {} out of the inventory: {}", device, e),
            }
        }
        Ok(found)
    }

    /// Lowercased MAC of a device with a burned-in address
    async fn permanent_mac(&self, device: &str) -> Result<Option<String>, NetconfError> {
        let assign_type = self.read(device, "addr_assign_type").await?;
        if assign_type.trim() != ADDR_ASSIGN_PERMANENT {
            debug!(
                "Device {} has address assign type {}, skipping",
                device,
                assign_type.trim()
            );
            return Ok(None);
        }
        Ok(Some(self.read(device, "address").await?.trim().to_lowercase()))
    }

    fn is_ignored(&self, device: &str) -> bool {
        self.ignore_prefixes
            .iter()
            .any(|prefix| device.starts_with(prefix.as_str()))
    }

    async fn read(&self, device: &str, attribute: &str) -> Result<String, NetconfError> {
        self.host
            .read_attribute(device, attribute)
            .await
            .map_err(|e| NetconfError::device(device, e))
    }

    /// Current carrier state; the kernel answers EINVAL while a link is down
    async fn has_carrier(&self, device: &str) -> Result<bool, NetconfError> {
        match self.host.read_attribute(device, "carrier").await {
            Ok(value) => Ok(value.trim() == "1"),
            Err(e) if e.kind() == ErrorKind::InvalidInput => Ok(false),
            Err(e) => Err(NetconfError::device(device, e)),
        }
    }

    async fn wait_for_carrier(&self, device: &str) -> Result<bool, NetconfError> {
        if self.has_carrier(device).await? {
            return Ok(true);
        }
        if !self.bring_up {
            return Ok(false);
        }

        debug!("Bringing up {}", device);
        self.host.set_link_up(device).await?;

        for _ in 0..self.max_attempts {
            if self.has_carrier(device).await? {
                return Ok(true);
            }
            tokio::time::sleep(self.poll_interval).await;
        }
        Ok(false)
    }
}
