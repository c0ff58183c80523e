//! In-memory host network for testing
//!
//! # Example
//! ```
//! use configdrive_net::network::probe::{MockDevice, MockHost};
//!
//! let host = MockHost::new()
//!     .with_device("eth0", MockDevice::up("aa:bb:cc:00:00:01"))
//!     .with_device("eth1", MockDevice::never_up("aa:bb:cc:00:00:02"));
//! ```

use super::HostNetwork;
use crate::NetconfError;
use async_trait::async_trait;
use std::collections::{BTreeMap, HashMap};
use std::io::{Error, ErrorKind};
use std::sync::Mutex;

/// How a mock device reports carrier
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Carrier {
    Up,
    /// Down until brought up, then up after this many further reads
    AfterLinkUp(u32),
    Never,
    Fault,
}

/// One fake kernel device
#[derive(Debug, Clone)]
pub struct MockDevice {
    address: String,
    assign_type: String,
    carrier: Carrier,
}

impl MockDevice {
    /// Device that already has carrier
    pub fn up(address: &str) -> Self {
        Self::with_carrier(address, Carrier::Up)
    }

    /// Device that gains carrier `reads` polls after being brought up
    pub fn down(address: &str, reads: u32) -> Self {
        Self::with_carrier(address, Carrier::AfterLinkUp(reads))
    }

    /// Device that never gains carrier
    pub fn never_up(address: &str) -> Self {
        Self::with_carrier(address, Carrier::Never)
    }

    /// Device whose carrier attribute cannot be read
    pub fn faulty(address: &str) -> Self {
        Self::with_carrier(address, Carrier::Fault)
    }

    /// Override `addr_assign_type` (default `0`, permanent)
    pub fn with_assign_type(mut self, assign_type: &str) -> Self {
        self.assign_type = assign_type.to_string();
        self
    }

    fn with_carrier(address: &str, carrier: Carrier) -> Self {
        Self {
            address: address.to_string(),
            assign_type: "0".to_string(),
            carrier,
        }
    }
}

#[derive(Debug, Default)]
struct MockState {
    link_up: Vec<String>,
    reads_since_up: HashMap<String, u32>,
}

/// Mock host network
#[derive(Debug, Default)]
pub struct MockHost {
    devices: BTreeMap<String, MockDevice>,
    state: Mutex<MockState>,
}

impl MockHost {
    pub fn new() -> Self {
        Self::default()
    }

    /// Add a device
    pub fn with_device(mut self, name: &str, device: MockDevice) -> Self {
        self.devices.insert(name.to_string(), device);
        self
    }

    /// Devices that were brought up, in call order
    pub fn link_up_calls(&self) -> Vec<String> {
        self.state
            .lock()
            .map(|s| s.link_up.clone())
            .unwrap_or_default()
    }

    fn carrier(&self, name: &str, carrier: Carrier) -> std::io::Result<String> {
        let no_carrier = || Error::new(ErrorKind::InvalidInput, "Invalid argument");
        match carrier {
            Carrier::Up => Ok("1\n".to_string()),
            Carrier::Never => Err(no_carrier()),
            Carrier::Fault => Err(Error::new(ErrorKind::PermissionDenied, "Permission denied")),
            Carrier::AfterLinkUp(wanted) => {
                let mut state = self
                    .state
                    .lock()
                    .map_err(|_| Error::other("mock state poisoned"))?;
                if !state.link_up.iter().any(|d| d == name) {
                    return Err(no_carrier());
                }
                let reads = state.reads_since_up.entry(name.to_string()).or_default();
                if *reads >= wanted {
                    Ok("1\n".to_string())
                } else {
                    *reads += 1;
                    Err(no_carrier())
                }
            }
        }
    }
}

#[async_trait]
impl HostNetwork for MockHost {
    async fn devices(&self) -> Result<Vec<String>, NetconfError> {
        Ok(self.devices.keys().cloned().collect())
    }

    async fn read_attribute(&self, device: &str, attribute: &str) -> std::io::Result<String> {
        let dev = self
            .devices
            .get(device)
            .ok_or_else(|| Error::new(ErrorKind::NotFound, format!("no device {device}")))?;

        match attribute {
            "address" => Ok(format!("{}\n", dev.address)),
            "addr_assign_type" => Ok(format!("{}\n", dev.assign_type)),
            "carrier" => self.carrier(device, dev.carrier),
            other => Err(Error::new(
                ErrorKind::NotFound,
                format!("no attribute {other}"),
            )),
        }
    }

    async fn set_link_up(&self, device: &str) -> Result<(), NetconfError> {
        let mut state = self
            .state
            .lock()
            .map_err(|_| NetconfError::Command("mock state poisoned".to_string()))?;
        state.link_up.push(device.to_string());
        Ok(())
    }
}
