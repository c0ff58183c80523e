//! sysfs-backed host network
//!
//! Reads `/sys/class/net/<dev>/<attr>` (under a configurable root) and uses
//! `ip link set` to bring devices up.

use super::HostNetwork;
use crate::NetconfError;
use async_trait::async_trait;
use std::path::{Path, PathBuf};
use tokio::fs;
use tracing::debug;

/// Kernel device directory, relative to the filesystem root
pub const SYS_CLASS_NET: &str = "sys/class/net";

/// Host network backed by sysfs
#[derive(Debug, Clone)]
pub struct SysfsHost {
    sys_root: PathBuf,
}

impl SysfsHost {
    /// Host rooted at `root` (normally `/`)
    pub fn new(root: impl AsRef<Path>) -> Self {
        Self {
            sys_root: root.as_ref().join(SYS_CLASS_NET),
        }
    }
}

#[async_trait]
impl HostNetwork for SysfsHost {
    async fn devices(&self) -> Result<Vec<String>, NetconfError> {
        let mut names = Vec::new();
        let mut read_dir = fs::read_dir(&self.sys_root).await?;
        while let Some(entry) = read_dir.next_entry().await? {
            if let Some(name) = entry.file_name().to_str() {
                names.push(name.to_string());
            }
        }
        names.sort();
        Ok(names)
    }

    async fn read_attribute(&self, device: &str, attribute: &str) -> std::io::Result<String> {
        fs::read_to_string(self.sys_root.join(device).join(attribute)).await
    }

    async fn set_link_up(&self, device: &str) -> Result<(), NetconfError> {
        debug!("Running: ip link set dev {} up", device);

        let output = tokio::process::Command::new("ip")
            .args(["link", "set", "dev", device, "up"])
            .output()
            .await
            .map_err(|e| NetconfError::Command(format!("ip link set dev {device} up: {e}")))?;

        if !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr);
            return Err(NetconfError::Command(format!(
                "ip link set dev {} up failed: {}",
                device,
                stderr.trim()
            )));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[tokio::test]
    async fn test_reads_fake_sysfs() {
        let temp = TempDir::new().unwrap();
        let dev = temp.path().join(SYS_CLASS_NET).join("eth0");
        fs::create_dir_all(&dev).await.unwrap();
        fs::write(dev.join("address"), "aa:bb:cc:00:00:01\n")
            .await
            .unwrap();
        fs::create_dir_all(temp.path().join(SYS_CLASS_NET).join("eth1"))
            .await
            .unwrap();

        let host = SysfsHost::new(temp.path());
        assert_eq!(host.devices().await.unwrap(), vec!["eth0", "eth1"]);
        assert_eq!(
            host.read_attribute("eth0", "address").await.unwrap().trim(),
            "aa:bb:cc:00:00:01"
        );
        assert!(host.read_attribute("eth0", "carrier").await.is_err());
    }
}
