//! Runtime settings
//!
//! Settings come from an optional YAML file plus drop-ins (see [`loader`]),
//! and command-line flags are layered on top by the binary.

pub mod loader;

use serde::Deserialize;
use std::path::{Path, PathBuf};
use std::time::Duration;

pub use loader::{SettingsLoader, load_settings};

/// Default settings file location
pub const DEFAULT_SETTINGS_PATH: &str = "/etc/configdrive-net/config.yaml";

/// Device name prefixes never probed (loopback, tunnels, bonding control)
pub const DEFAULT_IGNORE_PREFIXES: &[&str] = &[
    "lo",
    "sit",
    "tunl",
    "bonding_masters",
    "teql",
    "ip6gre",
    "ip6_vti",
    "ip6tnl",
    "bond",
    "tun",
    "tap",
];

/// Selectable behavior for one run
#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(default)]
pub struct Settings {
    /// Distribution override; detected from os-release when unset
    pub distro: Option<String>,

    /// Restrict processing to one kernel device
    pub interface: Option<String>,

    /// Do not generate resolv.conf
    pub skip_dns: bool,

    /// Do not generate any network file
    pub skip_network: bool,

    /// Preview output instead of touching the filesystem
    pub noop: bool,

    /// Filesystem root everything else is resolved against
    pub root: PathBuf,

    /// Config-drive mount point, relative to `root`
    pub config_drive: PathBuf,

    /// Delay between carrier checks
    pub carrier_poll_interval_ms: u64,

    /// Carrier checks before a device is given up on
    pub carrier_max_attempts: u32,

    /// Lock file, relative to `root`
    pub lock_path: PathBuf,

    /// Seconds to wait for another run to release the lock
    pub lock_timeout_secs: u64,

    /// Device name prefixes excluded from probing
    pub ignore_prefixes: Vec<String>,
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            distro: None,
            interface: None,
            skip_dns: false,
            skip_network: false,
            noop: false,
            root: PathBuf::from("/"),
            config_drive: PathBuf::from("mnt/config"),
            carrier_poll_interval_ms: 50,
            carrier_max_attempts: 100,
            lock_path: PathBuf::from("run/lock/configdrive-net.lock"),
            lock_timeout_secs: 300,
            ignore_prefixes: DEFAULT_IGNORE_PREFIXES
                .iter()
                .map(|p| p.to_string())
                .collect(),
        }
    }
}

impl Settings {
    /// Parse settings from YAML
    pub fn from_yaml(yaml: &str) -> Result<Self, serde_yaml::Error> {
        serde_yaml::from_str(yaml)
    }

    /// Resolve an absolute target path under the configured root
    pub fn rooted(&self, path: impl AsRef<Path>) -> PathBuf {
        rooted(&self.root, path)
    }

    /// Absolute path of the mounted config-drive
    pub fn config_drive_dir(&self) -> PathBuf {
        self.rooted(&self.config_drive)
    }

    /// Absolute path of the lock file
    pub fn lock_file(&self) -> PathBuf {
        self.rooted(&self.lock_path)
    }

    pub fn carrier_poll_interval(&self) -> Duration {
        Duration::from_millis(self.carrier_poll_interval_ms)
    }

    pub fn lock_timeout(&self) -> Duration {
        Duration::from_secs(self.lock_timeout_secs)
    }
}

/// Join `path` under `root`, treating absolute paths as root-relative
pub fn rooted(root: &Path, path: impl AsRef<Path>) -> PathBuf {
    let path = path.as_ref();
    root.join(path.strip_prefix("/").unwrap_or(path))
}
