//! Network configuration renderers
//!
//! Converts matched interfaces to distribution-native configuration files.
//!
//! Supported dialects:
//! - `debian` - ifupdown (/etc/network/interfaces.d/*.cfg)
//! - `redhat` - initscripts (/etc/sysconfig/network-scripts/ifcfg-*)
//! - `suse` - wicked (/etc/sysconfig/network/ifcfg-*)
//! - `gentoo` - netifrc (/etc/conf.d/net.*)
//! - `networkd` - systemd-networkd (/etc/systemd/network/*.network)
//!
//! Rendering is pure: it reads the target root to find devices that are
//! already configured, and returns files plus follow-up actions without
//! touching anything.

pub mod eni;
pub mod networkd;
pub mod openrc;
pub mod resolv;
pub mod sysconfig;

use super::NetworkType;
use super::matcher::{MatchResult, MatchedInterface};
use crate::NetconfError;
use crate::config::rooted;
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use tracing::{debug, info, warn};

/// Header written at the top of generated files
pub const GENERATED_HEADER: &str = "# Automatically generated, do not edit";

/// Distribution configuration dialects
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Dialect {
    /// Debian/Ubuntu ifupdown
    Debian,
    /// RHEL/CentOS/Fedora initscripts
    RedHat,
    /// SUSE/openSUSE wicked
    Suse,
    /// Gentoo netifrc
    Gentoo,
    /// systemd-networkd
    Networkd,
}

impl Dialect {
    /// Map a distribution name (or `ID`/`ID_LIKE` token) to a dialect
    pub fn from_distro(name: &str) -> Option<Self> {
        let name = name.trim().trim_matches('"').to_lowercase();
        match name.as_str() {
            "debian" | "ubuntu" | "eni" => Some(Self::Debian),
            "redhat" | "rhel" | "centos" | "fedora" | "rocky" | "almalinux" | "ol" => {
                Some(Self::RedHat)
            }
            "gentoo" => Some(Self::Gentoo),
            "networkd" | "systemd-networkd" | "arch" => Some(Self::Networkd),
            n if n == "suse" || n == "sles" || n.starts_with("opensuse") => Some(Self::Suse),
            _ => None,
        }
    }

    /// Detect the dialect of the system under `root`
    ///
    /// `os-release` is consulted first (`ID`, then each `ID_LIKE` token);
    /// failing that, the presence of each dialect's configuration
    /// directory decides.
    pub fn detect(root: &Path) -> Option<Self> {
        if let Ok(os_release) = std::fs::read_to_string(rooted(root, "/etc/os-release")) {
            let field = |key: &str| {
                os_release.lines().find_map(|line| {
                    line.strip_prefix(key)
                        .and_then(|rest| rest.strip_prefix('='))
                        .map(|value| value.trim().trim_matches('"').to_string())
                })
            };
            let id = field("ID");
            let id_like = field("ID_LIKE").unwrap_or_default();
            let detected = id
                .iter()
                .map(String::as_str)
                .chain(id_like.split_whitespace())
                .find_map(Self::from_distro);
            if let Some(dialect) = detected {
                debug!("Detected {:?} from os-release", dialect);
                return Some(dialect);
            }
        }

        let probes = [
            ("/etc/network/interfaces", Self::Debian),
            ("/etc/sysconfig/network-scripts", Self::RedHat),
            ("/etc/sysconfig/network", Self::Suse),
            ("/etc/conf.d", Self::Gentoo),
            ("/etc/systemd/network", Self::Networkd),
        ];
        probes
            .into_iter()
            .find(|(path, _)| rooted(root, path).exists())
            .map(|(_, dialect)| dialect)
    }

    /// Renderer for this dialect
    pub fn renderer(self) -> Box<dyn Renderer> {
        match self {
            Self::Debian => Box::new(eni::EniRenderer::new()),
            Self::RedHat => Box::new(sysconfig::SysconfigRenderer::redhat()),
            Self::Suse => Box::new(sysconfig::SysconfigRenderer::suse()),
            Self::Gentoo => Box::new(openrc::OpenRcRenderer::new()),
            Self::Networkd => Box::new(networkd::NetworkdRenderer::new()),
        }
    }
}

impl std::str::FromStr for Dialect {
    type Err = NetconfError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::from_distro(s).ok_or_else(|| NetconfError::UnknownDialect(s.to_string()))
    }
}

/// Read-only view of the target filesystem
#[derive(Debug, Clone)]
pub struct RenderContext {
    root: PathBuf,
}

impl RenderContext {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    /// Whether an absolute target path exists under the root
    ///
    /// Dangling symlinks count as existing.
    pub fn exists(&self, path: &Path) -> bool {
        rooted(&self.root, path).symlink_metadata().is_ok()
    }

    /// Contents of an absolute target path, if readable
    pub fn read(&self, path: &Path) -> Option<String> {
        std::fs::read_to_string(rooted(&self.root, path)).ok()
    }
}

/// Something to do once files are in place
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PostAction {
    /// Create `link` pointing at `target` unless `link` already exists
    Symlink { link: PathBuf, target: PathBuf },
    /// Run a command; failures are logged, not fatal
    Command(Vec<String>),
}

impl PostAction {
    pub fn command(args: &[&str]) -> Self {
        Self::Command(args.iter().map(|a| a.to_string()).collect())
    }
}

/// Files and follow-up actions produced by one render
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RenderOutput {
    /// Absolute target path → content
    pub files: BTreeMap<PathBuf, String>,
    pub actions: Vec<PostAction>,
}

impl RenderOutput {
    /// Append to a file, creating it if needed
    pub fn append(&mut self, path: impl Into<PathBuf>, content: &str) {
        self.files.entry(path.into()).or_default().push_str(content);
    }

    pub fn is_empty(&self) -> bool {
        self.files.is_empty() && self.actions.is_empty()
    }
}

/// One device and everything declared on it
#[derive(Debug, Clone)]
pub struct DeviceConfig<'a> {
    pub name: &'a str,
    /// Interfaces rendered on this device, in interface id order
    pub members: Vec<&'a MatchedInterface>,
    /// Vlans stacked on this device, as (vlan id, vlan device)
    pub vlans: Vec<(u16, &'a str)>,
    pub dns_servers: &'a [String],
}

impl<'a> DeviceConfig<'a> {
    /// The interface whose topology describes the device
    pub fn primary(&self) -> Option<&'a MatchedInterface> {
        self.members.first().copied()
    }

    /// Members of one address family (manual counts as IPv4)
    pub fn family(&self, ipv6: bool) -> impl Iterator<Item = &'a MatchedInterface> + '_ {
        self.members
            .iter()
            .copied()
            .filter(move |m| is_ipv6(m.interface.network_type) == ipv6)
    }

    pub fn has_type(&self, network_type: NetworkType) -> bool {
        self.members
            .iter()
            .any(|m| m.interface.network_type == network_type)
    }
}

/// Whether a network type configures IPv6
pub fn is_ipv6(network_type: NetworkType) -> bool {
    matches!(
        network_type,
        NetworkType::Ipv6 | NetworkType::Ipv6Slaac | NetworkType::Ipv6Dhcpv6Stateful
    )
}

/// Normalize a bond mode to its kernel name (providers may send numbers)
pub fn bond_mode_name(mode: &str) -> &str {
    match mode {
        "balance-rr" | "0" => "balance-rr",
        "active-backup" | "1" => "active-backup",
        "balance-xor" | "2" => "balance-xor",
        "broadcast" | "3" => "broadcast",
        "802.3ad" | "4" => "802.3ad",
        "balance-tlb" | "5" => "balance-tlb",
        "balance-alb" | "6" => "balance-alb",
        _ => mode,
    }
}

/// Trait for dialect renderers
pub trait Renderer: Send + Sync {
    /// Dialect this renderer writes
    fn dialect(&self) -> Dialect;

    /// File whose presence means `device` is already configured
    fn config_path(&self, device: &str) -> PathBuf;

    /// Whether an existing config file describes a vlan or bridge
    fn is_virtual_config(&self, content: &str) -> bool;

    /// Whether the OS already manages `device` as a vlan or bridge
    fn is_managed_virtual(&self, ctx: &RenderContext, device: &str) -> bool {
        ctx.read(&self.config_path(device))
            .is_some_and(|content| self.is_virtual_config(&content))
    }

    /// Files that must exist regardless of devices
    fn render_base(
        &self,
        _ctx: &RenderContext,
        _out: &mut RenderOutput,
    ) -> Result<(), NetconfError> {
        Ok(())
    }

    /// Render one declared device
    fn render_device(
        &self,
        device: &DeviceConfig<'_>,
        out: &mut RenderOutput,
    ) -> Result<(), NetconfError>;

    /// Render DHCP for a device nobody declared
    fn render_dhcp(
        &self,
        device: &str,
        mac: &str,
        out: &mut RenderOutput,
    ) -> Result<(), NetconfError>;

    /// Actions to run once after all files are written
    fn finish(&self, _out: &mut RenderOutput) {}
}

/// Render every matched device plus DHCP for unclaimed ones
///
/// Devices that already have a configuration file under the root are left
/// alone, so a second run over the same root produces no device files.
pub fn render(
    renderer: &dyn Renderer,
    ctx: &RenderContext,
    matched: &MatchResult,
    dns_servers: &[String],
) -> Result<RenderOutput, NetconfError> {
    debug!("Rendering {:?} configuration", renderer.dialect());
    let mut out = RenderOutput::default();
    renderer.render_base(ctx, &mut out)?;

    let mut rendered: Vec<&str> = Vec::new();
    for (name, members) in matched.by_device() {
        if ctx.exists(&renderer.config_path(name)) {
            info!("Skipping {}, it is already configured", name);
            continue;
        }

        let members: Vec<&MatchedInterface> = members
            .into_iter()
            .filter(|m| {
                let known = m.interface.network_type != NetworkType::Unknown;
                if !known {
                    warn!(
                        "Network {} on {} has an unsupported type, skipping",
                        m.interface.id, name
                    );
                }
                known
            })
            .collect();
        if members.is_empty() {
            continue;
        }

        let device = DeviceConfig {
            name,
            members,
            vlans: matched.vlans_on(name),
            dns_servers,
        };
        debug!("Rendering {} ({} networks)", name, device.members.len());
        renderer.render_device(&device, &mut out)?;
        rendered.push(name);
    }

    let mut unclaimed: Vec<(&String, &String)> = matched.unclaimed.iter().collect();
    unclaimed.sort_by(|a, b| a.1.cmp(b.1));
    for (mac, name) in unclaimed {
        if rendered.contains(&name.as_str()) || ctx.exists(&renderer.config_path(name)) {
            continue;
        }
        info!("No network declared for {}, using DHCP", name);
        renderer.render_dhcp(name, mac, &mut out)?;
    }

    out.files.retain(|path, content| {
        if content.is_empty() {
            debug!("Omitting empty {}", path.display());
        }
        !content.is_empty()
    });
    if !out.files.is_empty() {
        renderer.finish(&mut out);
    }
    Ok(out)
}
