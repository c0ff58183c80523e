//! Debian ENI (Ethernet Network Interfaces) renderer
//!
//! Generates one `/etc/network/interfaces.d/<dev>.cfg` per device and makes
//! sure the main interfaces file sources that directory.

use super::{DeviceConfig, Dialect, RenderContext, RenderOutput, Renderer};
use crate::NetconfError;
use crate::network::matcher::MatchedInterface;
use crate::network::{NetworkType, Route, Topology, prefix_len};
use std::fmt::Write;
use std::path::{Path, PathBuf};
use tracing::warn;

/// Main ifupdown configuration file
pub const INTERFACES_PATH: &str = "/etc/network/interfaces";

/// Directory holding per-device stanzas
pub const INTERFACES_D: &str = "/etc/network/interfaces.d";

const SOURCE_LINE: &str = "source /etc/network/interfaces.d/*.cfg";

/// Debian ENI renderer
pub struct EniRenderer;

impl EniRenderer {
    pub fn new() -> Self {
        Self
    }

    fn render_stanza(
        &self,
        content: &mut String,
        device: &DeviceConfig<'_>,
        member: &MatchedInterface,
        with_topology: bool,
    ) -> Result<bool, NetconfError> {
        let name = device.name;
        let interface = &member.interface;

        match interface.network_type {
            NetworkType::Ipv4Dhcp => writeln!(content, "iface {} inet dhcp", name)?,
            NetworkType::Ipv6Slaac => writeln!(content, "iface {} inet6 auto", name)?,
            NetworkType::Ipv6Dhcpv6Stateful => writeln!(content, "iface {} inet6 dhcp", name)?,
            NetworkType::Manual => writeln!(content, "iface {} inet manual", name)?,
            NetworkType::Ipv4 | NetworkType::Ipv6 => {
                let v6 = interface.network_type == NetworkType::Ipv6;
                let (Some(ip), Some(mask)) = (&interface.ip_address, &interface.netmask) else {
                    warn!(
                        "Static network {} has no address or netmask, skipping",
                        interface.id
                    );
                    return Ok(false);
                };
                let family = if v6 { "inet6" } else { "inet" };
                writeln!(content, "iface {} {} static", name, family)?;
                writeln!(content, "    address {}", ip)?;
                if v6 {
                    let prefix = prefix_len(mask).map_or(mask.clone(), |p| p.to_string());
                    writeln!(content, "    netmask {}", prefix)?;
                } else {
                    writeln!(content, "    netmask {}", ipv4_netmask(mask))?;
                }
                if let Some(route) = interface.default_route() {
                    writeln!(content, "    gateway {}", route.gateway)?;
                }
                for route in interface.static_routes() {
                    self.render_route(content, route)?;
                }
            }
            NetworkType::Unknown => return Ok(false),
        }

        if with_topology {
            self.render_topology(content, member)?;
        }
        Ok(true)
    }

    fn render_route(&self, content: &mut String, route: &Route) -> Result<(), NetconfError> {
        if route.is_ipv6() {
            let prefix = prefix_len(&route.netmask).unwrap_or(128);
            writeln!(
                content,
                "    post-up route -A inet6 add {}/{} gw {} || true",
                route.network, prefix, route.gateway
            )?;
            writeln!(
                content,
                "    pre-down route -A inet6 del {}/{} gw {} || true",
                route.network, prefix, route.gateway
            )?;
        } else {
            writeln!(
                content,
                "    post-up route add -net {} netmask {} gw {} || true",
                route.network,
                ipv4_netmask(&route.netmask),
                route.gateway
            )?;
            writeln!(
                content,
                "    pre-down route del -net {} netmask {} gw {} || true",
                route.network,
                ipv4_netmask(&route.netmask),
                route.gateway
            )?;
        }
        Ok(())
    }

    /// Bond and vlan options, attached to the first stanza written for a device
    fn render_topology(
        &self,
        content: &mut String,
        member: &MatchedInterface,
    ) -> Result<(), NetconfError> {
        if let Some(raw) = &member.vlan_raw_device {
            writeln!(content, "    vlan-raw-device {}", raw)?;
        }

        match &member.interface.topology {
            Topology::Physical {
                bond_master: Some(master),
            } => {
                writeln!(content, "    bond-master {}", master)?;
            }
            Topology::Bond {
                mode,
                miimon,
                xmit_hash_policy,
                ..
            } => {
                let slaves = if member.slave_devices.is_empty() {
                    "none".to_string()
                } else {
                    member.slave_devices.join(" ")
                };
                writeln!(content, "    bond-mode {}", super::bond_mode_name(mode))?;
                writeln!(content, "    bond-miimon {}", miimon)?;
                if let Some(policy) = xmit_hash_policy {
                    writeln!(content, "    bond-xmit-hash-policy {}", policy)?;
                }
                writeln!(content, "    bond-slaves {}", slaves)?;
                if !member.slave_devices.is_empty() {
                    writeln!(content, "    up ifenslave {} {}", member.device, slaves)?;
                    writeln!(content, "    down ifenslave -d {} {}", member.device, slaves)?;
                }
            }
            _ => {}
        }
        Ok(())
    }
}

impl Default for EniRenderer {
    fn default() -> Self {
        Self::new()
    }
}

impl Renderer for EniRenderer {
    fn dialect(&self) -> Dialect {
        Dialect::Debian
    }

    fn config_path(&self, device: &str) -> PathBuf {
        Path::new(INTERFACES_D).join(format!("{device}.cfg"))
    }

    fn is_virtual_config(&self, content: &str) -> bool {
        content.contains("vlan-raw-device") || content.contains("bridge_ports")
    }

    /// Make sure the main file brings up loopback and sources per-device
    /// files, keeping whatever it already holds
    fn render_base(
        &self,
        ctx: &RenderContext,
        out: &mut RenderOutput,
    ) -> Result<(), NetconfError> {
        let path = Path::new(INTERFACES_PATH);
        match ctx.read(path) {
            Some(existing) if has_source_line(&existing) => {}
            Some(existing) => {
                let mut content = existing;
                if !content.is_empty() && !content.ends_with('\n') {
                    content.push('\n');
                }
                writeln!(content, "{}", SOURCE_LINE)?;
                out.files.insert(path.to_path_buf(), content);
            }
            None => {
                let mut content = String::new();
                writeln!(content, "auto lo")?;
                writeln!(content, "iface lo inet loopback")?;
                writeln!(content, "{}", SOURCE_LINE)?;
                out.files.insert(path.to_path_buf(), content);
            }
        }
        Ok(())
    }

    fn render_device(
        &self,
        device: &DeviceConfig<'_>,
        out: &mut RenderOutput,
    ) -> Result<(), NetconfError> {
        let mut content = String::new();
        writeln!(content, "auto {}", device.name)?;
        let before = content.len();

        let mut topology_written = false;
        for member in &device.members {
            if self.render_stanza(&mut content, device, member, !topology_written)? {
                topology_written = true;
            }
        }

        if content.len() > before {
            out.files.insert(self.config_path(device.name), content);
        }
        Ok(())
    }

    fn render_dhcp(
        &self,
        device: &str,
        _mac: &str,
        out: &mut RenderOutput,
    ) -> Result<(), NetconfError> {
        let mut content = String::new();
        writeln!(content, "auto {}", device)?;
        writeln!(content, "iface {} inet dhcp", device)?;
        out.files.insert(self.config_path(device), content);
        Ok(())
    }
}

fn has_source_line(content: &str) -> bool {
    content.lines().any(|line| {
        let line = line.trim();
        (line.starts_with("source ") || line.starts_with("source-directory "))
            && line.contains(INTERFACES_D)
    })
}

/// Dotted netmask for a v4 mask given either dotted or as a prefix length
fn ipv4_netmask(netmask: &str) -> String {
    match netmask.parse::<u8>() {
        Ok(prefix) => prefix_to_netmask(prefix),
        Err(_) => netmask.to_string(),
    }
}

fn prefix_to_netmask(prefix: u8) -> String {
    let mask: u32 = if prefix >= 32 {
        0xffffffff
    } else if prefix == 0 {
        0
    } else {
        0xffffffff << (32 - prefix)
    };
    std::net::Ipv4Addr::from(mask).to_string()
}

#[cfg(test)]
mod tests {
    use super::super::test_support::*;
    use super::super::{RenderContext, render};
    use super::*;
    use pretty_assertions::assert_eq;
    use tempfile::TempDir;

    fn render_in(temp: &TempDir, result: &crate::network::matcher::MatchResult) -> RenderOutput {
        render(&EniRenderer::new(), &RenderContext::new(temp.path()), result, &[]).unwrap()
    }

    fn file<'a>(out: &'a RenderOutput, path: &str) -> &'a str {
        out.files
            .get(Path::new(path))
            .map(String::as_str)
            .unwrap_or_else(|| panic!("{path} not rendered"))
    }

    #[test]
    fn test_render_static() {
        let temp = TempDir::new().unwrap();
        let result = matched(
            &[physical("tap0", "aa:bb:cc:00:00:01")],
            &[static_v4("net0", "tap0")],
            &[("aa:bb:cc:00:00:01", "eth0")],
        );
        let out = render_in(&temp, &result);

        assert_eq!(
            file(&out, "/etc/network/interfaces.d/eth0.cfg"),
            "auto eth0\n\
             iface eth0 inet static\n    \
             address 192.0.2.10\n    \
             netmask 255.255.255.0\n    \
             gateway 192.0.2.1\n    \
             post-up route add -net 198.51.100.0 netmask 255.255.255.0 gw 192.0.2.254 || true\n    \
             pre-down route del -net 198.51.100.0 netmask 255.255.255.0 gw 192.0.2.254 || true\n"
        );
        assert_eq!(
            file(&out, INTERFACES_PATH),
            "auto lo\niface lo inet loopback\nsource /etc/network/interfaces.d/*.cfg\n"
        );
    }

    #[test]
    fn test_render_dhcp_and_fallback() {
        let temp = TempDir::new().unwrap();
        let result = matched(
            &[physical("tap0", "aa:bb:cc:00:00:01")],
            &[dhcp("net0", "tap0", NetworkType::Ipv4Dhcp)],
            &[("aa:bb:cc:00:00:01", "eth0"), ("aa:bb:cc:00:00:02", "eth1")],
        );
        let out = render_in(&temp, &result);

        assert_eq!(
            file(&out, "/etc/network/interfaces.d/eth0.cfg"),
            "auto eth0\niface eth0 inet dhcp\n"
        );
        assert_eq!(
            file(&out, "/etc/network/interfaces.d/eth1.cfg"),
            "auto eth1\niface eth1 inet dhcp\n"
        );
    }

    #[test]
    fn test_render_dual_stack_one_file() {
        let temp = TempDir::new().unwrap();
        let result = matched(
            &[physical("tap0", "aa:bb:cc:00:00:01")],
            &[static_v4("net0", "tap0"), static_v6("net1", "tap0")],
            &[("aa:bb:cc:00:00:01", "eth0")],
        );
        let out = render_in(&temp, &result);

        let content = file(&out, "/etc/network/interfaces.d/eth0.cfg");
        assert_eq!(content.matches("auto eth0").count(), 1);
        assert!(content.contains("iface eth0 inet static"));
        assert!(content.contains("iface eth0 inet6 static\n    address 2001:db8::10\n    netmask 64\n    gateway 2001:db8::1\n"));
    }

    #[test]
    fn test_render_ipv6_modes() {
        let temp = TempDir::new().unwrap();
        let result = matched(
            &[
                physical("tap0", "aa:bb:cc:00:00:01"),
                physical("tap1", "aa:bb:cc:00:00:02"),
            ],
            &[
                dhcp("net0", "tap0", NetworkType::Ipv6Slaac),
                dhcp("net1", "tap1", NetworkType::Ipv6Dhcpv6Stateful),
            ],
            &[("aa:bb:cc:00:00:01", "eth0"), ("aa:bb:cc:00:00:02", "eth1")],
        );
        let out = render_in(&temp, &result);

        assert!(file(&out, "/etc/network/interfaces.d/eth0.cfg").contains("iface eth0 inet6 auto"));
        assert!(file(&out, "/etc/network/interfaces.d/eth1.cfg").contains("iface eth1 inet6 dhcp"));
    }

    #[test]
    fn test_topology_follows_first_written_stanza() {
        let temp = TempDir::new().unwrap();
        let result = matched(
            &[physical("tap0", "aa:bb:cc:00:00:01"), vlan("vlan0", "tap0", 42)],
            &[
                dhcp("net0", "vlan0", NetworkType::Ipv4),
                dhcp("net1", "vlan0", NetworkType::Ipv4Dhcp),
            ],
            &[("aa:bb:cc:00:00:01", "eth0")],
        );
        let out = render_in(&temp, &result);

        assert_eq!(
            file(&out, "/etc/network/interfaces.d/eth0.42.cfg"),
            "auto eth0.42\niface eth0.42 inet dhcp\n    vlan-raw-device eth0\n"
        );
    }

    #[test]
    fn test_render_bond_and_vlan() {
        let temp = TempDir::new().unwrap();
        let out = render_in(&temp, &bonded());

        let bond = file(&out, "/etc/network/interfaces.d/bond0.cfg");
        assert!(bond.contains("iface bond0 inet static"));
        assert!(bond.contains(
            "    bond-mode active-backup\n    \
             bond-miimon 100\n    \
             bond-slaves eth0 eth1\n    \
             up ifenslave bond0 eth0 eth1\n    \
             down ifenslave -d bond0 eth0 eth1\n"
        ));

        assert_eq!(
            file(&out, "/etc/network/interfaces.d/eth0.cfg"),
            "auto eth0\niface eth0 inet manual\n    bond-master bond0\n"
        );
        assert_eq!(
            file(&out, "/etc/network/interfaces.d/bond0.200.cfg"),
            "auto bond0.200\niface bond0.200 inet dhcp\n    vlan-raw-device bond0\n"
        );
    }

    #[test]
    fn test_existing_interfaces_file_kept() {
        let temp = TempDir::new().unwrap();
        std::fs::create_dir_all(temp.path().join("etc/network")).unwrap();
        std::fs::write(
            temp.path().join("etc/network/interfaces"),
            "auto lo\niface lo inet loopback",
        )
        .unwrap();
        let out = render_in(&temp, &Default::default());
        assert_eq!(
            file(&out, INTERFACES_PATH),
            "auto lo\niface lo inet loopback\nsource /etc/network/interfaces.d/*.cfg\n"
        );

        std::fs::write(
            temp.path().join("etc/network/interfaces"),
            "source-directory /etc/network/interfaces.d\n",
        )
        .unwrap();
        assert!(render_in(&temp, &Default::default()).is_empty());
    }

    #[test]
    fn test_prefix_to_netmask() {
        assert_eq!(prefix_to_netmask(24), "255.255.255.0");
        assert_eq!(prefix_to_netmask(16), "255.255.0.0");
        assert_eq!(prefix_to_netmask(25), "255.255.255.128");
        assert_eq!(prefix_to_netmask(32), "255.255.255.255");
        assert_eq!(prefix_to_netmask(0), "0.0.0.0");
        assert_eq!(ipv4_netmask("255.255.0.0"), "255.255.0.0");
    }
}
