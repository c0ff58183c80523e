//! systemd-networkd renderer
//!
//! Generates .network files per device and .netdev files for bonds and
//! vlans.

use super::{
    DeviceConfig, Dialect, GENERATED_HEADER, PostAction, RenderContext, RenderOutput, Renderer,
};
use crate::NetconfError;
use crate::network::{NetworkType, Topology, prefix_len};
use std::fmt::Write;
use std::path::{Path, PathBuf};

/// networkd configuration directory
pub const NETWORKD_DIR: &str = "/etc/systemd/network";

/// systemd-networkd renderer
pub struct NetworkdRenderer;

impl NetworkdRenderer {
    pub fn new() -> Self {
        Self
    }

    fn netdev_path(&self, device: &str) -> PathBuf {
        Path::new(NETWORKD_DIR).join(format!("{device}.netdev"))
    }

    fn render_network_section(
        &self,
        device: &DeviceConfig<'_>,
    ) -> Result<String, NetconfError> {
        let mut content = String::new();
        writeln!(content, "{}", GENERATED_HEADER)?;

        // [Match] section
        writeln!(content, "[Match]")?;
        writeln!(content, "Name={}", device.name)?;
        writeln!(content)?;

        // [Network] section
        writeln!(content, "[Network]")?;

        let dhcp4 = device.has_type(NetworkType::Ipv4Dhcp);
        let dhcp6 = device.has_type(NetworkType::Ipv6Dhcpv6Stateful);
        if dhcp4 && dhcp6 {
            writeln!(content, "DHCP=yes")?;
        } else if dhcp4 {
            writeln!(content, "DHCP=ipv4")?;
        } else if dhcp6 {
            writeln!(content, "DHCP=ipv6")?;
        }

        if device.has_type(NetworkType::Ipv6Slaac) {
            writeln!(content, "IPv6AcceptRA=yes")?;
        }

        let statics: Vec<_> = device
            .members
            .iter()
            .filter(|m| m.interface.network_type.is_static())
            .collect();

        // Gateways
        for member in &statics {
            if let Some(route) = member.interface.default_route() {
                writeln!(content, "Gateway={}", route.gateway)?;
            }
        }

        // DNS
        if !statics.is_empty() {
            for dns in device.dns_servers {
                writeln!(content, "DNS={}", dns)?;
            }
        }

        if let Some(master) = device.primary().and_then(|m| m.bond_master()) {
            writeln!(content, "Bond={}", master)?;
        }

        for (_, vlan) in &device.vlans {
            writeln!(content, "VLAN={}", vlan)?;
        }

        let manual_only = device
            .members
            .iter()
            .all(|m| m.interface.network_type == NetworkType::Manual);
        if manual_only {
            writeln!(content, "LinkLocalAddressing=no")?;
        }

        // [Address] sections
        for member in &statics {
            if let Some(cidr) = member.interface.cidr() {
                writeln!(content)?;
                writeln!(content, "[Address]")?;
                writeln!(content, "Address={}", cidr)?;
            }
        }

        // [Route] sections
        for member in &statics {
            for route in member.interface.static_routes() {
                let prefix = prefix_len(&route.netmask).unwrap_or(0);
                writeln!(content)?;
                writeln!(content, "[Route]")?;
                writeln!(content, "Destination={}/{}", route.network, prefix)?;
                writeln!(content, "Gateway={}", route.gateway)?;
            }
        }

        Ok(content)
    }

    fn render_netdev(&self, device: &DeviceConfig<'_>) -> Result<Option<String>, NetconfError> {
        let Some(primary) = device.primary() else {
            return Ok(None);
        };
        let mut content = String::new();
        writeln!(content, "{}", GENERATED_HEADER)?;
        writeln!(content, "[NetDev]")?;
        writeln!(content, "Name={}", device.name)?;

        match &primary.interface.topology {
            Topology::Physical { .. } => return Ok(None),
            Topology::Bond {
                mode,
                miimon,
                xmit_hash_policy,
                ..
            } => {
                writeln!(content, "Kind=bond")?;
                writeln!(content)?;
                writeln!(content, "[Bond]")?;
                writeln!(content, "Mode={}", super::bond_mode_name(mode))?;
                writeln!(content, "MIIMonitorSec={}ms", miimon)?;
                if let Some(policy) = xmit_hash_policy {
                    writeln!(content, "TransmitHashPolicy={}", policy)?;
                }
            }
            Topology::Vlan { id, .. } => {
                writeln!(content, "Kind=vlan")?;
                if primary.interface.raw_macs.first() != Some(&primary.interface.mac_address) {
                    writeln!(content, "MACAddress={}", primary.interface.mac_address)?;
                }
                writeln!(content)?;
                writeln!(content, "[VLAN]")?;
                writeln!(content, "Id={}", id)?;
            }
        }
        Ok(Some(content))
    }
}

impl Default for NetworkdRenderer {
    fn default() -> Self {
        Self::new()
    }
}

impl Renderer for NetworkdRenderer {
    fn dialect(&self) -> Dialect {
        Dialect::Networkd
    }

    fn config_path(&self, device: &str) -> PathBuf {
        Path::new(NETWORKD_DIR).join(format!("{device}.network"))
    }

    fn is_virtual_config(&self, _content: &str) -> bool {
        false
    }

    /// Any existing .netdev means networkd creates the device itself
    fn is_managed_virtual(&self, ctx: &RenderContext, device: &str) -> bool {
        ctx.exists(&self.netdev_path(device))
    }

    fn render_device(
        &self,
        device: &DeviceConfig<'_>,
        out: &mut RenderOutput,
    ) -> Result<(), NetconfError> {
        out.files
            .insert(self.config_path(device.name), self.render_network_section(device)?);
        if let Some(netdev) = self.render_netdev(device)? {
            out.files.insert(self.netdev_path(device.name), netdev);
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
        writeln!(content, "{}", GENERATED_HEADER)?;
        writeln!(content, "[Match]")?;
        writeln!(content, "Name={}", device)?;
        writeln!(content)?;
        writeln!(content, "[Network]")?;
        writeln!(content, "DHCP=yes")?;
        out.files.insert(self.config_path(device), content);
        Ok(())
    }

    fn finish(&self, out: &mut RenderOutput) {
        out.actions.push(PostAction::command(&["networkctl", "reload"]));
    }
}

#[cfg(test)]
mod tests {
    use super::super::test_support::*;
    use super::super::render;
    use super::*;
    use crate::network::matcher::MatchResult;
    use pretty_assertions::assert_eq;
    use tempfile::TempDir;

    fn render_networkd(result: &MatchResult, dns: &[String]) -> RenderOutput {
        let temp = TempDir::new().unwrap();
        render(&NetworkdRenderer::new(), &RenderContext::new(temp.path()), result, dns).unwrap()
    }

    #[test]
    fn test_render_static() {
        let result = matched(
            &[physical("tap0", "aa:bb:cc:00:00:01")],
            &[static_v4("net0", "tap0")],
            &[("aa:bb:cc:00:00:01", "eth0")],
        );
        let out = render_networkd(&result, &["192.0.2.53".to_string()]);

        assert_eq!(
            out.files[Path::new("/etc/systemd/network/eth0.network")],
            "# Automatically generated, do not edit\n\
             [Match]\n\
             Name=eth0\n\
             \n\
             [Network]\n\
             Gateway=192.0.2.1\n\
             DNS=192.0.2.53\n\
             \n\
             [Address]\n\
             Address=192.0.2.10/24\n\
             \n\
             [Route]\n\
             Destination=198.51.100.0/24\n\
             Gateway=192.0.2.254\n"
        );
        assert_eq!(out.actions, vec![PostAction::command(&["networkctl", "reload"])]);
    }

    #[test]
    fn test_dhcp_collapse() {
        let result = matched(
            &[physical("tap0", "aa:bb:cc:00:00:01")],
            &[
                dhcp("net0", "tap0", NetworkType::Ipv4Dhcp),
                dhcp("net1", "tap0", NetworkType::Ipv6Dhcpv6Stateful),
            ],
            &[("aa:bb:cc:00:00:01", "eth0")],
        );
        let out = render_networkd(&result, &["192.0.2.53".to_string()]);

        let network = &out.files[Path::new("/etc/systemd/network/eth0.network")];
        assert!(network.contains("[Network]\nDHCP=yes\n"));
        assert!(!network.contains("DNS="));
    }

    #[test]
    fn test_dhcpv6_with_slaac_single_dhcp_line() {
        let result = matched(
            &[physical("tap0", "aa:bb:cc:00:00:01")],
            &[
                dhcp("net0", "tap0", NetworkType::Ipv6Dhcpv6Stateful),
                dhcp("net1", "tap0", NetworkType::Ipv6Slaac),
            ],
            &[("aa:bb:cc:00:00:01", "eth0")],
        );
        let out = render_networkd(&result, &[]);

        let network = &out.files[Path::new("/etc/systemd/network/eth0.network")];
        assert_eq!(network.matches("DHCP=").count(), 1);
        assert!(network.contains("[Network]\nDHCP=ipv6\nIPv6AcceptRA=yes\n"));
    }

    #[test]
    fn test_bond_and_vlan_netdevs() {
        let out = render_networkd(&bonded(), &[]);

        assert_eq!(
            out.files[Path::new("/etc/systemd/network/bond0.netdev")],
            "# Automatically generated, do not edit\n\
             [NetDev]\n\
             Name=bond0\n\
             Kind=bond\n\
             \n\
             [Bond]\n\
             Mode=active-backup\n\
             MIIMonitorSec=100ms\n"
        );
        assert!(out.files[Path::new("/etc/systemd/network/bond0.network")].contains("VLAN=bond0.200\n"));
        assert!(out.files[Path::new("/etc/systemd/network/bond0.200.netdev")].contains("Kind=vlan\n\n[VLAN]\nId=200\n"));

        let slave = &out.files[Path::new("/etc/systemd/network/eth1.network")];
        assert!(slave.contains("Bond=bond0\nLinkLocalAddressing=no\n"));
        assert!(!out.files.contains_key(Path::new("/etc/systemd/network/eth1.netdev")));
    }

    #[test]
    fn test_existing_netdev_is_managed() {
        let temp = TempDir::new().unwrap();
        std::fs::create_dir_all(temp.path().join("etc/systemd/network")).unwrap();
        std::fs::write(temp.path().join("etc/systemd/network/br0.netdev"), "[NetDev]\n").unwrap();

        let ctx = RenderContext::new(temp.path());
        let renderer = NetworkdRenderer::new();
        assert!(renderer.is_managed_virtual(&ctx, "br0"));
        assert!(!renderer.is_managed_virtual(&ctx, "eth0"));
    }

    #[test]
    fn test_nothing_to_do_no_reload() {
        let out = render_networkd(&MatchResult::default(), &[]);
        assert!(out.is_empty());
    }
}
