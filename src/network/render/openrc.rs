//! Gentoo netifrc renderer
//!
//! Writes `/etc/conf.d/net.<dev>` and arranges for an OpenRC service per
//! device (a `net.<dev>` symlink to `net.lo`, enabled in the default
//! runlevel).

use super::{DeviceConfig, Dialect, GENERATED_HEADER, PostAction, RenderOutput, Renderer};
use crate::NetconfError;
use crate::network::{NetworkType, Topology, prefix_len};
use std::fmt::Write;
use std::path::{Path, PathBuf};

const CONF_D: &str = "/etc/conf.d";
const INIT_D: &str = "/etc/init.d";

/// Gentoo netifrc renderer
pub struct OpenRcRenderer;

impl OpenRcRenderer {
    pub fn new() -> Self {
        Self
    }

    /// Service symlink and runlevel registration for one device
    fn enable_service(&self, device: &str, out: &mut RenderOutput) {
        let service = format!("net.{device}");
        out.actions.push(PostAction::Symlink {
            link: Path::new(INIT_D).join(&service),
            target: PathBuf::from("net.lo"),
        });
        out.actions
            .push(PostAction::command(&["rc-update", "add", &service, "default"]));
    }
}

impl Default for OpenRcRenderer {
    fn default() -> Self {
        Self::new()
    }
}

impl Renderer for OpenRcRenderer {
    fn dialect(&self) -> Dialect {
        Dialect::Gentoo
    }

    fn config_path(&self, device: &str) -> PathBuf {
        Path::new(CONF_D).join(format!("net.{device}"))
    }

    fn is_virtual_config(&self, content: &str) -> bool {
        content.contains("vlan") || content.contains("bridge")
    }

    fn render_device(
        &self,
        device: &DeviceConfig<'_>,
        out: &mut RenderOutput,
    ) -> Result<(), NetconfError> {
        let Some(primary) = device.primary() else {
            return Ok(());
        };
        let var = shell_name(device.name);
        let mut config = Vec::new();
        let mut routes = Vec::new();

        for member in &device.members {
            let interface = &member.interface;
            match interface.network_type {
                NetworkType::Ipv4 => {
                    if let (Some(ip), Some(mask)) = (&interface.ip_address, &interface.netmask) {
                        config.push(format!("{ip} netmask {mask}"));
                    }
                }
                NetworkType::Ipv6 => {
                    if let Some(cidr) = interface.cidr() {
                        config.push(cidr);
                    }
                }
                NetworkType::Ipv4Dhcp | NetworkType::Ipv6Dhcpv6Stateful => {
                    if !config.iter().any(|c| c == "dhcp") {
                        config.push("dhcp".to_string());
                    }
                }
                NetworkType::Ipv6Slaac | NetworkType::Manual | NetworkType::Unknown => {}
            }

            if interface.network_type.is_static() {
                for route in &interface.routes {
                    if route.is_default() {
                        routes.push(format!("default via {}", route.gateway));
                    } else {
                        let prefix = prefix_len(&route.netmask).unwrap_or(0);
                        routes.push(format!("{}/{} via {}", route.network, prefix, route.gateway));
                    }
                }
            }
        }

        let mut content = String::new();
        writeln!(content, "{}", GENERATED_HEADER)?;
        if config.is_empty() {
            config.push("null".to_string());
        }
        writeln!(content, "config_{}=\"{}\"", var, config.join("\n"))?;
        if !routes.is_empty() {
            writeln!(content, "routes_{}=\"{}\"", var, routes.join("\n"))?;
        }

        match &primary.interface.topology {
            Topology::Physical { .. } => {
                writeln!(content, "mac_{}=\"{}\"", var, primary.interface.mac_address)?;
            }
            Topology::Bond {
                mode,
                miimon,
                xmit_hash_policy,
                ..
            } => {
                writeln!(content, "slaves_{}=\"{}\"", var, primary.slave_devices.join(" "))?;
                writeln!(content, "mode_{}=\"{}\"", var, super::bond_mode_name(mode))?;
                writeln!(content, "miimon_{}=\"{}\"", var, miimon)?;
                if let Some(policy) = xmit_hash_policy {
                    writeln!(content, "xmit_hash_policy_{}=\"{}\"", var, policy)?;
                }
                let needs: Vec<String> = primary
                    .slave_devices
                    .iter()
                    .map(|s| format!("net.{s}"))
                    .collect();
                if !needs.is_empty() {
                    writeln!(content, "rc_net_{}_need=\"{}\"", var, needs.join(" "))?;
                }
            }
            Topology::Vlan { .. } => {
                if let Some(raw) = &primary.vlan_raw_device {
                    writeln!(content, "rc_net_{}_need=\"net.{}\"", var, raw)?;
                }
            }
        }

        if !device.vlans.is_empty() {
            let ids: Vec<String> = device.vlans.iter().map(|(id, _)| id.to_string()).collect();
            writeln!(content, "vlans_{}=\"{}\"", var, ids.join(" "))?;
        }

        out.files.insert(self.config_path(device.name), content);
        self.enable_service(device.name, out);
        Ok(())
    }

    fn render_dhcp(
        &self,
        device: &str,
        mac: &str,
        out: &mut RenderOutput,
    ) -> Result<(), NetconfError> {
        let var = shell_name(device);
        let mut content = String::new();
        writeln!(content, "{}", GENERATED_HEADER)?;
        writeln!(content, "config_{}=\"dhcp\"", var)?;
        writeln!(content, "mac_{}=\"{}\"", var, mac)?;
        out.files.insert(self.config_path(device), content);
        self.enable_service(device, out);
        Ok(())
    }
}

/// netifrc variable suffix for a device (`eth0.100` → `eth0_100`)
fn shell_name(device: &str) -> String {
    device
        .chars()
        .map(|c| if c.is_ascii_alphanumeric() { c } else { '_' })
        .collect()
}
