//! sysconfig renderer for Red Hat and SUSE families
//!
//! Both write shell-style `ifcfg-<dev>` files plus a per-device route file,
//! but disagree on directory, key names and route syntax.

use super::{DeviceConfig, Dialect, GENERATED_HEADER, RenderOutput, Renderer, bond_mode_name};
use crate::NetconfError;
use crate::network::matcher::MatchedInterface;
use crate::network::{NetworkType, Route, Topology, prefix_len};
use std::fmt::Write;
use std::path::{Path, PathBuf};
use tracing::warn;

/// Which sysconfig layout to write
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Flavor {
    RedHat,
    Suse,
}

impl Flavor {
    fn dir(self) -> &'static str {
        match self {
            Self::RedHat => "/etc/sysconfig/network-scripts",
            Self::Suse => "/etc/sysconfig/network",
        }
    }

    fn route_prefix(self) -> &'static str {
        match self {
            Self::RedHat => "route",
            Self::Suse => "ifroute",
        }
    }
}

/// sysconfig renderer
pub struct SysconfigRenderer {
    flavor: Flavor,
}

impl SysconfigRenderer {
    pub fn redhat() -> Self {
        Self {
            flavor: Flavor::RedHat,
        }
    }

    pub fn suse() -> Self {
        Self {
            flavor: Flavor::Suse,
        }
    }

    fn route_path(&self, device: &str) -> PathBuf {
        Path::new(self.flavor.dir()).join(format!("{}-{}", self.flavor.route_prefix(), device))
    }

    fn route6_path(&self, device: &str) -> PathBuf {
        Path::new(self.flavor.dir()).join(format!("route6-{device}"))
    }

    fn bootproto(&self, device: &DeviceConfig<'_>) -> &'static str {
        let primary = device.primary();
        if primary.is_some_and(|m| m.bond_master().is_some()) {
            return "none";
        }
        let v4_dhcp = device.has_type(NetworkType::Ipv4Dhcp);
        let v6_dhcp = device.has_type(NetworkType::Ipv6Dhcpv6Stateful);
        let v4_static = device.has_type(NetworkType::Ipv4);
        match self.flavor {
            Flavor::Suse if v4_dhcp && v6_dhcp => "dhcp",
            Flavor::Suse if v6_dhcp && !v4_static => "dhcp6",
            _ if v4_dhcp => "dhcp",
            _ if v4_static || device.has_type(NetworkType::Ipv6) => "static",
            _ => "none",
        }
    }

    fn render_redhat(
        &self,
        device: &DeviceConfig<'_>,
        out: &mut RenderOutput,
    ) -> Result<(), NetconfError> {
        let Some(primary) = device.primary() else {
            return Ok(());
        };
        let name = device.name;
        let mut ifcfg = String::new();
        writeln!(ifcfg, "{}", GENERATED_HEADER)?;
        writeln!(ifcfg, "DEVICE={}", name)?;
        writeln!(ifcfg, "BOOTPROTO={}", self.bootproto(device))?;
        if matches!(primary.interface.topology, Topology::Physical { .. }) {
            writeln!(ifcfg, "HWADDR={}", primary.interface.mac_address)?;
        }

        let mut routes = Vec::new();
        for (index, member) in statics(device, NetworkType::Ipv4).enumerate() {
            let (ip, mask) = address(member);
            let suffix = if index == 0 { String::new() } else { index.to_string() };
            writeln!(ifcfg, "IPADDR{}={}", suffix, ip)?;
            writeln!(ifcfg, "NETMASK{}={}", suffix, mask)?;
            routes.extend(member.interface.static_routes());
        }

        writeln!(ifcfg, "ONBOOT=yes")?;
        writeln!(ifcfg, "NM_CONTROLLED=no")?;

        match &primary.interface.topology {
            Topology::Physical { bond_master } => {
                writeln!(ifcfg, "TYPE=Ethernet")?;
                if let Some(master) = bond_master {
                    writeln!(ifcfg, "MASTER={}", master)?;
                    writeln!(ifcfg, "SLAVE=yes")?;
                }
            }
            Topology::Bond {
                mode,
                miimon,
                xmit_hash_policy,
                ..
            } => {
                writeln!(ifcfg, "TYPE=Bond")?;
                writeln!(ifcfg, "BONDING_MASTER=yes")?;
                let mut opts = format!("mode={} miimon={}", bond_mode_name(mode), miimon);
                if let Some(policy) = xmit_hash_policy {
                    write!(opts, " xmit_hash_policy={}", policy)?;
                }
                writeln!(ifcfg, "BONDING_OPTS=\"{}\"", opts)?;
            }
            Topology::Vlan { .. } => {
                writeln!(ifcfg, "VLAN=yes")?;
                if let Some(raw) = &primary.vlan_raw_device {
                    writeln!(ifcfg, "PHYSDEV={}", raw)?;
                }
            }
        }

        if let Some(route) = default_route(device, false) {
            writeln!(ifcfg, "DEFROUTE=yes")?;
            writeln!(ifcfg, "GATEWAY={}", route.gateway)?;
        }

        let mut routes6 = Vec::new();
        let v6: Vec<&MatchedInterface> = device.family(true).collect();
        if !v6.is_empty() {
            writeln!(ifcfg, "IPV6INIT=yes")?;
            let mut addresses = Vec::new();
            for member in statics(device, NetworkType::Ipv6) {
                if let Some(cidr) = member.interface.cidr() {
                    addresses.push(cidr);
                }
                routes6.extend(member.interface.static_routes());
            }
            if let Some((first, rest)) = addresses.split_first() {
                writeln!(ifcfg, "IPV6ADDR={}", first)?;
                if !rest.is_empty() {
                    writeln!(ifcfg, "IPV6ADDR_SECONDARIES=\"{}\"", rest.join(" "))?;
                }
            }
            if let Some(route) = default_route(device, true) {
                writeln!(ifcfg, "IPV6_DEFAULTGW={}", route.gateway)?;
            }
            if device.has_type(NetworkType::Ipv6Slaac) {
                writeln!(ifcfg, "IPV6_AUTOCONF=yes")?;
            }
            if device.has_type(NetworkType::Ipv6Dhcpv6Stateful) {
                writeln!(ifcfg, "DHCPV6C=yes")?;
            }
        }

        out.files.insert(self.config_path(name), ifcfg);

        let mut route_file = String::new();
        for (index, route) in routes.iter().filter(|r| !r.is_ipv6()).enumerate() {
            writeln!(route_file, "ADDRESS{}={}", index, route.network)?;
            writeln!(route_file, "NETMASK{}={}", index, route.netmask)?;
            writeln!(route_file, "GATEWAY{}={}", index, route.gateway)?;
        }
        out.append(self.route_path(name), &route_file);

        let mut route6_file = String::new();
        for route in routes6 {
            let prefix = prefix_len(&route.netmask).unwrap_or(128);
            writeln!(route6_file, "{}/{} via {} dev {}", route.network, prefix, route.gateway, name)?;
        }
        out.append(self.route6_path(name), &route6_file);
        Ok(())
    }

    fn render_suse(
        &self,
        device: &DeviceConfig<'_>,
        out: &mut RenderOutput,
    ) -> Result<(), NetconfError> {
        let Some(primary) = device.primary() else {
            return Ok(());
        };
        let name = device.name;
        let slave = primary.bond_master().is_some();
        let mut ifcfg = String::new();
        writeln!(ifcfg, "{}", GENERATED_HEADER)?;
        writeln!(ifcfg, "BOOTPROTO={}", self.bootproto(device))?;
        if matches!(primary.interface.topology, Topology::Physical { .. }) {
            writeln!(ifcfg, "LLADDR={}", primary.interface.mac_address)?;
        }

        let mut addresses = 0;
        for member in statics(device, NetworkType::Ipv4) {
            let (ip, mask) = address(member);
            if addresses == 0 {
                writeln!(ifcfg, "IPADDR={}", ip)?;
                writeln!(ifcfg, "NETMASK={}", mask)?;
            } else {
                let prefix = prefix_len(mask).map_or(mask.to_string(), |p| p.to_string());
                writeln!(ifcfg, "IPADDR_{}={}/{}", addresses, ip, prefix)?;
            }
            addresses += 1;
        }
        for member in statics(device, NetworkType::Ipv6) {
            if let Some(cidr) = member.interface.cidr() {
                if addresses == 0 {
                    writeln!(ifcfg, "IPADDR={}", cidr)?;
                } else {
                    writeln!(ifcfg, "IPADDR_{}={}", addresses, cidr)?;
                }
                addresses += 1;
            }
        }

        writeln!(ifcfg, "STARTMODE={}", if slave { "hotplug" } else { "auto" })?;

        match &primary.interface.topology {
            Topology::Bond {
                mode,
                miimon,
                xmit_hash_policy,
                ..
            } => {
                writeln!(ifcfg, "BONDING_MASTER=yes")?;
                let mut opts = format!("mode={} miimon={}", bond_mode_name(mode), miimon);
                if let Some(policy) = xmit_hash_policy {
                    write!(opts, " xmit_hash_policy={}", policy)?;
                }
                writeln!(ifcfg, "BONDING_MODULE_OPTS='{}'", opts)?;
                for (index, slave) in primary.slave_devices.iter().enumerate() {
                    writeln!(ifcfg, "BONDING_SLAVE_{}={}", index, slave)?;
                }
            }
            Topology::Vlan { id, .. } => {
                if let Some(raw) = &primary.vlan_raw_device {
                    writeln!(ifcfg, "ETHERDEVICE={}", raw)?;
                }
                writeln!(ifcfg, "VLAN_ID={}", id)?;
            }
            Topology::Physical { .. } => {}
        }

        out.files.insert(self.config_path(name), ifcfg);

        // ifroute lines: destination gateway netmask device
        let mut route_file = String::new();
        for member in device.members.iter().filter(|m| m.interface.network_type.is_static()) {
            for route in &member.interface.routes {
                if route.is_default() {
                    writeln!(route_file, "default {} - {}", route.gateway, name)?;
                } else if route.is_ipv6() {
                    let prefix = prefix_len(&route.netmask).unwrap_or(128);
                    writeln!(route_file, "{}/{} {} - {}", route.network, prefix, route.gateway, name)?;
                } else {
                    writeln!(
                        route_file,
                        "{} {} {} {}",
                        route.network, route.gateway, route.netmask, name
                    )?;
                }
            }
        }
        out.append(self.route_path(name), &route_file);
        Ok(())
    }
}

impl Renderer for SysconfigRenderer {
    fn dialect(&self) -> Dialect {
        match self.flavor {
            Flavor::RedHat => Dialect::RedHat,
            Flavor::Suse => Dialect::Suse,
        }
    }

    fn config_path(&self, device: &str) -> PathBuf {
        Path::new(self.flavor.dir()).join(format!("ifcfg-{device}"))
    }

    fn is_virtual_config(&self, content: &str) -> bool {
        match self.flavor {
            Flavor::RedHat => content.contains("VLAN=yes") || content.contains("TYPE=Bridge"),
            Flavor::Suse => content.contains("ETHERDEVICE=") || content.contains("BRIDGE=yes"),
        }
    }

    fn render_device(
        &self,
        device: &DeviceConfig<'_>,
        out: &mut RenderOutput,
    ) -> Result<(), NetconfError> {
        match self.flavor {
            Flavor::RedHat => self.render_redhat(device, out),
            Flavor::Suse => self.render_suse(device, out),
        }
    }

    fn render_dhcp(
        &self,
        device: &str,
        mac: &str,
        out: &mut RenderOutput,
    ) -> Result<(), NetconfError> {
        let mut ifcfg = String::new();
        writeln!(ifcfg, "{}", GENERATED_HEADER)?;
        match self.flavor {
            Flavor::RedHat => {
                writeln!(ifcfg, "DEVICE={}", device)?;
                writeln!(ifcfg, "BOOTPROTO=dhcp")?;
                writeln!(ifcfg, "HWADDR={}", mac)?;
                writeln!(ifcfg, "ONBOOT=yes")?;
                writeln!(ifcfg, "NM_CONTROLLED=no")?;
                writeln!(ifcfg, "TYPE=Ethernet")?;
            }
            Flavor::Suse => {
                writeln!(ifcfg, "BOOTPROTO=dhcp")?;
                writeln!(ifcfg, "LLADDR={}", mac)?;
                writeln!(ifcfg, "STARTMODE=auto")?;
            }
        }
        out.files.insert(self.config_path(device), ifcfg);
        Ok(())
    }
}

/// Static members of one type that carry an address
fn statics<'a>(
    device: &'a DeviceConfig<'a>,
    network_type: NetworkType,
) -> impl Iterator<Item = &'a MatchedInterface> + 'a {
    device.members.iter().copied().filter(move |m| {
        if m.interface.network_type != network_type {
            return false;
        }
        let complete = m.interface.ip_address.is_some() && m.interface.netmask.is_some();
        if !complete {
            warn!(
                "Static network {} has no address or netmask, skipping",
                m.interface.id
            );
        }
        complete
    })
}

fn address(member: &MatchedInterface) -> (&str, &str) {
    (
        member.interface.ip_address.as_deref().unwrap_or_default(),
        member.interface.netmask.as_deref().unwrap_or_default(),
    )
}

/// First default route of one family among static members
fn default_route<'a>(device: &DeviceConfig<'a>, ipv6: bool) -> Option<&'a Route> {
    device
        .members
        .iter()
        .copied()
        .filter(|m| m.interface.network_type.is_static())
        .flat_map(|m| m.interface.routes.iter())
        .find(|r| r.is_default() && r.is_ipv6() == ipv6)
}
