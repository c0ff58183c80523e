//! Join resolved interfaces with discovered devices
//!
//! Interfaces are matched to kernel devices by hardware address. Devices
//! nobody declared are reported separately so they can fall back to DHCP.

use super::{Interface, SystemInterfaces, Topology, VlanParent};
use std::collections::BTreeMap;
use tracing::{debug, warn};

/// An interface bound to the device name it will be rendered under
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MatchedInterface {
    /// Rendered device name (kernel name, bond link id, or `<parent>.<vlan>`)
    pub device: String,
    pub interface: Interface,
    /// Parent device of a vlan
    pub vlan_raw_device: Option<String>,
    /// Discovered slave devices of a bond, in provider order
    pub slave_devices: Vec<String>,
}

impl MatchedInterface {
    pub fn bond_master(&self) -> Option<&str> {
        self.interface.bond_master()
    }
}

/// Result of matching
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct MatchResult {
    /// Matched interfaces, ordered by interface id
    pub interfaces: Vec<MatchedInterface>,
    /// Discovered devices no declared interface claims
    pub unclaimed: SystemInterfaces,
}

impl MatchResult {
    /// Group matched interfaces by device, in order of first appearance
    pub fn by_device(&self) -> Vec<(&str, Vec<&MatchedInterface>)> {
        let mut groups: Vec<(&str, Vec<&MatchedInterface>)> = Vec::new();
        for matched in &self.interfaces {
            match groups.iter_mut().find(|(name, _)| *name == matched.device) {
                Some((_, members)) => members.push(matched),
                None => groups.push((matched.device.as_str(), vec![matched])),
            }
        }
        groups
    }

    /// Vlan devices stacked on `device`, as (vlan id, vlan device)
    pub fn vlans_on(&self, device: &str) -> Vec<(u16, &str)> {
        let mut vlans: Vec<(u16, &str)> = Vec::new();
        for matched in &self.interfaces {
            if matched.vlan_raw_device.as_deref() != Some(device) {
                continue;
            }
            if let Some(id) = matched.interface.vlan_id()
                && !vlans.iter().any(|(_, name)| *name == matched.device)
            {
                vlans.push((id, matched.device.as_str()));
            }
        }
        vlans
    }
}

/// Match interfaces against discovered devices by MAC membership
///
/// An interface matches when any of its `raw_macs` was discovered. Bonds
/// with only some slaves present are still matched; the missing slaves are
/// logged.
pub fn match_interfaces(
    interfaces: &BTreeMap<String, Interface>,
    system: &SystemInterfaces,
) -> MatchResult {
    match_with_peers(interfaces, system, system)
}

/// Like [`match_interfaces`], naming bond slaves from a wider device set
///
/// A run restricted to one device only discovers that device, but the bond
/// it belongs to must still list every slave the host has. `peers` maps
/// the MACs of all permanent-address devices to their kernel names, live
/// or not.
pub fn match_with_peers(
    interfaces: &BTreeMap<String, Interface>,
    system: &SystemInterfaces,
    peers: &SystemInterfaces,
) -> MatchResult {
    let mut matched = Vec::new();

    for interface in interfaces.values() {
        let present: Vec<&str> = interface
            .raw_macs
            .iter()
            .filter_map(|mac| system.get(mac).map(String::as_str))
            .collect();
        if present.is_empty() {
            debug!(
                "Interface {} has no device on this host, skipping",
                interface.id
            );
            continue;
        }

        let mut vlan_raw_device = None;
        let mut slave_devices = Vec::new();
        let device = match &interface.topology {
            Topology::Physical { .. } => present[0].to_string(),
            Topology::Bond { .. } => {
                slave_devices = interface
                    .raw_macs
                    .iter()
                    .filter_map(|mac| system.get(mac).or_else(|| peers.get(mac)))
                    .cloned()
                    .collect();
                if slave_devices.len() < interface.raw_macs.len() {
                    warn!(
                        "Bond {} has {} of {} slaves present",
                        interface.link,
                        slave_devices.len(),
                        interface.raw_macs.len()
                    );
                }
                interface.link.clone()
            }
            Topology::Vlan { id, link, parent } => {
                let raw = match parent {
                    VlanParent::Physical => present[0].to_string(),
                    VlanParent::Bond => link.clone(),
                };
                let name = format!("{raw}.{id}");
                vlan_raw_device = Some(raw);
                name
            }
        };

        debug!("Interface {} matched device {}", interface.id, device);
        matched.push(MatchedInterface {
            device,
            interface: interface.clone(),
            vlan_raw_device,
            slave_devices,
        });
    }

    let unclaimed = system
        .iter()
        .filter(|(mac, _)| !interfaces.values().any(|i| i.raw_macs.contains(*mac)))
        .map(|(mac, name)| (mac.clone(), name.clone()))
        .collect();

    MatchResult {
        interfaces: matched,
        unclaimed,
    }
}
