//! Provider topology resolution
//!
//! Turns the config-drive link/network graph into a flat set of
//! [`Interface`] records. Bond slaves learn their master, bonds learn the
//! MACs of their slaves, and vlans inherit the physical MACs of whatever
//! they sit on. Input records are never modified.

use super::{
    Interface, Link, LinkType, Network, NetworkData, NetworkType, Service, Topology, VlanParent,
};
use std::collections::{BTreeMap, HashMap};
use tracing::{debug, warn};

/// Bond mode used when the provider does not name one
pub const DEFAULT_BOND_MODE: &str = "active-backup";

/// MII link monitoring interval (ms) used when the provider does not name one
pub const DEFAULT_BOND_MIIMON: u32 = 100;

/// Result of resolving one payload
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Resolved {
    /// Interfaces keyed by id
    pub interfaces: BTreeMap<String, Interface>,
    /// DNS servers in declaration order
    pub dns_servers: Vec<String>,
}

/// A link after bond/vlan resolution
#[derive(Debug, Clone)]
struct ResolvedLink {
    mac: String,
    raw_macs: Vec<String>,
    topology: Topology,
}

/// Resolve a whole payload; missing `links` or `networks` yield no interfaces
pub fn resolve_network_data(data: &NetworkData) -> Resolved {
    match (&data.links, &data.networks) {
        (Some(links), Some(networks)) => resolve(links, networks, &data.services),
        _ => {
            debug!("Network data has no links or networks");
            Resolved {
                interfaces: BTreeMap::new(),
                dns_servers: dns_servers(&data.services),
            }
        }
    }
}

/// Resolve links, networks and services into interfaces and DNS servers
pub fn resolve(links: &[Link], networks: &[Network], services: &[Service]) -> Resolved {
    let resolved_links = resolve_links(links);
    let mut interfaces = BTreeMap::new();
    let mut attached: Vec<&str> = Vec::new();

    for network in networks {
        let Some(link) = resolved_links.get(network.link.as_str()) else {
            warn!(
                "Network {} references unknown link {}, skipping",
                network.id, network.link
            );
            continue;
        };

        let interface = Interface {
            id: network.id.clone(),
            network_type: network.network_type,
            link: network.link.clone(),
            mac_address: link.mac.clone(),
            raw_macs: link.raw_macs.clone(),
            ip_address: network.ip_address.clone(),
            netmask: network.netmask.clone(),
            routes: network.routes.clone(),
            topology: link.topology.clone(),
        };
        if insert_unique(&mut interfaces, interface) {
            attached.push(network.link.as_str());
        }
    }

    let vlan_parents: Vec<&str> = resolved_links
        .values()
        .filter_map(|link| match &link.topology {
            Topology::Vlan { link, .. } => Some(link.as_str()),
            _ => None,
        })
        .collect();

    // Bonds, their slaves and vlan parents need files even when they carry
    // no address
    for (id, link) in &resolved_links {
        if attached.contains(id) {
            continue;
        }
        let carrier = match &link.topology {
            Topology::Bond { .. } | Topology::Physical { bond_master: Some(_) } => true,
            Topology::Physical { bond_master: None } => vlan_parents.contains(id),
            Topology::Vlan { .. } => false,
        };
        if !carrier {
            continue;
        }
        debug!("Materializing manual interface for {}", id);
        insert_unique(
            &mut interfaces,
            Interface {
                id: id.to_string(),
                network_type: NetworkType::Manual,
                link: id.to_string(),
                mac_address: link.mac.clone(),
                raw_macs: link.raw_macs.clone(),
                ip_address: None,
                netmask: None,
                routes: Vec::new(),
                topology: link.topology.clone(),
            },
        );
    }

    Resolved {
        interfaces,
        dns_servers: dns_servers(services),
    }
}

/// Addresses of every `dns` service, in order, duplicates kept
pub fn dns_servers(services: &[Service]) -> Vec<String> {
    services
        .iter()
        .filter(|s| s.service_type == "dns" && !s.address.is_empty())
        .map(|s| s.address.clone())
        .collect()
}

fn insert_unique(interfaces: &mut BTreeMap<String, Interface>, interface: Interface) -> bool {
    if interfaces.contains_key(&interface.id) {
        warn!("Duplicate interface id {}, skipping", interface.id);
        return false;
    }
    interfaces.insert(interface.id.clone(), interface);
    true
}

/// Resolve every link into its MAC, carrier MACs and topology role
fn resolve_links(links: &[Link]) -> BTreeMap<&str, ResolvedLink> {
    let mut physicals: HashMap<&str, &str> = HashMap::new();
    let mut bonds: Vec<&Link> = Vec::new();
    let mut vlans: Vec<&Link> = Vec::new();

    for link in links {
        match link.link_type {
            LinkType::Physical => match link.ethernet_mac_address.as_deref() {
                Some(mac) => {
                    physicals.insert(link.id.as_str(), mac);
                }
                None => warn!("Link {} has no MAC address, skipping", link.id),
            },
            LinkType::Bond => bonds.push(link),
            LinkType::Vlan => vlans.push(link),
        }
    }

    let mut masters: HashMap<&str, &str> = HashMap::new();
    for bond in &bonds {
        for slave in &bond.bond_links {
            if let Some(existing) = masters.get(slave.as_str()) {
                warn!(
                    "Link {} is enslaved to both {} and {}, keeping {}",
                    slave, existing, bond.id, existing
                );
                continue;
            }
            masters.insert(slave.as_str(), bond.id.as_str());
        }
    }

    let mut resolved: BTreeMap<&str, ResolvedLink> = BTreeMap::new();

    for (id, mac) in &physicals {
        resolved.insert(
            *id,
            ResolvedLink {
                mac: mac.to_string(),
                raw_macs: vec![mac.to_string()],
                topology: Topology::Physical {
                    bond_master: masters.get(id).map(|m| m.to_string()),
                },
            },
        );
    }

    for bond in &bonds {
        let mut slaves = Vec::new();
        let mut raw_macs = Vec::new();
        for slave in &bond.bond_links {
            match physicals.get(slave.as_str()) {
                Some(mac) => {
                    slaves.push(slave.clone());
                    raw_macs.push(mac.to_string());
                }
                None => warn!("Bond {} references unknown link {}", bond.id, slave),
            }
        }
        if raw_macs.is_empty() {
            warn!("Bond {} has no resolvable slaves, skipping", bond.id);
            continue;
        }

        let mac = bond
            .ethernet_mac_address
            .clone()
            .unwrap_or_else(|| raw_macs[0].clone());
        resolved.insert(
            bond.id.as_str(),
            ResolvedLink {
                mac,
                raw_macs,
                topology: Topology::Bond {
                    slaves,
                    mode: bond
                        .bond_mode
                        .clone()
                        .unwrap_or_else(|| DEFAULT_BOND_MODE.to_string()),
                    miimon: bond.bond_miimon.unwrap_or(DEFAULT_BOND_MIIMON),
                    xmit_hash_policy: bond.bond_xmit_hash_policy.clone(),
                },
            },
        );
    }

    for vlan in &vlans {
        let (Some(parent_id), Some(vlan_id)) = (vlan.vlan_link.as_deref(), vlan.vlan_id) else {
            warn!("Vlan {} lacks vlan_link or vlan_id, skipping", vlan.id);
            continue;
        };

        let Some(parent) = resolved.get(parent_id) else {
            warn!(
                "Vlan {} references unknown link {}, skipping",
                vlan.id, parent_id
            );
            continue;
        };
        let parent_kind = match parent.topology {
            Topology::Bond { .. } => VlanParent::Bond,
            Topology::Physical { .. } => VlanParent::Physical,
            Topology::Vlan { .. } => {
                warn!("Vlan {} is stacked on vlan {}, skipping", vlan.id, parent_id);
                continue;
            }
        };

        let link = ResolvedLink {
            mac: vlan
                .vlan_mac_address
                .clone()
                .or_else(|| vlan.ethernet_mac_address.clone())
                .unwrap_or_else(|| parent.mac.clone()),
            raw_macs: parent.raw_macs.clone(),
            topology: Topology::Vlan {
                id: vlan_id,
                link: parent_id.to_string(),
                parent: parent_kind,
            },
        };
        resolved.insert(vlan.id.as_str(), link);
    }

    resolved
}
