//! Network configuration module
//!
//! Provider data model (links, networks, services) as found in a
//! config-drive, and the normalized per-interface model produced from it.
//!
//! The pipeline is split across submodules:
//! - [`topology`] normalizes the provider link graph
//! - [`probe`] discovers live kernel devices
//! - [`matcher`] joins the two by hardware address
//! - [`render`] produces OS-native configuration files

pub mod matcher;
pub mod probe;
pub mod render;
pub mod topology;

use serde::{Deserialize, Deserializer};
use std::collections::BTreeMap;
use std::net::IpAddr;

/// Discovered devices: lowercase MAC address → kernel device name
pub type SystemInterfaces = BTreeMap<String, String>;

/// Network section of a config-drive payload
#[derive(Debug, Clone, Default, Deserialize)]
pub struct NetworkData {
    pub links: Option<Vec<Link>>,
    pub networks: Option<Vec<Network>>,
    #[serde(default)]
    pub services: Vec<Service>,
}

impl NetworkData {
    /// Parse network data from JSON
    pub fn from_json(json: &str) -> Result<Self, serde_json::Error> {
        serde_json::from_str(json)
    }

    /// True when the payload declares nothing usable
    pub fn is_empty(&self) -> bool {
        self.links.as_ref().is_none_or(|l| l.is_empty())
            && self.networks.as_ref().is_none_or(|n| n.is_empty())
            && self.services.is_empty()
    }
}

/// Kind of provider link
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LinkType {
    Bond,
    Vlan,
    /// Anything that is not a bond or a vlan ("phy", "ovs", "tap", ...)
    #[default]
    #[serde(other)]
    Physical,
}

/// Provider-declared network device
#[derive(Debug, Clone, Default, Deserialize)]
pub struct Link {
    pub id: String,
    #[serde(rename = "type", default)]
    pub link_type: LinkType,
    #[serde(default, deserialize_with = "lowercase_mac")]
    pub ethernet_mac_address: Option<String>,
    /// Slave link ids, in order
    #[serde(default)]
    pub bond_links: Vec<String>,
    pub bond_mode: Option<String>,
    pub bond_miimon: Option<u32>,
    pub bond_xmit_hash_policy: Option<String>,
    /// Parent link id
    pub vlan_link: Option<String>,
    pub vlan_id: Option<u16>,
    #[serde(default, deserialize_with = "lowercase_mac")]
    pub vlan_mac_address: Option<String>,
}

/// IP configuration method of a network
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum NetworkType {
    Ipv4,
    Ipv6,
    Ipv4Dhcp,
    Ipv6Slaac,
    #[serde(alias = "ipv6_dhcpv6-stateful")]
    Ipv6Dhcpv6Stateful,
    Manual,
    #[serde(other)]
    Unknown,
}

impl NetworkType {
    /// Statically addressed
    pub fn is_static(&self) -> bool {
        matches!(self, Self::Ipv4 | Self::Ipv6)
    }
}

impl std::fmt::Display for NetworkType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Ipv4 => write!(f, "ipv4"),
            Self::Ipv6 => write!(f, "ipv6"),
            Self::Ipv4Dhcp => write!(f, "ipv4_dhcp"),
            Self::Ipv6Slaac => write!(f, "ipv6_slaac"),
            Self::Ipv6Dhcpv6Stateful => write!(f, "ipv6_dhcpv6_stateful"),
            Self::Manual => write!(f, "manual"),
            Self::Unknown => write!(f, "unknown"),
        }
    }
}

/// IP configuration attached to a link
#[derive(Debug, Clone, Deserialize)]
pub struct Network {
    pub id: String,
    #[serde(rename = "type")]
    pub network_type: NetworkType,
    /// Link id
    pub link: String,
    pub ip_address: Option<String>,
    pub netmask: Option<String>,
    #[serde(default)]
    pub routes: Vec<Route>,
}

/// Static route
#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize)]
pub struct Route {
    #[serde(default)]
    pub network: String,
    #[serde(default)]
    pub netmask: String,
    #[serde(default)]
    pub gateway: String,
}

impl Route {
    /// Network and netmask are both the all-zeros address (v4 or v6)
    pub fn is_default(&self) -> bool {
        is_unspecified(&self.network) && is_unspecified(&self.netmask)
    }

    pub fn is_ipv6(&self) -> bool {
        self.network.contains(':') || self.gateway.contains(':')
    }
}

fn is_unspecified(addr: &str) -> bool {
    addr.parse::<IpAddr>().is_ok_and(|ip| ip.is_unspecified())
}

/// Provider service descriptor
#[derive(Debug, Clone, Deserialize)]
pub struct Service {
    #[serde(rename = "type")]
    pub service_type: String,
    #[serde(default)]
    pub address: String,
}

/// Normalized interface, one per provider network (or per bare bond)
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Interface {
    pub id: String,
    pub network_type: NetworkType,
    /// Link id this interface is built on
    pub link: String,
    pub mac_address: String,
    /// Physical MACs that carry this interface's traffic, in order
    pub raw_macs: Vec<String>,
    pub ip_address: Option<String>,
    pub netmask: Option<String>,
    pub routes: Vec<Route>,
    pub topology: Topology,
}

impl Interface {
    pub fn vlan_id(&self) -> Option<u16> {
        match &self.topology {
            Topology::Vlan { id, .. } => Some(*id),
            _ => None,
        }
    }

    pub fn bond_master(&self) -> Option<&str> {
        match &self.topology {
            Topology::Physical { bond_master } => bond_master.as_deref(),
            _ => None,
        }
    }

    pub fn is_bond(&self) -> bool {
        matches!(self.topology, Topology::Bond { .. })
    }

    pub fn default_route(&self) -> Option<&Route> {
        self.routes.iter().find(|r| r.is_default())
    }

    pub fn static_routes(&self) -> impl Iterator<Item = &Route> {
        self.routes.iter().filter(|r| !r.is_default())
    }

    /// `address/prefix` for static interfaces
    pub fn cidr(&self) -> Option<String> {
        let ip = self.ip_address.as_deref()?;
        match self.netmask.as_deref().and_then(prefix_len) {
            Some(prefix) => Some(format!("{ip}/{prefix}")),
            None => Some(ip.to_string()),
        }
    }
}

/// Role of an interface in the bond/vlan graph
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Topology {
    Physical {
        bond_master: Option<String>,
    },
    Bond {
        /// Slave link ids
        slaves: Vec<String>,
        mode: String,
        miimon: u32,
        xmit_hash_policy: Option<String>,
    },
    Vlan {
        id: u16,
        /// Parent link id
        link: String,
        parent: VlanParent,
    },
}

/// What a vlan sits on
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum VlanParent {
    Physical,
    Bond,
}

/// Convert a netmask (dotted v4, v6, or bare prefix) to a prefix length
pub fn prefix_len(netmask: &str) -> Option<u8> {
    if let Ok(prefix) = netmask.parse::<u8>() {
        return Some(prefix);
    }

    let bits = match netmask.parse::<IpAddr>().ok()? {
        IpAddr::V4(mask) => u32::from(mask).leading_ones(),
        IpAddr::V6(mask) => u128::from(mask).leading_ones(),
    };
    u8::try_from(bits).ok()
}

fn lowercase_mac<'de, D>(deserializer: D) -> Result<Option<String>, D::Error>
where
    D: Deserializer<'de>,
{
    Ok(Option::<String>::deserialize(deserializer)?.map(|mac| mac.to_lowercase()))
}
