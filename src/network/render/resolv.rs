//! resolv.conf rendering

use std::path::PathBuf;

/// Resolver configuration file
pub const RESOLV_CONF: &str = "/etc/resolv.conf";

/// One `nameserver` line per server, in order
///
/// Returns `None` when there are no servers, so an existing resolv.conf is
/// left untouched.
pub fn render_resolv_conf(dns_servers: &[String]) -> Option<(PathBuf, String)> {
    if dns_servers.is_empty() {
        return None;
    }
    let content: String = dns_servers
        .iter()
        .map(|server| format!("nameserver {server}\n"))
        .collect();
    Some((PathBuf::from(RESOLV_CONF), content))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_nameserver_lines_in_order() {
        let servers = vec!["192.0.2.53".to_string(), "2001:db8::53".to_string()];
        let (path, content) = render_resolv_conf(&servers).unwrap();
        assert_eq!(path, PathBuf::from("/etc/resolv.conf"));
        assert_eq!(content, "nameserver 192.0.2.53\nnameserver 2001:db8::53\n");
    }

    #[test]
    fn test_no_servers_no_file() {
        assert!(render_resolv_conf(&[]).is_none());
    }
}
