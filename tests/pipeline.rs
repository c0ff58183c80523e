//! End-to-end runs against a fake root and an in-memory host

use configdrive_net::config::Settings;
use configdrive_net::network::probe::{MockDevice, MockHost};
use configdrive_net::persist::format_preview;
use configdrive_net::{Dialect, NetconfError, run_with_host};
use pretty_assertions::assert_eq;
use std::fs;
use std::path::{Path, PathBuf};
use tempfile::TempDir;

const STATIC_NETWORK: &str = r#"{
    "links": [
        {"id": "tap0", "type": "phy", "ethernet_mac_address": "AA:BB:CC:00:00:01"}
    ],
    "networks": [
        {"id": "net0", "type": "ipv4", "link": "tap0",
         "ip_address": "192.0.2.10", "netmask": "255.255.255.0",
         "routes": [{"network": "0.0.0.0", "netmask": "0.0.0.0", "gateway": "192.0.2.1"}]}
    ],
    "services": [
        {"type": "dns", "address": "192.0.2.53"},
        {"type": "dns", "address": "192.0.2.54"}
    ]
}"#;

const ETH0_CFG: &str = "auto eth0\n\
                        iface eth0 inet static\n    \
                        address 192.0.2.10\n    \
                        netmask 255.255.255.0\n    \
                        gateway 192.0.2.1\n";

/// Fake root with a mounted config-drive
fn fake_root(files: &[(&str, &str)]) -> TempDir {
    let temp = TempDir::new().unwrap();
    let latest = temp.path().join("mnt/config/openstack/latest");
    fs::create_dir_all(&latest).unwrap();
    for (name, content) in files {
        fs::write(latest.join(name), content).unwrap();
    }
    temp
}

fn settings(root: &Path, distro: &str) -> Settings {
    Settings {
        root: root.to_path_buf(),
        distro: Some(distro.to_string()),
        carrier_poll_interval_ms: 1,
        carrier_max_attempts: 3,
        lock_timeout_secs: 5,
        ..Default::default()
    }
}

fn one_nic() -> MockHost {
    MockHost::new()
        .with_device("eth0", MockDevice::up("aa:bb:cc:00:00:01"))
        .with_device("lo", MockDevice::up("00:00:00:00:00:00"))
}

fn read(root: &TempDir, path: &str) -> String {
    fs::read_to_string(root.path().join(path.trim_start_matches('/'))).unwrap()
}

#[tokio::test]
async fn test_preview_touches_nothing() {
    let root = fake_root(&[("network_data.json", STATIC_NETWORK)]);
    let settings = Settings {
        noop: true,
        ..settings(root.path(), "debian")
    };

    let outcome = run_with_host(&settings, &one_nic()).await.unwrap();

    assert_eq!(outcome.dialect, Some(Dialect::Debian));
    assert!(outcome.report.is_none());
    assert_eq!(
        format_preview(&outcome.output.files),
        format!(
            "### Write /etc/network/interfaces\n\
             auto lo\niface lo inet loopback\nsource /etc/network/interfaces.d/*.cfg\n\
             ### Write /etc/network/interfaces.d/eth0.cfg\n{ETH0_CFG}\
             ### Write /etc/resolv.conf\n\
             nameserver 192.0.2.53\nnameserver 192.0.2.54\n"
        )
    );
    assert!(!root.path().join("etc").exists());
    assert!(!root.path().join("run/lock/configdrive-net.lock").exists());
}

#[tokio::test]
async fn test_write_then_rerun_is_stable() {
    let root = fake_root(&[("network_data.json", STATIC_NETWORK)]);
    let settings = settings(root.path(), "debian");

    let first = run_with_host(&settings, &one_nic()).await.unwrap();
    let report = first.report.unwrap();
    assert_eq!(report.written.len(), 3);
    assert_eq!(read(&root, "/etc/network/interfaces.d/eth0.cfg"), ETH0_CFG);

    let second = run_with_host(&settings, &one_nic()).await.unwrap();
    assert_eq!(
        second.output.files.keys().collect::<Vec<_>>(),
        vec![&PathBuf::from("/etc/resolv.conf")]
    );
    assert_eq!(read(&root, "/etc/network/interfaces.d/eth0.cfg"), ETH0_CFG);
    assert_eq!(
        read(&root, "/etc/network/interfaces")
            .matches("source /etc/network/interfaces.d/*.cfg")
            .count(),
        1
    );
}

#[tokio::test]
async fn test_device_without_carrier_is_left_out() {
    let root = fake_root(&[("network_data.json", STATIC_NETWORK)]);
    let host = one_nic().with_device("eth1", MockDevice::never_up("aa:bb:cc:00:00:02"));
    let settings = Settings {
        noop: true,
        ..settings(root.path(), "debian")
    };

    let outcome = run_with_host(&settings, &host).await.unwrap();

    assert!(
        outcome
            .output
            .files
            .contains_key(Path::new("/etc/network/interfaces.d/eth0.cfg"))
    );
    assert!(
        !outcome
            .output
            .files
            .contains_key(Path::new("/etc/network/interfaces.d/eth1.cfg"))
    );
    assert!(host.link_up_calls().is_empty());
}

#[tokio::test]
async fn test_gentoo_links_services() {
    let root = fake_root(&[("network_data.json", STATIC_NETWORK)]);
    fs::create_dir_all(root.path().join("etc/init.d")).unwrap();
    let host = one_nic().with_device("eth1", MockDevice::up("aa:bb:cc:00:00:02"));

    run_with_host(&settings(root.path(), "gentoo"), &host)
        .await
        .unwrap();

    assert!(
        read(&root, "/etc/conf.d/net.eth0")
            .contains("config_eth0=\"192.0.2.10 netmask 255.255.255.0\"")
    );
    assert!(read(&root, "/etc/conf.d/net.eth1").contains("config_eth1=\"dhcp\""));
    for device in ["eth0", "eth1"] {
        let link = fs::read_link(root.path().join(format!("etc/init.d/net.{device}"))).unwrap();
        assert_eq!(link, PathBuf::from("net.lo"));
    }
}

#[tokio::test]
async fn test_ignore_interfaces_falls_back_to_dhcp() {
    let root = fake_root(&[
        ("network_data.json", STATIC_NETWORK),
        ("meta_data.json", r#"{"meta": {"ignore_interfaces": "true"}}"#),
    ]);
    let settings = Settings {
        noop: true,
        ..settings(root.path(), "rhel")
    };

    let outcome = run_with_host(&settings, &one_nic()).await.unwrap();

    let ifcfg = &outcome.output.files[Path::new("/etc/sysconfig/network-scripts/ifcfg-eth0")];
    assert!(ifcfg.contains("BOOTPROTO=dhcp\n"));
    assert!(!ifcfg.contains("IPADDR"));
    assert!(outcome.output.files.contains_key(Path::new("/etc/resolv.conf")));
}

#[tokio::test]
async fn test_skip_switches() {
    let root = fake_root(&[("network_data.json", STATIC_NETWORK)]);

    let dns_only = Settings {
        noop: true,
        skip_network: true,
        ..settings(root.path(), "networkd")
    };
    let outcome = run_with_host(&dns_only, &one_nic()).await.unwrap();
    assert_eq!(
        outcome.output.files.keys().collect::<Vec<_>>(),
        vec![&PathBuf::from("/etc/resolv.conf")]
    );

    let network_only = Settings {
        noop: true,
        skip_dns: true,
        ..settings(root.path(), "networkd")
    };
    let outcome = run_with_host(&network_only, &one_nic()).await.unwrap();
    assert!(!outcome.output.files.contains_key(Path::new("/etc/resolv.conf")));
    assert!(
        outcome
            .output
            .files
            .contains_key(Path::new("/etc/systemd/network/eth0.network"))
    );
}

#[tokio::test]
async fn test_loopback_trigger_is_a_no_op() {
    let root = fake_root(&[("network_data.json", STATIC_NETWORK)]);
    let settings = Settings {
        interface: Some("lo".to_string()),
        ..settings(root.path(), "debian")
    };

    let outcome = run_with_host(&settings, &one_nic()).await.unwrap();

    assert!(outcome.dialect.is_none());
    assert!(outcome.output.is_empty());
    assert!(!root.path().join("etc").exists());
}

#[tokio::test]
async fn test_missing_drive_uses_dhcp() {
    let root = TempDir::new().unwrap();
    let settings = Settings {
        noop: true,
        ..settings(root.path(), "suse")
    };

    let outcome = run_with_host(&settings, &one_nic()).await.unwrap();

    assert_eq!(
        outcome.output.files.keys().collect::<Vec<_>>(),
        vec![&PathBuf::from("/etc/sysconfig/network/ifcfg-eth0")]
    );
}

#[tokio::test]
async fn test_unknown_distro_is_rejected() {
    let root = fake_root(&[]);
    let settings = Settings {
        noop: true,
        ..settings(root.path(), "plan9")
    };

    let err = run_with_host(&settings, &one_nic()).await.unwrap_err();
    assert!(matches!(err, NetconfError::UnknownDialect(_)));
}

const BOND_NETWORK: &str = r#"{
    "links": [
        {"id": "nic-a", "type": "phy", "ethernet_mac_address": "aa:bb:cc:00:00:01"},
        {"id": "nic-b", "type": "phy", "ethernet_mac_address": "aa:bb:cc:00:00:02"},
        {"id": "bond0", "type": "bond", "bond_links": ["nic-a", "nic-b"],
         "bond_mode": "802.3ad"}
    ],
    "networks": [
        {"id": "net0", "type": "ipv4_dhcp", "link": "bond0"}
    ],
    "services": []
}"#;

#[tokio::test]
async fn test_per_device_runs_keep_every_bond_slave() {
    let cases = [
        (
            "debian",
            "/etc/network/interfaces.d/bond0.cfg",
            vec!["bond-slaves eth0 eth1\n", "up ifenslave bond0 eth0 eth1\n"],
        ),
        (
            "suse",
            "/etc/sysconfig/network/ifcfg-bond0",
            vec!["BONDING_SLAVE_0=eth0\n", "BONDING_SLAVE_1=eth1\n"],
        ),
        (
            "gentoo",
            "/etc/conf.d/net.bond0",
            vec![
                "slaves_bond0=\"eth0 eth1\"\n",
                "rc_net_bond0_need=\"net.eth0 net.eth1\"\n",
            ],
        ),
    ];

    for (distro, bond_file, expected) in cases {
        let root = fake_root(&[("network_data.json", BOND_NETWORK)]);
        let host = MockHost::new()
            .with_device("eth0", MockDevice::up("aa:bb:cc:00:00:01"))
            .with_device("eth1", MockDevice::up("aa:bb:cc:00:00:02"));

        for device in ["eth0", "eth1"] {
            let settings = Settings {
                interface: Some(device.to_string()),
                ..settings(root.path(), distro)
            };
            run_with_host(&settings, &host).await.unwrap();
        }

        let bond = read(&root, bond_file);
        for line in expected {
            assert!(bond.contains(line), "{distro}: {line:?} missing from\n{bond}");
        }
    }
}
