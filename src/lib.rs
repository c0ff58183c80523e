//! configdrive-net library
//!
//! Translates config-drive network metadata into the network configuration
//! files of the running distribution.
//!
//! # Pipeline
//!
//! 1. [`datasource`] loads the provider payload
//! 2. [`network::topology`] resolves links, bonds and vlans into interfaces
//! 3. [`network::probe`] discovers live kernel devices
//! 4. [`network::matcher`] joins the two by hardware address
//! 5. [`network::render`] produces files for one [`Dialect`]
//! 6. [`persist`] writes them (or previews them) and runs follow-up actions
//!
//! Whole runs are serialized by [`lock`].

pub mod config;
pub mod datasource;
pub mod lock;
pub mod network;
pub mod persist;

mod error;

pub use error::NetconfError;
pub use network::render::Dialect;

use config::Settings;
use datasource::ConfigDrive;
use lock::ProcessLock;
use network::matcher::{MatchResult, match_interfaces, match_with_peers};
use network::probe::{DeviceProbe, HostNetwork, SysfsHost};
use network::render::resolv::render_resolv_conf;
use network::render::{RenderContext, RenderOutput, render};
use network::topology::resolve_network_data;
use persist::{FilePersistence, PersistReport};
use tracing::{debug, info};

/// Result of one run
#[derive(Debug, Clone, Default)]
pub struct RunOutcome {
    pub dialect: Option<Dialect>,
    /// Everything rendered, whether or not it was written
    pub output: RenderOutput,
    /// `None` in preview mode
    pub report: Option<PersistReport>,
}

/// Run against the live host described by `settings`
pub async fn run(settings: &Settings) -> Result<RunOutcome, NetconfError> {
    let host = SysfsHost::new(&settings.root);
    run_with_host(settings, &host).await
}

/// Run with an explicit host network (used by tests)
pub async fn run_with_host(
    settings: &Settings,
    host: &dyn HostNetwork,
) -> Result<RunOutcome, NetconfError> {
    if settings.interface.as_deref() == Some("lo") {
        debug!("Nothing to do for loopback");
        return Ok(RunOutcome::default());
    }

    let _guard = if settings.noop {
        None
    } else {
        let lock = ProcessLock::new(settings.lock_file(), settings.lock_timeout());
        Some(lock.acquire().await?)
    };

    let dialect = select_dialect(settings)?;
    info!("Using {:?} network configuration", dialect);

    let provider = ConfigDrive::new(settings.config_drive_dir()).load().await?;
    let mut resolved = resolve_network_data(&provider.network);
    if provider.metadata.ignore_interfaces() {
        info!("Provider asked to ignore declared interfaces, using DHCP everywhere");
        resolved.interfaces.clear();
    }

    let mut output = RenderOutput::default();
    if settings.skip_network {
        debug!("Skipping network configuration");
    } else {
        let renderer = dialect.renderer();
        let ctx = RenderContext::new(&settings.root);
        let probe = DeviceProbe::new(host)
            .with_ignore_prefixes(&settings.ignore_prefixes)
            .with_polling(
                settings.carrier_poll_interval(),
                settings.carrier_max_attempts,
            )
            .with_bring_up(!settings.noop);
        let system = probe
            .discover(settings.interface.as_deref(), |device| {
                renderer.is_managed_virtual(&ctx, device)
            })
            .await?;

        let matched: MatchResult = if settings.interface.is_some() {
            let peers = probe.inventory().await?;
            match_with_peers(&resolved.interfaces, &system, &peers)
        } else {
            match_interfaces(&resolved.interfaces, &system)
        };
        output = render(renderer.as_ref(), &ctx, &matched, &resolved.dns_servers)?;
    }

    if !settings.skip_dns
        && let Some((path, content)) = render_resolv_conf(&resolved.dns_servers)
    {
        output.files.insert(path, content);
    }

    let report = if settings.noop {
        None
    } else {
        Some(FilePersistence::new(&settings.root).persist(&output).await?)
    };

    Ok(RunOutcome {
        dialect: Some(dialect),
        output,
        report,
    })
}

fn select_dialect(settings: &Settings) -> Result<Dialect, NetconfError> {
    match &settings.distro {
        Some(distro) => distro.parse(),
        None => Dialect::detect(&settings.root)
            .ok_or_else(|| NetconfError::UnknownDialect("could not detect".to_string())),
    }
}
