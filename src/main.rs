//! configdrive-net - write native network configuration from a config-drive
//!
//! Runs once per boot (or once per device from a udev trigger), reads the
//! provider's network description and writes configuration files for the
//! distribution's own network tooling.

use std::io::Write;
use std::path::PathBuf;

use anyhow::Context;
use clap::Parser;
use tracing::info;
use tracing_subscriber::filter::LevelFilter;
use tracing_subscriber::{EnvFilter, FmtSubscriber};

use configdrive_net::config::{Settings, SettingsLoader};
use configdrive_net::persist::format_preview;

#[derive(Parser)]
#[command(name = "configdrive-net")]
#[command(author, version, about = "Write OS network configuration from config-drive metadata", long_about = None)]
struct Cli {
    /// Enable verbose output
    #[arg(short, long, action = clap::ArgAction::Count)]
    verbose: u8,

    /// Print the files that would be written instead of writing them
    #[arg(short = 'n', long)]
    noop: bool,

    /// Distribution to write configuration for (detected when omitted)
    #[arg(long, env = "CONFIGDRIVE_NET_DISTRO")]
    distro: Option<String>,

    /// Filesystem root to operate on
    #[arg(long)]
    root: Option<PathBuf>,

    /// Only process this network device
    #[arg(short, long)]
    interface: Option<String>,

    /// Do not write network configuration files
    #[arg(long)]
    skip_network: bool,

    /// Do not write resolv.conf
    #[arg(long)]
    skip_dns: bool,

    /// Settings file
    #[arg(long, default_value = configdrive_net::config::DEFAULT_SETTINGS_PATH)]
    config: PathBuf,
}

impl Cli {
    /// Layer command-line flags over file settings
    fn apply(&self, settings: &mut Settings) {
        settings.noop |= self.noop;
        settings.skip_network |= self.skip_network;
        settings.skip_dns |= self.skip_dns;
        if let Some(distro) = &self.distro {
            settings.distro = Some(distro.clone());
        }
        if let Some(root) = &self.root {
            settings.root = root.clone();
        }
        if let Some(interface) = &self.interface {
            settings.interface = Some(interface.clone());
        }
    }
}

fn init_logging(verbose: u8) -> anyhow::Result<()> {
    let level = match verbose {
        0 => LevelFilter::INFO,
        1 => LevelFilter::DEBUG,
        _ => LevelFilter::TRACE,
    };

    let filter = EnvFilter::builder()
        .with_default_directive(level.into())
        .from_env_lossy();

    let subscriber = FmtSubscriber::builder()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .with_target(false)
        .with_thread_ids(false)
        .compact()
        .finish();

    tracing::subscriber::set_global_default(subscriber)
        .context("Failed to set tracing subscriber")
}

#[tokio::main(flavor = "current_thread")]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();
    init_logging(cli.verbose)?;

    let mut settings = SettingsLoader::new()
        .with_file(&cli.config)
        .load()
        .await
        .with_context(|| format!("loading settings from {}", cli.config.display()))?;
    cli.apply(&mut settings);

    let outcome = configdrive_net::run(&settings)
        .await
        .context("network configuration failed")?;

    if settings.noop {
        let mut stdout = std::io::stdout().lock();
        stdout.write_all(format_preview(&outcome.output.files).as_bytes())?;
        stdout.flush()?;
    } else if let Some(report) = outcome.report {
        info!(
            "Done: {} files written, {} skipped",
            report.written.len(),
            report.skipped.len()
        );
    }

    Ok(())
}
