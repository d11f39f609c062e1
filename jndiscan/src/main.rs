use anyhow::Result;
use clap::Parser;
use tokio_util::sync::CancellationToken;
use tracing::warn;
use tracing_subscriber::EnvFilter;

mod args;
mod config;
mod report;
mod scan;
mod targets;

use args::{Cli, Commands, RemoteCmd};
use report::BoxedReporter;
use scan::ScanSettings;
use targets::Targets;

fn main() -> Result<()> {
    let cli = Cli::parse();

    let log_level = match cli.verbose {
        0 => "info",
        1 => "debug",
        _ => "trace",
    };
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(log_level));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .with_ansi(!cli.no_color)
        .with_writer(std::io::stderr)
        .init();

    let cfg = config::load_config(cli.config.as_deref())?;
    let remote_cfg = cfg.as_ref().and_then(|c| c.remote.as_ref());

    match cli.command {
        Commands::Version => {
            println!("jndiscan {} (core {})", env!("CARGO_PKG_VERSION"), jndiscan_core::version());
        }
        Commands::Remote { cmd } => {
            let (targets, args) = match cmd {
                RemoteCmd::Url { url, args } => (Targets::one(targets::url_target(&url)?), args),
                RemoteCmd::Cidr { cidr, schemas, port, args } => (Targets::Cidr(targets::cidr_targets(&cidr, &schemas, port)?), args),
            };
            let format = args.format.or(remote_cfg.and_then(|c| c.format)).unwrap_or_default();
            let (out, csv) = (args.out.clone(), args.csv);
            let settings = ScanSettings::resolve(targets, args, remote_cfg)?;
            let reporter = BoxedReporter::open(format, cli.verbose > 0, out.as_deref(), csv)?;

            let rt = tokio::runtime::Runtime::new()?;
            rt.block_on(async move {
                let cancel = CancellationToken::new();
                let on_interrupt = cancel.clone();
                tokio::spawn(async move {
                    if tokio::signal::ctrl_c().await.is_ok() {
                        warn!("interrupted, settling pending attempts");
                        on_interrupt.cancel();
                    }
                });
                scan::run(settings, reporter, cancel).await
            })?;
        }
    }
    Ok(())
}
