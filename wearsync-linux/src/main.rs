// wearsync Linux daemon: phone (source) or watch (sink) role over a local TCP transport.

mod config;
mod driver;
mod logging;
mod store;
mod transport;

use std::net::SocketAddr;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use anyhow::{bail, Context};
use tokio::sync::mpsc;
use tracing::{info, warn};
use wearsync_core::PeerId;

use config::{Config, Role};
use driver::Driver;
use store::FileForecastStore;
use transport::TcpTransport;

const VERSION: &str = env!("CARGO_PKG_VERSION");

#[derive(Debug, PartialEq)]
enum Cli {
    Version,
    Run {
        config: Option<PathBuf>,
        role: Option<Role>,
    },
}

fn parse_args(args: impl IntoIterator<Item = String>) -> anyhow::Result<Cli> {
    let mut config = None;
    let mut role = None;
    let mut args = args.into_iter();
    while let Some(arg) = args.next() {
        match arg.as_str() {
            "--version" | "-V" => return Ok(Cli::Version),
            "--config" => {
                let path = args.next().context("--config needs a path")?;
                config = Some(PathBuf::from(path));
            }
            "--role" => {
                let value = args.next().context("--role needs source or sink")?;
                role = Some(value.parse::<Role>().map_err(anyhow::Error::msg)?);
            }
            other => bail!("unknown argument: {other}"),
        }
    }
    Ok(Cli::Run { config, role })
}

fn main() -> anyhow::Result<()> {
    let (config_path, role) = match parse_args(std::env::args().skip(1))? {
        Cli::Version => {
            println!("wearsync-linux {}", VERSION);
            return Ok(());
        }
        Cli::Run { config, role } => (config, role),
    };

    let mut cfg = config::load(config_path.as_deref())?;
    if let Some(role) = role {
        cfg.role = role;
    }
    logging::init(&cfg.log_filter)?;

    let node_id = cfg
        .node_id
        .clone()
        .map(PeerId::new)
        .unwrap_or_else(PeerId::generate);
    info!(version = VERSION, role = ?cfg.role, node = %node_id, "starting");

    let rt = tokio::runtime::Runtime::new()?;
    rt.block_on(run(cfg, node_id))
}

async fn run(cfg: Config, node_id: PeerId) -> anyhow::Result<()> {
    let (events_tx, events_rx) = mpsc::unbounded_channel();
    let transport = TcpTransport::new(node_id, events_tx);

    let driver = match cfg.role {
        Role::Source => {
            info!(store = %cfg.store_path.display(), icons = %cfg.icon_dir.display(), "serving forecast");
            let store = FileForecastStore::new(&cfg.store_path, &cfg.icon_dir, cfg.units);
            Driver::source(transport.clone(), Arc::new(store), cfg.respond_to.into())
        }
        Role::Sink => {
            let driver = Driver::sink(transport.clone());
            let mut snapshots = driver.subscribe();
            tokio::spawn(async move {
                while snapshots.changed().await.is_ok() {
                    let latest = snapshots.borrow_and_update().clone();
                    if let Some(s) = latest {
                        info!(
                            min = s.min_temp(),
                            max = s.max_temp(),
                            icon_bytes = s.icon().len(),
                            "forecast updated"
                        );
                    }
                }
            });
            driver
        }
    };

    let bind = SocketAddr::from(([0, 0, 0, 0], cfg.listen_port));
    transport
        .start(bind, cfg.peers.clone(), Duration::from_secs(cfg.redial_secs))
        .await
        .with_context(|| format!("starting transport on {bind}"))?;

    driver
        .run(events_rx, async {
            if let Err(e) = shutdown_signal().await {
                warn!(error = %e, "signal handler failed, stopping");
            }
        })
        .await;
    Ok(())
}

/// Wait for Ctrl+C or SIGTERM (Unix).
async fn shutdown_signal() -> anyhow::Result<()> {
    #[cfg(unix)]
    {
        use tokio::signal::unix::{signal, SignalKind};
        let mut sigterm = signal(SignalKind::terminate())?;
        tokio::select! {
            r = tokio::signal::ctrl_c() => r?,
            _ = sigterm.recv() => {}
        }
    }
    #[cfg(not(unix))]
    {
        tokio::signal::ctrl_c().await?;
    }
    Ok(())
}
