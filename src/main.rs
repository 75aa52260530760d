use std::net::SocketAddr;
use std::path::PathBuf;
use std::sync::Arc;

use anyhow::Context;
use clap::Parser;
use tracing::{error, info};
use tracing_subscriber::EnvFilter;

use racetimer::{Config, LogWriter, Subscribe, TimingSystem};

/// Race timing server: queue, observer, records and helper processes over HTTP.
#[derive(Parser, Debug)]
#[command(name = "racetimer")]
#[command(version, about, long_about = None)]
struct Cli {
    /// JSON configuration file. Built-in defaults apply when omitted.
    #[arg(short = 'c', long)]
    config: Option<PathBuf>,

    /// Listen address, overriding `server.addr`.
    #[arg(short = 'a', long)]
    addr: Option<SocketAddr>,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| EnvFilter::new("info,racetimer=debug")),
        )
        .init();

    let cli = Cli::parse();
    let mut cfg = match &cli.config {
        Some(path) => Config::from_file(path)
            .with_context(|| format!("loading config {}", path.display()))?,
        None => Config::default(),
    };
    if let Some(addr) = cli.addr {
        cfg.server.addr = addr;
    }
    let addr = cfg.server.addr;

    let system = TimingSystem::builder(cfg)
        .with_subscribers(vec![Arc::new(LogWriter) as Arc<dyn Subscribe>])
        .build()
        .context("invalid configuration")?;

    let mut server = tokio::spawn(racetimer::rpc::serve(
        Arc::clone(&system),
        addr,
        system.shutdown_token(),
    ));

    let res = tokio::select! {
        res = system.run() => {
            match (&mut server).await {
                Ok(Ok(())) => {}
                Ok(Err(e)) => error!(err = %e, "rpc server failed"),
                Err(e) => error!(err = %e, "rpc server task panicked"),
            }
            res
        }
        served = &mut server => {
            match served {
                Ok(Ok(())) => {}
                Ok(Err(e)) => error!(err = %e, "rpc server failed"),
                Err(e) => error!(err = %e, "rpc server task panicked"),
            }
            system.shutdown().await
        }
    };
    res.context("shutdown")?;
    info!("bye");
    Ok(())
}
