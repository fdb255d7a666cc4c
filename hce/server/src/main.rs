#![forbid(unsafe_code)]

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use clap::Parser;
use env_logger::Env;
use log::{error, info, warn};
use warp::Filter;

use hce::{BatchRunner, TlsProbe, DEFAULT_CONCURRENCY};

use crate::handler::{checker_filter, AppState};

mod handler;

#[derive(Debug, Parser)]
#[command(author, about, version)]
struct Opts {
    /// host:port to be bound to the server
    #[arg(short, long, env = "BIND", default_value = "127.0.0.1:8000")]
    bind: String,
    /// Maximum number of certificates checked at the same time
    #[arg(short, long, env = "CONCURRENCY", default_value_t = DEFAULT_CONCURRENCY)]
    concurrency: usize,
    /// Give up on a domain name after this many seconds, wait indefinitely if absent
    #[arg(short, long, env = "PROBE_TIMEOUT")]
    timeout: Option<u64>,
}

async fn shutdown_signal() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        error!("failed to listen for shutdown signal: {e}");
        futures::future::pending::<()>().await;
    }
    info!("shutting down");
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    env_logger::Builder::from_env(Env::default().default_filter_or("info")).init();

    let opts: Opts = Opts::parse();

    let mut probe = TlsProbe::default();
    probe.timeout = opts.timeout.map(Duration::from_secs);
    if probe.timeout.is_none() {
        warn!("no probe timeout set, one unresponsive host stalls its whole request");
    }

    let runner = BatchRunner::new(probe, opts.concurrency)?;
    let state = Arc::new(AppState { runner });
    let app = checker_filter(state).with(warp::log("hce-server"));

    let bind: SocketAddr = opts.bind.parse()?;
    let (addr, server) =
        warp::serve(app).try_bind_with_graceful_shutdown(bind, shutdown_signal())?;
    info!("running on {addr}, {} certificate(s) at a time", opts.concurrency);
    server.await;

    Ok(())
}
