#![deny(
    missing_docs,
    missing_debug_implementations,
    missing_copy_implementations,
    trivial_casts,
    trivial_numeric_casts,
    unsafe_code,
    unstable_features,
    unused_import_braces,
    unused_qualifications
)]

//! HTTPS Certificate Expiry

use std::time::{Duration, Instant};

use clap::{Parser, Subcommand};
use log::debug;

use hce::{BatchRunner, Probe, TlsProbe, DEFAULT_CONCURRENCY};

#[derive(Debug, Parser)]
#[command(author, about, version)]
struct Opts {
    /// Verbose mode
    #[arg(short, long)]
    verbose: bool,
    /// Maximum number of certificates checked at the same time
    #[arg(short, long, env = "CONCURRENCY", default_value_t = DEFAULT_CONCURRENCY)]
    concurrency: usize,
    /// Give up on a domain name after this many seconds, wait indefinitely if absent
    #[arg(short, long, env = "PROBE_TIMEOUT")]
    timeout: Option<u64>,
    #[command(subcommand)]
    command: Option<Commands>,
}

#[derive(Debug, Subcommand)]
enum Commands {
    /// Check domain name(s) immediately
    Check {
        /// One or many domain names to check
        #[arg()]
        domain_names: Vec<String>,
    },
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    pretty_env_logger::init();

    let opts: Opts = Opts::parse();
    if let Some(Commands::Check { domain_names }) = &opts.command {
        check_command(&opts, domain_names).await?;
    }
    Ok(())
}

async fn check_command<T>(opts: &Opts, domain_names: &[T]) -> anyhow::Result<()>
where
    T: AsRef<str>,
{
    let mut probe = TlsProbe::default();
    probe.timeout = opts.timeout.map(Duration::from_secs);
    debug!("{probe:?}");

    let runner = BatchRunner::new(probe, opts.concurrency)?;
    for line in report(&runner, domain_names, opts.verbose).await {
        println!("{line}");
    }
    Ok(())
}

async fn report<P, T>(runner: &BatchRunner<P>, domain_names: &[T], verbose: bool) -> Vec<String>
where
    P: Probe + 'static,
    T: AsRef<str>,
{
    let start = Instant::now();
    let results = runner.run(domain_names).await;
    let elapsed = start.elapsed();

    let mut lines: Vec<String> = results
        .iter()
        .map(|(domain_name, outcome)| outcome.sentence(domain_name))
        .collect();
    if verbose {
        lines.push(format!("{} domain name(s) checked in {elapsed:?}", results.len()));
    }
    lines
}
