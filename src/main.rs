use anyhow::Context;
use clap::Parser;
use prom_push::{
    parse_and_format,
    Client,
};
use std::io;
use tracing::info;
use tracing_subscriber::EnvFilter;

mod cli;

use cli::Cli;

/// `RUST_LOG` when set, otherwise `info` for this crate (`debug` with `--debug`).
fn init_logging(debug: bool) {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| {
        let level = if debug { "debug" } else { "info" };
        EnvFilter::new(format!("warn,prom_push={level}"))
    });
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(io::stderr)
        .init();
}

fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();
    init_logging(cli.debug);

    let config = cli
        .client_config()
        .context("invalid client configuration")?;
    let client = Client::configure(config).context("failed to configure the client")?;

    let request = parse_and_format(io::stdin().lock(), &cli.format_options())
        .context("failed to parse the metrics from stdin")?;
    info!(
        url = %client.url(),
        timeseries = request.timeseries.len(),
        "pushing metrics"
    );
    client
        .push_with_retries(&request)
        .context("failed to push the metrics")?;
    Ok(())
}
