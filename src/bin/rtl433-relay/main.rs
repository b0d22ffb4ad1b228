mod args;

use std::{process::ExitCode, time::Duration};

use anyhow::{Context as _, Result};
use args::Args;
use clap::Parser as _;
use rtl433_influx_relay::{
    influx::{InfluxClient, InfluxConfig},
    mapping::Mappings,
    relay::Relay,
};
use tracing::info;
use tracing_subscriber::EnvFilter;

#[tokio::main(flavor = "current_thread")]
async fn main() -> ExitCode {
    if let Err(e) = run().await {
        eprintln!("{e:#}");
        return ExitCode::from(1);
    }

    ExitCode::from(0)
}

async fn run() -> Result<()> {
    let args = Args::parse();

    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .with_writer(std::io::stderr)
        .init();

    let mappings = match &args.mappings {
        Some(path) => Mappings::from_json_file(path).context("failed to load mappings")?,
        None => Mappings::default(),
    };

    let client = InfluxClient::new(InfluxConfig {
        url: args.destination_influx.clone(),
        token: args.write_token,
        organization: args.organization,
        bucket: args.bucket,
        verify_tls: args.verify_tls,
        timeout: Duration::from_secs(args.write_timeout_secs),
    })
    .context("failed to create InfluxDB client")?;

    let relay = Relay::bind(args.listen, client, mappings)
        .await
        .with_context(|| format!("failed to listen on {}", args.listen))?;

    info!(
        listen = %relay.local_addr()?,
        destination = %args.destination_influx,
        "relaying rtl_433 events"
    );

    relay.run().await;

    Ok(())
}
