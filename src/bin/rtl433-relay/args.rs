use std::{net::SocketAddr, path::PathBuf};

use clap::Parser;

#[derive(Debug, Parser)]
#[command(about = "Relays rtl_433 syslog output into InfluxDB")]
pub struct Args {
    #[arg(long, env = "LISTEN_ADDR", default_value = "127.0.0.1:1433")]
    pub listen: SocketAddr,

    #[arg(long, env = "DESTINATION_INFLUX", default_value = "")]
    pub destination_influx: String,

    #[arg(long, env = "WRITE_TOKEN", default_value = "", hide_env_values = true)]
    pub write_token: String,

    #[arg(long, env = "ORGANIZATION", default_value = "")]
    pub organization: String,

    #[arg(long, env = "BUCKET", default_value = "")]
    pub bucket: String,

    /// JSON file replacing the built-in measurement/location tables
    #[arg(long, env = "RELAY_MAPPINGS")]
    pub mappings: Option<PathBuf>,

    #[arg(long, env = "VERIFY_TLS")]
    pub verify_tls: bool,

    #[arg(long, env = "WRITE_TIMEOUT_SECS", default_value_t = 10)]
    pub write_timeout_secs: u64,
}
