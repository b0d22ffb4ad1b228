//! InfluxDB v2 write-API sink.

use std::{future::Future, time::Duration};

use anyhow::{Context as _, Result, bail};
use reqwest::{
    Client,
    header::{AUTHORIZATION, CONTENT_TYPE},
};

use crate::point::DataPoint;

/// Destination of relayed points.
pub trait Sink {
    fn write(&self, point: &DataPoint) -> impl Future<Output = Result<()>>;
}

#[derive(Debug, Clone)]
pub struct InfluxConfig {
    pub url: String,
    pub token: String,
    pub organization: String,
    pub bucket: String,
    pub verify_tls: bool,
    pub timeout: Duration,
}

/// Writes one point per request to `{url}/api/v2/write`.
#[derive(Debug)]
pub struct InfluxClient {
    client: Client,
    write_url: String,
    token: String,
    organization: String,
    bucket: String,
}

impl InfluxClient {
    pub fn new(config: InfluxConfig) -> Result<Self> {
        let client = Client::builder()
            .danger_accept_invalid_certs(!config.verify_tls)
            .timeout(config.timeout)
            .build()
            .context("failed to build HTTP client")?;

        Ok(Self {
            client,
            write_url: write_url(&config.url),
            token: config.token,
            organization: config.organization,
            bucket: config.bucket,
        })
    }
}

impl Sink for InfluxClient {
    async fn write(&self, point: &DataPoint) -> Result<()> {
        let response = self
            .client
            .post(&self.write_url)
            .query(&[
                ("org", self.organization.as_str()),
                ("bucket", self.bucket.as_str()),
                ("precision", "ns"),
            ])
            .header(AUTHORIZATION, format!("Token {}", self.token))
            .header(CONTENT_TYPE, "text/plain; charset=utf-8")
            .body(point.to_string())
            .send()
            .await
            .context("failed to send write request")?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            bail!("write rejected with status {status}: {}", body.trim());
        }

        Ok(())
    }
}

fn write_url(base: &str) -> String {
    format!("{}/api/v2/write", base.trim_end_matches('/'))
}
