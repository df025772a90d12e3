//! InfluxDB v2 writer using the HTTP line-protocol endpoint

use std::time::Duration;

use async_trait::async_trait;
use reqwest::header::{AUTHORIZATION, CONTENT_TYPE};
use tracing::{instrument, trace};

use super::{Point, PointWriter, PublishError};
use crate::config::InfluxSettings;

/// Writes points to `POST {url}/api/v2/write`.
///
/// A new HTTP client is built for every batch and dropped when the call
/// returns, so no connection outlives its cycle.
#[derive(Clone)]
pub struct InfluxWriter {
    url: String,
    token: String,
    timeout: Duration,
}

impl std::fmt::Debug for InfluxWriter {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("InfluxWriter")
            .field("url", &self.url)
            .field("timeout", &self.timeout)
            .finish_non_exhaustive()
    }
}

impl InfluxWriter {
    pub fn new(settings: &InfluxSettings) -> Self {
        Self {
            url: settings.url.trim_end_matches('/').to_string(),
            token: settings.token.clone(),
            timeout: settings.timeout,
        }
    }
}

#[async_trait]
impl PointWriter for InfluxWriter {
    #[instrument(skip_all, fields(url = %self.url, points = points.len()))]
    async fn write(&self, bucket: &str, org: &str, points: &[Point]) -> Result<(), PublishError> {
        let client = reqwest::Client::builder()
            .timeout(self.timeout)
            .build()
            .map_err(|e| PublishError::TransportError(e.to_string()))?;

        let body = points
            .iter()
            .map(line_protocol)
            .collect::<Vec<_>>()
            .join("\n");
        trace!("line protocol body:\n{body}");

        let response = client
            .post(format!("{}/api/v2/write", self.url))
            .query(&[("org", org), ("bucket", bucket), ("precision", "s")])
            .header(AUTHORIZATION, format!("Token {}", self.token))
            .header(CONTENT_TYPE, "text/plain; charset=utf-8")
            .body(body)
            .send()
            .await
            .map_err(classify)?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(PublishError::StoreRejected {
                status: status.as_u16(),
                body,
            });
        }

        Ok(())
    }
}

fn classify(err: reqwest::Error) -> PublishError {
    if err.is_timeout() {
        PublishError::Timeout
    } else {
        PublishError::TransportError(err.to_string())
    }
}

/// Render a point as one line of InfluxDB line protocol.
///
/// `traffic,host=relay1 read=100i,written=50i 1700000000`
pub fn line_protocol(point: &Point) -> String {
    let mut line = escape(point.measurement, &[',', ' ']);

    for (key, value) in &point.tags {
        line.push(',');
        line.push_str(&escape(key, &[',', '=', ' ']));
        line.push('=');
        line.push_str(&escape(value, &[',', '=', ' ']));
    }

    let fields = point
        .fields
        .iter()
        .map(|(key, value)| format!("{}={value}i", escape(key, &[',', '=', ' '])))
        .collect::<Vec<_>>()
        .join(",");

    format!("{line} {fields} {}", point.timestamp.timestamp())
}

/// Escape `special` with a backslash. Line breaks and other control
/// characters cannot be carried at all and become an escaped space.
fn escape(raw: &str, special: &[char]) -> String {
    let mut escaped = String::with_capacity(raw.len());
    for c in raw.chars() {
        if c.is_control() {
            escaped.push_str("\\ ");
            continue;
        }
        if special.contains(&c) {
            escaped.push('\\');
        }
        escaped.push(c);
    }
    escaped
}
