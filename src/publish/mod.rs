//! Publisher - turns samples into time-series points and ships them
//!
//! Every sample becomes exactly three points sharing the sample's tag set:
//!
//! ```text
//! traffic      read, written
//! connections  circuits_active, streams_active
//! handshakes   ntor_requested, ntor_assigned, tap_requested, tap_assigned
//! ```
//!
//! In live mode all points of a cycle go out in one batched [`PointWriter::write`]
//! call. In dry-run mode they are rendered as a report and never sent.

pub mod influx;

use std::fmt;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::Serialize;
use tracing::{debug, instrument, trace, warn};

use crate::MetricSample;
use crate::config::{InfluxSettings, Target};
use crate::cycle::{TagPolicy, Tags};

pub use influx::InfluxWriter;

pub const TRAFFIC: &str = "traffic";
pub const CONNECTIONS: &str = "connections";
pub const HANDSHAKES: &str = "handshakes";

/// Failure of the per-cycle batch write
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PublishError {
    /// The store did not answer in time
    Timeout,

    /// The store answered with a non-success status
    StoreRejected { status: u16, body: String },

    /// The request could not be delivered
    TransportError(String),
}

impl PublishError {
    pub fn kind(&self) -> &'static str {
        match self {
            PublishError::Timeout => "Timeout",
            PublishError::StoreRejected { .. } => "StoreRejected",
            PublishError::TransportError(_) => "TransportError",
        }
    }
}

impl fmt::Display for PublishError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            PublishError::Timeout => write!(f, "write to the metrics store timed out"),
            PublishError::StoreRejected { status, body } => {
                write!(f, "metrics store rejected the write with status {status}: {body}")
            }
            PublishError::TransportError(msg) => {
                write!(f, "could not reach the metrics store: {msg}")
            }
        }
    }
}

impl std::error::Error for PublishError {}

/// One measurement with its tags and integer fields
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Point {
    pub measurement: &'static str,
    pub tags: Tags,
    pub fields: Vec<(&'static str, u64)>,
    pub timestamp: DateTime<Utc>,
}

impl Point {
    pub fn field(&self, name: &str) -> Option<u64> {
        self.fields
            .iter()
            .find(|(field, _)| *field == name)
            .map(|(_, value)| *value)
    }
}

/// Build the three points for one sample.
pub fn points_for(sample: &MetricSample, tags: &Tags, timestamp: DateTime<Utc>) -> [Point; 3] {
    let point = |measurement, fields| Point {
        measurement,
        tags: tags.clone(),
        fields,
        timestamp,
    };

    [
        point(
            TRAFFIC,
            vec![
                ("read", sample.traffic.read),
                ("written", sample.traffic.written),
            ],
        ),
        point(
            CONNECTIONS,
            vec![
                ("circuits_active", u64::from(sample.connections.circuits_active)),
                ("streams_active", u64::from(sample.connections.streams_active)),
            ],
        ),
        point(
            HANDSHAKES,
            vec![
                ("ntor_requested", sample.handshakes.ntor_requested),
                ("ntor_assigned", sample.handshakes.ntor_assigned),
                ("tap_requested", sample.handshakes.tap_requested),
                ("tap_assigned", sample.handshakes.tap_assigned),
            ],
        ),
    ]
}

/// Batched point upload to a time-series store
#[async_trait]
pub trait PointWriter: Send + Sync {
    async fn write(&self, bucket: &str, org: &str, points: &[Point]) -> Result<(), PublishError>;
}

#[derive(Debug, Clone)]
pub struct Publisher<W> {
    writer: W,
    bucket: String,
    organization: String,
    tags: TagPolicy,
}

impl Publisher<InfluxWriter> {
    pub fn influx(settings: &InfluxSettings, tags: TagPolicy) -> Self {
        Publisher::new(
            InfluxWriter::new(settings),
            settings.bucket.clone(),
            settings.organization.clone(),
            tags,
        )
    }
}

impl<W: PointWriter> Publisher<W> {
    pub fn new(writer: W, bucket: String, organization: String, tags: TagPolicy) -> Self {
        Self {
            writer,
            bucket,
            organization,
            tags,
        }
    }

    /// Build the cycle's points, tagged per the configured policy.
    pub fn points(&self, samples: &[(&Target, &MetricSample)], timestamp: DateTime<Utc>) -> Vec<Point> {
        samples
            .iter()
            .flat_map(|(_, sample)| points_for(sample, &self.tags.tags(sample), timestamp))
            .collect()
    }

    #[instrument(skip_all, fields(samples = samples.len(), dry_run = dry_run))]
    pub async fn publish(
        &self,
        samples: &[(&Target, &MetricSample)],
        dry_run: bool,
        timestamp: DateTime<Utc>,
    ) -> Result<(), PublishError> {
        if dry_run {
            for (target, sample) in samples {
                match render_report(target, &self.tags.tags(sample), sample) {
                    Ok(report) => println!("{report}"),
                    Err(e) => warn!("could not render report for {target}: {e}"),
                }
            }
            return Ok(());
        }

        let points = self.points(samples, timestamp);
        if points.is_empty() {
            debug!("no points to upload this cycle");
            return Ok(());
        }

        trace!("uploading {} points", points.len());
        self.writer
            .write(&self.bucket, &self.organization, &points)
            .await?;
        debug!("uploaded {} points for {} hosts", points.len(), samples.len());
        Ok(())
    }
}

/// Human-readable rendering of one sample for dry-run mode.
pub fn render_report(
    target: &Target,
    tags: &Tags,
    sample: &MetricSample,
) -> serde_json::Result<String> {
    let mut report = format!(
        "\nStats for host {target}:\n\nTags:\n{}\n",
        serde_json::to_string_pretty(tags)?
    );

    push_measurement(&mut report, TRAFFIC, &sample.traffic)?;
    push_measurement(&mut report, CONNECTIONS, &sample.connections)?;
    push_measurement(&mut report, HANDSHAKES, &sample.handshakes)?;

    Ok(report)
}

fn push_measurement<T: Serialize>(
    report: &mut String,
    measurement: &str,
    fields: &T,
) -> serde_json::Result<()> {
    report.push_str(&format!(
        "\n{} measurement:\n{}\n",
        title(measurement),
        serde_json::to_string_pretty(fields)?
    ));
    Ok(())
}

fn title(measurement: &str) -> String {
    let mut chars = measurement.chars();
    match chars.next() {
        Some(first) => first.to_uppercase().chain(chars).collect(),
        None => String::new(),
    }
}
