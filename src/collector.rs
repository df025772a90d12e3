//! TargetCollector - one connect → authenticate → query → close pass
//!
//! A collection either yields a complete [`MetricSample`] or a classified
//! [`CollectionError`]. Nothing is retried here; the next cycle is the retry.

use std::fmt;
use std::time::Duration;

use tokio::time::{Instant, timeout, timeout_at};
use tracing::{debug, instrument, trace};

use crate::config::Target;
use crate::control::{ControlClient, ControlConnection, ControlError};
use crate::{Connections, Handshakes, MetricSample, Traffic};

/// Upper bound for the `QUIT` exchange once the queries are done
pub const CLOSE_TIMEOUT: Duration = Duration::from_secs(1);

pub const VERSION: &str = "version";
pub const CIRCUIT_STATUS: &str = "circuit-status";
pub const STREAM_STATUS: &str = "stream-status";
pub const TRAFFIC_READ: &str = "traffic/read";
pub const TRAFFIC_WRITTEN: &str = "traffic/written";
pub const NTOR_REQUESTED: &str = "stats/ntor/requested";
pub const NTOR_ASSIGNED: &str = "stats/ntor/assigned";
pub const TAP_REQUESTED: &str = "stats/tap/requested";
pub const TAP_ASSIGNED: &str = "stats/tap/assigned";

/// Why a single target produced no sample this cycle
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CollectionError {
    /// Could not open the control connection, or it dropped mid-way
    Unreachable(String),

    /// The daemon rejected the credential
    AuthFailed(String),

    /// A numeric field was missing or not a number
    MalformedResponse { field: &'static str, detail: String },

    /// The whole collection did not finish within the per-target timeout
    Timeout(Duration),
}

impl CollectionError {
    pub fn kind(&self) -> &'static str {
        match self {
            CollectionError::Unreachable(_) => "Unreachable",
            CollectionError::AuthFailed(_) => "AuthFailed",
            CollectionError::MalformedResponse { .. } => "MalformedResponse",
            CollectionError::Timeout(_) => "Timeout",
        }
    }

    fn from_query(field: &'static str, err: ControlError) -> Self {
        match err {
            ControlError::Unreachable(msg) => CollectionError::Unreachable(msg),
            ControlError::AuthFailed(msg) => CollectionError::AuthFailed(msg),
            ControlError::NotFound(_) => CollectionError::MalformedResponse {
                field,
                detail: "missing from reply".to_string(),
            },
            ControlError::Protocol(msg) => CollectionError::MalformedResponse { field, detail: msg },
        }
    }
}

impl fmt::Display for CollectionError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            CollectionError::Unreachable(msg) => write!(f, "could not connect: {msg}"),
            CollectionError::AuthFailed(msg) => write!(f, "could not authenticate: {msg}"),
            CollectionError::MalformedResponse { field, detail } => {
                write!(f, "error parsing {field}: {detail}")
            }
            CollectionError::Timeout(timeout) => {
                write!(f, "collection did not finish within {}s", timeout.as_secs_f64())
            }
        }
    }
}

impl std::error::Error for CollectionError {}

/// Collects one [`MetricSample`] per call; keeps no state between calls.
#[derive(Debug, Clone)]
pub struct TargetCollector<C> {
    client: C,
    timeout: Duration,
}

impl<C: ControlClient> TargetCollector<C> {
    pub fn new(client: C, timeout: Duration) -> Self {
        Self { client, timeout }
    }

    /// Collect a sample from `target`.
    ///
    /// Connecting, authenticating and querying share one deadline. Closing
    /// runs afterwards under [`CLOSE_TIMEOUT`] and never changes the result,
    /// so a daemon that stalls on `QUIT` still yields its sample. The
    /// connection is closed on every path once it was opened.
    #[instrument(skip_all, fields(relay = %target))]
    pub async fn collect(&self, target: &Target) -> Result<MetricSample, CollectionError> {
        trace!("collecting data");
        let deadline = Instant::now() + self.timeout;

        let mut connection =
            match timeout_at(deadline, self.client.connect(&target.address, target.port)).await {
                Ok(Ok(connection)) => connection,
                Ok(Err(ControlError::Unreachable(msg))) => {
                    return Err(CollectionError::Unreachable(msg));
                }
                Ok(Err(other)) => return Err(CollectionError::Unreachable(other.to_string())),
                Err(_) => return Err(CollectionError::Timeout(self.timeout)),
            };

        let result = timeout_at(deadline, query_target(&mut connection, target))
            .await
            .unwrap_or(Err(CollectionError::Timeout(self.timeout)));

        if timeout(CLOSE_TIMEOUT, connection.close()).await.is_err() {
            debug!("daemon did not acknowledge QUIT within {CLOSE_TIMEOUT:?}");
        }
        result
    }
}

async fn query_target<K: ControlConnection>(
    connection: &mut K,
    target: &Target,
) -> Result<MetricSample, CollectionError> {
    match connection.authenticate(&target.credential).await {
        Ok(()) => query_sample(connection, &target.label).await,
        Err(ControlError::Unreachable(msg)) => Err(CollectionError::Unreachable(msg)),
        Err(e) => Err(CollectionError::AuthFailed(e.to_string())),
    }
}

async fn query_sample<K: ControlConnection>(
    connection: &mut K,
    label: &str,
) -> Result<MetricSample, CollectionError> {
    let version = match connection.query(VERSION).await {
        Ok(raw) => Some(raw.trim().to_string()).filter(|version| !version.is_empty()),
        Err(ControlError::NotFound(_)) => None,
        Err(e) => return Err(CollectionError::from_query(VERSION, e)),
    };

    let connections = Connections {
        circuits_active: query_entry_count(connection, CIRCUIT_STATUS).await?,
        streams_active: query_entry_count(connection, STREAM_STATUS).await?,
    };

    let traffic = Traffic {
        read: query_counter(connection, TRAFFIC_READ).await?,
        written: query_counter(connection, TRAFFIC_WRITTEN).await?,
    };

    let handshakes = Handshakes {
        ntor_requested: query_counter(connection, NTOR_REQUESTED).await?,
        ntor_assigned: query_counter(connection, NTOR_ASSIGNED).await?,
        tap_requested: query_counter(connection, TAP_REQUESTED).await?,
        tap_assigned: query_counter(connection, TAP_ASSIGNED).await?,
    };

    Ok(MetricSample {
        label: label.to_string(),
        version,
        traffic,
        connections,
        handshakes,
    })
}

async fn query_counter<K: ControlConnection>(
    connection: &mut K,
    field: &'static str,
) -> Result<u64, CollectionError> {
    let raw = connection
        .query(field)
        .await
        .map_err(|e| CollectionError::from_query(field, e))?;

    raw.trim()
        .parse::<u64>()
        .map_err(|_| CollectionError::MalformedResponse {
            field,
            detail: format!("expected an unsigned integer, got {raw:?}"),
        })
}

/// Number of entries (non-empty lines) in a status listing.
async fn query_entry_count<K: ControlConnection>(
    connection: &mut K,
    field: &'static str,
) -> Result<u32, CollectionError> {
    let raw = connection
        .query(field)
        .await
        .map_err(|e| CollectionError::from_query(field, e))?;

    let count = raw.lines().filter(|line| !line.trim().is_empty()).count();
    u32::try_from(count).map_err(|_| CollectionError::MalformedResponse {
        field,
        detail: format!("{count} entries do not fit a 32-bit counter"),
    })
}
