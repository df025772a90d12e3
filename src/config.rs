//! Process configuration and the static target registry
//!
//! Configuration is read once at startup from environment-style key/value
//! pairs and then handed to the scheduler as an immutable [`Config`].

use std::fmt;
use std::path::PathBuf;
use std::time::Duration;

use tracing::level_filters::LevelFilter;
use tracing::trace;

use crate::util::{
    HEALTHCHECK_FILE, INFLUX_BUCKET, INFLUX_HOST, INFLUX_ORGANIZATION, INFLUX_PORT,
    INFLUX_SEND_VERSION_TAG, INFLUX_SERVICE_TAG, INFLUX_TIMEOUT_SECONDS, INFLUX_TOKEN,
    RUN_EVERY_SECONDS, TOR_HOSTS, TOR_TIMEOUT_SECONDS, VERBOSE, get_default_healthcheck_path,
    get_default_influx_timeout, get_default_tor_timeout, parse_flag,
};

const REDACTED: &str = "***";

/// Fatal configuration errors, only raised during startup
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ConfigError {
    /// A required key is not set
    Missing(&'static str),

    /// A numeric key could not be parsed or is out of range
    InvalidNumber { key: &'static str, value: String },

    /// A tag value contains characters the store cannot carry
    InvalidTag { key: &'static str, value: String },

    /// A `TOR_HOSTS` entry is malformed
    ///
    /// `entry` is the raw entry with its credential field masked.
    InvalidTarget {
        index: usize,
        entry: String,
        reason: String,
    },
}

impl fmt::Display for ConfigError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ConfigError::Missing(key) => write!(f, "missing required configuration {key}"),
            ConfigError::InvalidNumber { key, value } => {
                write!(f, "invalid numeric value <{value}> for {key}")
            }
            ConfigError::InvalidTag { key, value } => write!(
                f,
                "invalid value <{}> for {key}: backslashes and control characters are not allowed",
                value.escape_debug()
            ),
            ConfigError::InvalidTarget {
                index,
                entry,
                reason,
            } => write!(f, "wrong {TOR_HOSTS} entry #{index} <{entry}>: {reason}"),
        }
    }
}

impl std::error::Error for ConfigError {}

/// A single Tor control endpoint to poll
///
/// The label is used as the `host` tag and is not required to be unique.
#[derive(Clone, PartialEq, Eq)]
pub struct Target {
    pub address: String,
    pub port: u16,
    pub credential: String,
    pub label: String,
}

impl Target {
    pub fn endpoint(&self) -> String {
        format!("{}:{}", self.address, self.port)
    }
}

impl fmt::Debug for Target {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Target")
            .field("address", &self.address)
            .field("port", &self.port)
            .field("credential", &REDACTED)
            .field("label", &self.label)
            .finish()
    }
}

impl fmt::Display for Target {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}({})", self.address, self.port, self.label)
    }
}

/// Parse `host:port:credential:label` entries into targets, in order.
///
/// Fails on the first malformed entry; nothing is skipped.
pub fn parse_targets<I, S>(entries: I) -> Result<Vec<Target>, ConfigError>
where
    I: IntoIterator<Item = S>,
    S: AsRef<str>,
{
    entries
        .into_iter()
        .enumerate()
        .map(|(index, entry)| parse_target(index, entry.as_ref()))
        .collect()
}

/// Parse the comma-separated `TOR_HOSTS` value.
pub fn parse_target_list(value: &str) -> Result<Vec<Target>, ConfigError> {
    parse_targets(value.split(','))
}

fn parse_target(index: usize, raw: &str) -> Result<Target, ConfigError> {
    let entry = raw.trim();
    let invalid = |reason: &str| ConfigError::InvalidTarget {
        index,
        entry: mask_entry(entry),
        reason: reason.to_string(),
    };

    let fields = entry.split(':').collect::<Vec<_>>();
    let [address, port, credential, label] = fields.as_slice() else {
        return Err(invalid(&format!(
            "expected 4 colon-separated fields (host:port:password:name), got {}",
            fields.len()
        )));
    };

    if address.is_empty() || address.chars().any(char::is_whitespace) {
        return Err(invalid("host must be a non-empty address"));
    }

    let port = match port.parse::<u16>() {
        Ok(port) if port > 0 => port,
        _ => return Err(invalid(&format!("wrong port <{port}>"))),
    };

    if label.is_empty() {
        return Err(invalid("name must not be empty"));
    }

    if !is_valid_tag(label) {
        return Err(invalid("name must not contain backslashes or control characters"));
    }

    Ok(Target {
        address: address.to_string(),
        port,
        credential: credential.to_string(),
        label: label.to_string(),
    })
}

/// Tag values end up in line protocol, where a backslash or line break
/// would corrupt the record.
fn is_valid_tag(value: &str) -> bool {
    !value.chars().any(|c| c == '\\' || c.is_control())
}

fn mask_entry(entry: &str) -> String {
    entry
        .split(':')
        .enumerate()
        .map(|(position, field)| if position == 2 { REDACTED } else { field })
        .collect::<Vec<_>>()
        .join(":")
}

/// Connection settings for the InfluxDB v2 store
#[derive(Clone)]
pub struct InfluxSettings {
    /// Base URL including scheme and port, e.g. `http://influx:8086`
    pub url: String,
    pub organization: String,
    pub bucket: String,
    pub token: String,
    pub timeout: Duration,
}

impl fmt::Debug for InfluxSettings {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("InfluxSettings")
            .field("url", &self.url)
            .field("organization", &self.organization)
            .field("bucket", &self.bucket)
            .field("token", &REDACTED)
            .field("timeout", &self.timeout)
            .finish()
    }
}

#[derive(Debug, Clone)]
pub struct Config {
    pub influx: InfluxSettings,

    /// Static `service` tag added to every point
    pub service_tag: Option<String>,

    /// Whether to add the daemon version as a `version` tag
    pub send_version_tag: bool,

    pub targets: Vec<Target>,

    /// Start-to-start interval between cycles
    pub period: Duration,

    /// Upper bound for a single target collection
    pub collect_timeout: Duration,

    pub healthcheck_path: PathBuf,

    pub verbose: bool,
}

impl Config {
    /// Load configuration from the process environment (and `.env`, if present).
    pub fn from_env() -> Result<Config, ConfigError> {
        dotenv::dotenv().ok();
        Config::from_lookup(|key| std::env::var(key).ok())
    }

    /// Build configuration from an arbitrary key lookup.
    pub fn from_lookup<F>(lookup: F) -> Result<Config, ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let required = |key: &'static str| {
            lookup(key)
                .filter(|value| !value.trim().is_empty())
                .ok_or(ConfigError::Missing(key))
        };

        let host = required(INFLUX_HOST)?;
        let port = parse_number(INFLUX_PORT, &required(INFLUX_PORT)?)?;
        let port = u16::try_from(port).map_err(|_| ConfigError::InvalidNumber {
            key: INFLUX_PORT,
            value: port.to_string(),
        })?;

        let influx = InfluxSettings {
            url: influx_url(host.trim(), port),
            organization: required(INFLUX_ORGANIZATION)?,
            bucket: required(INFLUX_BUCKET)?,
            token: required(INFLUX_TOKEN)?,
            timeout: optional_seconds(&lookup, INFLUX_TIMEOUT_SECONDS, get_default_influx_timeout())?,
        };

        let config = Config {
            influx,
            service_tag: service_tag(&lookup)?,
            send_version_tag: parse_flag(lookup(INFLUX_SEND_VERSION_TAG).as_deref()),
            targets: parse_target_list(&required(TOR_HOSTS)?)?,
            period: Duration::from_secs(parse_number(
                RUN_EVERY_SECONDS,
                &required(RUN_EVERY_SECONDS)?,
            )?),
            collect_timeout: optional_seconds(&lookup, TOR_TIMEOUT_SECONDS, get_default_tor_timeout())?,
            healthcheck_path: lookup(HEALTHCHECK_FILE)
                .filter(|path| !path.trim().is_empty())
                .map(PathBuf::from)
                .unwrap_or_else(get_default_healthcheck_path),
            verbose: parse_flag(lookup(VERBOSE).as_deref()),
        };

        trace!("loaded config: {config:?}");
        Ok(config)
    }

    /// Log level for the process: everything when verbose, `INFO` otherwise.
    pub fn log_level(&self) -> LevelFilter {
        if self.verbose {
            LevelFilter::TRACE
        } else {
            LevelFilter::INFO
        }
    }
}

fn service_tag<F>(lookup: &F) -> Result<Option<String>, ConfigError>
where
    F: Fn(&str) -> Option<String>,
{
    match lookup(INFLUX_SERVICE_TAG).map(|tag| tag.trim().to_string()) {
        Some(tag) if tag.is_empty() => Ok(None),
        Some(tag) if !is_valid_tag(&tag) => Err(ConfigError::InvalidTag {
            key: INFLUX_SERVICE_TAG,
            value: tag,
        }),
        tag => Ok(tag),
    }
}

/// Parse a strictly positive integer.
fn parse_number(key: &'static str, value: &str) -> Result<u64, ConfigError> {
    match value.trim().parse::<u64>() {
        Ok(number) if number > 0 => Ok(number),
        _ => Err(ConfigError::InvalidNumber {
            key,
            value: value.to_string(),
        }),
    }
}

fn optional_seconds<F>(lookup: &F, key: &'static str, default: u64) -> Result<Duration, ConfigError>
where
    F: Fn(&str) -> Option<String>,
{
    let seconds = match lookup(key).filter(|value| !value.trim().is_empty()) {
        Some(value) => parse_number(key, &value)?,
        None => default,
    };
    Ok(Duration::from_secs(seconds))
}

fn influx_url(host: &str, port: u16) -> String {
    let host = host.trim_end_matches('/');
    if host.starts_with("http://") || host.starts_with("https://") {
        format!("{host}:{port}")
    } else {
        format!("http://{host}:{port}")
    }
}
