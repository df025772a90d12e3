//! Control-port collaborator contract
//!
//! The collector only talks to a daemon through [`ControlClient`] and
//! [`ControlConnection`]. [`tor::TorControlClient`] implements them on top of
//! the Tor control protocol; tests plug in scripted fakes.

pub mod tor;

use std::fmt;

use async_trait::async_trait;

pub use tor::TorControlClient;

/// Errors reported by a control-port client
#[derive(Debug)]
pub enum ControlError {
    /// The endpoint could not be reached or the connection dropped
    Unreachable(String),

    /// The daemon rejected the credential
    AuthFailed(String),

    /// The daemon does not know the requested key
    NotFound(String),

    /// The daemon answered with something the client cannot interpret
    Protocol(String),
}

impl fmt::Display for ControlError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ControlError::Unreachable(msg) => write!(f, "control port unreachable: {msg}"),
            ControlError::AuthFailed(msg) => write!(f, "authentication failed: {msg}"),
            ControlError::NotFound(key) => write!(f, "unknown key {key}"),
            ControlError::Protocol(msg) => write!(f, "control protocol error: {msg}"),
        }
    }
}

impl std::error::Error for ControlError {}

impl From<std::io::Error> for ControlError {
    fn from(err: std::io::Error) -> Self {
        ControlError::Unreachable(err.to_string())
    }
}

/// Opens control connections
#[async_trait]
pub trait ControlClient: Send + Sync {
    type Connection: ControlConnection;

    async fn connect(&self, address: &str, port: u16) -> Result<Self::Connection, ControlError>;
}

/// An open control connection to a single daemon
///
/// Dropping a connection releases the underlying socket; [`close`] additionally
/// says goodbye to the daemon first.
///
/// [`close`]: ControlConnection::close
#[async_trait]
pub trait ControlConnection: Send {
    async fn authenticate(&mut self, credential: &str) -> Result<(), ControlError>;

    /// Fetch the raw value for `key`
    async fn query(&mut self, key: &str) -> Result<String, ControlError>;

    async fn close(&mut self);
}
