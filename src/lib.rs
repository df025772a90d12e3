pub mod collector;
pub mod config;
pub mod control;
pub mod cycle;
pub mod health;
pub mod publish;
pub mod scheduler;
pub mod util;

use serde::Serialize;

/// Measurements taken from one Tor daemon during one cycle.
///
/// A sample only exists for a target whose collection fully succeeded.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MetricSample {
    pub label: String,
    pub version: Option<String>,
    pub traffic: Traffic,
    pub connections: Connections,
    pub handshakes: Handshakes,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct Traffic {
    pub read: u64,
    pub written: u64,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct Connections {
    pub circuits_active: u32,
    pub streams_active: u32,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct Handshakes {
    pub ntor_requested: u64,
    pub ntor_assigned: u64,
    pub tap_requested: u64,
    pub tap_assigned: u64,
}
