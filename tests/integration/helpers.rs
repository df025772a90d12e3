//! Helper functions for integration tests

use std::collections::HashMap;
use std::path::Path;
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;

use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tokio::net::{TcpListener, TcpStream};
use tor_metrics::collector::TargetCollector;
use tor_metrics::config::{InfluxSettings, Target};
use tor_metrics::control::TorControlClient;
use tor_metrics::cycle::{CycleRunner, TagPolicy};
use tor_metrics::health::{FileArtifact, HealthMonitor};
use tor_metrics::publish::{InfluxWriter, Publisher};
use tor_metrics::scheduler::Scheduler;

pub type LiveScheduler = Scheduler<TorControlClient, InfluxWriter, FileArtifact>;

/// A scripted Tor control port listening on localhost
pub struct FakeTor {
    pub port: u16,
    pub connections: Arc<AtomicUsize>,
    pub quits: Arc<AtomicUsize>,
}

impl FakeTor {
    pub fn connections(&self) -> usize {
        self.connections.load(Ordering::SeqCst)
    }

    pub fn quits(&self) -> usize {
        self.quits.load(Ordering::SeqCst)
    }

    pub fn target(&self, password: &str, label: &str) -> Target {
        Target {
            address: "127.0.0.1".to_string(),
            port: self.port,
            credential: password.to_string(),
            label: label.to_string(),
        }
    }
}

/// GETINFO values for a relay with the given counters
#[allow(clippy::too_many_arguments)]
pub fn relay_values(
    read: u64,
    written: u64,
    circuits: usize,
    streams: usize,
    ntor_requested: u64,
    ntor_assigned: u64,
    tap_requested: u64,
    tap_assigned: u64,
) -> HashMap<String, String> {
    let listing = |count: usize, kind: &str| {
        (1..=count)
            .map(|id| format!("{id} {kind} $ABCDEF~relay PURPOSE=GENERAL"))
            .collect::<Vec<_>>()
            .join("\n")
    };

    HashMap::from([
        ("version".to_string(), "0.4.8.12 (git-4a7d12c2a3f2a0b1)".to_string()),
        ("circuit-status".to_string(), listing(circuits, "BUILT")),
        ("stream-status".to_string(), listing(streams, "SUCCEEDED")),
        ("traffic/read".to_string(), read.to_string()),
        ("traffic/written".to_string(), written.to_string()),
        ("stats/ntor/requested".to_string(), ntor_requested.to_string()),
        ("stats/ntor/assigned".to_string(), ntor_assigned.to_string()),
        ("stats/tap/requested".to_string(), tap_requested.to_string()),
        ("stats/tap/assigned".to_string(), tap_assigned.to_string()),
    ])
}

pub fn default_relay_values() -> HashMap<String, String> {
    relay_values(100, 50, 2, 3, 10, 9, 1, 1)
}

/// Spawn a fake control port that accepts any number of connections.
pub async fn spawn_fake_tor(password: &'static str, values: HashMap<String, String>) -> FakeTor {
    spawn_daemon(password, values, true).await
}

/// Like [`spawn_fake_tor`], but `QUIT` is never answered and the socket
/// stays open.
pub async fn spawn_fake_tor_ignoring_quit(
    password: &'static str,
    values: HashMap<String, String>,
) -> FakeTor {
    spawn_daemon(password, values, false).await
}

async fn spawn_daemon(
    password: &'static str,
    values: HashMap<String, String>,
    answer_quit: bool,
) -> FakeTor {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let port = listener.local_addr().unwrap().port();
    let connections = Arc::new(AtomicUsize::new(0));
    let quits = Arc::new(AtomicUsize::new(0));
    let values = Arc::new(values);

    let (conn_count, quit_count) = (connections.clone(), quits.clone());
    tokio::spawn(async move {
        while let Ok((socket, _)) = listener.accept().await {
            conn_count.fetch_add(1, Ordering::SeqCst);
            tokio::spawn(handle_connection(
                socket,
                password,
                values.clone(),
                quit_count.clone(),
                answer_quit,
            ));
        }
    });

    FakeTor {
        port,
        connections,
        quits,
    }
}

async fn handle_connection(
    socket: TcpStream,
    password: &'static str,
    values: Arc<HashMap<String, String>>,
    quits: Arc<AtomicUsize>,
    answer_quit: bool,
) {
    let (read, mut write) = socket.into_split();
    let mut lines = BufReader::new(read).lines();
    let mut authenticated = false;

    while let Ok(Some(line)) = lines.next_line().await {
        let reply = if line == "QUIT" {
            quits.fetch_add(1, Ordering::SeqCst);
            if answer_quit {
                let _ = write.write_all(b"250 closing connection\r\n").await;
            } else {
                tokio::time::sleep(Duration::from_secs(3600)).await;
            }
            return;
        } else if let Some(credential) = line.strip_prefix("AUTHENTICATE") {
            if credential.trim() == format!("\"{password}\"") {
                authenticated = true;
                "250 OK\r\n".to_string()
            } else {
                "515 Authentication failed: Password did not match HashedControlPassword value from configuration\r\n".to_string()
            }
        } else if !authenticated {
            "514 Authentication required.\r\n".to_string()
        } else if let Some(key) = line.strip_prefix("GETINFO ") {
            match values.get(key) {
                Some(value) if value.contains('\n') || value.is_empty() => {
                    format!("250+{key}=\r\n{}\r\n.\r\n250 OK\r\n", value.replace('\n', "\r\n"))
                }
                Some(value) => format!("250-{key}={value}\r\n250 OK\r\n"),
                None => format!("552 Unrecognized key \"{key}\"\r\n"),
            }
        } else {
            format!("510 Unrecognized command \"{line}\"\r\n")
        };

        if write.write_all(reply.as_bytes()).await.is_err() {
            return;
        }
    }
}

/// A localhost port with nothing listening on it
pub fn closed_port() -> u16 {
    let listener = std::net::TcpListener::bind("127.0.0.1:0").unwrap();
    listener.local_addr().unwrap().port()
}

pub fn influx_settings(url: &str) -> InfluxSettings {
    InfluxSettings {
        url: url.to_string(),
        organization: "tor-org".to_string(),
        bucket: "tor-bucket".to_string(),
        token: "test-token".to_string(),
        timeout: Duration::from_secs(2),
    }
}

pub fn live_scheduler(
    targets: Vec<Target>,
    influx_url: &str,
    tags: TagPolicy,
    healthcheck: &Path,
    dry_run: bool,
) -> LiveScheduler {
    Scheduler::new(
        targets,
        CycleRunner::new(TargetCollector::new(
            TorControlClient::new(),
            Duration::from_secs(2),
        )),
        Publisher::influx(&influx_settings(influx_url), tags),
        HealthMonitor::new(FileArtifact::new(healthcheck)).unwrap(),
        Duration::from_secs(60),
        dry_run,
    )
}

/// Line-protocol lines of every request the mock store received
pub async fn received_lines(server: &wiremock::MockServer) -> Vec<String> {
    server
        .received_requests()
        .await
        .unwrap_or_default()
        .iter()
        .flat_map(|request| {
            String::from_utf8_lossy(&request.body)
                .lines()
                .map(str::to_string)
                .collect::<Vec<_>>()
        })
        .collect()
}
