//! End-to-end cycle tests: real control client, real Influx writer, real file

use std::collections::HashMap;

use pretty_assertions::assert_eq;
use tor_metrics::config::{Config, Target};
use tor_metrics::cycle::TagPolicy;
use tor_metrics::health::HealthState;
use tor_metrics::scheduler::Scheduler;
use wiremock::matchers::{header, method, path, query_param};
use wiremock::{Mock, MockServer, ResponseTemplate};

use crate::helpers::*;

async fn accepting_store() -> MockServer {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/api/v2/write"))
        .and(query_param("org", "tor-org"))
        .and(query_param("bucket", "tor-bucket"))
        .and(query_param("precision", "s"))
        .and(header("Authorization", "Token test-token"))
        .respond_with(ResponseTemplate::new(204))
        .mount(&server)
        .await;
    server
}

#[tokio::test]
async fn test_cycle_publishes_reachable_relays_only() {
    let store = accepting_store().await;
    let relay_a = spawn_fake_tor("pw", default_relay_values()).await;
    let relay_b = spawn_fake_tor("pw", relay_values(7000, 6000, 0, 1, 40, 38, 0, 0)).await;
    let dir = tempfile::tempdir().unwrap();
    let healthcheck = dir.path().join("healthcheck");

    let targets = vec![
        relay_a.target("pw", "relay-a"),
        relay_b.target("pw", "relay-b"),
        Target {
            address: "127.0.0.1".to_string(),
            port: closed_port(),
            credential: "pw".to_string(),
            label: "relay-down".to_string(),
        },
    ];
    let mut scheduler = live_scheduler(
        targets,
        &store.uri(),
        TagPolicy::default(),
        &healthcheck,
        false,
    );

    let outcome = scheduler.run_once().await;

    assert_eq!(outcome.attempted, 3);
    assert_eq!(outcome.succeeded, 2);
    assert_eq!(outcome.failed(), 1);
    assert!(outcome.any_failure);

    let requests = store.received_requests().await.unwrap();
    assert_eq!(requests.len(), 1);

    let lines = received_lines(&store).await;
    assert_eq!(lines.len(), 6);
    assert!(lines.iter().all(|line| !line.contains("relay-down")));

    let relay_a_lines = lines
        .iter()
        .filter(|line| line.contains("host=relay-a "))
        .collect::<Vec<_>>();
    assert_eq!(relay_a_lines.len(), 3);
    assert!(relay_a_lines[0].starts_with("traffic,host=relay-a read=100i,written=50i "));
    assert!(relay_a_lines[1].starts_with("connections,host=relay-a circuits_active=2i,streams_active=3i "));
    assert!(relay_a_lines[2].starts_with(
        "handshakes,host=relay-a ntor_requested=10i,ntor_assigned=9i,tap_requested=1i,tap_assigned=1i "
    ));
    assert!(lines.iter().any(|line| line.starts_with("connections,host=relay-b circuits_active=0i,streams_active=1i ")));

    // every point of a cycle shares the same timestamp
    let timestamps = lines
        .iter()
        .filter_map(|line| line.rsplit(' ').next())
        .collect::<std::collections::HashSet<_>>();
    assert_eq!(timestamps.len(), 1);

    assert_eq!(scheduler.health().state(), HealthState::Unhealthy);
    assert_eq!(std::fs::read_to_string(&healthcheck).unwrap(), "FAILED");

    assert_eq!(relay_a.connections(), 1);
    assert_eq!(relay_a.quits(), 1);
    assert_eq!(relay_b.quits(), 1);
}

#[tokio::test]
async fn test_cycle_tags_version_and_service() {
    let store = accepting_store().await;
    let relay = spawn_fake_tor("pw", default_relay_values()).await;
    let dir = tempfile::tempdir().unwrap();
    let healthcheck = dir.path().join("healthcheck");

    let tags = TagPolicy {
        send_version: true,
        service: Some("tor".to_string()),
    };
    let mut scheduler = live_scheduler(
        vec![relay.target("pw", "relay-a")],
        &store.uri(),
        tags,
        &healthcheck,
        false,
    );

    let outcome = scheduler.run_once().await;
    assert!(!outcome.any_failure);

    let lines = received_lines(&store).await;
    assert_eq!(lines.len(), 3);
    for line in &lines {
        assert!(
            line.contains(r",host=relay-a,service=tor,version=0.4.8.12\ (git-4a7d12c2a3f2a0b1) "),
            "unexpected tags in {line}"
        );
    }
    assert_eq!(std::fs::read_to_string(&healthcheck).unwrap(), "OK");
}

#[tokio::test]
async fn test_dry_run_from_config_never_contacts_store() {
    let store = accepting_store().await;
    let relay = spawn_fake_tor("pw", default_relay_values()).await;
    let dir = tempfile::tempdir().unwrap();
    let healthcheck = dir.path().join("healthcheck");

    let store_address = store.address();
    let env = HashMap::from([
        ("INFLUX_HOST", store_address.ip().to_string()),
        ("INFLUX_PORT", store_address.port().to_string()),
        ("INFLUX_ORGANIZATION", "tor-org".to_string()),
        ("INFLUX_BUCKET", "tor-bucket".to_string()),
        ("INFLUX_TOKEN", "test-token".to_string()),
        ("TOR_HOSTS", format!("127.0.0.1:{}:pw:relay-a", relay.port)),
        ("RUN_EVERY_SECONDS", "60".to_string()),
        (
            "HEALTHCHECK_FILE",
            healthcheck.to_string_lossy().into_owned(),
        ),
    ]);
    let config = Config::from_lookup(|key| env.get(key).cloned()).unwrap();

    let mut scheduler = Scheduler::from_config(&config, true).unwrap();
    assert_eq!(std::fs::read_to_string(&healthcheck).unwrap(), "OK");

    let outcome = scheduler.run_once().await;

    assert_eq!(outcome.succeeded, 1);
    assert!(!outcome.any_failure);
    assert!(store.received_requests().await.unwrap().is_empty());
    assert_eq!(relay.quits(), 1);
    assert_eq!(std::fs::read_to_string(&healthcheck).unwrap(), "OK");
}

#[tokio::test]
async fn test_all_targets_down_skips_write() {
    let store = accepting_store().await;
    let dir = tempfile::tempdir().unwrap();
    let healthcheck = dir.path().join("healthcheck");

    let targets = vec![Target {
        address: "127.0.0.1".to_string(),
        port: closed_port(),
        credential: "pw".to_string(),
        label: "relay-down".to_string(),
    }];
    let mut scheduler = live_scheduler(
        targets,
        &store.uri(),
        TagPolicy::default(),
        &healthcheck,
        false,
    );

    let outcome = scheduler.run_once().await;

    assert_eq!(outcome.succeeded, 0);
    assert!(outcome.any_failure);
    assert!(store.received_requests().await.unwrap().is_empty());
    assert_eq!(std::fs::read_to_string(&healthcheck).unwrap(), "FAILED");
}
