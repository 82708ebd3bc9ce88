mod common;

use common::cluster_with;
use relevo::{ConfigError, Proxy, ProxyConfig, RelevoError, StrategyKind};
use std::io::Write;
use std::time::Duration;
use tempfile::NamedTempFile;

const CLUSTER: &str = r#"
    id = "orders"
    blocklist_duration = 20
    shuffle = false
    primary_ttl = 1
    harsh_errors = ["PG::QueryCanceled"]

    [[connections]]
    role = "primary"
    name = "P"
    host = "db-primary"

    [[connections]]
    role = "replica"
    name = "R1"
    host = "db-replica-1"
    blocklist_duration = 2
    connection_error_matchers = ["/recovery mode/i"]

    [[connections]]
    role = "replica"
    name = "R2"
    host = "db-replica-2"
"#;

fn load() -> ProxyConfig {
    let mut file = NamedTempFile::new().unwrap();
    file.write_all(CLUSTER.as_bytes()).unwrap();
    ProxyConfig::load_from_file(file.path()).unwrap()
}

#[test]
fn test_connection_settings_reach_the_factory() {
    let config = load();
    assert_eq!(config.replica_strategy, StrategyKind::RoundRobin);

    let hosts: Vec<(String, String)> = config
        .named_connections()
        .into_iter()
        .map(|(name, entry)| {
            let host = entry.settings.get("host").and_then(|v| v.as_str()).unwrap_or_default();
            (name, host.to_string())
        })
        .collect();
    assert_eq!(
        hosts,
        vec![
            ("P".to_string(), "db-primary".to_string()),
            ("R1".to_string(), "db-replica-1".to_string()),
            ("R2".to_string(), "db-replica-2".to_string()),
        ]
    );
}

#[tokio::test]
async fn test_configured_matchers_and_durations_apply() {
    let c = cluster_with(load());
    assert_eq!(c.proxy.id(), "orders");

    c.db("R1").fail_with("FATAL: the database is in Recovery Mode");
    c.proxy.execute("SELECT 1").await.unwrap();
    c.proxy.execute("SELECT 1").await.unwrap();
    assert_eq!(c.db("R2").count(), 2);

    let r1 = c.proxy.find_connection("R1").unwrap();
    assert!(r1.blocklist_active());
    assert_eq!(r1.blocklist_duration(), Duration::from_secs(2));
    assert_eq!(
        c.proxy.find_connection("R2").unwrap().blocklist_duration(),
        Duration::from_secs(20)
    );

    c.db("R1").heal();
    c.clock.advance(Duration::from_secs(3));
    assert!(!r1.blocklisted().await);
    assert_eq!(c.db("R1").reconnects.load(std::sync::atomic::Ordering::SeqCst), 1);
}

#[tokio::test]
async fn test_harsh_error_classes_never_blocklist() {
    let c = cluster_with(load());
    c.proxy.execute("UPDATE t SET x = 1").await.unwrap();
    c.db("P").fail_with_class("canceling statement: connection lost", "PG::QueryCanceled");

    let error = c.proxy.execute("UPDATE t SET x = 2").await.unwrap_err();
    assert!(matches!(error, RelevoError::Driver(_)));
    assert!(!c.proxy.find_connection("P").unwrap().blocklist_active());
}

#[test]
fn test_invalid_file_is_rejected() {
    let mut file = NamedTempFile::new().unwrap();
    file.write_all(b"[[connections]]\nrole = \"replica\"\n").unwrap();
    let err = ProxyConfig::load_from_file(file.path()).unwrap_err();
    assert!(matches!(err, ConfigError::ValidationError(_)));
}

#[test]
fn test_builder_validates_before_opening_connections() {
    let mut config = load();
    config.connections[1].weight = 0;

    let result = Proxy::builder(config).build(|_, _| unreachable!("no connection is opened"));
    assert!(matches!(result, Err(RelevoError::Config(_))));
}
