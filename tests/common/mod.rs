// Shared fixtures for integration tests
#![allow(dead_code)]

use async_trait::async_trait;
use parking_lot::Mutex;
use relevo::{
    Connection, ConnectionConfig, DriverError, EventRegistry, ManualClock, Proxy, ProxyConfig,
    Role, RouterEvent, Rows,
};
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::{Duration, UNIX_EPOCH};

/// In-memory database connection with failure injection
pub struct FakeDatabase {
    statements: Mutex<Vec<String>>,
    failure: Mutex<Option<DriverError>>,
    pub reconnects: AtomicUsize,
    pub reconnect_fails: AtomicBool,
    pub open_transactions: AtomicUsize,
}

impl FakeDatabase {
    pub fn new() -> Self {
        Self {
            statements: Mutex::new(Vec::new()),
            failure: Mutex::new(None),
            reconnects: AtomicUsize::new(0),
            reconnect_fails: AtomicBool::new(false),
            open_transactions: AtomicUsize::new(0),
        }
    }

    pub fn fail_with(&self, message: &str) {
        *self.failure.lock() = Some(DriverError::new(message));
    }

    pub fn fail_with_class(&self, message: &str, class: &str) {
        *self.failure.lock() = Some(DriverError::new(message).with_class(class));
    }

    pub fn heal(&self) {
        *self.failure.lock() = None;
    }

    pub fn executed(&self) -> Vec<String> {
        self.statements.lock().clone()
    }

    pub fn count(&self) -> usize {
        self.statements.lock().len()
    }
}

#[async_trait]
impl Connection for FakeDatabase {
    async fn execute(&self, statement: &str) -> Result<Rows, DriverError> {
        if let Some(error) = self.failure.lock().clone() {
            return Err(error);
        }
        self.statements.lock().push(statement.to_string());
        Ok(Rows::affected(1))
    }

    async fn reconnect(&self) -> Result<(), DriverError> {
        self.reconnects.fetch_add(1, Ordering::SeqCst);
        if self.reconnect_fails.load(Ordering::SeqCst) {
            return Err(DriverError::new("could not connect to server"));
        }
        Ok(())
    }

    async fn close(&self) -> Result<(), DriverError> {
        Ok(())
    }

    async fn is_alive(&self) -> bool {
        self.failure.lock().is_none()
    }

    fn open_transaction_count(&self) -> Option<usize> {
        Some(self.open_transactions.load(Ordering::SeqCst))
    }
}

/// A built proxy plus handles on everything behind it
pub struct Cluster {
    pub proxy: Proxy,
    pub databases: HashMap<String, Arc<FakeDatabase>>,
    pub clock: Arc<ManualClock>,
    pub events: Arc<Mutex<Vec<RouterEvent>>>,
}

impl Cluster {
    pub fn db(&self, name: &str) -> &FakeDatabase {
        &self.databases[name]
    }

    pub fn routed(&self) -> Vec<String> {
        self.events
            .lock()
            .iter()
            .filter_map(|event| match event {
                RouterEvent::Routed { connection, .. } => Some(connection.clone()),
                _ => None,
            })
            .collect()
    }

    pub fn clear_events(&self) {
        self.events.lock().clear();
    }
}

/// One primary and `replicas` replicas with a 5 second blocklist
pub fn config(replicas: usize) -> ProxyConfig {
    let mut connections = vec![ConnectionConfig::new(Role::Primary).named("P")];
    connections.extend(
        (1..=replicas).map(|n| ConnectionConfig::new(Role::Replica).named(format!("R{}", n))),
    );
    ProxyConfig {
        id: Some("app".to_string()),
        blocklist_duration: 5.0,
        shuffle: false,
        connections,
        ..Default::default()
    }
}

pub fn cluster(replicas: usize) -> Cluster {
    cluster_with(config(replicas))
}

pub fn cluster_with(config: ProxyConfig) -> Cluster {
    let clock = Arc::new(ManualClock::new(UNIX_EPOCH + Duration::from_secs(1_700_000_000)));
    let registry = EventRegistry::new();
    let events = Arc::new(Mutex::new(Vec::new()));
    let sink = Arc::clone(&events);
    registry.register(move |event| sink.lock().push(event.clone()));

    let mut databases = HashMap::new();
    let proxy = Proxy::builder(config)
        .clock(clock.clone())
        .events(registry)
        .build(|name, _entry| {
            let db = Arc::new(FakeDatabase::new());
            databases.insert(name.to_string(), Arc::clone(&db));
            Ok(db as Arc<dyn Connection>)
        })
        .expect("cluster config is valid");

    Cluster {
        proxy,
        databases,
        clock,
        events,
    }
}
