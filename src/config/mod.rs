/// Configuration management for relevo
use crate::balancer::StrategyKind;
use crate::context::{CookieOptions, MAX_STICKY_SECS};
use crate::core::Role;
use crate::health::parse_matchers;
use crate::utils::sanitize_proxy_id;
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::collections::HashSet;
use std::fs;
use std::path::Path;
use std::time::Duration;

pub use crate::error::ConfigError;

/// Proxy configuration: pool settings plus the list of connections
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ProxyConfig {
    /// Stable proxy id used in stickiness records; derived from the rest of
    /// the configuration when absent
    #[serde(skip_serializing_if = "Option::is_none")]
    pub id: Option<String>,
    /// Seconds a unit of work stays stuck to the primary after a write
    #[serde(alias = "master_ttl")]
    pub primary_ttl: f64,
    /// Seconds a failing connection stays out of rotation
    #[serde(alias = "blacklist_duration")]
    pub blocklist_duration: f64,
    /// Stick to the primary after writes, and to one connection per pool
    /// within a unit of work
    pub sticky: bool,
    /// Randomise round-robin order on build
    pub shuffle: bool,
    #[serde(alias = "master_strategy")]
    pub primary_strategy: StrategyKind,
    #[serde(alias = "slave_strategy")]
    pub replica_strategy: StrategyKind,
    #[serde(alias = "master_shard_aware")]
    pub primary_shard_aware: bool,
    #[serde(alias = "slave_shard_aware")]
    pub replica_shard_aware: bool,
    #[serde(alias = "master_default_shard", skip_serializing_if = "Option::is_none")]
    pub primary_default_shard: Option<String>,
    #[serde(alias = "slave_default_shard", skip_serializing_if = "Option::is_none")]
    pub replica_default_shard: Option<String>,
    /// Driver error classes that always re-raise
    pub harsh_errors: Vec<String>,
    pub cookie: CookieOptions,
    pub connections: Vec<ConnectionConfig>,
}

/// One underlying connection
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ConnectionConfig {
    pub role: Role,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
    #[serde(default = "default_weight")]
    pub weight: usize,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub shard_id: Option<String>,
    /// Overrides the proxy-level blocklist duration
    #[serde(
        default,
        alias = "blacklist_duration",
        skip_serializing_if = "Option::is_none"
    )]
    pub blocklist_duration: Option<f64>,
    /// Extra connection-loss matchers: literals or `/pattern/flags`
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub connection_error_matchers: Vec<String>,
    /// Driver settings (host, port, credentials) handed to the connection factory
    #[serde(flatten)]
    pub settings: toml::Table,
}

fn default_weight() -> usize {
    1
}

impl Default for ProxyConfig {
    fn default() -> Self {
        Self {
            id: None,
            primary_ttl: 5.0,
            blocklist_duration: 30.0,
            sticky: true,
            shuffle: true,
            primary_strategy: StrategyKind::RoundRobin,
            replica_strategy: StrategyKind::RoundRobin,
            primary_shard_aware: false,
            replica_shard_aware: false,
            primary_default_shard: None,
            replica_default_shard: None,
            harsh_errors: Vec::new(),
            cookie: CookieOptions::default(),
            connections: Vec::new(),
        }
    }
}

impl ConnectionConfig {
    pub fn new(role: Role) -> Self {
        Self {
            role,
            name: None,
            weight: default_weight(),
            shard_id: None,
            blocklist_duration: None,
            connection_error_matchers: Vec::new(),
            settings: toml::Table::new(),
        }
    }

    pub fn named<S: Into<String>>(mut self, name: S) -> Self {
        self.name = Some(name.into());
        self
    }

    pub fn weight(mut self, weight: usize) -> Self {
        self.weight = weight;
        self
    }

    pub fn shard<S: Into<String>>(mut self, shard_id: S) -> Self {
        self.shard_id = Some(shard_id.into());
        self
    }
}

/// Longest configurable duration, in seconds (one year)
pub const MAX_SECONDS: f64 = 31_536_000.0;

/// Seconds to a `Duration`; anything negative or non-finite becomes zero and
/// anything above [`MAX_SECONDS`] is capped
pub fn seconds(value: f64) -> Duration {
    if value.is_finite() && value > 0.0 {
        Duration::try_from_secs_f64(value.min(MAX_SECONDS)).unwrap_or(Duration::ZERO)
    } else {
        Duration::ZERO
    }
}

fn check_seconds(field: &str, value: f64, max: f64) -> Result<(), ConfigError> {
    if !value.is_finite() || value < 0.0 {
        return Err(ConfigError::ValidationError(format!(
            "{} must be a non-negative number of seconds, got {}",
            field, value
        )));
    }
    if value > max {
        return Err(ConfigError::ValidationError(format!(
            "{} must be at most {} seconds, got {}",
            field, max, value
        )));
    }
    Ok(())
}

impl ProxyConfig {
    /// Load configuration from TOML file
    pub fn load_from_file<P: AsRef<Path>>(path: P) -> Result<Self, ConfigError> {
        let content = fs::read_to_string(path).map_err(|e| ConfigError::IoError(e.to_string()))?;
        Self::from_toml_str(&content)
    }

    /// Parse and validate a TOML document
    pub fn from_toml_str(content: &str) -> Result<Self, ConfigError> {
        let config: ProxyConfig =
            toml::from_str(content).map_err(|e| ConfigError::ParseError(e.to_string()))?;
        config.validate()?;
        Ok(config)
    }

    /// Save configuration to TOML file
    pub fn save_to_file<P: AsRef<Path>>(&self, path: P) -> Result<(), ConfigError> {
        fs::write(path, self.to_toml()?).map_err(|e| ConfigError::IoError(e.to_string()))
    }

    pub fn to_toml(&self) -> Result<String, ConfigError> {
        toml::to_string_pretty(self).map_err(|e| ConfigError::SerializeError(e.to_string()))
    }

    /// Validate configuration
    pub fn validate(&self) -> Result<(), ConfigError> {
        check_seconds("primary_ttl", self.primary_ttl, MAX_STICKY_SECS)?;
        check_seconds("blocklist_duration", self.blocklist_duration, MAX_SECONDS)?;

        if !self.connections.iter().any(|c| c.role == Role::Primary) {
            return Err(ConfigError::ValidationError(
                "at least one primary connection is required".to_string(),
            ));
        }

        let mut names = HashSet::new();
        for (name, connection) in self.named_connections() {
            if connection.weight == 0 {
                return Err(ConfigError::ValidationError(format!(
                    "connection '{}' must have a weight greater than 0",
                    name
                )));
            }
            if let Some(duration) = connection.blocklist_duration {
                check_seconds(
                    &format!("{}.blocklist_duration", name),
                    duration,
                    MAX_SECONDS,
                )?;
            }
            if self.shard_aware(connection.role) && connection.shard_id.is_none() {
                return Err(ConfigError::ValidationError(format!(
                    "connection '{}' needs a shard_id: the {} pool is shard aware",
                    name, connection.role
                )));
            }
            parse_matchers(&connection.connection_error_matchers)?;
            if !names.insert(name.clone()) {
                return Err(ConfigError::ValidationError(format!(
                    "duplicate connection name '{}'",
                    name
                )));
            }
        }

        Ok(())
    }

    pub fn strategy(&self, role: Role) -> StrategyKind {
        match role {
            Role::Primary => self.primary_strategy,
            Role::Replica => self.replica_strategy,
        }
    }

    pub fn shard_aware(&self, role: Role) -> bool {
        match role {
            Role::Primary => self.primary_shard_aware,
            Role::Replica => self.replica_shard_aware,
        }
    }

    pub fn default_shard(&self, role: Role) -> Option<String> {
        match role {
            Role::Primary => self.primary_default_shard.clone(),
            Role::Replica => self.replica_default_shard.clone(),
        }
    }

    pub fn primary_ttl(&self) -> Duration {
        seconds(self.primary_ttl)
    }

    /// Blocklist duration for one connection, falling back to the proxy default
    pub fn blocklist_duration_for(&self, connection: &ConnectionConfig) -> Duration {
        seconds(connection.blocklist_duration.unwrap_or(self.blocklist_duration))
    }

    /// Connections paired with their names; unnamed ones become `<role>/<n>`
    pub fn named_connections(&self) -> Vec<(String, &ConnectionConfig)> {
        let (mut primaries, mut replicas) = (0, 0);
        self.connections
            .iter()
            .map(|connection| {
                let counter = match connection.role {
                    Role::Primary => &mut primaries,
                    Role::Replica => &mut replicas,
                };
                *counter += 1;
                let name = connection
                    .name
                    .clone()
                    .unwrap_or_else(|| format!("{}/{}", connection.role, counter));
                (name, connection)
            })
            .collect()
    }

    /// The configured id, or a digest of the configuration
    pub fn resolved_id(&self) -> Result<String, ConfigError> {
        if let Some(id) = &self.id {
            return Ok(sanitize_proxy_id(id));
        }
        let canonical = self.to_toml()?;
        let digest = Sha256::digest(canonical.as_bytes());
        Ok(hex::encode(digest)[..16].to_string())
    }
}
