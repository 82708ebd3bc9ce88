/// Core abstractions shared by pools, strategies and the proxy
pub mod backend;
pub mod clock;
pub mod connection;
pub mod pool;

pub use backend::ConnectionWrapper;
pub use clock::{Clock, ManualClock, SystemClock};
pub use connection::{Connection, Row, Rows};
pub use pool::Pool;

use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// Role of a connection or pool
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub enum Role {
    /// Writable leader node
    Primary,
    /// Read-only follower node
    Replica,
}

impl Role {
    pub fn as_str(&self) -> &'static str {
        match self {
            Role::Primary => "primary",
            Role::Replica => "replica",
        }
    }
}

impl fmt::Display for Role {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Role {
    type Err = String;

    /// Accepts the deprecated `master`/`slave` spellings with a warning
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "primary" => Ok(Role::Primary),
            "replica" => Ok(Role::Replica),
            "master" => {
                tracing::warn!(role = s, "role 'master' is deprecated, use 'primary'");
                Ok(Role::Primary)
            }
            "slave" => {
                tracing::warn!(role = s, "role 'slave' is deprecated, use 'replica'");
                Ok(Role::Replica)
            }
            other => Err(format!("unknown role '{}': expected primary or replica", other)),
        }
    }
}

impl TryFrom<String> for Role {
    type Error = String;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        value.parse()
    }
}

impl From<Role> for String {
    fn from(role: Role) -> Self {
        role.as_str().to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_role_parsing() {
        assert_eq!("primary".parse::<Role>(), Ok(Role::Primary));
        assert_eq!("Replica".parse::<Role>(), Ok(Role::Replica));
        assert!("leader".parse::<Role>().is_err());
    }

    #[test]
    fn test_deprecated_role_aliases() {
        assert_eq!("master".parse::<Role>(), Ok(Role::Primary));
        assert_eq!("slave".parse::<Role>(), Ok(Role::Replica));
    }

    #[test]
    fn test_role_display() {
        assert_eq!(Role::Primary.to_string(), "primary");
        assert_eq!(String::from(Role::Replica), "replica");
    }
}
