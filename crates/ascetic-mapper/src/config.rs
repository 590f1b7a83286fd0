//! Session configuration.

use serde::{Deserialize, Serialize};

/// Identity-map isolation level, in ascending strictness.
///
/// The two weakest levels make the identity map inert: every lookup goes to
/// storage. `RepeatableReads` caches rows that were seen to exist.
/// `Serializable` additionally remembers keys that were confirmed missing.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum IsolationLevel {
    ReadUncommitted,
    ReadCommitted,
    #[default]
    RepeatableReads,
    Serializable,
}

impl IsolationLevel {
    /// Whether the identity map does anything at this level.
    pub const fn influences(self) -> bool {
        matches!(
            self,
            IsolationLevel::RepeatableReads | IsolationLevel::Serializable
        )
    }
}

/// Configuration for Session behavior.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct SessionConfig {
    /// Isolation level the identity map starts with.
    pub isolation_level: IsolationLevel,
    /// Number of strong references the identity map's LRU list keeps.
    pub identity_map_capacity: usize,
    /// Reconnect and retry a lost connection even inside a transaction.
    pub always_reconnect: bool,
    /// Primary-key field assumed when storage reports none.
    pub default_pk: String,
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            isolation_level: IsolationLevel::default(),
            identity_map_capacity: 1000,
            always_reconnect: false,
            default_pk: "id".to_string(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_session_config_defaults() {
        let config = SessionConfig::default();
        assert_eq!(config.isolation_level, IsolationLevel::RepeatableReads);
        assert_eq!(config.identity_map_capacity, 1000);
        assert!(!config.always_reconnect);
        assert_eq!(config.default_pk, "id");
    }

    #[test]
    fn test_partial_config_deserializes() {
        let config: SessionConfig =
            serde_json::from_str(r#"{"isolation_level": "SERIALIZABLE", "always_reconnect": true}"#)
                .unwrap();
        assert_eq!(config.isolation_level, IsolationLevel::Serializable);
        assert!(config.always_reconnect);
        assert_eq!(config.identity_map_capacity, 1000);
    }

    #[test]
    fn test_isolation_ordering() {
        assert!(IsolationLevel::ReadCommitted < IsolationLevel::Serializable);
        assert!(!IsolationLevel::ReadCommitted.influences());
        assert!(IsolationLevel::RepeatableReads.influences());
    }
}
