use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::errors::SettingsError;

/// Sandbox limits applied to every expression run.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct EngineConfig {
    /// Maximum number of statements plus expression nodes evaluated per run.
    /// Copying a list or object also costs one step per 64 of its nodes.
    pub max_steps: u64,
    /// Wall-clock budget per run, in milliseconds. `None` disables it.
    pub time_limit_ms: Option<u64>,
    /// Maximum syntactic nesting of statements and expressions.
    pub max_depth: usize,
    /// Largest string an expression may build.
    pub max_string_bytes: usize,
    /// Largest list or object an expression may build or copy, counted in
    /// JSON nodes.
    pub max_value_nodes: usize,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            max_steps: 10_000,
            time_limit_ms: Some(250),
            max_depth: 64,
            max_string_bytes: 64 * 1024,
            max_value_nodes: 100_000,
        }
    }
}

impl EngineConfig {
    pub fn from_json_str(s: &str) -> Result<Self, SettingsError> {
        serde_json::from_str(s).map_err(|e| SettingsError::Malformed(e.to_string()))
    }

    pub fn time_limit(&self) -> Option<Duration> {
        self.time_limit_ms.map(Duration::from_millis)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    #[test]
    fn partial_document_keeps_defaults() {
        let cfg = EngineConfig::from_json_str(r#"{"max_steps": 50}"#).unwrap();
        assert_eq!(cfg.max_steps, 50);
        assert_eq!(cfg.max_depth, EngineConfig::default().max_depth);
        assert_eq!(cfg.max_value_nodes, 100_000);
        assert_eq!(cfg.time_limit(), Some(Duration::from_millis(250)));
    }

    #[test]
    fn null_time_limit_disables_clock() {
        let cfg = EngineConfig::from_json_str(r#"{"time_limit_ms": null}"#).unwrap();
        assert_eq!(cfg.time_limit(), None);
    }
}
