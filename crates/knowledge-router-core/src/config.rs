use serde::{Deserialize, Serialize};

use crate::RouterError;

pub const DEFAULT_TEXT_WEIGHT: f64 = 2.0;
pub const DEFAULT_ALIAS_WEIGHT: f64 = 3.0;
pub const DEFAULT_ENTITY_WEIGHT: f64 = 1.0;
pub const DEFAULT_EXACT_MATCH_THRESHOLD: f64 = 10.0;
pub const DEFAULT_MAX_CHUNK_CHARS: usize = 2_000;

/// Per-signal multipliers applied to matched query-term counts.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct ScoringWeights {
    pub text: f64,
    pub alias: f64,
    pub entity: f64,
}

impl Default for ScoringWeights {
    fn default() -> Self {
        Self {
            text: DEFAULT_TEXT_WEIGHT,
            alias: DEFAULT_ALIAS_WEIGHT,
            entity: DEFAULT_ENTITY_WEIGHT,
        }
    }
}

#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize, Eq, PartialEq)]
#[serde(rename_all = "snake_case")]
pub enum RouterBackend {
    #[default]
    Deterministic,
}

impl RouterBackend {
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Deterministic => "deterministic",
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct RouterConfig {
    pub weights: ScoringWeights,
    pub exact_match_threshold: f64,
    pub max_chunk_chars: usize,
    /// Citation namespace; falls back to the manifest `dataset_id` when unset.
    pub namespace: Option<String>,
    pub backend: RouterBackend,
}

impl Default for RouterConfig {
    fn default() -> Self {
        Self {
            weights: ScoringWeights::default(),
            exact_match_threshold: DEFAULT_EXACT_MATCH_THRESHOLD,
            max_chunk_chars: DEFAULT_MAX_CHUNK_CHARS,
            namespace: None,
            backend: RouterBackend::default(),
        }
    }
}

impl RouterConfig {
    /// Check that scoring constants can produce a total order.
    ///
    /// # Errors
    /// Returns [`RouterError::Config`] for negative or non-finite weights or threshold,
    /// a zero chunk budget, or a blank namespace.
    pub fn validate(&self) -> Result<(), RouterError> {
        for (name, value) in [
            ("weights.text", self.weights.text),
            ("weights.alias", self.weights.alias),
            ("weights.entity", self.weights.entity),
        ] {
            if !value.is_finite() || value < 0.0 {
                return Err(RouterError::Config(format!(
                    "{name} MUST be a finite non-negative number, got {value}"
                )));
            }
        }

        if !self.exact_match_threshold.is_finite() {
            return Err(RouterError::Config("exact_match_threshold MUST be finite".to_string()));
        }

        if self.max_chunk_chars == 0 {
            return Err(RouterError::Config("max_chunk_chars MUST be >= 1".to_string()));
        }

        if let Some(namespace) = &self.namespace {
            if namespace.trim().is_empty() {
                return Err(RouterError::Config("namespace MUST be non-empty when set".to_string()));
            }
        }

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_rank_alias_above_text() {
        let config = RouterConfig::default();
        assert!(config.weights.alias > config.weights.text);
        assert!((config.exact_match_threshold - 10.0).abs() < f64::EPSILON);
        assert_eq!(config.max_chunk_chars, 2_000);
        assert_eq!(config.validate(), Ok(()));
    }

    #[test]
    fn negative_weight_is_rejected() {
        let config = RouterConfig {
            weights: ScoringWeights { text: -1.0, ..ScoringWeights::default() },
            ..RouterConfig::default()
        };
        match config.validate() {
            Err(RouterError::Config(message)) => assert!(message.contains("weights.text")),
            other => panic!("expected config error, got {other:?}"),
        }
    }

    #[test]
    fn zero_chunk_budget_is_rejected() {
        let config = RouterConfig { max_chunk_chars: 0, ..RouterConfig::default() };
        assert!(config.validate().is_err());
    }

    #[test]
    fn partial_config_fills_defaults() {
        let config: RouterConfig = match serde_json::from_value(serde_json::json!({
            "weights": { "alias": 4.0 },
            "namespace": "oncology"
        })) {
            Ok(config) => config,
            Err(err) => panic!("partial config should deserialize: {err}"),
        };
        assert!((config.weights.alias - 4.0).abs() < f64::EPSILON);
        assert!((config.weights.text - DEFAULT_TEXT_WEIGHT).abs() < f64::EPSILON);
        assert_eq!(config.backend, RouterBackend::Deterministic);
        assert_eq!(config.namespace.as_deref(), Some("oncology"));
    }
}
