//! Tier and manager configuration.

use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::path::Path;
use std::time::Duration;

use crate::error::{Error, Result};

use super::types::Tier;

/// Per-tier model configuration.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TierConfig {
    /// Model id used on the local backend
    pub local_model_id: String,
    /// Model id used on the remote backend
    pub remote_model_id: String,
    /// Context limit used for overflow escalation (tokens)
    pub max_context_tokens: u64,
    pub max_output_tokens: u32,
    pub default_temperature: f64,
}

impl TierConfig {
    pub fn new(local_model_id: impl Into<String>, remote_model_id: impl Into<String>) -> Self {
        Self {
            local_model_id: local_model_id.into(),
            remote_model_id: remote_model_id.into(),
            max_context_tokens: 8_192,
            max_output_tokens: 2_048,
            default_temperature: 0.3,
        }
    }

    pub fn with_max_context_tokens(mut self, tokens: u64) -> Self {
        self.max_context_tokens = tokens;
        self
    }

    pub fn with_max_output_tokens(mut self, tokens: u32) -> Self {
        self.max_output_tokens = tokens;
        self
    }

    pub fn with_default_temperature(mut self, temperature: f64) -> Self {
        self.default_temperature = temperature;
        self
    }
}

/// Configuration for every tier.
///
/// Always holds exactly one entry per [`Tier`]; construction validates this.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(try_from = "HashMap<Tier, TierConfig>", into = "HashMap<Tier, TierConfig>")]
pub struct TierTable {
    tiers: HashMap<Tier, TierConfig>,
}

impl TierTable {
    /// Build a table, failing if any tier is missing or misconfigured.
    pub fn new(tiers: HashMap<Tier, TierConfig>) -> Result<Self> {
        for tier in Tier::ALL {
            let config = tiers
                .get(&tier)
                .ok_or_else(|| Error::config(format!("missing configuration for tier {}", tier)))?;
            if config.local_model_id.trim().is_empty() || config.remote_model_id.trim().is_empty()
            {
                return Err(Error::config(format!("tier {} has an empty model id", tier)));
            }
            if config.max_context_tokens == 0 {
                return Err(Error::config(format!(
                    "tier {} has a zero context limit",
                    tier
                )));
            }
        }
        Ok(Self { tiers })
    }

    pub fn get(&self, tier: Tier) -> &TierConfig {
        // Presence of every tier is checked in `new`.
        &self.tiers[&tier]
    }

    pub fn model_for(&self, tier: Tier, backend: super::backend::BackendKind) -> &str {
        let config = self.get(tier);
        match backend {
            super::backend::BackendKind::Local => &config.local_model_id,
            super::backend::BackendKind::Remote => &config.remote_model_id,
        }
    }
}

impl Default for TierTable {
    fn default() -> Self {
        let tiers = HashMap::from([
            (
                Tier::A,
                TierConfig::new("llama3.2:3b", "gpt-4o-mini")
                    .with_max_context_tokens(4_096)
                    .with_max_output_tokens(1_024)
                    .with_default_temperature(0.2),
            ),
            (
                Tier::B,
                TierConfig::new("llama3.1:8b", "gpt-4o")
                    .with_max_context_tokens(16_384)
                    .with_max_output_tokens(2_048)
                    .with_default_temperature(0.3),
            ),
            (
                Tier::C,
                TierConfig::new("llama3.1:70b", "o1")
                    .with_max_context_tokens(128_000)
                    .with_max_output_tokens(4_096)
                    .with_default_temperature(0.4),
            ),
        ]);
        Self { tiers }
    }
}

impl TryFrom<HashMap<Tier, TierConfig>> for TierTable {
    type Error = Error;

    fn try_from(tiers: HashMap<Tier, TierConfig>) -> Result<Self> {
        Self::new(tiers)
    }
}

impl From<TierTable> for HashMap<Tier, TierConfig> {
    fn from(table: TierTable) -> Self {
        table.tiers
    }
}

/// Phrases that mark a response as low confidence.
pub const DEFAULT_LOW_CONFIDENCE_PHRASES: &[&str] = &[
    "i'm not sure",
    "i am not sure",
    "i don't know",
    "i do not know",
    "i'm uncertain",
    "i cannot determine",
    "i can't determine",
    "unclear",
    "might be wrong",
    "beyond my knowledge",
];

/// Configuration for the tier manager.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ManagerConfig {
    pub tiers: TierTable,
    /// Try the local backend before the remote one
    pub prefer_local: bool,
    /// Allow falling back to the remote backend
    pub enable_fallback: bool,
    /// How long a health probe result stays fresh
    pub health_ttl_secs: u64,
    pub local_timeout_secs: u64,
    pub remote_timeout_secs: u64,
    /// Matched case-insensitively against response content
    pub low_confidence_phrases: Vec<String>,
}

impl Default for ManagerConfig {
    fn default() -> Self {
        Self {
            tiers: TierTable::default(),
            prefer_local: true,
            enable_fallback: true,
            health_ttl_secs: 30,
            local_timeout_secs: 60,
            remote_timeout_secs: 120,
            low_confidence_phrases: DEFAULT_LOW_CONFIDENCE_PHRASES
                .iter()
                .map(|p| p.to_string())
                .collect(),
        }
    }
}

impl ManagerConfig {
    pub fn new() -> Self {
        Self::default()
    }

    /// Parse and validate a JSON configuration.
    pub fn from_json_str(json: &str) -> Result<Self> {
        let config: Self = serde_json::from_str(json)?;
        config.validate()?;
        Ok(config)
    }

    /// Load and validate a JSON configuration file.
    pub fn from_json_file(path: impl AsRef<Path>) -> Result<Self> {
        let json = std::fs::read_to_string(path)?;
        Self::from_json_str(&json)
    }

    pub fn validate(&self) -> Result<()> {
        if !self.prefer_local && !self.enable_fallback {
            return Err(Error::config(
                "both prefer_local and enable_fallback are disabled; no backend would be tried",
            ));
        }
        if self.local_timeout_secs == 0 || self.remote_timeout_secs == 0 {
            return Err(Error::config("backend timeouts must be non-zero"));
        }
        Ok(())
    }

    pub fn with_tiers(mut self, tiers: TierTable) -> Self {
        self.tiers = tiers;
        self
    }

    pub fn with_prefer_local(mut self, prefer_local: bool) -> Self {
        self.prefer_local = prefer_local;
        self
    }

    pub fn with_fallback(mut self, enable: bool) -> Self {
        self.enable_fallback = enable;
        self
    }

    pub fn with_health_ttl(mut self, secs: u64) -> Self {
        self.health_ttl_secs = secs;
        self
    }

    pub fn with_timeouts(mut self, local_secs: u64, remote_secs: u64) -> Self {
        self.local_timeout_secs = local_secs;
        self.remote_timeout_secs = remote_secs;
        self
    }

    pub fn with_low_confidence_phrases(mut self, phrases: Vec<String>) -> Self {
        self.low_confidence_phrases = phrases;
        self
    }

    pub fn health_ttl(&self) -> Duration {
        Duration::from_secs(self.health_ttl_secs)
    }

    pub fn local_timeout(&self) -> Duration {
        Duration::from_secs(self.local_timeout_secs)
    }

    pub fn remote_timeout(&self) -> Duration {
        Duration::from_secs(self.remote_timeout_secs)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::llm::BackendKind;
    use std::io::Write;

    #[test]
    fn test_default_table_has_every_tier() {
        let table = TierTable::default();
        for tier in Tier::ALL {
            assert!(!table.get(tier).local_model_id.is_empty());
        }
        assert!(table.get(Tier::A).max_context_tokens < table.get(Tier::C).max_context_tokens);
        assert_eq!(table.model_for(Tier::B, BackendKind::Remote), "gpt-4o");
    }

    #[test]
    fn test_missing_tier_fails_fast() {
        let mut tiers = HashMap::new();
        tiers.insert(Tier::A, TierConfig::new("small", "small-remote"));
        tiers.insert(Tier::B, TierConfig::new("mid", "mid-remote"));
        let err = TierTable::new(tiers).unwrap_err();
        assert!(matches!(err, Error::Config(msg) if msg.contains("tier C")));
    }

    #[test]
    fn test_empty_model_id_rejected() {
        let mut tiers: HashMap<Tier, TierConfig> = TierTable::default().into();
        tiers.insert(Tier::B, TierConfig::new("", "gpt-4o"));
        assert!(TierTable::new(tiers).is_err());
    }

    #[test]
    fn test_config_validation() {
        let config = ManagerConfig::new()
            .with_prefer_local(false)
            .with_fallback(false);
        assert!(config.validate().is_err());

        let config = ManagerConfig::new().with_timeouts(0, 10);
        assert!(config.validate().is_err());

        assert!(ManagerConfig::default().validate().is_ok());
    }

    #[test]
    fn test_from_json_partial_uses_defaults() {
        let config = ManagerConfig::from_json_str(r#"{"prefer_local": false}"#).unwrap();
        assert!(!config.prefer_local);
        assert!(config.enable_fallback);
        assert_eq!(config.health_ttl_secs, 30);
        assert_eq!(config.tiers, TierTable::default());
    }

    #[test]
    fn test_from_json_rejects_incomplete_tiers() {
        let json = r#"{"tiers": {"A": {
            "local_model_id": "x", "remote_model_id": "y",
            "max_context_tokens": 10, "max_output_tokens": 10,
            "default_temperature": 0.1}}}"#;
        assert!(ManagerConfig::from_json_str(json).is_err());
    }

    #[test]
    fn test_from_json_file() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        write!(file, r#"{{"health_ttl_secs": 5, "remote_timeout_secs": 90}}"#).unwrap();

        let config = ManagerConfig::from_json_file(file.path()).unwrap();
        assert_eq!(config.health_ttl(), Duration::from_secs(5));
        assert_eq!(config.remote_timeout(), Duration::from_secs(90));
    }
}
