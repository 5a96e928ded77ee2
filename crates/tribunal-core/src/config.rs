//! Run configuration.
//!
//! Every field has a default, so an empty JSON object is a valid config.

use std::path::Path;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::domain::error::{AuditError, Result};

/// Calibration of the deterministic synthesis pipeline.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SynthesisConfig {
    /// How far an unsupported persona score is pulled toward the
    /// evidence-implied floor, in `[0, 1]`.
    pub fact_dampening: f64,
    /// Score ceiling applied when confirmed security evidence is cited.
    pub security_ceiling: u8,
    /// Spread above which the median replaces the mean.
    pub variance_threshold: u8,
}

impl Default for SynthesisConfig {
    fn default() -> Self {
        Self {
            fact_dampening: 0.5,
            security_ceiling: 3,
            variance_threshold: 2,
        }
    }
}

/// Knobs for a single audit run.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct AuditConfig {
    /// Minimum found ratio of expected evidence for the `ready` route.
    pub completeness_threshold: f64,
    /// Evidence ids that must be present and found for the `ready` route.
    pub required_evidence: Vec<String>,
    pub producer_timeout_ms: u64,
    pub opinion_timeout_ms: u64,
    pub max_opinion_retries: u32,
    pub max_concurrent_opinions: usize,
    pub satisfactory_score: u8,
    pub synthesis: SynthesisConfig,
}

impl Default for AuditConfig {
    fn default() -> Self {
        Self {
            completeness_threshold: 0.5,
            required_evidence: Vec::new(),
            producer_timeout_ms: 120_000,
            opinion_timeout_ms: 60_000,
            max_opinion_retries: 1,
            max_concurrent_opinions: 6,
            satisfactory_score: 4,
            synthesis: SynthesisConfig::default(),
        }
    }
}

impl AuditConfig {
    pub fn from_json_str(raw: &str) -> Result<Self> {
        let config: AuditConfig = serde_json::from_str(raw)
            .map_err(|e| AuditError::InvalidConfig(format!("malformed config JSON: {e}")))?;
        config.validate()?;
        Ok(config)
    }

    pub fn load(path: &Path) -> Result<Self> {
        let raw = std::fs::read_to_string(path)?;
        Self::from_json_str(&raw)
    }

    pub fn producer_timeout(&self) -> Duration {
        Duration::from_millis(self.producer_timeout_ms)
    }

    pub fn opinion_timeout(&self) -> Duration {
        Duration::from_millis(self.opinion_timeout_ms)
    }

    pub fn validate(&self) -> Result<()> {
        if !(0.0..=1.0).contains(&self.completeness_threshold) {
            return Err(AuditError::InvalidConfig(format!(
                "completeness_threshold {} outside [0, 1]",
                self.completeness_threshold
            )));
        }
        if self.producer_timeout_ms == 0 || self.opinion_timeout_ms == 0 {
            return Err(AuditError::InvalidConfig(
                "timeouts must be greater than zero".to_string(),
            ));
        }
        if self.max_opinion_retries > 1 {
            return Err(AuditError::InvalidConfig(format!(
                "max_opinion_retries {} exceeds the bound of 1",
                self.max_opinion_retries
            )));
        }
        if self.max_concurrent_opinions == 0 {
            return Err(AuditError::InvalidConfig(
                "max_concurrent_opinions must be at least 1".to_string(),
            ));
        }
        if !(1..=5).contains(&self.satisfactory_score) {
            return Err(AuditError::InvalidConfig(format!(
                "satisfactory_score {} outside 1..=5",
                self.satisfactory_score
            )));
        }
        let s = &self.synthesis;
        if !s.fact_dampening.is_finite() || !(0.0..=1.0).contains(&s.fact_dampening) {
            return Err(AuditError::InvalidConfig(format!(
                "fact_dampening {} outside [0, 1]",
                s.fact_dampening
            )));
        }
        if !(1..=5).contains(&s.security_ceiling) {
            return Err(AuditError::InvalidConfig(format!(
                "security_ceiling {} outside 1..=5",
                s.security_ceiling
            )));
        }
        if s.variance_threshold > 4 {
            return Err(AuditError::InvalidConfig(format!(
                "variance_threshold {} can never be exceeded",
                s.variance_threshold
            )));
        }
        Ok(())
    }
}

/// Which opinion producer the dispatcher talks to.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum ProviderConfig {
    /// Offline producer derived from evidence found ratios.
    #[default]
    Heuristic,
    /// OpenAI-compatible chat completions endpoint.
    Http {
        endpoint: String,
        model: String,
        #[serde(default, skip_serializing)]
        api_key: Option<String>,
    },
}
