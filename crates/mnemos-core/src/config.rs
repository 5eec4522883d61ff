//! Engine configuration.
//!
//! Global defaults live in [`EngineConfig`]; each organization may override
//! any subset of the scoring and drift settings. Resolution for an
//! organization is: compiled defaults, then the file's global sections, then
//! that organization's overrides.
//!
//! ```toml
//! [scoring]
//! usage_boost_factor = 0.1
//!
//! [scoring.half_life_days]
//! instruction = 365.0
//!
//! [scoring.namespace_weights]
//! compliance = 1.0
//! scratch = 0.5
//!
//! [organizations.acme.drift]
//! removed_weight = 0.8
//! score_change_weight = 0.2
//! ```

use std::collections::BTreeMap;
use std::path::Path;

use mnemos_state::ContentType;
use serde::{Deserialize, Serialize};

use crate::domain::{EngineError, Result, ValidationError};

/// Environment variable naming a TOML config file.
pub const CONFIG_ENV_VAR: &str = "MNEMOS_CONFIG";

const WEIGHT_SUM_TOLERANCE: f64 = 1e-9;

fn invalid(field: impl std::fmt::Display, message: &str) -> EngineError {
    EngineError::Config(format!("{field}: {message}"))
}

/// Decay half-life in days, per content type.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct HalfLives {
    pub fact: f64,
    pub preference: f64,
    pub instruction: f64,
    pub observation: f64,
}

impl Default for HalfLives {
    fn default() -> Self {
        Self {
            fact: 30.0,
            preference: 60.0,
            instruction: 180.0,
            observation: 7.0,
        }
    }
}

impl HalfLives {
    pub fn for_type(&self, content_type: ContentType) -> f64 {
        match content_type {
            ContentType::Fact => self.fact,
            ContentType::Preference => self.preference,
            ContentType::Instruction => self.instruction,
            ContentType::Observation => self.observation,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ScoringConfig {
    pub half_life_days: HalfLives,
    /// Multiplier on `ln(1 + usage)`; capped at half the base score.
    pub usage_boost_factor: f64,
    /// Namespace weight multiplies confidence; unlisted namespaces weigh 1.0.
    pub namespace_weights: BTreeMap<String, f64>,
}

impl Default for ScoringConfig {
    fn default() -> Self {
        Self {
            half_life_days: HalfLives::default(),
            usage_boost_factor: 0.1,
            namespace_weights: BTreeMap::new(),
        }
    }
}

impl ScoringConfig {
    pub fn namespace_weight(&self, namespace: &str) -> f64 {
        self.namespace_weights
            .get(namespace)
            .copied()
            .unwrap_or(1.0)
    }

    fn validate(&self, scope: &str) -> Result<()> {
        for content_type in ContentType::ALL {
            let days = self.half_life_days.for_type(content_type);
            if !days.is_finite() || days <= 0.0 {
                return Err(invalid(
                    format_args!("{scope}.half_life_days.{content_type}"),
                    "must be a positive number of days",
                ));
            }
        }
        if !self.usage_boost_factor.is_finite() || self.usage_boost_factor < 0.0 {
            return Err(invalid(
                format_args!("{scope}.usage_boost_factor"),
                "must be non-negative",
            ));
        }
        for (namespace, weight) in &self.namespace_weights {
            if !weight.is_finite() || *weight < 0.0 {
                return Err(invalid(
                    format_args!("{scope}.namespace_weights.{namespace}"),
                    "must be non-negative",
                ));
            }
        }
        Ok(())
    }

    fn merged(&self, overrides: &ScoringOverrides) -> Self {
        let mut merged = self.clone();
        let h = &overrides.half_life_days;
        let lives = &mut merged.half_life_days;
        lives.fact = h.fact.unwrap_or(lives.fact);
        lives.preference = h.preference.unwrap_or(lives.preference);
        lives.instruction = h.instruction.unwrap_or(lives.instruction);
        lives.observation = h.observation.unwrap_or(lives.observation);
        if let Some(factor) = overrides.usage_boost_factor {
            merged.usage_boost_factor = factor;
        }
        merged.namespace_weights.extend(
            overrides
                .namespace_weights
                .iter()
                .map(|(ns, w)| (ns.clone(), *w)),
        );
        merged
    }
}

/// Weighting of the replay context-drift score.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct DriftConfig {
    /// Weight of the fraction of memories no longer available.
    pub removed_weight: f64,
    /// Weight of the normalized mean score change.
    pub score_change_weight: f64,
    /// Score change that counts as full drift.
    pub baseline_score_range: f64,
    /// `replay` evaluates current scores at "now" floored to this many
    /// seconds, so repeated replays within a bucket are byte-identical.
    /// Zero disables flooring.
    pub time_bucket_secs: u64,
}

impl Default for DriftConfig {
    fn default() -> Self {
        Self {
            removed_weight: 0.6,
            score_change_weight: 0.4,
            baseline_score_range: 1.0,
            time_bucket_secs: 60,
        }
    }
}

impl DriftConfig {
    fn validate(&self, scope: &str) -> Result<()> {
        let weights = [
            ("removed_weight", self.removed_weight),
            ("score_change_weight", self.score_change_weight),
        ];
        for (name, weight) in weights {
            if !weight.is_finite() || weight < 0.0 {
                return Err(invalid(format_args!("{scope}.{name}"), "must be non-negative"));
            }
        }
        if (self.removed_weight + self.score_change_weight - 1.0).abs() > WEIGHT_SUM_TOLERANCE {
            return Err(invalid(
                format_args!("{scope}"),
                "removed_weight and score_change_weight must sum to 1",
            ));
        }
        if !self.baseline_score_range.is_finite() || self.baseline_score_range <= 0.0 {
            return Err(invalid(
                format_args!("{scope}.baseline_score_range"),
                "must be positive",
            ));
        }
        Ok(())
    }

    fn merged(&self, overrides: &DriftOverrides) -> Self {
        Self {
            removed_weight: overrides.removed_weight.unwrap_or(self.removed_weight),
            score_change_weight: overrides
                .score_change_weight
                .unwrap_or(self.score_change_weight),
            baseline_score_range: overrides
                .baseline_score_range
                .unwrap_or(self.baseline_score_range),
            time_bucket_secs: self.time_bucket_secs,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ConflictConfig {
    /// Minimum lexical similarity for a pair to be considered a contradiction.
    pub similarity_threshold: f64,
    /// Spawn an incremental scan after every ingestion or edit.
    pub scan_on_write: bool,
}

impl Default for ConflictConfig {
    fn default() -> Self {
        Self {
            similarity_threshold: 0.5,
            scan_on_write: true,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct LimitsConfig {
    pub max_content_bytes: usize,
    /// Page size when a request does not name one.
    pub default_limit: usize,
    pub max_search_limit: usize,
    pub max_list_limit: usize,
}

impl Default for LimitsConfig {
    fn default() -> Self {
        Self {
            max_content_bytes: 16 * 1024,
            default_limit: 20,
            max_search_limit: 200,
            max_list_limit: 200,
        }
    }
}

impl LimitsConfig {
    /// Page size for a search; `None` means the default.
    pub fn search_limit(&self, requested: Option<usize>) -> std::result::Result<usize, ValidationError> {
        page_limit(requested, self.default_limit, self.max_search_limit)
    }

    /// Page size for a listing; `None` means the default.
    pub fn list_limit(&self, requested: Option<usize>) -> std::result::Result<usize, ValidationError> {
        page_limit(requested, self.default_limit, self.max_list_limit)
    }
}

fn page_limit(
    requested: Option<usize>,
    default: usize,
    max: usize,
) -> std::result::Result<usize, ValidationError> {
    match requested {
        None => Ok(default.min(max)),
        Some(value) if value == 0 || value > max => Err(ValidationError::BadLimit { value, max }),
        Some(value) => Ok(value),
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct HalfLifeOverrides {
    pub fact: Option<f64>,
    pub preference: Option<f64>,
    pub instruction: Option<f64>,
    pub observation: Option<f64>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ScoringOverrides {
    pub half_life_days: HalfLifeOverrides,
    pub usage_boost_factor: Option<f64>,
    pub namespace_weights: BTreeMap<String, f64>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct DriftOverrides {
    pub removed_weight: Option<f64>,
    pub score_change_weight: Option<f64>,
    pub baseline_score_range: Option<f64>,
}

/// Partial settings for one organization.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct OrganizationOverrides {
    pub scoring: ScoringOverrides,
    pub drift: DriftOverrides,
}

/// Top-level configuration aggregating all sub-configs.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct EngineConfig {
    pub scoring: ScoringConfig,
    pub drift: DriftConfig,
    pub conflicts: ConflictConfig,
    pub limits: LimitsConfig,
    pub organizations: BTreeMap<String, OrganizationOverrides>,
}

impl EngineConfig {
    /// Parse and validate a TOML document. Missing sections take defaults.
    pub fn from_toml_str(toml_str: &str) -> Result<Self> {
        let config: Self = toml::from_str(toml_str)
            .map_err(|e| EngineError::Config(format!("invalid TOML: {e}")))?;
        config.validate()?;
        Ok(config)
    }

    pub fn from_file(path: &Path) -> Result<Self> {
        let raw = std::fs::read_to_string(path)
            .map_err(|e| EngineError::Config(format!("cannot read {}: {e}", path.display())))?;
        Self::from_toml_str(&raw)
    }

    /// Load the file named by `MNEMOS_CONFIG`, or the defaults when unset.
    pub fn from_env() -> Result<Self> {
        match std::env::var(CONFIG_ENV_VAR) {
            Ok(path) if !path.trim().is_empty() => Self::from_file(Path::new(&path)),
            _ => Ok(Self::default()),
        }
    }

    /// Validate the global sections and every organization's merged view.
    pub fn validate(&self) -> Result<()> {
        self.scoring.validate("scoring")?;
        self.drift.validate("drift")?;

        let threshold = self.conflicts.similarity_threshold;
        if !threshold.is_finite() || !(0.0..=1.0).contains(&threshold) {
            return Err(invalid(
                "conflicts.similarity_threshold",
                "must be between 0.0 and 1.0",
            ));
        }

        let limits = &self.limits;
        if limits.max_content_bytes == 0 {
            return Err(invalid("limits.max_content_bytes", "must be greater than 0"));
        }
        if limits.max_search_limit == 0 || limits.max_list_limit == 0 {
            return Err(invalid("limits", "page limits must be greater than 0"));
        }
        if limits.default_limit == 0
            || limits.default_limit > limits.max_search_limit.min(limits.max_list_limit)
        {
            return Err(invalid(
                "limits.default_limit",
                "must be between 1 and the smallest maximum limit",
            ));
        }

        for org in self.organizations.keys() {
            self.scoring_for(Some(org))
                .validate(&format!("organizations.{org}.scoring"))?;
            self.drift_for(Some(org))
                .validate(&format!("organizations.{org}.drift"))?;
        }
        Ok(())
    }

    /// Scoring settings in effect for `organization` (global when `None`
    /// or when the organization has no overrides).
    pub fn scoring_for(&self, organization: Option<&str>) -> ScoringConfig {
        match organization.and_then(|org| self.organizations.get(org)) {
            Some(overrides) => self.scoring.merged(&overrides.scoring),
            None => self.scoring.clone(),
        }
    }

    pub fn drift_for(&self, organization: Option<&str>) -> DriftConfig {
        match organization.and_then(|org| self.organizations.get(org)) {
            Some(overrides) => self.drift.merged(&overrides.drift),
            None => self.drift.clone(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn test_defaults_are_valid() {
        let config = EngineConfig::default();
        config.validate().unwrap();
        assert_eq!(config.scoring.half_life_days.fact, 30.0);
        assert_eq!(config.scoring.half_life_days.observation, 7.0);
        assert_eq!(config.drift.removed_weight, 0.6);
        assert_eq!(config.limits.default_limit, 20);
    }

    #[test]
    fn test_partial_toml_keeps_defaults() {
        let config = EngineConfig::from_toml_str(
            r#"
            [scoring.half_life_days]
            instruction = 365.0

            [conflicts]
            scan_on_write = false
            "#,
        )
        .unwrap();
        assert_eq!(config.scoring.half_life_days.instruction, 365.0);
        assert_eq!(config.scoring.half_life_days.fact, 30.0);
        assert!(!config.conflicts.scan_on_write);
        assert_eq!(config.conflicts.similarity_threshold, 0.5);
    }

    #[test]
    fn test_organization_overrides_merge_over_globals() {
        let config = EngineConfig::from_toml_str(
            r#"
            [scoring]
            usage_boost_factor = 0.2

            [scoring.namespace_weights]
            scratch = 0.5

            [organizations.acme.scoring]
            usage_boost_factor = 0.05

            [organizations.acme.scoring.half_life_days]
            fact = 90.0

            [organizations.acme.scoring.namespace_weights]
            billing = 2.0

            [organizations.acme.drift]
            removed_weight = 0.8
            score_change_weight = 0.2
            "#,
        )
        .unwrap();

        let acme = config.scoring_for(Some("acme"));
        assert_eq!(acme.usage_boost_factor, 0.05);
        assert_eq!(acme.half_life_days.fact, 90.0);
        assert_eq!(acme.half_life_days.preference, 60.0);
        assert_eq!(acme.namespace_weight("billing"), 2.0);
        assert_eq!(acme.namespace_weight("scratch"), 0.5);
        assert_eq!(config.drift_for(Some("acme")).removed_weight, 0.8);

        let other = config.scoring_for(Some("globex"));
        assert_eq!(other.usage_boost_factor, 0.2);
        assert_eq!(other.namespace_weight("billing"), 1.0);
        assert_eq!(config.drift_for(None).removed_weight, 0.6);
    }

    #[test]
    fn test_drift_weights_must_sum_to_one() {
        let err = EngineConfig::from_toml_str(
            r#"
            [drift]
            removed_weight = 0.7
            "#,
        )
        .unwrap_err();
        assert!(matches!(err, EngineError::Config(ref m) if m.contains("sum to 1")));
    }

    #[test]
    fn test_invalid_org_override_rejected() {
        let err = EngineConfig::from_toml_str(
            r#"
            [organizations.acme.scoring.half_life_days]
            observation = 0.0
            "#,
        )
        .unwrap_err();
        assert!(err.to_string().contains("organizations.acme.scoring"));
    }

    #[test]
    fn test_threshold_out_of_range() {
        let err = EngineConfig::from_toml_str("[conflicts]\nsimilarity_threshold = 1.5\n");
        assert!(err.is_err());
    }

    #[test]
    fn test_from_file() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        writeln!(file, "[limits]\nmax_content_bytes = 512").unwrap();
        let config = EngineConfig::from_file(file.path()).unwrap();
        assert_eq!(config.limits.max_content_bytes, 512);

        let missing = EngineConfig::from_file(Path::new("/nonexistent/mnemos.toml"));
        assert!(matches!(missing, Err(EngineError::Config(_))));
    }

    #[test]
    fn test_malformed_toml() {
        let err = EngineConfig::from_toml_str("[scoring\n").unwrap_err();
        assert!(err.to_string().contains("invalid TOML"));
    }

    #[test]
    fn test_page_limits() {
        let limits = LimitsConfig::default();
        assert_eq!(limits.search_limit(None), Ok(20));
        assert_eq!(limits.list_limit(Some(200)), Ok(200));
        assert_eq!(
            limits.search_limit(Some(0)),
            Err(ValidationError::BadLimit { value: 0, max: 200 })
        );
        assert!(limits.list_limit(Some(201)).is_err());
    }
}
