use crate::cache::DEFAULT_CACHE_TTL;
use crate::errors::ConfigError;
use crate::matcher::{attributes, MatchStrategy, MatchTable};
use crate::segment::DEFAULT_PREFIX;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::Path;
use std::time::Duration;
use tracing::debug;

/// What to do when several elements match a segment that has no index.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AmbiguityPolicy {
    /// Take the first match in enumeration order and report the ambiguity.
    #[default]
    FirstMatch,
    /// Fail with [`crate::ResolutionError::Ambiguous`].
    Strict,
}

/// Engine configuration. Every field has a default, so a config file only
/// needs the values it changes.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct EngineConfig {
    /// Text every path starts with.
    pub prefix: String,
    pub role_attribute: String,
    pub application_role: String,
    /// Upper bound for a single provider call
    pub call_timeout_ms: u64,
    pub cache_ttl_secs: u64,
    pub ambiguity: AmbiguityPolicy,
    /// Maximum candidate summaries kept per failed segment in a trace.
    pub max_trace_candidates: usize,
    /// `validate` warns about paths with more segments than this.
    pub max_path_depth: usize,
    /// Strategy overrides keyed by attribute name or alias.
    pub match_strategies: BTreeMap<String, MatchStrategy>,
    /// Extra aliases, alias -> canonical name.
    pub attribute_aliases: BTreeMap<String, String>,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            prefix: DEFAULT_PREFIX.to_string(),
            role_attribute: attributes::ROLE.to_string(),
            application_role: "AXApplication".to_string(),
            call_timeout_ms: 5_000,
            cache_ttl_secs: DEFAULT_CACHE_TTL.as_secs(),
            ambiguity: AmbiguityPolicy::FirstMatch,
            max_trace_candidates: 25,
            max_path_depth: 15,
            match_strategies: BTreeMap::new(),
            attribute_aliases: BTreeMap::new(),
        }
    }
}

impl EngineConfig {
    pub fn from_json_str(json: &str) -> Result<Self, ConfigError> {
        let config: Self = serde_json::from_str(json)?;
        config.validate()?;
        Ok(config)
    }

    pub fn from_file(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let path = path.as_ref();
        debug!(path = %path.display(), "loading engine configuration");
        let text = std::fs::read_to_string(path)?;
        Self::from_json_str(&text)
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.prefix.is_empty() {
            return Err(ConfigError::InvalidValue("prefix must not be empty".into()));
        }
        if self.role_attribute.is_empty() || self.application_role.is_empty() {
            return Err(ConfigError::InvalidValue(
                "role_attribute and application_role must not be empty".into(),
            ));
        }
        if self.call_timeout_ms == 0 {
            return Err(ConfigError::InvalidValue(
                "call_timeout_ms must be greater than zero".into(),
            ));
        }
        Ok(())
    }

    pub fn call_timeout(&self) -> Duration {
        Duration::from_millis(self.call_timeout_ms)
    }

    pub fn cache_ttl(&self) -> Duration {
        Duration::from_secs(self.cache_ttl_secs)
    }

    pub fn match_table(&self) -> MatchTable {
        MatchTable::with_overrides(&self.match_strategies, &self.attribute_aliases)
    }
}
