//! Startup configuration, read from TOML.
//!
//! Every field has a default, so an empty file is a valid (all-mock-free,
//! endpoint-less) configuration that only passes validation once both tiers
//! either have endpoints and credentials or are switched to mock mode.

use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

use crate::CoreError;
use crate::task::Tier;

pub const ANTHROPIC_MESSAGES_URL: &str = "https://api.anthropic.com/v1/messages";

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct JurisConfig {
    pub tier1: TierConfig,
    pub tier2: TierConfig,
    pub pipeline: PipelineConfig,
    pub selector: SelectorConfig,
    pub optimizer: OptimizerConfig,
    pub session: SessionConfig,
    pub storage: StorageConfig,
}

/// Wire protocol of a model endpoint.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ApiStyle {
    /// Text-generation inference: `{"inputs", "parameters"}` in, `[{"generated_text"}]` out.
    HuggingFace,
    /// Anthropic Messages API.
    Anthropic,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct TierConfig {
    pub endpoint: Option<String>,
    pub model: Option<String>,
    /// Defaults to `hugging_face` for tier 1 and `anthropic` for tier 2.
    pub api_style: Option<ApiStyle>,
    pub api_key: Option<String>,
    /// Defaults to `JURIS_TIER1_API_KEY` / `JURIS_TIER2_API_KEY`.
    pub api_key_env: Option<String>,
    pub mock: bool,
    pub timeout_ms: u64,
    pub max_retries: u32,
    pub backoff_base_ms: u64,
    /// Consecutive failed real calls before the client forces itself into mock mode.
    pub failure_threshold: u32,
    pub max_tokens: u32,
    pub temperature: f32,
    pub cache_enabled: bool,
    pub cache_ttl_secs: u64,
}

impl Default for TierConfig {
    fn default() -> Self {
        Self {
            endpoint: None,
            model: None,
            api_style: None,
            api_key: None,
            api_key_env: None,
            mock: false,
            timeout_ms: 90_000,
            max_retries: 3,
            backoff_base_ms: 2_000,
            failure_threshold: 3,
            max_tokens: 4_096,
            temperature: 0.3,
            cache_enabled: true,
            cache_ttl_secs: 3_600,
        }
    }
}

impl TierConfig {
    /// A tier that never touches the network.
    pub fn mocked() -> Self {
        Self {
            mock: true,
            ..Self::default()
        }
    }

    pub fn style(&self, tier: Tier) -> ApiStyle {
        self.api_style.unwrap_or(match tier {
            Tier::Tier1 => ApiStyle::HuggingFace,
            Tier::Tier2 => ApiStyle::Anthropic,
        })
    }

    pub fn key_env(&self, tier: Tier) -> String {
        self.api_key_env
            .clone()
            .unwrap_or_else(|| format!("JURIS_TIER{}_API_KEY", tier.number()))
    }

    /// Endpoint, falling back to the public Messages URL for Anthropic-style tiers.
    pub fn resolved_endpoint(&self, tier: Tier) -> Option<String> {
        self.endpoint.clone().or_else(|| match self.style(tier) {
            ApiStyle::Anthropic => Some(ANTHROPIC_MESSAGES_URL.to_string()),
            ApiStyle::HuggingFace => None,
        })
    }

    /// Explicit key first, then the environment variable named by `key_env`.
    pub fn resolve_api_key(
        &self,
        tier: Tier,
        env: impl Fn(&str) -> Option<String>,
    ) -> Option<String> {
        self.api_key
            .clone()
            .or_else(|| env(&self.key_env(tier)))
            .filter(|k| !k.trim().is_empty())
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct PipelineConfig {
    /// Run the tier-2 critique stage. When off, tier-1 output is final.
    pub critique_enabled: bool,
    /// Minimum tier-2 quality score (1–10) counted as a successful run in statistics.
    pub quality_success_threshold: u8,
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            critique_enabled: true,
            quality_success_threshold: 7,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SelectorConfig {
    /// Number of most recent ratings in a template's rolling mean.
    pub rolling_window: usize,
    /// Score given to unrated candidates when some other candidate has ratings.
    pub unrated_prior: f64,
}

impl Default for SelectorConfig {
    fn default() -> Self {
        Self {
            rolling_window: 20,
            unrated_prior: 3.0,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct OptimizerConfig {
    pub min_samples: usize,
    /// Templates whose mean rating falls below this (1–5 scale) get a new version.
    pub rating_threshold: f64,
    /// Periodic pass interval. `0` disables the timer.
    pub interval_secs: u64,
    /// Run a pass after every N feedback submissions. `0` disables the trigger.
    pub feedback_trigger: usize,
    /// Most frequent low-rating comments folded into a revised template.
    pub max_guidance_items: usize,
}

impl Default for OptimizerConfig {
    fn default() -> Self {
        Self {
            min_samples: 3,
            rating_threshold: 3.0,
            interval_secs: 600,
            feedback_trigger: 5,
            max_guidance_items: 3,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SessionConfig {
    /// Most recent turns concatenated into prompts.
    pub context_window: usize,
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self { context_window: 6 }
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StorageBackend {
    Memory,
    #[default]
    Jsonl,
    Duckdb,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct StorageConfig {
    pub backend: StorageBackend,
    pub data_dir: PathBuf,
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self {
            backend: StorageBackend::Jsonl,
            data_dir: PathBuf::from(".jurisnexus"),
        }
    }
}

impl JurisConfig {
    pub fn from_toml_str(s: &str) -> Result<Self, CoreError> {
        toml::from_str(s).map_err(|e| CoreError::Config(e.to_string()))
    }

    pub fn load(path: &Path) -> Result<Self, CoreError> {
        let text = std::fs::read_to_string(path)
            .map_err(|e| CoreError::Config(format!("cannot read {}: {e}", path.display())))?;
        Self::from_toml_str(&text)
    }

    /// Both tiers in mock mode with in-memory storage.
    pub fn mock() -> Self {
        Self {
            tier1: TierConfig::mocked(),
            tier2: TierConfig::mocked(),
            storage: StorageConfig {
                backend: StorageBackend::Memory,
                ..StorageConfig::default()
            },
            ..Self::default()
        }
    }

    pub fn tier(&self, tier: Tier) -> &TierConfig {
        match tier {
            Tier::Tier1 => &self.tier1,
            Tier::Tier2 => &self.tier2,
        }
    }

    pub fn validate(&self) -> Result<(), CoreError> {
        self.validate_with(|name| std::env::var(name).ok())
    }

    /// Validate with an injected environment lookup.
    pub fn validate_with(&self, env: impl Fn(&str) -> Option<String>) -> Result<(), CoreError> {
        for tier in [Tier::Tier1, Tier::Tier2] {
            let cfg = self.tier(tier);
            if cfg.mock {
                continue;
            }
            if cfg.resolved_endpoint(tier).is_none() {
                return Err(CoreError::Config(format!(
                    "{tier}: no endpoint configured and mock mode is off"
                )));
            }
            if cfg.resolve_api_key(tier, &env).is_none() {
                return Err(CoreError::Config(format!(
                    "{tier}: no api_key and ${} is unset",
                    cfg.key_env(tier)
                )));
            }
            if cfg.timeout_ms == 0 {
                return Err(CoreError::Config(format!("{tier}: timeout_ms must be positive")));
            }
        }
        if !(1..=10).contains(&self.pipeline.quality_success_threshold) {
            return Err(CoreError::Config(
                "pipeline.quality_success_threshold must be within 1..=10".into(),
            ));
        }
        if self.selector.rolling_window == 0 {
            return Err(CoreError::Config("selector.rolling_window must be positive".into()));
        }
        if !(1.0..=5.0).contains(&self.optimizer.rating_threshold) {
            return Err(CoreError::Config(
                "optimizer.rating_threshold must be within 1.0..=5.0".into(),
            ));
        }
        if self.optimizer.min_samples == 0 {
            return Err(CoreError::Config("optimizer.min_samples must be positive".into()));
        }
        Ok(())
    }
}
