//! Config loading and the typed `RouterConfig` for the self-improving tool router.
//!
//! Env/TOML loading (`load_and_apply`) lives next to a product-level config
//! struct (`RouterConfig`), both owned by this crate so the router core never
//! touches process environment or the filesystem directly.

mod dotenv;
mod xdg_toml;

use std::collections::HashMap;
use std::path::{Path, PathBuf};

use thiserror::Error;

#[derive(Error, Debug)]
pub enum LoadError {
    #[error("xdg config path: {0}")]
    XdgPath(String),
    #[error("read xdg config: {0}")]
    XdgRead(std::io::Error),
    #[error("parse xdg toml: {0}")]
    XdgParse(#[from] toml::de::Error),
    #[error("read .env: {0}")]
    DotenvRead(std::io::Error),
}

/// Loads config from XDG `config.toml` and optional project `.env`, then sets environment
/// variables only for keys that are **not** already set (so existing env has highest priority).
///
/// Order of precedence when a key is missing in the process environment:
/// 1. Value from project `.env` (current directory or `override_dir` if given)
/// 2. Value from `$XDG_CONFIG_HOME/<app_name>/config.toml` `[env]` table
pub fn load_and_apply(app_name: &str, override_dir: Option<&Path>) -> Result<(), LoadError> {
    let xdg_map = xdg_toml::load_env_map(app_name)?;
    let dotenv_map = dotenv::load_env_map(override_dir).map_err(LoadError::DotenvRead)?;

    let mut keys: std::collections::HashSet<String> = xdg_map.keys().cloned().collect();
    keys.extend(dotenv_map.keys().cloned());

    for key in keys {
        if std::env::var(&key).is_ok() {
            continue;
        }
        let value = dotenv_map.get(&key).or_else(|| xdg_map.get(&key)).cloned();
        if let Some(v) = value {
            std::env::set_var(&key, v);
        }
    }

    Ok(())
}

/// When the pre-agent keyword nudge should run.
/// Only `Eager` is implemented; `Deferred` is a documented extension point (see DESIGN.md).
#[derive(Clone, Copy, Debug, PartialEq, Eq, Default)]
pub enum NudgeTiming {
    #[default]
    Eager,
    Deferred,
}

/// Whether `touched_handles` (reported by the agent executor) counts tools the
/// agent merely inspected, or only tools it actually invoked. This implementation
/// only offers `InvokedOnly`: a discovered-but-unused tool does not count as touched.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Default)]
pub enum TouchedHandlesPolicy {
    #[default]
    InvokedOnly,
}

/// One entry of the keyword-nudge lookup table: a category matched by keywords,
/// with the discovery queries to synthesize when it matches.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct KeywordNudgeEntry {
    pub category: String,
    pub keywords: Vec<String>,
    pub discovery_queries: Vec<String>,
}

/// All configuration options recognized by the router.
#[derive(Clone, Debug)]
pub struct RouterConfig {
    pub execution_model: String,
    pub embedding_model: String,
    pub similarity_threshold: f32,
    pub relative_score_cutoff: f32,
    pub search_top_k: Option<usize>,
    pub discover_binding_k: usize,
    pub max_cache_size: usize,
    pub preload_count: usize,
    pub max_history_turns: usize,
    pub max_steps: usize,
    pub health_cooldown_seconds: u64,
    pub data_dir: PathBuf,
    pub keyword_nudge: Vec<KeywordNudgeEntry>,
    pub nudge_timing: NudgeTiming,
    pub touched_handles_policy: TouchedHandlesPolicy,
    pub debug: bool,
}

#[derive(Error, Debug, PartialEq, Eq)]
pub enum ConfigError {
    #[error("max_cache_size must be >= 1 when preload_count > 0 (got max_cache_size=0, preload_count={0})")]
    ZeroCapacityWithPreload(usize),
    #[error("similarity_threshold must be in [0.0, 1.0], got {0}")]
    SimilarityThresholdOutOfRange(String),
    #[error("relative_score_cutoff must be in [0.0, 1.0], got {0}")]
    RelativeScoreCutoffOutOfRange(String),
}

impl Default for RouterConfig {
    fn default() -> Self {
        Self {
            execution_model: "default".to_string(),
            embedding_model: "default".to_string(),
            similarity_threshold: 0.35,
            relative_score_cutoff: 0.7,
            search_top_k: None,
            discover_binding_k: 1,
            max_cache_size: 16,
            preload_count: 0,
            max_history_turns: 20,
            max_steps: 10,
            health_cooldown_seconds: 60,
            data_dir: PathBuf::from("."),
            keyword_nudge: Vec::new(),
            nudge_timing: NudgeTiming::default(),
            touched_handles_policy: TouchedHandlesPolicy::default(),
            debug: false,
        }
    }
}

impl RouterConfig {
    /// Rejects configurations that can never produce correct behavior, such as
    /// a zero-capacity cache asked to preload entries.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.max_cache_size == 0 && self.preload_count > 0 {
            return Err(ConfigError::ZeroCapacityWithPreload(self.preload_count));
        }
        if !(0.0..=1.0).contains(&self.similarity_threshold) {
            return Err(ConfigError::SimilarityThresholdOutOfRange(
                self.similarity_threshold.to_string(),
            ));
        }
        if !(0.0..=1.0).contains(&self.relative_score_cutoff) {
            return Err(ConfigError::RelativeScoreCutoffOutOfRange(
                self.relative_score_cutoff.to_string(),
            ));
        }
        Ok(())
    }

    /// Path of the metrics JSONL file under `data_dir`.
    pub fn metrics_path(&self) -> PathBuf {
        self.data_dir.join("usage_metrics.jsonl")
    }

    /// Looks up the first keyword-nudge entry whose keywords appear in `text`
    /// (case-insensitive substring match), used by the eager nudge.
    pub fn match_nudge(&self, text: &str) -> Option<&KeywordNudgeEntry> {
        let lower = text.to_lowercase();
        self.keyword_nudge
            .iter()
            .find(|entry| entry.keywords.iter().any(|kw| lower.contains(&kw.to_lowercase())))
    }
}

/// Convenience: build a `HashMap<category, KeywordNudgeEntry>` view, e.g. for UI panels.
pub fn nudge_table_by_category(entries: &[KeywordNudgeEntry]) -> HashMap<String, &KeywordNudgeEntry> {
    entries.iter().map(|e| (e.category.clone(), e)).collect()
}
