//! # Configuration Management Module
//!
//! ## Purpose
//! Centralized configuration for the knowledge-base search engine: tokenizer
//! dictionaries, scoring weights, suggestion and recommendation tuning, and
//! query-cache sizing, with validation and type-safe access.
//!
//! ## Input/Output Specification
//! - **Input**: Configuration files (TOML) or programmatic construction
//! - **Output**: Validated configuration structs with defaults and overrides
//! - **Validation**: Range checks, weight-ordering checks, dependency checks
//!
//! ## Key Features
//! - Hierarchical configuration with per-subsystem sections
//! - Intelligent defaults so `Config::default()` is a working engine
//! - Validation with detailed error messages
//!
//! ## Usage
//! ```rust
//! use kb_search::Config;
//!
//! let mut config = Config::default();
//! config.scoring.title_boost = 4.0;
//! config.validate().unwrap();
//! ```

use crate::errors::{Result, SearchError};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::path::Path;

/// Main configuration structure containing all engine settings
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    /// Tokenization and normalization settings
    pub tokenizer: TokenizerConfig,
    /// Relevance scoring weights
    pub scoring: ScoringConfig,
    /// Autocomplete behavior
    pub suggest: SuggestConfig,
    /// Recommendation behavior
    pub recommend: RecommendConfig,
    /// Query cache sizing
    pub cache: CacheConfig,
    /// Synonym groups expanded by the query parser (term -> equivalents)
    pub synonyms: HashMap<String, Vec<String>>,
}

/// Tokenizer and normalizer configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct TokenizerConfig {
    /// Stopwords removed during analysis
    pub stopwords: Vec<String>,
    /// Legal keywords exempt from stopword removal and stemming.
    /// Legal terms are frequently short common words ("will", "party")
    /// that a plain stopword pass would drop.
    pub legal_keywords: Vec<String>,
    /// Dictionary of multi-character legal terms used for longest-match
    /// CJK segmentation
    pub cjk_dictionary: Vec<String>,
    /// Apply suffix-stripping stemming to Latin-script tokens
    pub enable_stemming: bool,
    /// Minimum Latin token length kept after normalization
    pub min_token_length: usize,
}

/// Relevance scoring configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ScoringConfig {
    /// Boost for title matches; must be strictly the greatest boost
    pub title_boost: f64,
    /// Boost for summary matches
    pub summary_boost: f64,
    /// Boost for tag and category matches
    pub tag_boost: f64,
    /// Boost for body content matches
    pub content_boost: f64,
    /// Length-normalization damping constant, in [0, 1)
    pub length_norm_k: f64,
    /// Multiplier applied to phrase clauses whose terms verify adjacency
    pub phrase_bonus: f64,
    /// Default maximum result count before pagination
    pub default_max_results: usize,
}

/// Suggestion engine configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct SuggestConfig {
    /// Prefix matches required before skipping the fuzzy fallback
    pub min_prefix_matches: usize,
    /// Maximum Levenshtein distance for the fuzzy fallback (at most 2)
    pub max_edit_distance: u32,
    /// Default suggestion count cap
    pub default_limit: usize,
}

/// Recommendation engine configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct RecommendConfig {
    /// Half-life in days for interest-weight decay of older views
    pub half_life_days: f64,
    /// Number of most recent interactions contributing to a profile
    pub max_history: usize,
    /// Default recommendation count
    pub default_limit: usize,
}

/// Query cache configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct CacheConfig {
    /// Enable the query cache
    pub enabled: bool,
    /// Maximum number of cached result sets
    pub capacity: usize,
    /// Entry time-to-live in seconds
    pub ttl_seconds: u64,
}

impl Default for TokenizerConfig {
    fn default() -> Self {
        Self {
            stopwords: default_stopwords(),
            legal_keywords: default_legal_keywords(),
            cjk_dictionary: default_cjk_dictionary(),
            enable_stemming: true,
            min_token_length: 2,
        }
    }
}

impl Default for ScoringConfig {
    fn default() -> Self {
        Self {
            title_boost: 3.0,
            summary_boost: 2.0,
            tag_boost: 1.5,
            content_boost: 1.0,
            length_norm_k: 0.5,
            phrase_bonus: 1.25,
            default_max_results: 1000,
        }
    }
}

impl Default for SuggestConfig {
    fn default() -> Self {
        Self {
            min_prefix_matches: 3,
            max_edit_distance: 2,
            default_limit: 10,
        }
    }
}

impl Default for RecommendConfig {
    fn default() -> Self {
        Self {
            half_life_days: 14.0,
            max_history: 100,
            default_limit: 10,
        }
    }
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            capacity: 512,
            ttl_seconds: 300,
        }
    }
}

impl Config {
    /// Load configuration from a TOML file
    pub fn from_file<P: AsRef<Path>>(path: P) -> Result<Self> {
        let content = std::fs::read_to_string(path)?;
        let config: Config = toml::from_str(&content)?;
        config.validate()?;
        Ok(config)
    }

    /// Validate the configuration, returning a detailed error on the
    /// first violated constraint
    pub fn validate(&self) -> Result<()> {
        let s = &self.scoring;
        let max_other = s.summary_boost.max(s.tag_boost).max(s.content_boost);
        if s.title_boost <= max_other {
            return Err(SearchError::Config {
                message: format!(
                    "scoring.title_boost ({}) must be strictly greater than all other field boosts (max {})",
                    s.title_boost, max_other
                ),
            });
        }
        for (name, boost) in [
            ("title_boost", s.title_boost),
            ("summary_boost", s.summary_boost),
            ("tag_boost", s.tag_boost),
            ("content_boost", s.content_boost),
        ] {
            if boost <= 0.0 {
                return Err(SearchError::Config {
                    message: format!("scoring.{} must be positive, got {}", name, boost),
                });
            }
        }
        if !(0.0..1.0).contains(&s.length_norm_k) {
            return Err(SearchError::Config {
                message: format!(
                    "scoring.length_norm_k must be in [0, 1), got {}",
                    s.length_norm_k
                ),
            });
        }
        if s.phrase_bonus <= 1.0 {
            return Err(SearchError::Config {
                message: format!(
                    "scoring.phrase_bonus must exceed 1.0, got {}",
                    s.phrase_bonus
                ),
            });
        }
        if self.suggest.max_edit_distance > 2 {
            return Err(SearchError::Config {
                message: format!(
                    "suggest.max_edit_distance must be at most 2, got {}",
                    self.suggest.max_edit_distance
                ),
            });
        }
        if self.cache.enabled && self.cache.capacity == 0 {
            return Err(SearchError::Config {
                message: "cache.capacity must be nonzero when the cache is enabled".to_string(),
            });
        }
        if self.recommend.half_life_days <= 0.0 {
            return Err(SearchError::Config {
                message: format!(
                    "recommend.half_life_days must be positive, got {}",
                    self.recommend.half_life_days
                ),
            });
        }
        Ok(())
    }
}

fn default_stopwords() -> Vec<String> {
    [
        "a", "an", "and", "are", "as", "at", "be", "by", "for", "from", "has", "he", "in", "is",
        "it", "its", "of", "on", "that", "the", "to", "was", "were", "will", "with", "this",
        "but", "they", "have", "had", "what", "which", "she", "do", "how", "their", "if", "or",
        "的", "了", "和", "是", "在", "有", "就", "不", "人", "都", "一个", "上", "也", "很",
        "到", "说", "要", "去", "你", "会", "着", "没有", "看", "好",
    ]
    .iter()
    .map(|s| s.to_string())
    .collect()
}

fn default_legal_keywords() -> Vec<String> {
    [
        // Short English legal terms that collide with stopwords
        "will", "act", "party", "deed", "suit", "tort", "lien", "bar", "bench",
        // Common Chinese legal vocabulary
        "合同", "纠纷", "诉讼", "仲裁", "赔偿", "违约", "侵权", "劳动", "条款", "证据",
        "上诉", "判决", "调解", "和解", "律师", "法院", "原告", "被告", "代理", "授权",
    ]
    .iter()
    .map(|s| s.to_string())
    .collect()
}

fn default_cjk_dictionary() -> Vec<String> {
    [
        "劳动合同", "合同纠纷", "劳动仲裁", "知识产权", "股权转让", "房屋租赁",
        "借款合同", "买卖合同", "侵权责任", "违约责任", "诉讼时效", "管辖权",
        "合同", "纠纷", "诉讼", "仲裁", "赔偿", "违约", "侵权", "劳动", "条款",
        "证据", "上诉", "判决", "调解", "和解", "律师", "法院", "原告", "被告",
        "审查", "模板", "咨询", "保密", "协议", "期限", "解除", "终止",
    ]
    .iter()
    .map(|s| s.to_string())
    .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn test_default_config_is_valid() {
        assert!(Config::default().validate().is_ok());
    }

    #[test]
    fn test_title_boost_must_dominate() {
        let mut config = Config::default();
        config.scoring.title_boost = config.scoring.summary_boost;
        let err = config.validate().unwrap_err();
        assert_eq!(err.category(), "configuration");
    }

    #[test]
    fn test_damping_constant_range() {
        let mut config = Config::default();
        config.scoring.length_norm_k = 1.0;
        assert!(config.validate().is_err());
        config.scoring.length_norm_k = 0.0;
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_edit_distance_bound() {
        let mut config = Config::default();
        config.suggest.max_edit_distance = 3;
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_from_file() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        writeln!(
            file,
            "[scoring]\ntitle_boost = 5.0\n\n[cache]\ncapacity = 64"
        )
        .unwrap();
        let config = Config::from_file(file.path()).unwrap();
        assert_eq!(config.scoring.title_boost, 5.0);
        assert_eq!(config.cache.capacity, 64);
        // Unspecified sections fall back to defaults
        assert_eq!(config.suggest.default_limit, 10);
    }
}
