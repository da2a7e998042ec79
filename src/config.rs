//! Configuration management for linkaudit
//!
//! Configuration is loaded from `./config/linkaudit.toml` (or an explicit `--config` path).
//! When no file exists the embedded template is used, so the template is the only place
//! defaults are written down.

use serde::Deserialize;
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::fs;
use std::io::{self, Write};
use thiserror::Error;
use regex::Regex;
use tracing::debug;

/// Configuration file path relative to working directory
pub const CONFIG_PATH: &str = "./config/linkaudit.toml";

/// Default configuration file content
pub const DEFAULT_CONFIG: &str = include_str!("../config/linkaudit.toml");

#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("Configuration file not found at {0}")]
    FileNotFound(PathBuf),

    #[error("Failed to read configuration file: {0}")]
    IoError(#[from] io::Error),

    #[error("Failed to parse configuration file: {0}")]
    ParseError(#[from] toml::de::Error),

    #[error("Invalid regex pattern '{pattern_name}': {error}\n  Pattern: {pattern}")]
    InvalidRegex {
        pattern_name: String,
        pattern: String,
        error: String,
    },

    #[error("Invalid path prefix in '{field}': {value} (expected /segment/ form)")]
    InvalidPrefix { field: String, value: String },

    #[error("Configuration field '{field}' cannot be empty")]
    EmptyRequired { field: String },

    #[error("Invalid range in '{field}': lower bound must not exceed upper bound")]
    InvalidRange { field: String },
}

/// Root configuration structure
#[derive(Debug, Clone, Deserialize)]
pub struct AppConfig {
    pub site: SiteConfig,
    #[serde(default)]
    pub ingest: IngestConfig,
    pub taxonomy: TaxonomyConfig,
    #[serde(default)]
    pub issues: IssuesConfig,
    #[serde(default)]
    pub add_rules: Vec<AddRuleConfig>,
    #[serde(default)]
    pub anchors: AnchorsConfig,
    #[serde(default)]
    pub highperf: HighPerfConfig,
}

/// Site identity and scope
#[derive(Debug, Clone, Deserialize)]
pub struct SiteConfig {
    /// Internal host; empty means "infer from the core pages list"
    #[serde(default)]
    pub internal_domain: String,
    pub scope_prefix: String,
    #[serde(default)]
    pub cross_scope_prefixes: Vec<String>,
    #[serde(default = "default_blog_path_marker")]
    pub blog_path_marker: String,
    #[serde(default = "default_attorneys_segment")]
    pub attorneys_segment: String,
    #[serde(default = "default_locations_segment")]
    pub locations_segment: String,
    #[serde(default)]
    pub brand_name: String,
}

fn default_blog_path_marker() -> String {
    "/blog/".to_string()
}

fn default_attorneys_segment() -> String {
    "attorneys".to_string()
}

fn default_locations_segment() -> String {
    "locations".to_string()
}

/// Streaming ingest settings
#[derive(Debug, Clone, Deserialize)]
pub struct IngestConfig {
    #[serde(default = "default_chunk_rows")]
    pub chunk_rows: usize,
}

fn default_chunk_rows() -> usize {
    200_000
}

impl Default for IngestConfig {
    fn default() -> Self {
        Self {
            chunk_rows: default_chunk_rows(),
        }
    }
}

/// Cluster taxonomy bindings
#[derive(Debug, Clone, Deserialize)]
pub struct TaxonomyConfig {
    /// Cluster used when no routing rule or keyword matches
    #[serde(default)]
    pub default_cluster: String,
    #[serde(default)]
    pub parent_prefixes: Vec<ParentPrefix>,
    #[serde(default)]
    pub cluster_names: BTreeMap<String, String>,
    #[serde(default)]
    pub slug_cluster_keywords: Vec<ClusterKeywords>,
    #[serde(default)]
    pub cluster_flag_aliases: BTreeMap<String, String>,
}

/// URL path prefix bound to a parent cluster (Tier-2 membership)
#[derive(Debug, Clone, Deserialize)]
pub struct ParentPrefix {
    pub prefix: String,
    pub cluster: String,
}

#[derive(Debug, Clone, Deserialize)]
pub struct ClusterKeywords {
    pub cluster: String,
    pub keywords: Vec<String>,
}

/// Patterns for placeholder and malformed link targets
#[derive(Debug, Clone, Deserialize, Default)]
pub struct IssuesConfig {
    #[serde(default)]
    pub placeholder_patterns: Vec<String>,
    #[serde(default)]
    pub malformed_patterns: Vec<String>,
}

/// One ordered ADD routing rule
#[derive(Debug, Clone, Deserialize)]
pub struct AddRuleConfig {
    pub name: String,
    pub pattern: String,
    pub cluster: String,
    /// Matched against the target path on `/`, `-` or `_` boundaries
    #[serde(default)]
    pub url_contains: String,
    #[serde(default)]
    pub h1_contains: String,
}

/// Anchor policy
#[derive(Debug, Clone, Deserialize)]
pub struct AnchorsConfig {
    #[serde(default = "default_banned_terms")]
    pub banned_terms: Vec<String>,
    #[serde(default = "default_gated_terms")]
    pub gated_terms: Vec<String>,
    #[serde(default = "default_max_top_share")]
    pub max_top_share: f64,
    #[serde(default = "default_diversity_min_links")]
    pub diversity_min_links: usize,
    #[serde(default = "default_min_bank_size")]
    pub min_bank_size: usize,
    #[serde(default = "default_exact_range")]
    pub exact_range: [u32; 2],
    #[serde(default = "default_partial_range")]
    pub partial_range: [u32; 2],
    #[serde(default = "default_info_range")]
    pub info_range: [u32; 2],
    #[serde(default = "default_branded_range")]
    pub branded_range: [u32; 2],
    /// Goal shares for exact, partial, info, branded (percent)
    #[serde(default = "default_mix_targets")]
    pub mix_targets: [u32; 4],
}

fn default_banned_terms() -> Vec<String> {
    vec!["best".to_string(), "compare".to_string()]
}

fn default_gated_terms() -> Vec<String> {
    vec!["services".to_string(), "solutions".to_string()]
}

fn default_max_top_share() -> f64 {
    0.2
}

fn default_diversity_min_links() -> usize {
    5
}

fn default_min_bank_size() -> usize {
    10
}

fn default_exact_range() -> [u32; 2] {
    [15, 20]
}

fn default_partial_range() -> [u32; 2] {
    [40, 50]
}

fn default_info_range() -> [u32; 2] {
    [20, 30]
}

fn default_branded_range() -> [u32; 2] {
    [10, 20]
}

fn default_mix_targets() -> [u32; 4] {
    [18, 45, 25, 12]
}

impl Default for AnchorsConfig {
    fn default() -> Self {
        Self {
            banned_terms: default_banned_terms(),
            gated_terms: default_gated_terms(),
            max_top_share: default_max_top_share(),
            diversity_min_links: default_diversity_min_links(),
            min_bank_size: default_min_bank_size(),
            exact_range: default_exact_range(),
            partial_range: default_partial_range(),
            info_range: default_info_range(),
            branded_range: default_branded_range(),
            mix_targets: default_mix_targets(),
        }
    }
}

/// High-performer selection thresholds
#[derive(Debug, Clone, Deserialize)]
pub struct HighPerfConfig {
    #[serde(default = "default_ga4_top_n")]
    pub ga4_top_n: usize,
    #[serde(default = "default_gsc_top_n")]
    pub gsc_top_n: usize,
    #[serde(default = "default_ahrefs_top_n")]
    pub ahrefs_top_n: usize,
}

fn default_ga4_top_n() -> usize {
    30
}

fn default_gsc_top_n() -> usize {
    20
}

fn default_ahrefs_top_n() -> usize {
    20
}

impl Default for HighPerfConfig {
    fn default() -> Self {
        Self {
            ga4_top_n: default_ga4_top_n(),
            gsc_top_n: default_gsc_top_n(),
            ahrefs_top_n: default_ahrefs_top_n(),
        }
    }
}

impl AppConfig {
    /// Load configuration from the default path
    pub fn load() -> Result<Self, ConfigError> {
        Self::load_from_path(Path::new(CONFIG_PATH))
    }

    /// Load configuration from a specific path
    pub fn load_from_path(path: &Path) -> Result<Self, ConfigError> {
        if !path.exists() {
            return Err(ConfigError::FileNotFound(path.to_path_buf()));
        }

        let content = fs::read_to_string(path)?;
        let config: AppConfig = toml::from_str(&content)?;
        config.validate()?;
        Ok(config)
    }

    /// Load the embedded default configuration
    pub fn embedded_default() -> Result<Self, ConfigError> {
        let config: AppConfig = toml::from_str(DEFAULT_CONFIG)?;
        config.validate()?;
        Ok(config)
    }

    /// Resolve configuration for a run: explicit path, then `CONFIG_PATH`, then the embedded default
    pub fn resolve(explicit: Option<&Path>) -> Result<Self, ConfigError> {
        if let Some(path) = explicit {
            return Self::load_from_path(path);
        }
        match Self::load() {
            Ok(config) => Ok(config),
            Err(ConfigError::FileNotFound(path)) => {
                debug!("No configuration at {}, using embedded defaults", path.display());
                Self::embedded_default()
            }
            Err(e) => Err(e),
        }
    }

    /// Validate all configuration values
    pub fn validate(&self) -> Result<(), ConfigError> {
        validate_prefix("site.scope_prefix", &self.site.scope_prefix)?;
        for (i, prefix) in self.site.cross_scope_prefixes.iter().enumerate() {
            validate_prefix(&format!("site.cross_scope_prefixes[{}]", i), prefix)?;
        }
        if self.site.attorneys_segment.trim().is_empty() {
            return Err(ConfigError::EmptyRequired {
                field: "site.attorneys_segment".to_string(),
            });
        }

        if self.ingest.chunk_rows == 0 {
            return Err(ConfigError::EmptyRequired {
                field: "ingest.chunk_rows".to_string(),
            });
        }

        for (i, binding) in self.taxonomy.parent_prefixes.iter().enumerate() {
            validate_prefix(&format!("taxonomy.parent_prefixes[{}].prefix", i), &binding.prefix)?;
            if binding.cluster.trim().is_empty() {
                return Err(ConfigError::EmptyRequired {
                    field: format!("taxonomy.parent_prefixes[{}].cluster", i),
                });
            }
        }

        for (i, pattern) in self.issues.placeholder_patterns.iter().enumerate() {
            self.validate_regex(&format!("issues.placeholder_patterns[{}]", i), pattern)?;
        }
        for (i, pattern) in self.issues.malformed_patterns.iter().enumerate() {
            self.validate_regex(&format!("issues.malformed_patterns[{}]", i), pattern)?;
        }

        for rule in &self.add_rules {
            self.validate_regex(&format!("add_rules.{}", rule.name), &rule.pattern)?;
            if rule.cluster.trim().is_empty() {
                return Err(ConfigError::EmptyRequired {
                    field: format!("add_rules.{}.cluster", rule.name),
                });
            }
        }

        let ranges = [
            ("anchors.exact_range", self.anchors.exact_range),
            ("anchors.partial_range", self.anchors.partial_range),
            ("anchors.info_range", self.anchors.info_range),
            ("anchors.branded_range", self.anchors.branded_range),
        ];
        for (field, [lo, hi]) in ranges {
            if lo > hi || hi > 100 {
                return Err(ConfigError::InvalidRange {
                    field: field.to_string(),
                });
            }
        }
        if !(0.0..=1.0).contains(&self.anchors.max_top_share) {
            return Err(ConfigError::InvalidRange {
                field: "anchors.max_top_share".to_string(),
            });
        }

        Ok(())
    }

    fn validate_regex(&self, name: &str, pattern: &str) -> Result<(), ConfigError> {
        Regex::new(pattern).map_err(|e| ConfigError::InvalidRegex {
            pattern_name: name.to_string(),
            pattern: pattern.to_string(),
            error: e.to_string(),
        })?;
        Ok(())
    }

    /// Display name for a cluster id, falling back to the id itself
    pub fn cluster_name(&self, cluster_id: &str) -> String {
        self.taxonomy
            .cluster_names
            .get(cluster_id)
            .cloned()
            .unwrap_or_else(|| cluster_id.to_string())
    }

    /// Write the embedded default configuration to `path`
    pub fn create_default_config_at(path: &Path) -> Result<PathBuf, ConfigError> {
        if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
            fs::create_dir_all(parent)?;
        }

        let mut file = fs::File::create(path)?;
        file.write_all(DEFAULT_CONFIG.as_bytes())?;

        Ok(path.to_path_buf())
    }
}

fn validate_prefix(field: &str, value: &str) -> Result<(), ConfigError> {
    if value.len() < 2 || !value.starts_with('/') || !value.ends_with('/') {
        return Err(ConfigError::InvalidPrefix {
            field: field.to_string(),
            value: value.to_string(),
        });
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    const MINIMAL: &str = r#"
[site]
scope_prefix = "/wisconsin/"

[taxonomy]
"#;

    #[test]
    fn test_default_config_parses() {
        let config: Result<AppConfig, _> = toml::from_str(DEFAULT_CONFIG);
        assert!(config.is_ok(), "Default config should parse: {:?}", config.err());
    }

    #[test]
    fn test_default_config_validates() {
        let config: AppConfig = toml::from_str(DEFAULT_CONFIG).unwrap();
        assert!(config.validate().is_ok(), "Default config should validate");
    }

    #[test]
    fn test_default_add_rules_keep_uncontested_first() {
        let config = AppConfig::embedded_default().unwrap();
        let names: Vec<&str> = config.add_rules.iter().map(|r| r.name.as_str()).collect();
        let uncontested = names.iter().position(|n| *n == "uncontested").unwrap();
        let contested = names.iter().position(|n| *n == "contested").unwrap();
        assert!(uncontested < contested);
    }

    #[test]
    fn test_minimal_config_uses_defaults() {
        let config: AppConfig = toml::from_str(MINIMAL).expect("Config should parse");
        assert!(config.validate().is_ok());
        assert_eq!(config.ingest.chunk_rows, 200_000);
        assert_eq!(config.site.blog_path_marker, "/blog/");
        assert_eq!(config.anchors.banned_terms, vec!["best", "compare"]);
        assert_eq!(config.anchors.mix_targets, [18, 45, 25, 12]);
        assert_eq!(config.highperf.ga4_top_n, 30);
        assert_eq!(config.highperf.gsc_top_n, 20);
        assert_eq!(config.highperf.ahrefs_top_n, 20);
        assert!(config.add_rules.is_empty());
    }

    #[test]
    fn test_highperf_thresholds_are_configurable() {
        let config_str = format!("{}\n[highperf]\nga4_top_n = 50\ngsc_top_n = 10\n", MINIMAL);
        let config: AppConfig = toml::from_str(&config_str).unwrap();
        assert_eq!(config.highperf.ga4_top_n, 50);
        assert_eq!(config.highperf.gsc_top_n, 10);
        assert_eq!(config.highperf.ahrefs_top_n, 20);
    }

    #[test]
    fn test_invalid_add_rule_regex_rejected() {
        let config_str = format!(
            "{}\n[[add_rules]]\nname = \"broken\"\npattern = '(unclosed'\ncluster = \"DIV\"\n",
            MINIMAL
        );
        let config: AppConfig = toml::from_str(&config_str).unwrap();
        match config.validate() {
            Err(ConfigError::InvalidRegex { pattern_name, .. }) => {
                assert_eq!(pattern_name, "add_rules.broken");
            }
            other => panic!("Expected InvalidRegex, got {:?}", other),
        }
    }

    #[test]
    fn test_scope_prefix_must_be_slash_delimited() {
        let config: AppConfig = toml::from_str("[site]\nscope_prefix = \"wisconsin\"\n[taxonomy]\n").unwrap();
        assert!(matches!(config.validate(), Err(ConfigError::InvalidPrefix { .. })));
    }

    #[test]
    fn test_inverted_range_rejected() {
        let config_str = format!("{}\n[anchors]\nexact_range = [30, 10]\n", MINIMAL);
        let config: AppConfig = toml::from_str(&config_str).unwrap();
        assert!(matches!(config.validate(), Err(ConfigError::InvalidRange { .. })));
    }

    #[test]
    fn test_cluster_name_fallback() {
        let config = AppConfig::embedded_default().unwrap();
        assert_eq!(config.cluster_name("CH-CUS"), "Child Custody");
        assert_eq!(config.cluster_name("UNKNOWN"), "UNKNOWN");
    }
}
