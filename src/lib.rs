//! Co-occurrence Analyzer
//!
//! Turns tabular records into a value co-occurrence network and ranks its
//! nodes:
//! - Table loading (CSV with delimiter sniffing, JSON records) and filtering
//! - Co-occurrence graph building with an edge-weight floor
//! - Degree, weighted betweenness (exact or sampled), eigenvector centrality
//! - Community detection with a fallback chain of strategies
//! - CSV / JSON exports and a node-link view for display

pub mod error;
pub mod export;
pub mod graph;
pub mod table;

pub use error::{GraphError, Result};

use serde::Deserialize;
use std::path::{Path, PathBuf};
use std::str::FromStr;

use graph::models::MetricsOptions;

// ============================================================================
// YAML config structs (deserialization targets)
// ============================================================================

/// Top-level YAML configuration file structure
#[derive(Debug, Clone, Deserialize, Default)]
#[serde(default)]
pub struct YamlConfig {
    pub analysis: AnalysisYamlConfig,
    pub output: OutputYamlConfig,
}

/// Analysis configuration section
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct AnalysisYamlConfig {
    pub min_weight: u64,
    pub approx_betweenness: bool,
    pub exact_threshold: usize,
    pub sample_size: Option<usize>,
    pub seed: u64,
    pub louvain_resolution: f64,
    /// Cardinality cut-off when listing candidate columns
    pub max_unique: usize,
    pub timeout_secs: Option<u64>,
}

impl Default for AnalysisYamlConfig {
    fn default() -> Self {
        let metrics = MetricsOptions::default();
        Self {
            min_weight: 1,
            approx_betweenness: metrics.approx_betweenness,
            exact_threshold: metrics.exact_threshold,
            sample_size: metrics.sample_size,
            seed: metrics.seed,
            louvain_resolution: metrics.louvain_resolution,
            max_unique: table::DEFAULT_MAX_UNIQUE,
            timeout_secs: None,
        }
    }
}

/// Output configuration section
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct OutputYamlConfig {
    pub out_dir: String,
    /// Node cap for the display view (0 = no cap)
    pub max_view_nodes: usize,
    /// Number of top nodes logged after a run
    pub top: usize,
}

impl Default for OutputYamlConfig {
    fn default() -> Self {
        Self {
            out_dir: "output".into(),
            max_view_nodes: 800,
            top: 10,
        }
    }
}

// ============================================================================
// Runtime config (what the application actually uses)
// ============================================================================

/// Resolved configuration.
///
/// Priority: env var > YAML > default. CLI flags are applied on top by the
/// binary.
#[derive(Debug, Clone)]
pub struct Config {
    pub min_weight: u64,
    pub approx_betweenness: bool,
    pub exact_threshold: usize,
    pub sample_size: Option<usize>,
    pub seed: u64,
    pub louvain_resolution: f64,
    pub max_unique: usize,
    pub timeout_secs: Option<u64>,
    pub out_dir: PathBuf,
    pub max_view_nodes: usize,
    pub top: usize,
}

impl Config {
    /// Load configuration from `config.yaml` (if present) and env vars.
    pub fn from_env() -> Result<Self> {
        Self::from_yaml_and_env(None)
    }

    /// Load configuration from an optional YAML file, with env var overrides.
    ///
    /// Env vars: `COGRAPH_MIN_WEIGHT`, `COGRAPH_EXACT_THRESHOLD`,
    /// `COGRAPH_SEED`, `COGRAPH_SAMPLE_SIZE`, `COGRAPH_OUT_DIR`,
    /// `COGRAPH_MAX_VIEW_NODES`. Without a path, `config.yaml` in the current
    /// directory is tried.
    pub fn from_yaml_and_env(yaml_path: Option<&Path>) -> Result<Self> {
        // 1. Load YAML config (or defaults if file not found)
        let yaml = Self::load_yaml(yaml_path)?;

        // 2. Build Config with env var overrides
        let config = Self {
            min_weight: env_parse("COGRAPH_MIN_WEIGHT").unwrap_or(yaml.analysis.min_weight),
            approx_betweenness: yaml.analysis.approx_betweenness,
            exact_threshold: env_parse("COGRAPH_EXACT_THRESHOLD")
                .unwrap_or(yaml.analysis.exact_threshold),
            sample_size: env_parse("COGRAPH_SAMPLE_SIZE").or(yaml.analysis.sample_size),
            seed: env_parse("COGRAPH_SEED").unwrap_or(yaml.analysis.seed),
            louvain_resolution: yaml.analysis.louvain_resolution,
            max_unique: yaml.analysis.max_unique,
            timeout_secs: yaml.analysis.timeout_secs,
            out_dir: std::env::var("COGRAPH_OUT_DIR")
                .unwrap_or(yaml.output.out_dir)
                .into(),
            max_view_nodes: env_parse("COGRAPH_MAX_VIEW_NODES")
                .unwrap_or(yaml.output.max_view_nodes),
            top: yaml.output.top,
        };

        if config.min_weight == 0 {
            return Err(GraphError::invalid("min_weight must be at least 1"));
        }
        Ok(config)
    }

    /// Metrics options derived from this config.
    pub fn metrics_options(&self) -> MetricsOptions {
        MetricsOptions {
            approx_betweenness: self.approx_betweenness,
            sample_size: self.sample_size,
            exact_threshold: self.exact_threshold,
            seed: self.seed,
            louvain_resolution: self.louvain_resolution,
            ..Default::default()
        }
    }

    fn load_yaml(yaml_path: Option<&Path>) -> Result<YamlConfig> {
        let default_path = Path::new("config.yaml");
        let path = yaml_path.unwrap_or(default_path);

        match std::fs::read_to_string(path) {
            Ok(contents) => {
                let config = serde_yaml::from_str(&contents)?;
                tracing::info!("Loaded config from {}", path.display());
                Ok(config)
            }
            Err(_) => {
                tracing::debug!(
                    "No config file at {}, using env vars / defaults",
                    path.display()
                );
                Ok(YamlConfig::default())
            }
        }
    }
}

/// Parse an env var, ignoring (with a warning) values that don't parse.
fn env_parse<T: FromStr>(var: &str) -> Option<T> {
    let raw = std::env::var(var).ok()?;
    match raw.trim().parse() {
        Ok(v) => Some(v),
        Err(_) => {
            tracing::warn!("Ignoring {}={:?}: not a valid value", var, raw);
            None
        }
    }
}

// ============================================================================
// Tests
// ============================================================================

#[cfg(test)]
mod config_tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn test_yaml_config_loading() {
        let yaml = r#"
analysis:
  min_weight: 3
  approx_betweenness: false
  exact_threshold: 500
  sample_size: 64
  seed: 7
  max_unique: 50
  timeout_secs: 30

output:
  out_dir: /tmp/cograph
  max_view_nodes: 100
  top: 5
"#;

        let config: YamlConfig = serde_yaml::from_str(yaml).unwrap();
        assert_eq!(config.analysis.min_weight, 3);
        assert!(!config.analysis.approx_betweenness);
        assert_eq!(config.analysis.exact_threshold, 500);
        assert_eq!(config.analysis.sample_size, Some(64));
        assert_eq!(config.analysis.seed, 7);
        assert_eq!(config.analysis.max_unique, 50);
        assert_eq!(config.analysis.timeout_secs, Some(30));
        assert_eq!(config.output.out_dir, "/tmp/cograph");
        assert_eq!(config.output.max_view_nodes, 100);
        assert_eq!(config.output.top, 5);
    }

    #[test]
    fn test_yaml_partial_sections() {
        let yaml = r#"
output:
  top: 20
"#;
        let config: YamlConfig = serde_yaml::from_str(yaml).unwrap();
        assert_eq!(config.output.top, 20);
        assert_eq!(config.output.out_dir, "output");
        assert_eq!(config.analysis.min_weight, 1);
        assert_eq!(config.analysis.exact_threshold, 2000);
    }

    #[test]
    fn test_yaml_defaults() {
        let config = YamlConfig::default();
        assert_eq!(config.analysis.min_weight, 1);
        assert!(config.analysis.approx_betweenness);
        assert_eq!(config.analysis.exact_threshold, 2000);
        assert_eq!(config.analysis.seed, 42);
        assert!(config.analysis.sample_size.is_none());
        assert_eq!(config.analysis.max_unique, 200);
        assert_eq!(config.output.max_view_nodes, 800);
    }

    #[test]
    fn test_metrics_options_from_config() {
        let yaml: YamlConfig = serde_yaml::from_str("analysis:\n  seed: 9\n  sample_size: 10\n").unwrap();
        let config = Config {
            min_weight: yaml.analysis.min_weight,
            approx_betweenness: yaml.analysis.approx_betweenness,
            exact_threshold: yaml.analysis.exact_threshold,
            sample_size: yaml.analysis.sample_size,
            seed: yaml.analysis.seed,
            louvain_resolution: yaml.analysis.louvain_resolution,
            max_unique: yaml.analysis.max_unique,
            timeout_secs: yaml.analysis.timeout_secs,
            out_dir: yaml.output.out_dir.into(),
            max_view_nodes: yaml.output.max_view_nodes,
            top: yaml.output.top,
        };
        let options = config.metrics_options();
        assert_eq!(options.seed, 9);
        assert_eq!(options.sample_size, Some(10));
        assert_eq!(options.eigen_max_iterations, 100);
        assert!(options.cancel.is_none());
    }

    #[test]
    fn test_yaml_and_env_lifecycle() {
        // Helper to clear all config env vars
        fn clear_env() {
            for var in &[
                "COGRAPH_MIN_WEIGHT",
                "COGRAPH_EXACT_THRESHOLD",
                "COGRAPH_SEED",
                "COGRAPH_SAMPLE_SIZE",
                "COGRAPH_OUT_DIR",
                "COGRAPH_MAX_VIEW_NODES",
            ] {
                std::env::remove_var(var);
            }
        }

        // --- Phase 1: YAML values loaded correctly ---
        let yaml = r#"
analysis:
  min_weight: 2
  seed: 11
output:
  out_dir: yaml-out
  max_view_nodes: 50
"#;
        let dir = tempfile::tempdir().unwrap();
        let file_path = dir.path().join("config.yaml");
        let mut file = std::fs::File::create(&file_path).unwrap();
        file.write_all(yaml.as_bytes()).unwrap();

        clear_env();

        let config = Config::from_yaml_and_env(Some(&file_path)).unwrap();
        assert_eq!(config.min_weight, 2);
        assert_eq!(config.seed, 11);
        assert_eq!(config.out_dir, PathBuf::from("yaml-out"));
        assert_eq!(config.max_view_nodes, 50);
        assert!(config.sample_size.is_none());

        // --- Phase 2: Env vars override YAML ---
        std::env::set_var("COGRAPH_SEED", "99");
        std::env::set_var("COGRAPH_SAMPLE_SIZE", "25");
        std::env::set_var("COGRAPH_OUT_DIR", "env-out");
        std::env::set_var("COGRAPH_MAX_VIEW_NODES", "not-a-number");

        let config = Config::from_yaml_and_env(Some(&file_path)).unwrap();
        assert_eq!(config.seed, 99);
        assert_eq!(config.sample_size, Some(25));
        assert_eq!(config.out_dir, PathBuf::from("env-out"));
        // Unparseable env value falls back to YAML
        assert_eq!(config.max_view_nodes, 50);
        // YAML value still used where no env override
        assert_eq!(config.min_weight, 2);

        // --- Phase 3: Invalid weight floor is rejected ---
        std::env::set_var("COGRAPH_MIN_WEIGHT", "0");
        assert!(matches!(
            Config::from_yaml_and_env(Some(&file_path)),
            Err(GraphError::InvalidArgument(_))
        ));

        clear_env();

        // --- Phase 4: No YAML file → defaults ---
        let nonexistent = Path::new("/tmp/nonexistent-cograph-config-12345.yaml");
        let config = Config::from_yaml_and_env(Some(nonexistent)).unwrap();
        assert_eq!(config.min_weight, 1);
        assert_eq!(config.exact_threshold, 2000);
        assert_eq!(config.out_dir, PathBuf::from("output"));
    }

    #[test]
    fn test_malformed_yaml_is_an_error() {
        let dir = tempfile::tempdir().unwrap();
        let file_path = dir.path().join("config.yaml");
        std::fs::write(&file_path, "analysis: [not, a, map]").unwrap();
        assert!(matches!(
            Config::from_yaml_and_env(Some(&file_path)),
            Err(GraphError::Yaml(_))
        ));
    }
}
