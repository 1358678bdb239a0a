use anyhow::{Context, Result};
use serde::Deserialize;
use std::path::{Path, PathBuf};

#[derive(Debug, Deserialize, Clone)]
pub struct Config {
    pub db: DbConfig,
    #[serde(default)]
    pub analysis: AnalysisConfig,
    #[serde(default)]
    pub reasoning: ReasoningConfig,
    #[serde(default)]
    pub worker: WorkerConfig,
    #[serde(default)]
    pub retention: RetentionConfig,
}

#[derive(Debug, Deserialize, Clone)]
pub struct DbConfig {
    pub path: PathBuf,
}

/// Heuristic thresholds for stitching and verification. Tuning knobs,
/// not structural requirements; defaults mirror observed behavior.
#[derive(Debug, Deserialize, Clone)]
pub struct AnalysisConfig {
    #[serde(default = "default_dedup_window_secs")]
    pub dedup_window_secs: i64,
    #[serde(default = "default_gap_threshold_hours")]
    pub gap_threshold_hours: i64,
    #[serde(default = "default_veto_cutoff")]
    pub veto_cutoff: u32,
    #[serde(default = "default_min_evidence_instances")]
    pub min_evidence_instances: u32,
    #[serde(default = "default_min_deep_messages")]
    pub min_deep_messages: usize,
}

impl Default for AnalysisConfig {
    fn default() -> Self {
        Self {
            dedup_window_secs: default_dedup_window_secs(),
            gap_threshold_hours: default_gap_threshold_hours(),
            veto_cutoff: default_veto_cutoff(),
            min_evidence_instances: default_min_evidence_instances(),
            min_deep_messages: default_min_deep_messages(),
        }
    }
}

fn default_dedup_window_secs() -> i64 {
    5 * 60
}
fn default_gap_threshold_hours() -> i64 {
    48
}
fn default_veto_cutoff() -> u32 {
    70
}
fn default_min_evidence_instances() -> u32 {
    2
}
fn default_min_deep_messages() -> usize {
    50
}

#[derive(Debug, Deserialize, Clone)]
pub struct ReasoningConfig {
    #[serde(default = "default_provider")]
    pub provider: String,
    #[serde(default)]
    pub model: Option<String>,
    #[serde(default)]
    pub url: Option<String>,
    #[serde(default = "default_max_retries")]
    pub max_retries: u32,
    #[serde(default = "default_timeout_secs")]
    pub timeout_secs: u64,
}

impl Default for ReasoningConfig {
    fn default() -> Self {
        Self {
            provider: "disabled".to_string(),
            model: None,
            url: None,
            max_retries: default_max_retries(),
            timeout_secs: default_timeout_secs(),
        }
    }
}

fn default_provider() -> String {
    "disabled".to_string()
}
fn default_max_retries() -> u32 {
    5
}
fn default_timeout_secs() -> u64 {
    60
}

impl ReasoningConfig {
    pub fn is_enabled(&self) -> bool {
        self.provider != "disabled"
    }
}

#[derive(Debug, Deserialize, Clone)]
pub struct WorkerConfig {
    #[serde(default = "default_concurrency")]
    pub concurrency: usize,
    #[serde(default = "default_max_attempts")]
    pub max_attempts: i64,
    #[serde(default = "default_backoff_base_secs")]
    pub backoff_base_secs: i64,
}

impl Default for WorkerConfig {
    fn default() -> Self {
        Self {
            concurrency: default_concurrency(),
            max_attempts: default_max_attempts(),
            backoff_base_secs: default_backoff_base_secs(),
        }
    }
}

fn default_concurrency() -> usize {
    5
}
fn default_max_attempts() -> i64 {
    3
}
fn default_backoff_base_secs() -> i64 {
    5
}

/// TTLs per artifact kind. Raw files and intermediates expire quickly;
/// the final report is kept longer.
#[derive(Debug, Deserialize, Clone)]
pub struct RetentionConfig {
    #[serde(default = "default_ephemeral_ttl_secs")]
    pub ephemeral_ttl_secs: i64,
    #[serde(default = "default_report_ttl_secs")]
    pub report_ttl_secs: i64,
}

impl Default for RetentionConfig {
    fn default() -> Self {
        Self {
            ephemeral_ttl_secs: default_ephemeral_ttl_secs(),
            report_ttl_secs: default_report_ttl_secs(),
        }
    }
}

fn default_ephemeral_ttl_secs() -> i64 {
    24 * 60 * 60
}
fn default_report_ttl_secs() -> i64 {
    7 * 24 * 60 * 60
}

pub fn load_config(path: &Path) -> Result<Config> {
    let content = std::fs::read_to_string(path)
        .with_context(|| format!("Failed to read config file: {}", path.display()))?;

    let config: Config = toml::from_str(&content).with_context(|| "Failed to parse config file")?;

    if config.analysis.gap_threshold_hours < 1 {
        anyhow::bail!("analysis.gap_threshold_hours must be >= 1");
    }
    if config.analysis.veto_cutoff > 100 {
        anyhow::bail!("analysis.veto_cutoff must be in [0, 100]");
    }
    if config.worker.concurrency == 0 {
        anyhow::bail!("worker.concurrency must be >= 1");
    }

    if config.reasoning.is_enabled() && config.reasoning.model.is_none() {
        anyhow::bail!(
            "reasoning.model must be specified when provider is '{}'",
            config.reasoning.provider
        );
    }

    match config.reasoning.provider.as_str() {
        "disabled" | "openai" | "ollama" => {}
        other => anyhow::bail!(
            "Unknown reasoning provider: '{}'. Must be disabled, openai, or ollama.",
            other
        ),
    }

    Ok(config)
}

impl Config {
    /// Minimal config pointed at a database path. Used by tests and by
    /// commands that do not need the full file.
    pub fn for_db(path: PathBuf) -> Self {
        Self {
            db: DbConfig { path },
            analysis: AnalysisConfig::default(),
            reasoning: ReasoningConfig::default(),
            worker: WorkerConfig::default(),
            retention: RetentionConfig::default(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_match_observed_thresholds() {
        let a = AnalysisConfig::default();
        assert_eq!(a.dedup_window_secs, 300);
        assert_eq!(a.gap_threshold_hours, 48);
        assert_eq!(a.veto_cutoff, 70);
        assert_eq!(a.min_evidence_instances, 2);
        assert_eq!(a.min_deep_messages, 50);
    }

    #[test]
    fn parse_minimal_config() {
        let cfg: Config = toml::from_str("[db]\npath = \"/tmp/chs.sqlite\"\n").unwrap();
        assert_eq!(cfg.reasoning.provider, "disabled");
        assert_eq!(cfg.worker.concurrency, 5);
        assert_eq!(cfg.retention.report_ttl_secs, 7 * 24 * 60 * 60);
    }

    #[test]
    fn enabled_provider_requires_model() {
        let toml_str = "[db]\npath = \"/tmp/chs.sqlite\"\n[reasoning]\nprovider = \"openai\"\n";
        let tmp = std::env::temp_dir().join("chs-config-test.toml");
        std::fs::write(&tmp, toml_str).unwrap();
        let err = load_config(&tmp).unwrap_err();
        assert!(err.to_string().contains("reasoning.model"));
    }
}
