use std::path::{Path, PathBuf};
use std::time::Duration;

use anyhow::Result;
use serde::{Deserialize, Serialize};

use crate::agent::llm::ModelSettings;
use crate::selection::SelectionPolicy;
use crate::termination::{
    DEFAULT_CHANGE_MARKERS, DEFAULT_MAX_CYCLES, TerminationMode, TerminationPolicy,
};

/// Default config directory: ~/.tfcrew/
pub fn config_dir() -> PathBuf {
    dirs::home_dir()
        .unwrap_or_else(|| PathBuf::from("."))
        .join(".tfcrew")
}

/// Default config file path: ~/.tfcrew/settings.json
pub fn default_config_path() -> PathBuf {
    config_dir().join("settings.json")
}

pub const ENV_API_KEY: &str = "TFCREW_API_KEY";
pub const ENV_BASE_URL: &str = "TFCREW_BASE_URL";
pub const ENV_MODEL: &str = "TFCREW_MODEL";
pub const ENV_TERRAFORM_BIN: &str = "TFCREW_TERRAFORM_BIN";

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct AppConfig {
    #[serde(default = "default_version")]
    pub version: u32,
    #[serde(default)]
    pub backend: BackendConfig,
    #[serde(default)]
    pub terraform: TerraformConfig,
    #[serde(default)]
    pub orchestration: OrchestrationConfig,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct BackendConfig {
    #[serde(default)]
    pub api_key: String,
    #[serde(default = "default_base_url")]
    pub base_url: String,
    #[serde(default = "default_model")]
    pub model: String,
    #[serde(default = "default_max_tokens")]
    pub max_tokens: u32,
    #[serde(default = "default_temperature")]
    pub temperature: Option<f32>,
    #[serde(default = "default_top_p")]
    pub top_p: Option<f32>,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct TerraformConfig {
    #[serde(default = "default_terraform_binary")]
    pub binary: String,
    #[serde(default = "default_work_dir")]
    pub work_dir: PathBuf,
    #[serde(default = "default_timeout_ms")]
    pub timeout_ms: u64,
    #[serde(default = "default_artifact_file")]
    pub artifact_file: String,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct OrchestrationConfig {
    #[serde(default)]
    pub selection: SelectionPolicy,
    #[serde(default)]
    pub termination: TerminationMode,
    #[serde(default = "default_max_cycles")]
    pub max_cycles: usize,
    #[serde(default = "default_change_markers")]
    pub change_markers: Vec<String>,
}

fn default_version() -> u32 {
    1
}
fn default_base_url() -> String {
    "https://api.anthropic.com".to_string()
}
fn default_model() -> String {
    "claude-sonnet-4-20250514".to_string()
}
fn default_max_tokens() -> u32 {
    16384
}
fn default_temperature() -> Option<f32> {
    Some(0.7)
}
fn default_top_p() -> Option<f32> {
    Some(0.8)
}
fn default_terraform_binary() -> String {
    "terraform".to_string()
}
fn default_work_dir() -> PathBuf {
    PathBuf::from("terraform")
}
fn default_timeout_ms() -> u64 {
    120_000
}
fn default_artifact_file() -> String {
    "main.tf".to_string()
}
fn default_max_cycles() -> usize {
    DEFAULT_MAX_CYCLES
}
fn default_change_markers() -> Vec<String> {
    DEFAULT_CHANGE_MARKERS.iter().map(|s| s.to_string()).collect()
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            version: default_version(),
            backend: BackendConfig::default(),
            terraform: TerraformConfig::default(),
            orchestration: OrchestrationConfig::default(),
        }
    }
}

impl Default for BackendConfig {
    fn default() -> Self {
        Self {
            api_key: String::new(),
            base_url: default_base_url(),
            model: default_model(),
            max_tokens: default_max_tokens(),
            temperature: default_temperature(),
            top_p: default_top_p(),
        }
    }
}

impl Default for TerraformConfig {
    fn default() -> Self {
        Self {
            binary: default_terraform_binary(),
            work_dir: default_work_dir(),
            timeout_ms: default_timeout_ms(),
            artifact_file: default_artifact_file(),
        }
    }
}

impl Default for OrchestrationConfig {
    fn default() -> Self {
        Self {
            selection: SelectionPolicy::default(),
            termination: TerminationMode::default(),
            max_cycles: default_max_cycles(),
            change_markers: default_change_markers(),
        }
    }
}

impl AppConfig {
    pub fn load(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path)
            .map_err(|e| anyhow::anyhow!("Failed to read {}: {e}", path.display()))?;
        let config: AppConfig = serde_json::from_str(&content)
            .map_err(|e| anyhow::anyhow!("Failed to parse {}: {e}", path.display()))?;
        Ok(config)
    }

    /// Whether the environment alone is enough to run without a config file.
    pub fn has_required_env_vars() -> bool {
        std::env::var(ENV_API_KEY).is_ok_and(|v| !v.is_empty())
    }

    pub fn with_env_overrides(self) -> Self {
        self.with_overrides_from(|key| std::env::var(key).ok())
    }

    /// Apply overrides from `lookup`; empty values are ignored.
    pub fn with_overrides_from(mut self, lookup: impl Fn(&str) -> Option<String>) -> Self {
        let get = |key: &str| lookup(key).filter(|v| !v.is_empty());
        if let Some(v) = get(ENV_API_KEY) {
            self.backend.api_key = v;
        }
        if let Some(v) = get(ENV_BASE_URL) {
            self.backend.base_url = v;
        }
        if let Some(v) = get(ENV_MODEL) {
            self.backend.model = v;
        }
        if let Some(v) = get(ENV_TERRAFORM_BIN) {
            self.terraform.binary = v;
        }
        self
    }

    pub fn model_settings(&self) -> ModelSettings {
        ModelSettings {
            model: self.backend.model.clone(),
            max_tokens: self.backend.max_tokens,
            temperature: self.backend.temperature,
            top_p: self.backend.top_p,
        }
    }

    pub fn termination_policy(&self) -> TerminationPolicy {
        TerminationPolicy {
            mode: self.orchestration.termination,
            max_cycles: self.orchestration.max_cycles,
            change_markers: self.orchestration.change_markers.clone(),
        }
    }

    pub fn terraform_timeout(&self) -> Duration {
        Duration::from_millis(self.terraform.timeout_ms)
    }
}
