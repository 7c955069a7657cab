use std::fmt;
use std::path::{Path, PathBuf};
use std::str::FromStr;

use serde::{Deserialize, Serialize};
use structeval_types::PromptingMethod;

use crate::error::{Error, Result};

/// Everything one `run` needs. Passed explicitly; there is no global model
/// connection.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RunConfig {
    pub task: String,
    pub model: ModelConfig,
    /// Judge used by tasks scored against a reference answer.
    #[serde(default)]
    pub judge: Option<ModelConfig>,
    pub data: DataConfig,
    #[serde(default = "default_methods")]
    pub methods: Vec<PromptingMethod>,
    /// One record is produced per (method, variant); `true` asks the
    /// provider for schema-constrained decoding.
    #[serde(default = "default_structured_variants")]
    pub structured_variants: Vec<bool>,
    #[serde(default = "default_concurrency")]
    pub concurrency: usize,
    #[serde(default = "default_timeout_secs")]
    pub timeout_secs: u64,
    #[serde(default = "default_save_dir")]
    pub save_dir: PathBuf,
    #[serde(default)]
    pub trial: Option<String>,
}

fn default_methods() -> Vec<PromptingMethod> {
    PromptingMethod::ALL.to_vec()
}

fn default_structured_variants() -> Vec<bool> {
    vec![false]
}

fn default_concurrency() -> usize {
    8
}

fn default_timeout_secs() -> u64 {
    120
}

fn default_save_dir() -> PathBuf {
    PathBuf::from("results")
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DataConfig {
    pub path: PathBuf,
    /// JSON map of category name to `{ "category_description": ... }`, for
    /// classification tasks.
    #[serde(default)]
    pub categories: Option<PathBuf>,
    /// Only the first `limit` items are used.
    #[serde(default)]
    pub limit: Option<usize>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Provider {
    Ollama,
    #[serde(rename = "openai")]
    OpenAi,
    Anthropic,
}

impl Provider {
    pub fn as_str(&self) -> &'static str {
        match self {
            Provider::Ollama => "ollama",
            Provider::OpenAi => "openai",
            Provider::Anthropic => "anthropic",
        }
    }

    pub fn default_base_url(&self) -> &'static str {
        match self {
            Provider::Ollama => "http://localhost:11434",
            Provider::OpenAi => "https://api.openai.com/v1",
            Provider::Anthropic => "https://api.anthropic.com/v1",
        }
    }

    pub fn default_api_key_env(&self) -> Option<&'static str> {
        match self {
            Provider::Ollama => None,
            Provider::OpenAi => Some("OPENAI_API_KEY"),
            Provider::Anthropic => Some("ANTHROPIC_API_KEY"),
        }
    }
}

impl fmt::Display for Provider {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Provider {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        match s.to_ascii_lowercase().as_str() {
            "ollama" => Ok(Provider::Ollama),
            "openai" => Ok(Provider::OpenAi),
            "anthropic" => Ok(Provider::Anthropic),
            other => Err(Error::Config(format!(
                "unknown provider '{other}' (expected ollama, openai or anthropic)"
            ))),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ModelConfig {
    pub provider: Provider,
    pub name: String,
    #[serde(default)]
    pub base_url: Option<String>,
    /// Environment variable holding the API key.
    #[serde(default)]
    pub api_key_env: Option<String>,
    #[serde(default)]
    pub temperature: f32,
    #[serde(default = "default_max_tokens")]
    pub max_tokens: u32,
}

fn default_max_tokens() -> u32 {
    2048
}

impl ModelConfig {
    pub fn new(provider: Provider, name: impl Into<String>) -> Self {
        Self {
            provider,
            name: name.into(),
            base_url: None,
            api_key_env: None,
            temperature: 0.0,
            max_tokens: default_max_tokens(),
        }
    }

    pub fn base_url(&self) -> &str {
        self.base_url
            .as_deref()
            .unwrap_or_else(|| self.provider.default_base_url())
            .trim_end_matches('/')
    }

    /// Reads the API key from the environment, if this provider needs one.
    pub fn api_key(&self) -> Result<Option<String>> {
        let var = match self.api_key_env.as_deref().or(self.provider.default_api_key_env()) {
            Some(var) => var,
            None => return Ok(None),
        };
        std::env::var(var)
            .map(Some)
            .map_err(|_| Error::Config(format!("environment variable {var} is not set")))
    }
}

impl RunConfig {
    pub fn new(task: impl Into<String>, model: ModelConfig, dataset: impl Into<PathBuf>) -> Self {
        Self {
            task: task.into(),
            model,
            judge: None,
            data: DataConfig { path: dataset.into(), categories: None, limit: None },
            methods: default_methods(),
            structured_variants: default_structured_variants(),
            concurrency: default_concurrency(),
            timeout_secs: default_timeout_secs(),
            save_dir: default_save_dir(),
            trial: None,
        }
    }

    pub fn from_yaml_file(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path)?;
        let config: RunConfig = serde_yaml::from_str(&content)
            .map_err(|e| Error::Config(format!("{}: {e}", path.display())))?;
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<()> {
        if self.concurrency == 0 {
            return Err(Error::Config("concurrency must be at least 1".into()));
        }
        if self.methods.is_empty() {
            return Err(Error::Config("at least one prompting method is required".into()));
        }
        if self.structured_variants.is_empty() {
            return Err(Error::Config("at least one structured-output variant is required".into()));
        }
        Ok(())
    }
}
