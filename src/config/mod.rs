use anyhow::{anyhow, Context, Result};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use thiserror::Error;
use tracing::info;

const APP_DIR: &str = "meetingest";

/// A required setting is absent or empty.
#[derive(Debug, Error, PartialEq, Eq)]
#[error("missing required configuration: {0}")]
pub struct MissingSetting(pub &'static str);

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    pub server: ServerConfig,
    pub webhook: WebhookConfig,
    pub meeting_api: MeetingApiConfig,
    pub ai: AiConfig,
    pub sheet: SheetConfig,
    pub pipeline: PipelineConfig,
    pub database: DatabaseConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ServerConfig {
    pub host: String,
    pub port: u16,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct WebhookConfig {
    /// Platform name accepted in `/webhooks/:platform`; also stored with every meeting row.
    pub platform: String,
    /// Token used in the SHA-1 request signature.
    pub token: String,
    /// Base64 AES-256 key (43 or 44 characters).
    pub encoding_aes_key: String,
    /// Envelopes buffered for the background worker before deliveries are refused.
    pub queue_capacity: usize,
    /// Envelopes dispatched concurrently by the background worker.
    pub worker_concurrency: usize,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct MeetingApiConfig {
    pub endpoint: String,
    pub app_id: String,
    pub sdk_id: String,
    pub secret_id: String,
    pub secret_key: String,
    /// Operator used for API calls when the event carries none.
    pub default_operator_userid: Option<String>,
    pub timeout_secs: u64,
    pub transcript_page_size: usize,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct AiConfig {
    pub endpoint: String,
    pub api_key: Option<String>,
    pub model: String,
    pub system_prompt: String,
    pub max_concurrency: usize,
    pub timeout_secs: u64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct SheetConfig {
    /// Leave unset to disable the spreadsheet mirror.
    pub endpoint: Option<String>,
    pub app_token: Option<String>,
    pub meetings_table: String,
    pub participants_table: String,
    pub summaries_table: String,
    pub timeout_secs: u64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct PipelineConfig {
    pub paragraph_batch_size: usize,
    pub sentence_batch_size: usize,
    /// Seconds an unfinished transcript stays with its ingest without a
    /// committed batch before a re-delivery may take it over.
    pub ingest_lease_secs: u64,
    /// Offset applied when rendering meeting times into prompts.
    pub utc_offset_minutes: i32,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct DatabaseConfig {
    pub path: Option<PathBuf>,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: "0.0.0.0".to_string(),
            port: 8080,
        }
    }
}

impl Default for WebhookConfig {
    fn default() -> Self {
        Self {
            platform: "tencent".to_string(),
            token: String::new(),
            encoding_aes_key: String::new(),
            queue_capacity: 64,
            worker_concurrency: 4,
        }
    }
}

impl Default for MeetingApiConfig {
    fn default() -> Self {
        Self {
            endpoint: "https://api.meeting.qq.com".to_string(),
            app_id: String::new(),
            sdk_id: String::new(),
            secret_id: String::new(),
            secret_key: String::new(),
            default_operator_userid: None,
            timeout_secs: 30,
            transcript_page_size: 200,
        }
    }
}

impl Default for AiConfig {
    fn default() -> Self {
        Self {
            endpoint: "https://api.openai.com/v1".to_string(),
            api_key: None,
            model: "gpt-4o-mini".to_string(),
            system_prompt: "You write concise, personalized meeting recaps. \
                            Only use facts present in the material you are given."
                .to_string(),
            max_concurrency: 5,
            timeout_secs: 120,
        }
    }
}

impl Default for SheetConfig {
    fn default() -> Self {
        Self {
            endpoint: None,
            app_token: None,
            meetings_table: "meetings".to_string(),
            participants_table: "participants".to_string(),
            summaries_table: "participant_summaries".to_string(),
            timeout_secs: 30,
        }
    }
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            paragraph_batch_size: 15,
            sentence_batch_size: 75,
            ingest_lease_secs: 600,
            utc_offset_minutes: 8 * 60,
        }
    }
}

impl WebhookConfig {
    pub fn token(&self) -> Result<&str, MissingSetting> {
        non_empty(&self.token, "webhook.token")
    }

    pub fn encoding_aes_key(&self) -> Result<&str, MissingSetting> {
        non_empty(&self.encoding_aes_key, "webhook.encoding_aes_key")
    }
}

impl AiConfig {
    pub fn api_key(&self) -> Result<&str, MissingSetting> {
        non_empty(self.api_key.as_deref().unwrap_or_default(), "ai.api_key")
    }
}

fn non_empty<'a>(value: &'a str, name: &'static str) -> Result<&'a str, MissingSetting> {
    let trimmed = value.trim();
    if trimmed.is_empty() {
        Err(MissingSetting(name))
    } else {
        Ok(trimmed)
    }
}

impl Config {
    /// Load from `path`, or from the default location when `None`.
    /// A missing file is created with defaults.
    pub fn load(path: Option<&Path>) -> Result<Self> {
        let config_path = match path {
            Some(p) => p.to_path_buf(),
            None => Self::config_path()?,
        };

        if !config_path.exists() {
            info!(
                "Config file not found, creating default at {:?}",
                config_path
            );
            let config = Self::default();
            config.save_to(&config_path)?;
            return Ok(config);
        }

        let content =
            std::fs::read_to_string(&config_path).context("Failed to read config file")?;

        let config: Self = toml::from_str(&content).context("Failed to parse config file")?;

        info!("Loaded config from {:?}", config_path);
        Ok(config)
    }

    pub fn save_to(&self, config_path: &Path) -> Result<()> {
        if let Some(parent) = config_path.parent() {
            std::fs::create_dir_all(parent).context("Failed to create config directory")?;
        }

        let content = toml::to_string_pretty(self).context("Failed to serialize config")?;

        std::fs::write(config_path, content).context("Failed to write config file")?;

        Ok(())
    }

    pub fn database_path(&self) -> Result<PathBuf> {
        match &self.database.path {
            Some(path) => Ok(path.clone()),
            None => Ok(default_data_dir()?.join("meetingest.db")),
        }
    }

    fn config_path() -> Result<PathBuf> {
        dirs::config_dir()
            .map(|dir| dir.join(APP_DIR).join("config.toml"))
            .context("Unable to determine config directory")
    }
}

/// Platform data directory, falling back to `~/.local/share`.
fn default_data_dir() -> Result<PathBuf> {
    if let Some(dir) = dirs::data_dir() {
        return Ok(dir.join(APP_DIR));
    }
    if let Some(home) = dirs::home_dir() {
        return Ok(home.join(".local").join("share").join(APP_DIR));
    }
    Err(anyhow!("Unable to determine data directory"))
}
