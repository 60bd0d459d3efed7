//! Configuration loaded from `~/.mailpilot/config.json`.
//!
//! Every field has a serde default so a partial (or absent) file still
//! yields a runnable config.

use std::path::PathBuf;

use serde::{Deserialize, Serialize};

use crate::error::AutomationError;

/// LLM endpoint settings for the oracle/summarizer client.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LlmConfig {
    /// Base URL of an OpenAI-format chat completions API.
    #[serde(default)]
    pub api_base: String,
    /// Model id to request.
    #[serde(default)]
    pub model: String,
    /// Environment variable holding the API key. The key itself is
    /// never written to the config file.
    #[serde(default = "default_api_key_env")]
    pub api_key_env: String,
    #[serde(default = "default_max_tokens")]
    pub max_tokens: u32,
}

fn default_api_key_env() -> String {
    "OPENAI_API_KEY".to_string()
}

fn default_max_tokens() -> u32 {
    5120
}

impl Default for LlmConfig {
    fn default() -> Self {
        Self {
            api_base: String::new(),
            model: String::new(),
            api_key_env: default_api_key_env(),
            max_tokens: default_max_tokens(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Config {
    /// Directory holding all persisted state (stores, token file).
    #[serde(default = "default_state_dir")]
    pub state_dir: PathBuf,
    /// Minutes between scheduled cycles.
    #[serde(default = "default_refresh_interval")]
    pub refresh_interval_minutes: u32,
    /// Mailbox fetch lookback in days.
    #[serde(default = "default_lookback_days")]
    pub lookback_days: u32,
    /// Cap on fetched messages per refresh.
    #[serde(default = "default_max_fetch")]
    pub max_fetch: u32,
    /// Cap on newly-evaluated emails per stage per cycle.
    #[serde(default = "default_max_per_cycle")]
    pub max_per_cycle: u32,
    #[serde(default = "default_mail_folder")]
    pub mail_folder: String,
    #[serde(default = "default_log_retention_days")]
    pub log_retention_days: u32,
    #[serde(default = "default_log_max_entries")]
    pub log_max_entries: usize,
    /// Ledger entries older than this are pruned during housekeeping.
    #[serde(default = "default_ledger_max_age_days")]
    pub ledger_max_age_days: u32,
    /// Delay before the first scheduled cycle after startup.
    #[serde(default = "default_startup_delay")]
    pub startup_delay_secs: u64,
    #[serde(default)]
    pub llm: LlmConfig,
}

fn default_state_dir() -> PathBuf {
    dirs::home_dir().unwrap_or_default().join(".mailpilot")
}

fn default_refresh_interval() -> u32 {
    10
}

fn default_lookback_days() -> u32 {
    7
}

fn default_max_fetch() -> u32 {
    50
}

fn default_max_per_cycle() -> u32 {
    20
}

fn default_mail_folder() -> String {
    "INBOX".to_string()
}

fn default_log_retention_days() -> u32 {
    30
}

fn default_log_max_entries() -> usize {
    500
}

fn default_ledger_max_age_days() -> u32 {
    30
}

fn default_startup_delay() -> u64 {
    30
}

impl Default for Config {
    fn default() -> Self {
        Self {
            state_dir: default_state_dir(),
            refresh_interval_minutes: default_refresh_interval(),
            lookback_days: default_lookback_days(),
            max_fetch: default_max_fetch(),
            max_per_cycle: default_max_per_cycle(),
            mail_folder: default_mail_folder(),
            log_retention_days: default_log_retention_days(),
            log_max_entries: default_log_max_entries(),
            ledger_max_age_days: default_ledger_max_age_days(),
            startup_delay_secs: default_startup_delay(),
            llm: LlmConfig::default(),
        }
    }
}

impl Config {
    /// Canonical config file path.
    pub fn path() -> PathBuf {
        default_state_dir().join("config.json")
    }

    /// Load the config file, falling back to defaults when absent.
    /// A present-but-invalid file is an error: silently ignoring a
    /// user's config hides misconfiguration.
    pub fn load() -> Result<Self, AutomationError> {
        Self::load_from(&Self::path())
    }

    pub fn load_from(path: &std::path::Path) -> Result<Self, AutomationError> {
        if !path.exists() {
            log::info!(
                "No config file at {}; using defaults",
                path.display()
            );
            return Ok(Self::default());
        }
        let content = std::fs::read_to_string(path)
            .map_err(|e| AutomationError::Config(format!("read {}: {}", path.display(), e)))?;
        serde_json::from_str(&content)
            .map_err(|e| AutomationError::Config(format!("parse {}: {}", path.display(), e)))
    }

    /// Fetch window derived from the lookback settings.
    pub fn fetch_window(&self) -> crate::types::FetchWindow {
        crate::types::FetchWindow {
            days: self.lookback_days,
            max_results: self.max_fetch,
        }
    }
}
