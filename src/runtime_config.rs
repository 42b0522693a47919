// =============================================================================
// Runtime Configuration — relay settings with atomic save
// =============================================================================
//
// Every tunable lives here. Secrets (channel secret/token, AI API key) stay
// in the environment and are never written to this file.
//
// Persistence uses an atomic tmp + rename pattern to prevent corruption on
// crash. All fields carry `#[serde(default)]` so that adding new fields
// never breaks loading an older config file.
// =============================================================================

use std::path::Path;

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use tracing::info;

// =============================================================================
// Default-value helpers (required by serde `default = "..."` attribute)
// =============================================================================

fn default_bind_addr() -> String {
    "0.0.0.0:3001".to_string()
}

fn default_ledger_path() -> String {
    "ledger.json".to_string()
}

fn default_max_consecutive_losses() -> u32 {
    3
}

fn default_daily_stop_r() -> f64 {
    3.0
}

fn default_rolling_window() -> usize {
    30
}

fn default_chat_memory_cap() -> usize {
    20
}

fn default_chat_memory_max_users() -> usize {
    512
}

fn default_ai_model() -> String {
    "gemini-2.0-flash".to_string()
}

// =============================================================================
// RuntimeConfig
// =============================================================================

/// Top-level runtime configuration for the relay.
///
/// Every field has a serde default so that older JSON files missing new
/// fields will still deserialise correctly.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RuntimeConfig {
    /// Address the HTTP server binds to.
    #[serde(default = "default_bind_addr")]
    pub bind_addr: String,

    /// Path of the decision-ledger JSON file.
    #[serde(default = "default_ledger_path")]
    pub ledger_path: String,

    // --- Risk gate ----------------------------------------------------------

    /// Consecutive terminal losses at the ledger tail that block new
    /// entries.
    #[serde(default = "default_max_consecutive_losses")]
    pub max_consecutive_losses: u32,

    /// Daily loss magnitude in R that blocks new entries (3.0 blocks at
    /// -3R, UTC calendar day).
    #[serde(default = "default_daily_stop_r")]
    pub daily_stop_r: f64,

    // --- Statistics ---------------------------------------------------------

    /// Window for the rolling win rate.
    #[serde(default = "default_rolling_window")]
    pub rolling_window: usize,

    // --- Chat memory --------------------------------------------------------

    /// Retained exchanges per user.
    #[serde(default = "default_chat_memory_cap")]
    pub chat_memory_cap: usize,

    /// Retained users before least-recently-seen eviction.
    #[serde(default = "default_chat_memory_max_users")]
    pub chat_memory_max_users: usize,

    // --- AI backend ---------------------------------------------------------

    /// Generation model name.
    #[serde(default = "default_ai_model")]
    pub ai_model: String,
}

impl Default for RuntimeConfig {
    fn default() -> Self {
        Self {
            bind_addr: default_bind_addr(),
            ledger_path: default_ledger_path(),
            max_consecutive_losses: default_max_consecutive_losses(),
            daily_stop_r: default_daily_stop_r(),
            rolling_window: default_rolling_window(),
            chat_memory_cap: default_chat_memory_cap(),
            chat_memory_max_users: default_chat_memory_max_users(),
            ai_model: default_ai_model(),
        }
    }
}

impl RuntimeConfig {
    /// Load configuration from a JSON file at `path`.
    ///
    /// If the file does not exist, returns an error so the caller can fall
    /// back to defaults with a warning.
    pub fn load(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();

        let content = std::fs::read_to_string(path)
            .with_context(|| format!("failed to read runtime config from {}", path.display()))?;

        let config: Self = serde_json::from_str(&content)
            .with_context(|| format!("failed to parse runtime config from {}", path.display()))?;

        info!(
            path = %path.display(),
            bind_addr = %config.bind_addr,
            ai_model = %config.ai_model,
            "runtime config loaded"
        );

        Ok(config)
    }

    /// Persist the current configuration to `path` using an atomic write
    /// (write to `.tmp`, then rename).
    pub fn save(&self, path: impl AsRef<Path>) -> Result<()> {
        let path = path.as_ref();

        let content = serde_json::to_string_pretty(self)
            .context("failed to serialise runtime config to JSON")?;

        let tmp_path = path.with_extension("json.tmp");

        std::fs::write(&tmp_path, &content)
            .with_context(|| format!("failed to write tmp config to {}", tmp_path.display()))?;

        std::fs::rename(&tmp_path, path)
            .with_context(|| format!("failed to rename tmp config to {}", path.display()))?;

        info!(path = %path.display(), "runtime config saved (atomic)");
        Ok(())
    }
}
