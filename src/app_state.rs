// =============================================================================
// Central Application State — Meridian Advisor Relay
// =============================================================================
//
// The single source of truth for the relay, shared across all per-event
// tasks via `Arc<AppState>`.
//
// Thread safety:
//   - The ledger sits behind one parking_lot::Mutex so that risk-gate
//     evaluation and the subsequent append form a single critical section.
//     No await ever happens while the ledger is held.
//   - Chat memory manages its own interior RwLock.
//   - Config is read-mostly behind an RwLock.
// =============================================================================

use parking_lot::{Mutex, RwLock};

use crate::ai::AiClient;
use crate::ingest::ChatMemory;
use crate::ledger::Ledger;
use crate::risk::RiskGate;
use crate::runtime_config::RuntimeConfig;
use crate::webhook::messenger::MessengerClient;

/// Secrets pulled from the environment at startup; never persisted.
pub struct Secrets {
    /// Channel secret used for webhook signature verification.
    pub channel_secret: String,
    /// Channel access token for the reply/content endpoints.
    pub channel_token: String,
    /// AI backend API key.
    pub ai_api_key: String,
}

impl Secrets {
    /// Read all secrets from the environment. Missing variables become
    /// empty strings: the signature check then rejects all webhook traffic
    /// and the AI call fails, both loudly, rather than panicking at boot.
    pub fn from_env() -> Self {
        Self {
            channel_secret: std::env::var("MERIDIAN_CHANNEL_SECRET").unwrap_or_default(),
            channel_token: std::env::var("MERIDIAN_CHANNEL_TOKEN").unwrap_or_default(),
            ai_api_key: std::env::var("MERIDIAN_AI_API_KEY").unwrap_or_default(),
        }
    }
}

/// Central application state shared across all async tasks.
pub struct AppState {
    // ── Configuration ───────────────────────────────────────────────────
    pub runtime_config: RwLock<RuntimeConfig>,

    // ── Core subsystems ─────────────────────────────────────────────────
    /// Decision ledger. Lock scope covers gate-evaluate-then-append.
    pub ledger: Mutex<Ledger>,
    pub risk_gate: RiskGate,
    pub chat_memory: ChatMemory,

    // ── External collaborators ──────────────────────────────────────────
    pub ai: AiClient,
    pub messenger: MessengerClient,
    pub channel_secret: String,

    // ── Timing ──────────────────────────────────────────────────────────
    /// Instant when the relay was started. Used for uptime reporting.
    pub start_time: std::time::Instant,
}

impl AppState {
    /// Construct the full state from configuration and secrets. Opens (or
    /// creates) the ledger file as a side effect.
    pub fn new(config: RuntimeConfig, secrets: Secrets) -> Self {
        let ledger = Ledger::open(&config.ledger_path, config.rolling_window);
        let risk_gate = RiskGate::new(config.max_consecutive_losses, config.daily_stop_r);
        let chat_memory = ChatMemory::new(config.chat_memory_cap, config.chat_memory_max_users);
        let ai = AiClient::new(secrets.ai_api_key, config.ai_model.clone());
        let messenger = MessengerClient::new(secrets.channel_token);

        Self {
            runtime_config: RwLock::new(config),
            ledger: Mutex::new(ledger),
            risk_gate,
            chat_memory,
            ai,
            messenger,
            channel_secret: secrets.channel_secret,
            start_time: std::time::Instant::now(),
        }
    }
}
