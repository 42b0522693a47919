// =============================================================================
// Ingestion pipeline — inbound message to reply
// =============================================================================
//
// Routing: a "result ..." message closes the latest open entry; everything
// else goes to the persona AI call, then through extract -> classify ->
// risk gate -> ledger append. The gate's verdict and the subsequent append
// happen under one ledger lock so two concurrent decisions cannot both pass
// the gate before either lands.
//
// The regime classification is a second AI call and must finish before the
// lock is taken — no await happens while the ledger is held.
// =============================================================================

use std::collections::HashMap;

use chrono::{DateTime, Utc};
use parking_lot::{Mutex, RwLock};
use tracing::{error, info};

use crate::ai::prompt::{FALLBACK_REPLY, PERSONA_PROMPT};
use crate::app_state::AppState;
use crate::extractor::extract;
use crate::ledger::{CloseResult, DecisionRecord, Ledger, Stats};
use crate::outcome::{help_text, is_close_command, parse_outcome};
use crate::regime;
use crate::risk::RiskGate;
use crate::types::{Applicability, Regime};

// =============================================================================
// Chat memory
// =============================================================================

/// Bounded per-user conversation history. An explicit keyed store with a
/// trim policy, owned by the ingestion side — there is no ambient
/// process-wide map anywhere else.
pub struct ChatMemory {
    inner: RwLock<HashMap<String, UserHistory>>,
    per_user_cap: usize,
    max_users: usize,
}

struct UserHistory {
    turns: Vec<ChatTurn>,
    last_seen: DateTime<Utc>,
}

#[derive(Debug, Clone)]
struct ChatTurn {
    user_text: String,
    reply_text: String,
}

impl ChatMemory {
    pub fn new(per_user_cap: usize, max_users: usize) -> Self {
        Self {
            inner: RwLock::new(HashMap::new()),
            per_user_cap: per_user_cap.max(1),
            max_users: max_users.max(1),
        }
    }

    /// Formatted prior conversation for `user_id`, empty when none.
    pub fn context_for(&self, user_id: &str) -> String {
        let map = self.inner.read();
        let Some(history) = map.get(user_id) else {
            return String::new();
        };
        history
            .turns
            .iter()
            .map(|t| format!("User: {}\nMeridian: {}", t.user_text, t.reply_text))
            .collect::<Vec<_>>()
            .join("\n")
    }

    /// Record one exchange, trimming the user's history to the cap and
    /// evicting the least-recently-seen user when the user cap is exceeded.
    pub fn record(&self, user_id: &str, user_text: &str, reply_text: &str) {
        let mut map = self.inner.write();
        let now = Utc::now();

        let history = map.entry(user_id.to_string()).or_insert_with(|| UserHistory {
            turns: Vec::new(),
            last_seen: now,
        });
        history.last_seen = now;
        history.turns.push(ChatTurn {
            user_text: user_text.to_string(),
            reply_text: reply_text.to_string(),
        });
        while history.turns.len() > self.per_user_cap {
            history.turns.remove(0);
        }

        while map.len() > self.max_users {
            let Some(oldest) = map
                .iter()
                .min_by_key(|(_, h)| h.last_seen)
                .map(|(k, _)| k.clone())
            else {
                break;
            };
            map.remove(&oldest);
        }
    }

    #[cfg(test)]
    fn user_count(&self) -> usize {
        self.inner.read().len()
    }

    #[cfg(test)]
    fn turns_for(&self, user_id: &str) -> usize {
        self.inner.read().get(user_id).map_or(0, |h| h.turns.len())
    }
}

// =============================================================================
// Reply pipeline
// =============================================================================

/// Full handling of an inbound text message: routing, AI call, decision
/// annotation, memory update. Always returns a reply.
pub async fn respond_to_text(state: &AppState, user_id: &str, text: &str) -> String {
    if is_close_command(text) {
        return handle_close_command(&state.ledger, text);
    }

    let context = state.chat_memory.context_for(user_id);
    let prompt = if context.is_empty() {
        text.to_string()
    } else {
        format!("Earlier conversation:\n{context}\n\nNew message:\n{text}")
    };

    let ai_text = match state.ai.generate(PERSONA_PROMPT, &prompt, None).await {
        Ok(t) => t,
        Err(e) => {
            error!(error = %e, "persona AI call failed");
            return FALLBACK_REPLY.to_string();
        }
    };

    let annotation = handle_incoming_decision(state, &ai_text).await;
    state.chat_memory.record(user_id, text, &ai_text);

    compose_reply(&ai_text, &annotation)
}

/// Full handling of an inbound media message (image or audio). The binary
/// content rides inline into the persona call.
pub async fn respond_to_media(
    state: &AppState,
    user_id: &str,
    media: crate::ai::MediaPart,
    description: &str,
) -> String {
    let ai_text = match state.ai.generate(PERSONA_PROMPT, description, Some(&media)).await {
        Ok(t) => t,
        Err(e) => {
            error!(error = %e, "persona AI call failed for media");
            return FALLBACK_REPLY.to_string();
        }
    };

    let annotation = handle_incoming_decision(state, &ai_text).await;
    state
        .chat_memory
        .record(user_id, &format!("[{}]", media.mime), &ai_text);

    compose_reply(&ai_text, &annotation)
}

fn compose_reply(ai_text: &str, annotation: &str) -> String {
    if annotation.is_empty() {
        ai_text.to_string()
    } else {
        format!("{ai_text}\n\n{annotation}")
    }
}

/// Extract a decision from the AI reply, classify the regime, then run the
/// gate-and-append critical section. Returns the annotation to concatenate
/// with the AI text — empty when the reply carried no trade decision.
pub async fn handle_incoming_decision(state: &AppState, ai_text: &str) -> String {
    let Some(mut record) = extract(ai_text) else {
        return String::new();
    };

    // Classification is an AI call; it must complete before the ledger lock
    // is taken.
    let call = regime::classify(&state.ai, ai_text).await;
    record.regime = call.regime;
    record.strategy_allowed = match call.regime {
        Regime::Unknown => Applicability::Unknown,
        _ if call.strategy_allowed => Applicability::Yes,
        _ => Applicability::No,
    };

    gate_and_append(&state.risk_gate, &state.ledger, record)
}

/// Critical section: evaluate the risk gate and append in one lock scope.
pub fn gate_and_append(gate: &RiskGate, ledger: &Mutex<Ledger>, record: DecisionRecord) -> String {
    let mut ledger = ledger.lock();
    let now = Utc::now();

    let verdict = gate.evaluate(ledger.records(), now);
    if !verdict.allow {
        info!("risk gate blocked a new decision");
        return verdict
            .reason
            .unwrap_or_else(|| "Risk stop: new entries are paused.".to_string());
    }

    let caution = match record.strategy_allowed {
        Applicability::No => Some(format!(
            "Caution: regime looks like {}, which is off-playbook.",
            record.regime
        )),
        Applicability::Unknown => Some("Caution: regime could not be classified.".to_string()),
        Applicability::Yes => None,
    };

    match ledger.append(record) {
        Ok(stored) => {
            let stats = ledger.compute_stats(now);
            let mut lines = vec![format!(
                "Logged: {} {} at {}R risk.",
                stored.symbol.as_deref().unwrap_or("?"),
                stored.direction,
                stored.risk_r
            )];
            if let Some(c) = caution {
                lines.push(c);
            }
            lines.push(summary_line(&stats));
            lines.join("\n")
        }
        Err(e) => {
            error!(error = %e, "ledger append failed — decision not recorded");
            "I couldn't write this decision to the journal, so it was NOT recorded.".to_string()
        }
    }
}

/// Close the latest pending entry per the result command. Every path
/// returns a reply; only a successful close mutates state.
pub fn handle_close_command(ledger: &Mutex<Ledger>, text: &str) -> String {
    let Some(outcome) = parse_outcome(text) else {
        return help_text().to_string();
    };

    let mut ledger = ledger.lock();
    match ledger.close_latest_pending(outcome) {
        Ok(CloseResult::Closed(record)) => {
            let stats = ledger.compute_stats(Utc::now());
            format!(
                "Closed {} as {}. {}",
                record.symbol.as_deref().unwrap_or("the latest entry"),
                record.status,
                summary_line(&stats)
            )
        }
        Ok(CloseResult::NoOpenPosition) => {
            "There is no open entry to close. Log a trade first, then report its result."
                .to_string()
        }
        Err(e) => {
            error!(error = %e, "ledger close failed");
            "I couldn't update the journal just now — the entry is still open.".to_string()
        }
    }
}

/// One-line journal summary used in replies.
fn summary_line(stats: &Stats) -> String {
    format!(
        "Journal: {}W/{}L ({} pending), win rate {:.2}%, avg {:+.2}R, today {:+.1}R.",
        stats.wins, stats.losses, stats.pending, stats.win_rate, stats.avg_r, stats.today_r
    )
}

// =============================================================================
// Tests
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::OutcomeStatus;

    fn ledger_with(outcomes: &[OutcomeStatus]) -> Mutex<Ledger> {
        let mut ledger = Ledger::in_memory(30);
        for outcome in outcomes {
            ledger.append(DecisionRecord::draft()).unwrap();
            if outcome.is_terminal() {
                ledger.close_latest_pending(*outcome).unwrap();
            }
        }
        Mutex::new(ledger)
    }

    fn trade_record() -> DecisionRecord {
        let mut r = DecisionRecord::draft();
        r.symbol = Some("BTCUSDT".to_string());
        r.strategy_allowed = Applicability::Yes;
        r
    }

    #[test]
    fn gate_block_leaves_ledger_untouched() {
        let ledger = ledger_with(&[OutcomeStatus::Loss, OutcomeStatus::Loss, OutcomeStatus::Loss]);
        let gate = RiskGate::new(3, 3.0);

        let reply = gate_and_append(&gate, &ledger, trade_record());
        assert!(reply.contains("3 consecutive losses"));
        assert_eq!(ledger.lock().records().len(), 3);
    }

    #[test]
    fn allowed_decision_is_appended_and_summarised() {
        let ledger = ledger_with(&[OutcomeStatus::Win]);
        let gate = RiskGate::new(3, 3.0);

        let reply = gate_and_append(&gate, &ledger, trade_record());
        assert!(reply.contains("Logged: BTCUSDT"));
        assert!(reply.contains("Journal: 1W/0L (1 pending)"));
        assert_eq!(ledger.lock().records().len(), 2);
    }

    #[test]
    fn off_playbook_decision_carries_caution() {
        let ledger = ledger_with(&[]);
        let gate = RiskGate::new(3, 3.0);

        let mut record = trade_record();
        record.regime = Regime::Trend;
        record.strategy_allowed = Applicability::No;

        let reply = gate_and_append(&gate, &ledger, record);
        assert!(reply.contains("off-playbook"));
        // Still recorded — the gate, not the regime, decides.
        assert_eq!(ledger.lock().records().len(), 1);
    }

    #[test]
    fn close_command_happy_path() {
        let ledger = ledger_with(&[OutcomeStatus::Pending]);
        let reply = handle_close_command(&ledger, "result win");
        assert!(reply.contains("as win"));
        assert_eq!(
            ledger.lock().records()[0].status,
            OutcomeStatus::Win
        );
    }

    #[test]
    fn close_command_without_open_position() {
        let ledger = ledger_with(&[OutcomeStatus::Win]);
        let before = ledger.lock().records().to_vec();

        let reply = handle_close_command(&ledger, "result loss");
        assert!(reply.contains("no open entry"));
        assert_eq!(ledger.lock().records(), before.as_slice());
    }

    #[test]
    fn unparsable_close_command_returns_help() {
        let ledger = ledger_with(&[OutcomeStatus::Pending]);
        let reply = handle_close_command(&ledger, "result shrug");
        assert_eq!(reply, help_text());
        assert_eq!(ledger.lock().records()[0].status, OutcomeStatus::Pending);
    }

    #[test]
    fn chat_memory_trims_per_user() {
        let memory = ChatMemory::new(3, 10);
        for i in 0..5 {
            memory.record("alice", &format!("q{i}"), "a");
        }
        assert_eq!(memory.turns_for("alice"), 3);
        let context = memory.context_for("alice");
        assert!(!context.contains("q0"));
        assert!(context.contains("q4"));
    }

    #[test]
    fn chat_memory_evicts_oldest_user() {
        let memory = ChatMemory::new(5, 2);
        for user in ["alice", "bob", "carol"] {
            memory.record(user, "hi", "hello");
            // Distinct last_seen timestamps so eviction order is defined.
            std::thread::sleep(std::time::Duration::from_millis(2));
        }
        assert_eq!(memory.user_count(), 2);
        assert!(memory.context_for("carol").contains("hi"));
    }

    #[test]
    fn unknown_user_has_empty_context() {
        let memory = ChatMemory::new(5, 5);
        assert!(memory.context_for("nobody").is_empty());
    }
}
