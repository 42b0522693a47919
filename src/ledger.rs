// =============================================================================
// Decision Ledger — durable, append-only store of trade decisions
// =============================================================================
//
// Life-cycle of a record:
//   Pending  ->  Win | Loss   (exactly once, via close_latest_pending)
//
// Records are never deleted and terminal records are never re-closed. All
// aggregate statistics are recomputed in full from the persisted record set
// on every call — the ledger is small (human-paced chat traffic) and a full
// O(n) pass is auditable in a way incremental counters are not.
//
// Persistence is a single JSON array. Writes are atomic (tmp + rename). A
// corrupt file on load is renamed aside and the ledger reinitialises empty;
// losing history is loud (error!) but never fatal.
// =============================================================================

use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tracing::{error, info};
use uuid::Uuid;

use crate::types::{Applicability, Direction, OutcomeStatus, Regime};

/// Default risk unit when the advisor payload omits or mangles `risk_r`.
fn default_risk_r() -> f64 {
    1.0
}

// ---------------------------------------------------------------------------
// Record model
// ---------------------------------------------------------------------------

/// One trade recommendation pulled out of an advisor reply.
///
/// Every field carries a serde default so that older ledger files missing
/// newer fields still deserialise (forward-compatible reads). Numeric price
/// fields are `Option<f64>`: absent means "not stated", which is distinct
/// from a literal zero price.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DecisionRecord {
    /// Unique identifier (UUID v4). Assigned by the ledger on append.
    #[serde(default)]
    pub id: String,

    /// RFC 3339 UTC creation timestamp. Assigned by the ledger on append,
    /// monotonic across appends.
    #[serde(default)]
    pub created_at: String,

    /// Ticker the decision pertains to, upper-cased.
    #[serde(default)]
    pub symbol: Option<String>,

    #[serde(default)]
    pub direction: Direction,

    /// Entry price. `None` means the advisor did not state one.
    #[serde(default)]
    pub entry: Option<f64>,

    /// Stop price.
    #[serde(default)]
    pub stop: Option<f64>,

    /// Take-profit at 1R.
    #[serde(default)]
    pub tp1: Option<f64>,

    /// Take-profit at 1.5R.
    #[serde(default)]
    pub tp15: Option<f64>,

    /// Risk unit size in R. Always positive and finite; defaults to 1.
    #[serde(default = "default_risk_r")]
    pub risk_r: f64,

    /// Free-text rationale from the advisor.
    #[serde(default)]
    pub note: Option<String>,

    /// Market regime stamped by the classifier.
    #[serde(default)]
    pub regime: Regime,

    /// Whether the classifier judged the playbook applicable.
    #[serde(default)]
    pub strategy_allowed: Applicability,

    #[serde(default)]
    pub status: OutcomeStatus,

    /// RFC 3339 UTC close timestamp. Set exactly once, on resolution.
    #[serde(default)]
    pub closed_at: Option<String>,
}

impl DecisionRecord {
    /// A blank pending record with no identity. The extractor fills in the
    /// decision fields; the ledger assigns `id` and `created_at` on append,
    /// which keeps extraction deterministic.
    pub fn draft() -> Self {
        Self {
            id: String::new(),
            created_at: String::new(),
            symbol: None,
            direction: Direction::Unknown,
            entry: None,
            stop: None,
            tp1: None,
            tp15: None,
            risk_r: default_risk_r(),
            note: None,
            regime: Regime::Unknown,
            strategy_allowed: Applicability::Unknown,
            status: OutcomeStatus::Pending,
            closed_at: None,
        }
    }

    /// Signed R outcome: +risk_r for a win, -risk_r for a loss, `None` while
    /// pending.
    pub fn signed_r(&self) -> Option<f64> {
        match self.status {
            OutcomeStatus::Win => Some(self.risk_r),
            OutcomeStatus::Loss => Some(-self.risk_r),
            OutcomeStatus::Pending => None,
        }
    }

    /// Timestamp used for calendar-day grouping: the close timestamp, or the
    /// creation timestamp when close is absent.
    pub fn resolved_at(&self) -> Option<DateTime<Utc>> {
        let raw = self.closed_at.as_deref().unwrap_or(&self.created_at);
        DateTime::parse_from_rfc3339(raw)
            .ok()
            .map(|t| t.with_timezone(&Utc))
    }
}

// ---------------------------------------------------------------------------
// Derived statistics
// ---------------------------------------------------------------------------

/// Aggregate statistics derived from the terminal record set. Pending
/// records contribute only to `total_records` / `pending`.
#[derive(Debug, Clone, Serialize)]
pub struct Stats {
    pub total_records: usize,
    pub pending: usize,
    pub wins: usize,
    pub losses: usize,
    /// Win rate over terminal records, percent, two decimals.
    pub win_rate: f64,
    /// Mean signed R per terminal record, two decimals.
    pub avg_r: f64,
    /// Equity curve: running sum of signed R in chronological order.
    pub cumulative_r: Vec<f64>,
    /// Largest peak-to-trough drop on the equity curve, in R.
    pub max_drawdown: f64,
    pub max_consecutive_losses: u32,
    /// Win rate over the most recent `rolling_window` terminal records.
    pub rolling_win_rate: f64,
    pub rolling_window: usize,
    /// Signed R resolved on the current UTC calendar day.
    pub today_r: f64,
}

fn round2(x: f64) -> f64 {
    (x * 100.0).round() / 100.0
}

/// Outcome of a close request.
#[derive(Debug, Clone, PartialEq)]
pub enum CloseResult {
    Closed(DecisionRecord),
    /// No pending record exists; nothing was mutated.
    NoOpenPosition,
}

// ---------------------------------------------------------------------------
// Ledger
// ---------------------------------------------------------------------------

/// Owner of the record collection and its durable JSON file.
///
/// Not internally synchronised: the ledger is held behind a single
/// `parking_lot::Mutex` in `AppState` so that risk-gate evaluation and the
/// subsequent append form one critical section.
pub struct Ledger {
    records: Vec<DecisionRecord>,
    /// `None` means in-memory only (tests).
    path: Option<PathBuf>,
    rolling_window: usize,
}

impl Ledger {
    /// Open (or create) a ledger backed by the JSON file at `path`.
    pub fn open(path: impl Into<PathBuf>, rolling_window: usize) -> Self {
        let path = path.into();
        let records = Self::load_records(&path);
        Self {
            records,
            path: Some(path),
            rolling_window,
        }
    }

    /// An unpersisted ledger.
    pub fn in_memory(rolling_window: usize) -> Self {
        Self {
            records: Vec::new(),
            path: None,
            rolling_window,
        }
    }

    /// Read the record collection from disk. A missing file yields an empty
    /// ledger; an unparsable file is renamed aside and the ledger
    /// reinitialises empty. Data loss is logged at error level — it is an
    /// event the operator must see — but never stops the service.
    fn load_records(path: &Path) -> Vec<DecisionRecord> {
        let content = match std::fs::read_to_string(path) {
            Ok(c) => c,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                info!(path = %path.display(), "no ledger file yet — starting empty");
                return Vec::new();
            }
            Err(e) => {
                error!(path = %path.display(), error = %e, "failed to read ledger — starting empty");
                return Vec::new();
            }
        };

        match serde_json::from_str::<Vec<DecisionRecord>>(&content) {
            Ok(mut records) => {
                // Enforce the risk-unit invariant on read: positive finite,
                // else the default of 1R.
                for r in &mut records {
                    if !(r.risk_r.is_finite() && r.risk_r > 0.0) {
                        r.risk_r = default_risk_r();
                    }
                }
                info!(path = %path.display(), count = records.len(), "ledger loaded");
                records
            }
            Err(e) => {
                let aside = path.with_extension("json.corrupt");
                let renamed = std::fs::rename(path, &aside).is_ok();
                error!(
                    path = %path.display(),
                    error = %e,
                    aside = %aside.display(),
                    aside_saved = renamed,
                    "ledger file is corrupt — history lost, reinitialising empty"
                );
                Vec::new()
            }
        }
    }

    // -------------------------------------------------------------------------
    // Mutations
    // -------------------------------------------------------------------------

    /// Append a new pending record. Assigns its id and (monotonic) creation
    /// timestamp, then persists. On a persist failure the record is rolled
    /// back out of memory so the in-memory set never diverges from disk.
    pub fn append(&mut self, mut record: DecisionRecord) -> Result<DecisionRecord> {
        record.id = Uuid::new_v4().to_string();
        record.status = OutcomeStatus::Pending;
        record.closed_at = None;

        // Creation timestamps are authoritative and monotonic per append;
        // clamp against the previous record to tolerate clock steps.
        let mut ts = Utc::now();
        if let Some(prev) = self
            .records
            .last()
            .and_then(|r| DateTime::parse_from_rfc3339(&r.created_at).ok())
        {
            let prev = prev.with_timezone(&Utc);
            if prev > ts {
                ts = prev;
            }
        }
        record.created_at = ts.to_rfc3339();

        self.records.push(record);
        if let Err(e) = self.persist() {
            self.records.pop();
            return Err(e);
        }

        let stored = self.records.last().cloned().context("record vanished after push")?;
        info!(
            id = %stored.id,
            symbol = stored.symbol.as_deref().unwrap_or("-"),
            direction = %stored.direction,
            risk_r = stored.risk_r,
            "decision recorded"
        );
        Ok(stored)
    }

    /// Close the most recent pending record with a terminal outcome.
    ///
    /// Terminal records are immutable: with zero pending records this
    /// returns `NoOpenPosition` and mutates nothing. A persist failure rolls
    /// the record back to pending.
    pub fn close_latest_pending(&mut self, outcome: OutcomeStatus) -> Result<CloseResult> {
        if !outcome.is_terminal() {
            anyhow::bail!("close outcome must be win or loss");
        }

        let Some(idx) = self
            .records
            .iter()
            .rposition(|r| r.status == OutcomeStatus::Pending)
        else {
            return Ok(CloseResult::NoOpenPosition);
        };

        self.records[idx].status = outcome;
        self.records[idx].closed_at = Some(Utc::now().to_rfc3339());

        if let Err(e) = self.persist() {
            self.records[idx].status = OutcomeStatus::Pending;
            self.records[idx].closed_at = None;
            return Err(e);
        }

        let closed = self.records[idx].clone();
        info!(id = %closed.id, outcome = %outcome, "decision closed");
        Ok(CloseResult::Closed(closed))
    }

    // -------------------------------------------------------------------------
    // Reads
    // -------------------------------------------------------------------------

    /// All records, chronological.
    pub fn records(&self) -> &[DecisionRecord] {
        &self.records
    }

    /// Recompute every aggregate from scratch over terminal records in
    /// chronological order. `now` anchors the UTC "today" bucket.
    pub fn compute_stats(&self, now: DateTime<Utc>) -> Stats {
        let terminal: Vec<&DecisionRecord> = self
            .records
            .iter()
            .filter(|r| r.status.is_terminal())
            .collect();

        let wins = terminal
            .iter()
            .filter(|r| r.status == OutcomeStatus::Win)
            .count();
        let losses = terminal.len() - wins;

        let mut cumulative_r = Vec::with_capacity(terminal.len());
        let mut running = 0.0_f64;
        let mut peak = 0.0_f64;
        let mut max_drawdown = 0.0_f64;
        let mut streak = 0_u32;
        let mut max_consecutive_losses = 0_u32;

        for r in &terminal {
            // Terminal records always have a signed outcome.
            let signed = r.signed_r().unwrap_or(0.0);
            running += signed;
            cumulative_r.push(running);

            if running > peak {
                peak = running;
            }
            let dd = peak - running;
            if dd > max_drawdown {
                max_drawdown = dd;
            }

            if r.status == OutcomeStatus::Loss {
                streak += 1;
                max_consecutive_losses = max_consecutive_losses.max(streak);
            } else {
                streak = 0;
            }
        }

        let win_rate = if terminal.is_empty() {
            0.0
        } else {
            round2(wins as f64 / terminal.len() as f64 * 100.0)
        };

        let avg_r = if terminal.is_empty() {
            0.0
        } else {
            round2(running / terminal.len() as f64)
        };

        let window = terminal.len().min(self.rolling_window);
        let rolling_win_rate = if window == 0 {
            0.0
        } else {
            let tail = &terminal[terminal.len() - window..];
            let tail_wins = tail
                .iter()
                .filter(|r| r.status == OutcomeStatus::Win)
                .count();
            round2(tail_wins as f64 / window as f64 * 100.0)
        };

        let today = now.date_naive();
        let today_r = terminal
            .iter()
            .filter(|r| r.resolved_at().map(|t| t.date_naive()) == Some(today))
            .filter_map(|r| r.signed_r())
            .sum();

        Stats {
            total_records: self.records.len(),
            pending: self.records.len() - terminal.len(),
            wins,
            losses,
            win_rate,
            avg_r,
            cumulative_r,
            max_drawdown,
            max_consecutive_losses,
            rolling_win_rate,
            rolling_window: self.rolling_window,
            today_r,
        }
    }

    // -------------------------------------------------------------------------
    // Persistence
    // -------------------------------------------------------------------------

    /// Atomic write: serialise to a `.tmp` sibling, then rename over the
    /// target so a crash mid-write never leaves a half-written file.
    fn persist(&self) -> Result<()> {
        let Some(path) = &self.path else {
            return Ok(());
        };

        let content = serde_json::to_string_pretty(&self.records)
            .context("failed to serialise ledger to JSON")?;

        let tmp_path = path.with_extension("json.tmp");

        std::fs::write(&tmp_path, &content)
            .with_context(|| format!("failed to write tmp ledger to {}", tmp_path.display()))?;

        std::fs::rename(&tmp_path, path)
            .with_context(|| format!("failed to rename tmp ledger to {}", path.display()))?;

        Ok(())
    }
}

// =============================================================================
// Tests
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    fn scratch_path(tag: &str) -> PathBuf {
        std::env::temp_dir().join(format!("meridian-ledger-{tag}-{}.json", Uuid::new_v4()))
    }

    fn record_with_r(risk_r: f64) -> DecisionRecord {
        let mut r = DecisionRecord::draft();
        r.symbol = Some("BTCUSDT".to_string());
        r.risk_r = risk_r;
        r
    }

    fn seeded(outcomes: &[OutcomeStatus]) -> Ledger {
        let mut ledger = Ledger::in_memory(30);
        for outcome in outcomes {
            ledger.append(record_with_r(1.0)).unwrap();
            ledger.close_latest_pending(*outcome).unwrap();
        }
        ledger
    }

    #[test]
    fn append_assigns_identity_and_pending_status() {
        let mut ledger = Ledger::in_memory(30);
        let stored = ledger.append(record_with_r(1.0)).unwrap();
        assert!(!stored.id.is_empty());
        assert!(!stored.created_at.is_empty());
        assert_eq!(stored.status, OutcomeStatus::Pending);
        assert_eq!(stored.closed_at, None);
    }

    #[test]
    fn created_at_is_monotonic_across_appends() {
        let mut ledger = Ledger::in_memory(30);
        for _ in 0..5 {
            ledger.append(record_with_r(1.0)).unwrap();
        }
        let times: Vec<DateTime<Utc>> = ledger
            .records()
            .iter()
            .map(|r| {
                DateTime::parse_from_rfc3339(&r.created_at)
                    .unwrap()
                    .with_timezone(&Utc)
            })
            .collect();
        for pair in times.windows(2) {
            assert!(pair[1] >= pair[0]);
        }
    }

    #[test]
    fn close_without_open_mutates_nothing() {
        // Zero pending records -> NoOpenPosition, no mutation.
        let mut ledger = seeded(&[OutcomeStatus::Win, OutcomeStatus::Loss]);
        let before = ledger.records().to_vec();

        let result = ledger.close_latest_pending(OutcomeStatus::Win).unwrap();
        assert_eq!(result, CloseResult::NoOpenPosition);
        assert_eq!(ledger.records(), before.as_slice());
    }

    #[test]
    fn close_targets_most_recent_pending() {
        let mut ledger = Ledger::in_memory(30);
        let first = ledger.append(record_with_r(1.0)).unwrap();
        let second = ledger.append(record_with_r(2.0)).unwrap();

        let result = ledger.close_latest_pending(OutcomeStatus::Loss).unwrap();
        match result {
            CloseResult::Closed(r) => {
                assert_eq!(r.id, second.id);
                assert_eq!(r.status, OutcomeStatus::Loss);
                assert!(r.closed_at.is_some());
            }
            other => panic!("expected Closed, got {other:?}"),
        }
        // The earlier record is untouched.
        assert_eq!(ledger.records()[0].id, first.id);
        assert_eq!(ledger.records()[0].status, OutcomeStatus::Pending);
    }

    #[test]
    fn stats_ignore_pending_records() {
        // Appending a pending record changes no terminal-derived stat.
        let mut ledger = seeded(&[OutcomeStatus::Win, OutcomeStatus::Loss]);
        let now = Utc::now();
        let before = ledger.compute_stats(now);

        ledger.append(record_with_r(1.0)).unwrap();
        let after = ledger.compute_stats(now);

        assert_eq!(after.win_rate, before.win_rate);
        assert_eq!(after.avg_r, before.avg_r);
        assert_eq!(after.cumulative_r, before.cumulative_r);
        assert_eq!(after.max_drawdown, before.max_drawdown);
        assert_eq!(after.pending, before.pending + 1);
        assert_eq!(after.total_records, before.total_records + 1);

        // Closing it as a win moves the aggregates deterministically.
        ledger.close_latest_pending(OutcomeStatus::Win).unwrap();
        let closed = ledger.compute_stats(now);
        assert_eq!(closed.wins, before.wins + 1);
        assert_eq!(closed.win_rate, round2(2.0 / 3.0 * 100.0));
        assert_eq!(closed.cumulative_r.len(), before.cumulative_r.len() + 1);
    }

    #[test]
    fn stats_scenario_win_loss_win() {
        // [1R win, 1R loss, 1R win] -> win rate 66.67,
        // curve [1, 0, 1], max drawdown 1.
        let ledger = seeded(&[OutcomeStatus::Win, OutcomeStatus::Loss, OutcomeStatus::Win]);
        let stats = ledger.compute_stats(Utc::now());

        assert_eq!(stats.wins, 2);
        assert_eq!(stats.losses, 1);
        assert_eq!(stats.win_rate, 66.67);
        assert_eq!(stats.cumulative_r, vec![1.0, 0.0, 1.0]);
        assert_eq!(stats.max_drawdown, 1.0);
        assert_eq!(stats.max_consecutive_losses, 1);
        assert_eq!(stats.today_r, 1.0);
    }

    #[test]
    fn max_drawdown_spans_multiple_losses() {
        let ledger = seeded(&[
            OutcomeStatus::Win,
            OutcomeStatus::Win,
            OutcomeStatus::Loss,
            OutcomeStatus::Loss,
            OutcomeStatus::Loss,
            OutcomeStatus::Win,
        ]);
        let stats = ledger.compute_stats(Utc::now());
        // Curve: 1, 2, 1, 0, -1, 0 -> peak 2, trough -1.
        assert_eq!(stats.max_drawdown, 3.0);
        assert_eq!(stats.max_consecutive_losses, 3);
    }

    #[test]
    fn rolling_win_rate_uses_tail_window() {
        let mut ledger = Ledger::in_memory(2);
        for outcome in [OutcomeStatus::Loss, OutcomeStatus::Win, OutcomeStatus::Win] {
            ledger.append(record_with_r(1.0)).unwrap();
            ledger.close_latest_pending(outcome).unwrap();
        }
        let stats = ledger.compute_stats(Utc::now());
        // Overall 66.67, but the last-2 window is all wins.
        assert_eq!(stats.rolling_win_rate, 100.0);
        assert_eq!(stats.win_rate, 66.67);
    }

    #[test]
    fn empty_ledger_stats_are_zeroed() {
        let ledger = Ledger::in_memory(30);
        let stats = ledger.compute_stats(Utc::now());
        assert_eq!(stats.total_records, 0);
        assert_eq!(stats.win_rate, 0.0);
        assert_eq!(stats.avg_r, 0.0);
        assert!(stats.cumulative_r.is_empty());
        assert_eq!(stats.max_drawdown, 0.0);
    }

    #[test]
    fn persistence_roundtrip() {
        let path = scratch_path("roundtrip");

        {
            let mut ledger = Ledger::open(&path, 30);
            ledger.append(record_with_r(1.5)).unwrap();
            ledger.close_latest_pending(OutcomeStatus::Win).unwrap();
            ledger.append(record_with_r(1.0)).unwrap();
        }

        let reloaded = Ledger::open(&path, 30);
        assert_eq!(reloaded.records().len(), 2);
        assert_eq!(reloaded.records()[0].status, OutcomeStatus::Win);
        assert_eq!(reloaded.records()[0].risk_r, 1.5);
        assert_eq!(reloaded.records()[1].status, OutcomeStatus::Pending);

        let _ = std::fs::remove_file(&path);
    }

    #[test]
    fn corrupt_file_resets_to_empty() {
        // Garbage on disk -> empty collection, no fault, file set aside.
        let path = scratch_path("corrupt");
        std::fs::write(&path, "this is { not json ]").unwrap();

        let ledger = Ledger::open(&path, 30);
        assert!(ledger.records().is_empty());

        let aside = path.with_extension("json.corrupt");
        assert!(aside.exists());

        let _ = std::fs::remove_file(&path);
        let _ = std::fs::remove_file(&aside);
    }

    #[test]
    fn non_array_json_resets_to_empty() {
        let path = scratch_path("nonarray");
        std::fs::write(&path, "{\"not\": \"an array\"}").unwrap();

        let ledger = Ledger::open(&path, 30);
        assert!(ledger.records().is_empty());

        let _ = std::fs::remove_file(&path);
        let _ = std::fs::remove_file(&path.with_extension("json.corrupt"));
    }

    #[test]
    fn read_sanitises_nonpositive_risk() {
        let path = scratch_path("badrisk");
        let json = r#"[{"id":"x","created_at":"2026-01-05T10:00:00Z","status":"loss","risk_r":-2.0}]"#;
        std::fs::write(&path, json).unwrap();

        let ledger = Ledger::open(&path, 30);
        assert_eq!(ledger.records().len(), 1);
        assert_eq!(ledger.records()[0].risk_r, 1.0);

        let _ = std::fs::remove_file(&path);
    }

    #[test]
    fn close_rejects_pending_outcome() {
        let mut ledger = Ledger::in_memory(30);
        ledger.append(record_with_r(1.0)).unwrap();
        assert!(ledger.close_latest_pending(OutcomeStatus::Pending).is_err());
        assert_eq!(ledger.records()[0].status, OutcomeStatus::Pending);
    }
}
