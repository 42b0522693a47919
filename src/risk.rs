// =============================================================================
// Risk Gate — two hard stops protecting the trader from tilt
// =============================================================================
//
// Stops, evaluated in order, first match wins:
//   1. Consecutive Losses — the tail of the terminal record set holds N
//      losses in a row (default 3).
//   2. Daily Loss         — signed R resolved on the current calendar day
//      has reached the configured stop (default -3R).
//
// The "day" is the UTC calendar day of a record's close timestamp (creation
// timestamp when close is absent). Host-local time is never consulted.
//
// The gate is pure: it reads the record slice and a clock, holds no state of
// its own, and is advisory with respect to the AI's free text — a block
// suppresses the ledger append, not the reply. Callers hold the ledger lock
// across evaluate-then-append so the two form one critical section.
// =============================================================================

use chrono::{DateTime, Utc};
use tracing::warn;

use crate::ledger::DecisionRecord;
use crate::types::OutcomeStatus;

/// Verdict from the gate. `reason` is present only on a block and names the
/// rule that fired with the current figure.
#[derive(Debug, Clone)]
pub struct GateVerdict {
    pub allow: bool,
    pub reason: Option<String>,
}

impl GateVerdict {
    fn allow() -> Self {
        Self {
            allow: true,
            reason: None,
        }
    }

    fn block(reason: String) -> Self {
        Self {
            allow: false,
            reason: Some(reason),
        }
    }
}

/// Configured thresholds for the two stops.
#[derive(Debug, Clone, Copy)]
pub struct RiskGate {
    /// Consecutive terminal losses at the tail that trigger a block.
    max_consecutive_losses: u32,
    /// Daily loss magnitude in R that triggers a block (3.0 means block at
    /// -3R or worse).
    daily_stop_r: f64,
}

impl RiskGate {
    pub fn new(max_consecutive_losses: u32, daily_stop_r: f64) -> Self {
        Self {
            max_consecutive_losses,
            daily_stop_r,
        }
    }

    /// Evaluate both stops against the record history. `now` anchors the
    /// UTC day bucket for the daily stop.
    pub fn evaluate(&self, records: &[DecisionRecord], now: DateTime<Utc>) -> GateVerdict {
        let streak = consecutive_losses(records);
        if streak >= self.max_consecutive_losses {
            let reason = format!(
                "Risk stop: {streak} consecutive losses. New entries are paused — \
                 step away and observe the market before the next setup."
            );
            warn!(streak, "consecutive-loss stop tripped");
            return GateVerdict::block(reason);
        }

        let today = daily_r(records, now);
        if today <= -self.daily_stop_r {
            let reason = format!(
                "Risk stop: {today:.1}R on the day (limit -{:.1}R, UTC). \
                 No new entries until tomorrow.",
                self.daily_stop_r
            );
            warn!(today_r = today, "daily-loss stop tripped");
            return GateVerdict::block(reason);
        }

        GateVerdict::allow()
    }
}

/// Trailing loss streak over terminal records, counted backward from the
/// most recent terminal record. Pending records do not interrupt the streak.
pub fn consecutive_losses(records: &[DecisionRecord]) -> u32 {
    let mut streak = 0;
    for record in records.iter().rev() {
        match record.status {
            OutcomeStatus::Loss => streak += 1,
            OutcomeStatus::Win => break,
            OutcomeStatus::Pending => continue,
        }
    }
    streak
}

/// Signed R resolved on the UTC calendar day of `now`, over terminal
/// records.
pub fn daily_r(records: &[DecisionRecord], now: DateTime<Utc>) -> f64 {
    let today = now.date_naive();
    records
        .iter()
        .filter(|r| r.status.is_terminal())
        .filter(|r| r.resolved_at().map(|t| t.date_naive()) == Some(today))
        .filter_map(|r| r.signed_r())
        .sum()
}

// =============================================================================
// Tests
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ledger::{CloseResult, Ledger};

    fn seeded(outcomes: &[OutcomeStatus]) -> Ledger {
        let mut ledger = Ledger::in_memory(30);
        for outcome in outcomes {
            let mut record = DecisionRecord::draft();
            record.risk_r = 1.0;
            ledger.append(record).unwrap();
            if outcome.is_terminal() {
                match ledger.close_latest_pending(*outcome).unwrap() {
                    CloseResult::Closed(_) => {}
                    other => panic!("seed close failed: {other:?}"),
                }
            }
        }
        ledger
    }

    #[test]
    fn three_losses_at_tail_block() {
        // Exactly 3 consecutive terminal losses block,
        // and the message names the streak.
        let ledger = seeded(&[OutcomeStatus::Loss, OutcomeStatus::Loss, OutcomeStatus::Loss]);
        let gate = RiskGate::new(3, 3.0);
        let verdict = gate.evaluate(ledger.records(), Utc::now());
        assert!(!verdict.allow);
        assert!(verdict.reason.as_deref().unwrap().contains("3 consecutive losses"));
    }

    #[test]
    fn win_resets_the_streak() {
        // Two losses then a win allows (absent the daily condition).
        let ledger = seeded(&[OutcomeStatus::Loss, OutcomeStatus::Loss, OutcomeStatus::Win]);
        let gate = RiskGate::new(3, 10.0);
        let verdict = gate.evaluate(ledger.records(), Utc::now());
        assert!(verdict.allow);
        assert!(verdict.reason.is_none());
    }

    #[test]
    fn streak_ignores_earlier_history() {
        // The block fires regardless of what precedes the tail.
        let ledger = seeded(&[
            OutcomeStatus::Win,
            OutcomeStatus::Win,
            OutcomeStatus::Loss,
            OutcomeStatus::Loss,
            OutcomeStatus::Loss,
        ]);
        let gate = RiskGate::new(3, 100.0);
        assert!(!gate.evaluate(ledger.records(), Utc::now()).allow);
    }

    #[test]
    fn pending_records_do_not_interrupt_streak() {
        let ledger = seeded(&[
            OutcomeStatus::Loss,
            OutcomeStatus::Loss,
            OutcomeStatus::Loss,
            OutcomeStatus::Pending,
        ]);
        assert_eq!(consecutive_losses(ledger.records()), 3);
        let gate = RiskGate::new(3, 3.0);
        assert!(!gate.evaluate(ledger.records(), Utc::now()).allow);
    }

    #[test]
    fn daily_stop_trips_at_minus_three() {
        // Three 1R losses resolved today: -3R, at the default limit.
        let ledger = seeded(&[OutcomeStatus::Loss, OutcomeStatus::Loss, OutcomeStatus::Loss]);
        let gate = RiskGate::new(10, 3.0); // streak stop out of reach
        let verdict = gate.evaluate(ledger.records(), Utc::now());
        assert!(!verdict.allow);
        assert!(verdict.reason.as_deref().unwrap().contains("-3.0R"));
    }

    #[test]
    fn daily_sum_nets_wins_against_losses() {
        let ledger = seeded(&[
            OutcomeStatus::Loss,
            OutcomeStatus::Win,
            OutcomeStatus::Loss,
            OutcomeStatus::Loss,
        ]);
        // Net today: -2R, above the -3R stop; but the tail streak is 2.
        assert_eq!(daily_r(ledger.records(), Utc::now()), -2.0);
        let gate = RiskGate::new(3, 3.0);
        assert!(gate.evaluate(ledger.records(), Utc::now()).allow);
    }

    #[test]
    fn other_days_do_not_count_toward_today() {
        let mut record = DecisionRecord::draft();
        record.created_at = "2026-01-05T10:00:00+00:00".to_string();
        record.closed_at = Some("2026-01-05T18:00:00+00:00".to_string());
        record.status = OutcomeStatus::Loss;
        record.risk_r = 5.0;

        let now = "2026-01-06T09:00:00+00:00"
            .parse::<DateTime<Utc>>()
            .unwrap();
        assert_eq!(daily_r(&[record.clone()], now), 0.0);

        // Same instant one day earlier and it counts.
        let same_day = "2026-01-05T23:00:00+00:00"
            .parse::<DateTime<Utc>>()
            .unwrap();
        assert_eq!(daily_r(&[record], same_day), -5.0);
    }

    #[test]
    fn empty_ledger_allows() {
        let gate = RiskGate::new(3, 3.0);
        let verdict = gate.evaluate(&[], Utc::now());
        assert!(verdict.allow);
    }
}
