// =============================================================================
// Outcome Resolver — mapping free-text result commands to terminal statuses
// =============================================================================
//
// A message beginning with the result keyword ("result", "/result") routes
// here instead of the AI. The remainder is scanned for win/loss synonyms.
// Text mentioning both, or neither, is ambiguous: the caller replies with a
// help message and nothing is mutated.
// =============================================================================

use crate::types::OutcomeStatus;

/// Synonyms accepted for a winning close.
const WIN_WORDS: &[&str] = &["win", "won", "w", "tp", "profit", "target", "green"];
/// Synonyms accepted for a losing close.
const LOSS_WORDS: &[&str] = &["loss", "lost", "l", "sl", "stop", "stopped", "red"];

/// Whether an inbound message is a result command at all.
pub fn is_close_command(text: &str) -> bool {
    let t = text.trim().to_lowercase();
    t == "result"
        || t.starts_with("result ")
        || t.starts_with("result:")
        || t == "/result"
        || t.starts_with("/result ")
}

/// Map a result command to a terminal status. `None` means the command was
/// ambiguous or unrecognised and the caller should reply with usage help.
pub fn parse_outcome(text: &str) -> Option<OutcomeStatus> {
    let lowered = text.trim().to_lowercase();
    let rest = lowered
        .strip_prefix("/result")
        .or_else(|| lowered.strip_prefix("result"))
        .unwrap_or(&lowered)
        .trim_start_matches(':')
        .trim();

    let mut saw_win = false;
    let mut saw_loss = false;
    for word in rest.split(|c: char| !c.is_alphanumeric()) {
        if word.is_empty() {
            continue;
        }
        if WIN_WORDS.contains(&word) {
            saw_win = true;
        }
        if LOSS_WORDS.contains(&word) {
            saw_loss = true;
        }
    }

    match (saw_win, saw_loss) {
        (true, false) => Some(OutcomeStatus::Win),
        (false, true) => Some(OutcomeStatus::Loss),
        // Both or neither: refuse to guess.
        _ => None,
    }
}

/// Usage text returned when a result command cannot be interpreted.
pub fn help_text() -> &'static str {
    "I couldn't read that result. Reply with \"result win\" or \"result loss\" \
     to close the most recent open entry."
}

// =============================================================================
// Tests
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn detects_close_commands() {
        assert!(is_close_command("result win"));
        assert!(is_close_command("  Result: loss"));
        assert!(is_close_command("/result tp"));
        assert!(is_close_command("result"));
        assert!(!is_close_command("what was the result of the meeting?"));
        assert!(!is_close_command("resulting trend"));
        assert!(!is_close_command("how is BTC looking?"));
    }

    #[test]
    fn win_synonyms() {
        for text in ["result win", "result: WON", "/result tp", "result hit target"] {
            assert_eq!(parse_outcome(text), Some(OutcomeStatus::Win), "text: {text}");
        }
    }

    #[test]
    fn loss_synonyms() {
        for text in ["result loss", "result: lost", "/result sl", "result stopped out"] {
            assert_eq!(parse_outcome(text), Some(OutcomeStatus::Loss), "text: {text}");
        }
    }

    #[test]
    fn ambiguous_or_empty_yields_none() {
        assert_eq!(parse_outcome("result win loss"), None);
        assert_eq!(parse_outcome("result"), None);
        assert_eq!(parse_outcome("result maybe"), None);
        // "stopped at target" mentions both sides.
        assert_eq!(parse_outcome("result stopped at target"), None);
    }

    #[test]
    fn single_letter_shorthand() {
        assert_eq!(parse_outcome("result w"), Some(OutcomeStatus::Win));
        assert_eq!(parse_outcome("result l"), Some(OutcomeStatus::Loss));
    }
}
