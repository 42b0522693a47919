// =============================================================================
// Regime Classifier — strict-JSON market-regime call
// =============================================================================
//
// A second, narrowly-scoped AI call classifies the described situation into
// {range, trend, unknown} and says whether the range playbook applies. The
// reply must be strict JSON; anything unparsable fails CLOSED — regime
// unknown, strategy not allowed. The playbook is never assumed permitted
// when the classifier is uncertain.
// =============================================================================

use serde_json::Value;
use tracing::{debug, warn};

use crate::ai::{prompt::REGIME_PROMPT, AiClient};
use crate::extractor::locate_json_payload;
use crate::types::Regime;

/// Result of a classification call.
#[derive(Debug, Clone, PartialEq)]
pub struct RegimeCall {
    pub regime: Regime,
    pub strategy_allowed: bool,
    pub reason: String,
}

impl RegimeCall {
    /// The fail-closed default.
    fn unparseable() -> Self {
        Self {
            regime: Regime::Unknown,
            strategy_allowed: false,
            reason: "unparseable".to_string(),
        }
    }
}

/// Classify a described market situation. A transport failure is treated the
/// same as an unparsable reply: fail closed.
pub async fn classify(client: &AiClient, situation: &str) -> RegimeCall {
    match client.generate(REGIME_PROMPT, situation, None).await {
        Ok(reply) => parse_reply(&reply),
        Err(e) => {
            warn!(error = %e, "regime classification call failed — failing closed");
            RegimeCall::unparseable()
        }
    }
}

/// Parse the classifier's reply. `strategy_allowed` is true only when the
/// regime is `range` AND the reply did not explicitly set it false.
pub fn parse_reply(reply: &str) -> RegimeCall {
    let Some(payload) = locate_json_payload(reply) else {
        debug!("regime reply carried no JSON object");
        return RegimeCall::unparseable();
    };

    let regime = match payload.get("regime").and_then(Value::as_str) {
        Some(raw) => Regime::parse(raw),
        None => return RegimeCall::unparseable(),
    };
    if regime == Regime::Unknown {
        return RegimeCall::unparseable();
    }

    let explicit_denial = payload.get("strategy_allowed").and_then(Value::as_bool) == Some(false);
    let strategy_allowed = regime == Regime::Range && !explicit_denial;

    let reason = payload
        .get("reason")
        .and_then(Value::as_str)
        .unwrap_or("")
        .trim()
        .to_string();

    RegimeCall {
        regime,
        strategy_allowed,
        reason,
    }
}

// =============================================================================
// Tests
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn fails_closed_on_non_json() {
        // Any input that does not parse to valid strict JSON.
        for reply in [
            "",
            "the market is ranging, strategy allowed",
            "regime: range",
            "{broken json",
            "[\"range\"]",
        ] {
            let call = parse_reply(reply);
            assert_eq!(call.regime, Regime::Unknown, "reply: {reply:?}");
            assert!(!call.strategy_allowed, "reply: {reply:?}");
            assert_eq!(call.reason, "unparseable");
        }
    }

    #[test]
    fn fails_closed_on_missing_or_invalid_regime() {
        for reply in [
            "{\"strategy_allowed\": true}",
            "{\"regime\": \"volatile\", \"strategy_allowed\": true}",
            "{\"regime\": 42}",
        ] {
            let call = parse_reply(reply);
            assert_eq!(call.regime, Regime::Unknown, "reply: {reply:?}");
            assert!(!call.strategy_allowed, "reply: {reply:?}");
        }
    }

    #[test]
    fn range_without_denial_is_allowed() {
        let call = parse_reply(
            "{\"regime\": \"range\", \"strategy_allowed\": true, \"reason\": \"clear levels\"}",
        );
        assert_eq!(call.regime, Regime::Range);
        assert!(call.strategy_allowed);
        assert_eq!(call.reason, "clear levels");

        // Missing flag is not a denial when the regime is range.
        let call = parse_reply("{\"regime\": \"range\"}");
        assert!(call.strategy_allowed);
    }

    #[test]
    fn explicit_denial_wins_over_range() {
        let call = parse_reply(
            "{\"regime\": \"range\", \"strategy_allowed\": false, \"reason\": \"too tight\"}",
        );
        assert_eq!(call.regime, Regime::Range);
        assert!(!call.strategy_allowed);
    }

    #[test]
    fn trend_is_never_allowed() {
        let call = parse_reply("{\"regime\": \"trend\", \"strategy_allowed\": true}");
        assert_eq!(call.regime, Regime::Trend);
        assert!(!call.strategy_allowed);
    }

    #[test]
    fn fenced_reply_is_tolerated() {
        let call = parse_reply("```json\n{\"regime\": \"range\", \"strategy_allowed\": true}\n```");
        assert_eq!(call.regime, Regime::Range);
        assert!(call.strategy_allowed);
    }
}
