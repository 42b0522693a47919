// =============================================================================
// Shared types used across the Meridian advisor relay
// =============================================================================
//
// All enums are closed vocabularies: anything the AI emits outside the
// vocabulary normalises to `Unknown` rather than failing deserialisation.
// =============================================================================

use serde::{Deserialize, Serialize};

/// Trade direction as stated by the advisor payload.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Direction {
    Long,
    Short,
    None,
    Unknown,
}

impl Default for Direction {
    fn default() -> Self {
        Self::Unknown
    }
}

impl std::fmt::Display for Direction {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Long => write!(f, "long"),
            Self::Short => write!(f, "short"),
            Self::None => write!(f, "none"),
            Self::Unknown => write!(f, "unknown"),
        }
    }
}

impl Direction {
    /// Normalise a free-text direction to the closed vocabulary.
    pub fn parse(raw: &str) -> Self {
        match raw.trim().to_lowercase().as_str() {
            "long" | "buy" => Self::Long,
            "short" | "sell" => Self::Short,
            "none" | "flat" | "no-trade" => Self::None,
            _ => Self::Unknown,
        }
    }
}

/// Coarse market-condition classification used to gate strategy
/// applicability. `Range` is the only regime the playbook trades.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Regime {
    Range,
    Trend,
    Unknown,
}

impl Default for Regime {
    fn default() -> Self {
        Self::Unknown
    }
}

impl std::fmt::Display for Regime {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Range => write!(f, "range"),
            Self::Trend => write!(f, "trend"),
            Self::Unknown => write!(f, "unknown"),
        }
    }
}

impl Regime {
    /// Normalise a free-text regime label to the closed vocabulary.
    pub fn parse(raw: &str) -> Self {
        match raw.trim().to_lowercase().as_str() {
            "range" | "ranging" | "sideways" => Self::Range,
            "trend" | "trending" => Self::Trend,
            _ => Self::Unknown,
        }
    }
}

/// Whether the classifier judged the strategy applicable to the situation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Applicability {
    Yes,
    No,
    Unknown,
}

impl Default for Applicability {
    fn default() -> Self {
        Self::Unknown
    }
}

impl std::fmt::Display for Applicability {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Yes => write!(f, "yes"),
            Self::No => write!(f, "no"),
            Self::Unknown => write!(f, "unknown"),
        }
    }
}

/// Lifecycle status of a decision record. Created `Pending`, resolved at
/// most once to exactly one terminal status.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum OutcomeStatus {
    Pending,
    Win,
    Loss,
}

impl Default for OutcomeStatus {
    fn default() -> Self {
        Self::Pending
    }
}

impl std::fmt::Display for OutcomeStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Pending => write!(f, "pending"),
            Self::Win => write!(f, "win"),
            Self::Loss => write!(f, "loss"),
        }
    }
}

impl OutcomeStatus {
    /// Whether this status is terminal (win or loss).
    pub fn is_terminal(&self) -> bool {
        !matches!(self, Self::Pending)
    }
}

// =============================================================================
// Tests
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn direction_parse_vocabulary() {
        assert_eq!(Direction::parse("long"), Direction::Long);
        assert_eq!(Direction::parse("BUY"), Direction::Long);
        assert_eq!(Direction::parse(" short "), Direction::Short);
        assert_eq!(Direction::parse("sell"), Direction::Short);
        assert_eq!(Direction::parse("flat"), Direction::None);
        assert_eq!(Direction::parse("sideways-ish"), Direction::Unknown);
        assert_eq!(Direction::parse(""), Direction::Unknown);
    }

    #[test]
    fn regime_parse_vocabulary() {
        assert_eq!(Regime::parse("range"), Regime::Range);
        assert_eq!(Regime::parse("Sideways"), Regime::Range);
        assert_eq!(Regime::parse("TREND"), Regime::Trend);
        assert_eq!(Regime::parse("choppy"), Regime::Unknown);
    }

    #[test]
    fn status_terminality() {
        assert!(!OutcomeStatus::Pending.is_terminal());
        assert!(OutcomeStatus::Win.is_terminal());
        assert!(OutcomeStatus::Loss.is_terminal());
    }

    #[test]
    fn serde_lowercase_wire_format() {
        assert_eq!(serde_json::to_string(&Direction::Long).unwrap(), "\"long\"");
        assert_eq!(serde_json::to_string(&OutcomeStatus::Loss).unwrap(), "\"loss\"");
        let r: Regime = serde_json::from_str("\"trend\"").unwrap();
        assert_eq!(r, Regime::Trend);
    }
}
