// =============================================================================
// Decision Extractor — structured trade payload out of free-text AI replies
// =============================================================================
//
// The persona prompt instructs the advisor to end every reply with a single
// JSON object describing the decision. The model does not always comply, so
// location is best-effort, in order of preference:
//
//   1. the last fenced code block (``` or ```json),
//   2. the last non-empty line, when it is a brace-delimited object,
//   3. the last balanced-brace span anywhere in the text.
//
// A reply with no parsable payload is not an error — it was informational.
// Extraction is deterministic and never panics; identity (id, created_at)
// is assigned later by the ledger on append.
// =============================================================================

use serde_json::Value;
use tracing::debug;

use crate::ledger::DecisionRecord;
use crate::types::Direction;

/// Parse a trade decision out of a full advisor reply. Returns `None` when
/// the reply carries no payload, the payload is unparsable, or the payload
/// says `is_trade: false`.
pub fn extract(ai_text: &str) -> Option<DecisionRecord> {
    let payload = locate_json_payload(ai_text)?;

    if !payload
        .get("is_trade")
        .and_then(Value::as_bool)
        .unwrap_or(false)
    {
        debug!("payload present but not a trade decision");
        return None;
    }

    let mut record = DecisionRecord::draft();
    record.symbol = field_str(&payload, "symbol")
        .map(|s| s.trim().to_uppercase())
        .filter(|s| !s.is_empty());
    record.direction = field_str(&payload, "direction")
        .map(|s| Direction::parse(&s))
        .unwrap_or_default();
    record.entry = field_f64(&payload, "entry");
    record.stop = field_f64(&payload, "stop");
    record.tp1 = field_f64(&payload, "tp1");
    record.tp15 = field_f64(&payload, "tp15");
    record.risk_r = field_f64(&payload, "risk_r")
        .filter(|r| *r > 0.0)
        .unwrap_or(1.0);
    record.note = field_str(&payload, "note").filter(|s| !s.trim().is_empty());

    Some(record)
}

// ---------------------------------------------------------------------------
// Payload location
// ---------------------------------------------------------------------------

/// Locate and parse the JSON object payload embedded in `text`, using the
/// fence / last-line / balanced-span strategy. Shared with the regime
/// classifier, which applies the same convention to its strict-JSON reply.
pub fn locate_json_payload(text: &str) -> Option<Value> {
    if let Some(block) = last_fenced_block(text) {
        if let Some(v) = parse_object(&block) {
            return Some(v);
        }
        // The fence may wrap prose around the object.
        if let Some(v) = last_balanced_object(&block) {
            return Some(v);
        }
    }

    if let Some(line) = text.lines().rev().find(|l| !l.trim().is_empty()) {
        if let Some(v) = parse_object(line) {
            return Some(v);
        }
    }

    last_balanced_object(text)
}

/// Strict parse of a trimmed brace-delimited object.
fn parse_object(s: &str) -> Option<Value> {
    let t = s.trim();
    if !(t.starts_with('{') && t.ends_with('}')) {
        return None;
    }
    serde_json::from_str::<Value>(t).ok().filter(Value::is_object)
}

/// Content of the last fenced code block, with a leading `json` language tag
/// stripped. An unterminated trailing fence still counts as a block.
fn last_fenced_block(text: &str) -> Option<String> {
    let mut blocks = Vec::new();
    let mut inside = false;
    for part in text.split("```") {
        if inside {
            blocks.push(part);
        }
        inside = !inside;
    }

    let block = blocks.last()?;
    let mut lines = block.lines();
    let body = match lines.next() {
        Some(first) if first.trim().eq_ignore_ascii_case("json") => {
            lines.collect::<Vec<_>>().join("\n")
        }
        _ => block.to_string(),
    };
    Some(body.trim().to_string())
}

/// Scan for top-level balanced-brace spans (string-aware so braces inside
/// JSON strings do not break the depth count) and return the last span that
/// parses as an object.
fn last_balanced_object(text: &str) -> Option<Value> {
    let mut spans: Vec<(usize, usize)> = Vec::new();
    let mut depth = 0_usize;
    let mut start = 0_usize;
    let mut in_string = false;
    let mut escaped = false;

    for (i, c) in text.char_indices() {
        if in_string {
            if escaped {
                escaped = false;
            } else if c == '\\' {
                escaped = true;
            } else if c == '"' {
                in_string = false;
            }
            continue;
        }
        match c {
            '"' if depth > 0 => in_string = true,
            '{' => {
                if depth == 0 {
                    start = i;
                }
                depth += 1;
            }
            '}' => {
                if depth > 0 {
                    depth -= 1;
                    if depth == 0 {
                        spans.push((start, i + 1));
                    }
                }
            }
            _ => {}
        }
    }

    for (s, e) in spans.into_iter().rev() {
        if let Some(v) = parse_object(&text[s..e]) {
            return Some(v);
        }
    }
    None
}

// ---------------------------------------------------------------------------
// Lenient field access
// ---------------------------------------------------------------------------

/// Pull a numeric field that may arrive as a JSON number or a numeric
/// string. Non-finite and non-numeric values map to `None` — zero is a
/// meaningful price and must never stand in for "missing".
fn field_f64(obj: &Value, key: &str) -> Option<f64> {
    let v = obj.get(key)?;
    let n = if let Some(n) = v.as_f64() {
        n
    } else if let Some(s) = v.as_str() {
        s.trim().parse::<f64>().ok()?
    } else {
        return None;
    };
    n.is_finite().then_some(n)
}

fn field_str(obj: &Value, key: &str) -> Option<String> {
    obj.get(key)?.as_str().map(str::to_string)
}

// =============================================================================
// Tests
// =============================================================================
