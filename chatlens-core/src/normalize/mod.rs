//! Row normalization
//!
//! Converts one heterogeneous remote row into a canonical [`Turn`].
//!
//! ## Design Principles
//!
//! 1. **Total**: every row yields exactly one Turn; nothing here fails
//! 2. **Fallback chains**: each field resolves through an ordered list of
//!    aliases, first non-empty value wins, then a documented default
//! 3. **Explicit beats inferred**: content heuristics (see [`classifier`]) are
//!    only consulted when the row carries no explicit flag
//!
//! Latency stays in milliseconds here; conversion to seconds happens in
//! [`crate::metrics`].

pub mod classifier;

pub use classifier::{ContentSignals, KeywordClassifier, OutcomeClassifier, TurnText};

use crate::types::{RawRow, Turn, TurnMetrics, OTHER_TOPIC, UNKNOWN};
use chrono::{DateTime, NaiveDateTime, Utc};
use serde_json::Value;

const CREATED_AT: &[&str] = &["created_at", "createdAt"];
const UPDATED_AT: &[&str] = &["updated_at", "updatedAt"];
const CONVERSATION_ID: &[&str] = &[
    "conversation_id",
    "conversationId",
    "session_id",
    "sessionId",
];
const USER_MESSAGE: &[&str] = &["user_message", "userMessage", "input", "question"];
const AI_OUTPUT: &[&str] = &["ai_output", "aiOutput", "output", "answer", "response"];
const CHANNEL: &[&str] = &["channel", "workspace_id"];
const PROMPT_VERSION: &[&str] = &["prompt_version", "bot_key"];
const LATENCY_MS: &[&str] = &["metrics.latency_ms", "metrics.latencyMs", "latency_ms"];
const TOKENS: &[&str] = &["metrics.tokens", "tokens"];
const TOTAL_COST: &[&str] = &[
    "metrics.total_cost",
    "metrics.cost",
    "total_cost",
    "cost",
];
const PRODUCTS: &[&str] = &["outcome.products", "products"];

const REASON_ESCALATED: &str = "Escalated to support";
const REASON_FALLBACK: &str = "Fallback response";
const REASON_NO_NEXT_STEP: &str = "No product/link/next-step";

// ============================================
// Field helpers
// ============================================

/// Render a scalar as a trimmed string; empty strings count as absent.
fn to_str(value: &Value) -> Option<String> {
    let s = match value {
        Value::String(s) => s.trim().to_string(),
        Value::Number(n) => n.to_string(),
        Value::Bool(b) => b.to_string(),
        _ => return None,
    };
    (!s.is_empty()).then_some(s)
}

/// Interpret booleans, 0/1 numbers and "true"/"false" strings.
fn to_bool(value: &Value) -> Option<bool> {
    match value {
        Value::Bool(b) => Some(*b),
        Value::Number(n) => n.as_f64().map(|v| v != 0.0),
        Value::String(s) => match s.trim().to_ascii_lowercase().as_str() {
            "true" | "1" | "yes" => Some(true),
            "false" | "0" | "no" => Some(false),
            _ => None,
        },
        _ => None,
    }
}

fn to_f64(value: &Value) -> Option<f64> {
    match value {
        Value::Number(n) => n.as_f64(),
        Value::String(s) => s.trim().parse::<f64>().ok(),
        _ => None,
    }
}

fn first<T>(row: &RawRow, paths: &[&str], convert: impl Fn(&Value) -> Option<T>) -> Option<T> {
    paths.iter().find_map(|p| row.get(p).and_then(&convert))
}

fn first_str(row: &RawRow, paths: &[&str]) -> Option<String> {
    first(row, paths, to_str)
}

/// Parse the timestamp shapes the backend is known to emit.
///
/// RFC 3339 first; Postgres `timestamptz` text and zone-less timestamps
/// (assumed UTC) as fallbacks.
pub fn parse_timestamp(raw: &str) -> Option<DateTime<Utc>> {
    let raw = raw.trim();
    if let Ok(ts) = DateTime::parse_from_rfc3339(raw) {
        return Some(ts.with_timezone(&Utc));
    }
    if let Ok(ts) = DateTime::parse_from_str(raw, "%Y-%m-%d %H:%M:%S%.f%#z") {
        return Some(ts.with_timezone(&Utc));
    }
    ["%Y-%m-%dT%H:%M:%S%.f", "%Y-%m-%d %H:%M:%S%.f"]
        .iter()
        .find_map(|fmt| NaiveDateTime::parse_from_str(raw, fmt).ok())
        .map(|naive| naive.and_utc())
}

fn first_timestamp(row: &RawRow, paths: &[&str]) -> Option<DateTime<Utc>> {
    first(row, paths, |v| v.as_str().and_then(parse_timestamp))
}

fn has_products(row: &RawRow) -> bool {
    PRODUCTS.iter().any(|p| match row.get(p) {
        Some(Value::Array(items)) => !items.is_empty(),
        _ => false,
    })
}

/// Explicit flag: top-level field first, then the nested outcome object.
fn explicit_flag(row: &RawRow, name: &str) -> Option<bool> {
    row.get(name)
        .and_then(to_bool)
        .or_else(|| row.get(&format!("outcome.{}", name)).and_then(to_bool))
}

fn explicit_text(row: &RawRow, name: &str) -> Option<String> {
    row.get(name)
        .and_then(to_str)
        .or_else(|| row.get(&format!("outcome.{}", name)).and_then(to_str))
}

fn resolve_metrics(row: &RawRow) -> TurnMetrics {
    let latency_ms = first(row, LATENCY_MS, to_f64).filter(|v| v.is_finite() && *v > 0.0);
    let tokens = first(row, TOKENS, to_f64)
        .filter(|v| v.is_finite() && *v >= 0.0)
        .map(|v| v.round() as u64)
        .unwrap_or(0);
    let total_cost = first(row, TOTAL_COST, to_f64)
        .filter(|v| v.is_finite())
        .unwrap_or(0.0);

    TurnMetrics {
        latency_ms,
        tokens,
        total_cost,
    }
}

// ============================================
// Normalizer
// ============================================

/// Converts raw rows into turns using an injected content classifier.
#[derive(Debug, Clone, Default)]
pub struct RowNormalizer<C = KeywordClassifier> {
    classifier: C,
}

impl<C: OutcomeClassifier> RowNormalizer<C> {
    /// Create a normalizer with a custom classifier.
    pub fn new(classifier: C) -> Self {
        Self { classifier }
    }

    /// Normalize a batch; exactly one Turn per row, in input order.
    pub fn normalize_rows(&self, rows: &[RawRow]) -> Vec<Turn> {
        rows.iter().map(|row| self.normalize(row)).collect()
    }

    /// Normalize one row. Never fails; missing fields resolve to defaults.
    pub fn normalize(&self, row: &RawRow) -> Turn {
        let user_message = first_str(row, USER_MESSAGE).unwrap_or_default();
        let ai_output = first_str(row, AI_OUTPUT).unwrap_or_default();
        let text = TurnText {
            user_message: &user_message,
            ai_output: &ai_output,
            has_products: has_products(row),
        };

        // Only compute heuristics when some flag is actually missing.
        let explicit_escalated = explicit_flag(row, "escalated");
        let explicit_success = explicit_flag(row, "success");
        let signals = if explicit_escalated.is_none() || explicit_success.is_none() {
            self.classifier.signals(&text)
        } else {
            ContentSignals::default()
        };

        let escalated = explicit_escalated.unwrap_or(signals.escalation_marker);
        let lead = explicit_flag(row, "lead").unwrap_or(false);
        let success = !escalated
            && explicit_success.unwrap_or(!signals.fallback && signals.success_signal);
        let inferred = explicit_escalated.is_none() || explicit_success.is_none();

        let reason = if success {
            None
        } else {
            Some(explicit_text(row, "reason").unwrap_or_else(|| {
                if escalated {
                    REASON_ESCALATED.to_string()
                } else if signals.fallback {
                    REASON_FALLBACK.to_string()
                } else {
                    REASON_NO_NEXT_STEP.to_string()
                }
            }))
        };

        let turn_type = first_str(row, &["type"]).unwrap_or_else(|| self.classifier.infer_type(&text));

        let topic = first_str(row, &["topic"]).unwrap_or_else(|| {
            if text.has_products {
                "Product".to_string()
            } else if escalated {
                "Support".to_string()
            } else {
                self.classifier
                    .keyword_topic(&text)
                    .unwrap_or_else(|| OTHER_TOPIC.to_string())
            }
        });

        let conversation_id = first_str(row, CONVERSATION_ID).unwrap_or_else(|| {
            tracing::debug!("row without conversation id, grouping under sentinel");
            UNKNOWN.to_string()
        });

        let created_at =
            first_timestamp(row, CREATED_AT).or_else(|| first_timestamp(row, UPDATED_AT));

        Turn {
            id: first_str(row, &["id"]),
            event_id: first_str(row, &["event_id", "eventId"]),
            conversation_id,
            created_at,
            channel: first_str(row, CHANNEL).unwrap_or_else(|| UNKNOWN.to_string()),
            turn_type,
            topic,
            prompt_version: first_str(row, PROMPT_VERSION),
            user_message,
            ai_output,
            success,
            escalated,
            lead,
            reason,
            inferred,
            metrics: resolve_metrics(row),
        }
    }
}

/// Normalize one row with the default keyword classifier.
pub fn normalize(row: &RawRow) -> Turn {
    RowNormalizer::<KeywordClassifier>::default().normalize(row)
}

/// Normalize a batch with the default keyword classifier.
pub fn normalize_rows(rows: &[RawRow]) -> Vec<Turn> {
    RowNormalizer::<KeywordClassifier>::default().normalize_rows(rows)
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn row(value: Value) -> RawRow {
        RawRow::from(value)
    }

    #[test]
    fn empty_row_resolves_to_defaults() {
        let turn = normalize(&RawRow::default());
        assert_eq!(turn.conversation_id, UNKNOWN);
        assert_eq!(turn.channel, UNKNOWN);
        assert_eq!(turn.turn_type, "unknown");
        assert_eq!(turn.topic, OTHER_TOPIC);
        assert!(turn.created_at.is_none());
        assert!(!turn.success && !turn.escalated && !turn.lead);
        assert_eq!(turn.reason.as_deref(), Some(REASON_NO_NEXT_STEP));
        assert!(turn.inferred);
        assert_eq!(turn.metrics, TurnMetrics::default());
    }

    #[test]
    fn explicit_escalation_forces_non_success() {
        let turn = normalize(&row(json!({
            "conversation_id": "c1",
            "success": true,
            "escalated": true
        })));
        assert!(turn.escalated);
        assert!(!turn.success);
        assert_eq!(turn.reason.as_deref(), Some(REASON_ESCALATED));
        assert!(!turn.inferred);
    }

    #[test]
    fn nested_outcome_flags_are_used() {
        let turn = normalize(&row(json!({
            "outcome": { "success": false, "escalated": false, "lead": true, "reason": "Out of stock" }
        })));
        assert!(!turn.success);
        assert!(turn.lead);
        assert_eq!(turn.reason.as_deref(), Some("Out of stock"));
    }

    #[test]
    fn top_level_flag_beats_nested() {
        let turn = normalize(&row(json!({
            "success": "true",
            "escalated": 0,
            "outcome": { "success": false }
        })));
        assert!(turn.success);
        assert!(turn.reason.is_none());
    }

    #[test]
    fn heuristic_escalation_from_contact_marker() {
        let turn = normalize(&row(json!({
            "user_message": "Mijn pakket is kapot",
            "ai_output": "Neem contact op via support@shop.nl, zie https://shop.nl/help"
        })));
        assert!(turn.escalated);
        assert!(!turn.success, "link must not override escalation");
        assert_eq!(turn.topic, "Support");
        assert!(turn.inferred);
    }

    #[test]
    fn heuristic_fallback_reason() {
        let turn = normalize(&row(json!({
            "escalated": false,
            "ai_output": "Sorry, dat kan ik niet beantwoorden."
        })));
        assert!(!turn.success);
        assert_eq!(turn.reason.as_deref(), Some(REASON_FALLBACK));
    }

    #[test]
    fn heuristic_success_from_products() {
        let turn = normalize(&row(json!({
            "escalated": false,
            "user_message": "Ik zoek een jas",
            "ai_output": "Deze past goed bij je.",
            "outcome": { "products": [{ "id": "sku_1001" }] }
        })));
        assert!(turn.success);
        assert_eq!(turn.turn_type, "product");
        assert_eq!(turn.topic, "Product");
        assert!(turn.reason.is_none());
    }

    #[test]
    fn legacy_aliases() {
        let turn = normalize(&row(json!({
            "id": 42,
            "sessionId": "s-9",
            "createdAt": "2025-03-01T10:00:00Z",
            "question": "Hoi",
            "answer": "Hallo!",
            "workspace_id": "ws-1",
            "bot_key": "v2",
            "latency_ms": "850",
            "tokens": 12.6,
            "cost": 0.0004
        })));
        assert_eq!(turn.id.as_deref(), Some("42"));
        assert_eq!(turn.conversation_id, "s-9");
        assert_eq!(turn.user_message, "Hoi");
        assert_eq!(turn.ai_output, "Hallo!");
        assert_eq!(turn.channel, "ws-1");
        assert_eq!(turn.prompt_version.as_deref(), Some("v2"));
        assert_eq!(turn.metrics.latency_ms, Some(850.0));
        assert_eq!(turn.metrics.tokens, 13);
        assert_eq!(turn.metrics.total_cost, 0.0004);
        assert!(turn.created_at.is_some());
    }

    #[test]
    fn created_at_falls_back_to_updated_at() {
        let turn = normalize(&row(json!({
            "created_at": "not a date",
            "updated_at": "2025-03-01 10:00:00+00"
        })));
        assert_eq!(
            turn.created_at,
            Some(parse_timestamp("2025-03-01T10:00:00Z").unwrap())
        );
    }

    #[test]
    fn non_positive_latency_is_unknown() {
        for latency in [json!(0), json!(-5), json!("abc"), json!(null)] {
            let turn = normalize(&row(json!({ "metrics": { "latency_ms": latency } })));
            assert_eq!(turn.metrics.latency_ms, None);
        }
    }

    #[test]
    fn malformed_tokens_and_cost_default_to_zero() {
        let turn = normalize(&row(json!({
            "metrics": { "tokens": "lots", "total_cost": "n/a" }
        })));
        assert_eq!(turn.metrics.tokens, 0);
        assert_eq!(turn.metrics.total_cost, 0.0);
    }

    #[test]
    fn parse_timestamp_shapes() {
        let expected = parse_timestamp("2025-03-01T10:00:00Z").unwrap();
        assert_eq!(parse_timestamp("2025-03-01T11:00:00+01:00"), Some(expected));
        assert_eq!(parse_timestamp("2025-03-01 10:00:00.000+00"), Some(expected));
        assert_eq!(parse_timestamp("2025-03-01T10:00:00"), Some(expected));
        assert_eq!(parse_timestamp("yesterday"), None);
    }

    #[test]
    fn custom_classifier_is_consulted() {
        struct AlwaysSuccess;
        impl OutcomeClassifier for AlwaysSuccess {
            fn signals(&self, _text: &TurnText<'_>) -> ContentSignals {
                ContentSignals {
                    success_signal: true,
                    ..Default::default()
                }
            }
            fn infer_type(&self, _text: &TurnText<'_>) -> String {
                "custom".to_string()
            }
            fn keyword_topic(&self, _text: &TurnText<'_>) -> Option<String> {
                None
            }
        }

        let normalizer = RowNormalizer::new(AlwaysSuccess);
        let turn = normalizer.normalize(&row(json!({ "ai_output": "ok" })));
        assert!(turn.success);
        assert_eq!(turn.turn_type, "custom");
    }
}
