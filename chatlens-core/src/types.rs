//! Core domain types for chatlens
//!
//! These types represent the canonical data model that every chart, table and
//! KPI is computed from.
//!
//! ## Terminology
//!
//! | Term | Definition |
//! |------|------------|
//! | **RawRow** | One JSON object as returned by the remote chat events table |
//! | **Turn** | One normalized user/assistant exchange; the unit of truth for KPIs |
//! | **Conversation** | Aggregate of all turns sharing a conversation id |
//! | **Outcome** | success / escalated / lead / reason classification |
//! | **Day skeleton** | The set of calendar days present in the per-day count series |
//!
//! Turns are the ground truth. Conversation outcomes are an OR-summary used by
//! the viewer only; KPIs are never computed from conversations.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

/// Sentinel for categorical fields (conversation id, channel, type) that could
/// not be resolved.
pub const UNKNOWN: &str = "unknown";

/// Sentinel topic when no explicit or inferred topic applies.
pub const OTHER_TOPIC: &str = "Other";

/// Filter value that disables the channel/type predicates.
pub const ALL: &str = "all";

// ============================================
// Raw rows
// ============================================

/// A raw row from the remote chat events table.
///
/// No schema is enforced: field resolution happens in
/// [`crate::normalize`], and absent or malformed fields degrade to defaults.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct RawRow(pub Map<String, Value>);

impl RawRow {
    /// Build a row from a JSON value. Non-object values produce an empty row.
    pub fn from_value(value: Value) -> Self {
        match value {
            Value::Object(map) => Self(map),
            _ => Self::default(),
        }
    }

    /// Look up a field by dotted path (e.g. `metrics.latency_ms`).
    ///
    /// JSON `null` is reported as absent.
    pub fn get(&self, path: &str) -> Option<&Value> {
        let mut parts = path.split('.');
        let mut current = self.0.get(parts.next()?)?;
        for part in parts {
            current = current.as_object()?.get(part)?;
        }
        if current.is_null() {
            None
        } else {
            Some(current)
        }
    }
}

impl From<Value> for RawRow {
    fn from(value: Value) -> Self {
        Self::from_value(value)
    }
}

// ============================================
// Turn
// ============================================

/// Per-turn usage metrics.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct TurnMetrics {
    /// Response latency in milliseconds. `None` when unknown; never zero.
    #[serde(default)]
    pub latency_ms: Option<f64>,
    /// Tokens consumed by the exchange
    #[serde(default)]
    pub tokens: u64,
    /// Cost of the exchange in USD
    #[serde(default)]
    pub total_cost: f64,
}

/// One normalized request/response exchange.
///
/// Every field is fully resolved by the time a Turn leaves the normalizer:
/// categorical fields are never empty and flags are never missing.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Turn {
    /// Row id (opaque)
    #[serde(default)]
    pub id: Option<String>,
    /// Event id (opaque)
    #[serde(default)]
    pub event_id: Option<String>,
    /// Conversation key; [`UNKNOWN`] when the row had none
    pub conversation_id: String,
    /// When the exchange happened (falls back to the row's update time)
    #[serde(default)]
    pub created_at: Option<DateTime<Utc>>,
    /// Channel (web, whatsapp, workspace id, ...)
    pub channel: String,
    /// Exchange type (product, policy, general, unknown)
    #[serde(rename = "type")]
    pub turn_type: String,
    /// Topic label used for the topics chart
    pub topic: String,
    /// Prompt / bot version that produced the answer
    #[serde(default)]
    pub prompt_version: Option<String>,
    /// What the end user asked
    #[serde(default)]
    pub user_message: String,
    /// What the bot answered
    #[serde(default)]
    pub ai_output: String,
    /// The exchange answered the question. Always false when escalated.
    pub success: bool,
    /// The exchange was handed over to human support
    pub escalated: bool,
    /// A lead was captured
    pub lead: bool,
    /// Failure/escalation explanation; `None` when successful
    #[serde(default)]
    pub reason: Option<String>,
    /// True when success or escalation was inferred from content instead of
    /// explicit flags
    #[serde(default)]
    pub inferred: bool,
    /// Usage metrics
    #[serde(default)]
    pub metrics: TurnMetrics,
}

impl Turn {
    /// Combined user + assistant text, as used by search and heuristics.
    pub fn text(&self) -> String {
        format!("{}\n{}", self.user_message, self.ai_output)
    }

    /// True when none of success / escalated / lead is set.
    pub fn is_other_outcome(&self) -> bool {
        !(self.success || self.escalated || self.lead)
    }
}

// ============================================
// Conversation
// ============================================

/// Which side of an exchange a message entry represents.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Role {
    User,
    Assistant,
}

impl Role {
    pub fn as_str(&self) -> &'static str {
        match self {
            Role::User => "user",
            Role::Assistant => "assistant",
        }
    }
}

impl std::fmt::Display for Role {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// One message entry in a conversation view.
///
/// Each entry carries its own turn's outcome and usage, so the viewer can badge
/// a single failed exchange inside an otherwise successful conversation.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ConversationMessage {
    /// Chronological position of this entry within the conversation
    pub seq: usize,
    pub role: Role,
    pub content: String,
    pub at: Option<DateTime<Utc>>,
    /// Id of the turn this entry came from
    pub turn_id: Option<String>,
    pub success: bool,
    pub escalated: bool,
    pub lead: bool,
    pub reason: Option<String>,
    pub latency_ms: Option<f64>,
    pub tokens: u64,
    pub total_cost: f64,
}

/// Conversation-level outcome: logical OR across member turns.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ConversationOutcome {
    pub success: bool,
    pub escalated: bool,
    pub lead: bool,
    /// Most recent reason reported by a member turn.
    ///
    /// Kept even when a later turn succeeds, so a successful conversation can
    /// still carry the text of an earlier failure or escalation.
    pub reason: Option<String>,
}

/// Conversation-level usage: sums across member turns.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ConversationMetrics {
    pub tokens: u64,
    pub total_cost: f64,
}

/// Aggregate of all turns sharing a conversation id.
///
/// Rebuilt wholesale on every load/refilter; there is no identity beyond the key.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Conversation {
    pub conversation_id: String,
    /// Earliest member turn
    pub created_at: Option<DateTime<Utc>>,
    /// Latest member turn
    pub updated_at: Option<DateTime<Utc>>,
    pub channel: String,
    pub topic: String,
    pub prompt_version: Option<String>,
    /// Message entries, newest first
    pub messages: Vec<ConversationMessage>,
    pub outcome: ConversationOutcome,
    pub metrics: ConversationMetrics,
    /// Number of turns folded into this conversation
    pub turn_count: usize,
}

// ============================================
// Filters and modes
// ============================================

/// Active dashboard filters. All predicates are AND-combined.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FilterState {
    /// Only keep turns from the last N days; `None` means all time
    pub range_days: Option<u32>,
    /// Exact channel, or [`ALL`]
    pub channel: String,
    /// Exact type, or [`ALL`]
    #[serde(rename = "type")]
    pub turn_type: String,
    /// Case-insensitive substring over message text and conversation id
    pub search: String,
}

impl Default for FilterState {
    fn default() -> Self {
        Self {
            range_days: Some(30),
            channel: ALL.to_string(),
            turn_type: ALL.to_string(),
            search: String::new(),
        }
    }
}

impl FilterState {
    /// Parse a range selector such as `7d`, `30`, `24h` or `all`.
    ///
    /// Returns `None` (unbounded) for `all` and anything unparseable.
    pub fn parse_range(range: &str) -> Option<u32> {
        let raw = range.trim().to_ascii_lowercase();
        if let Some(hours) = raw.strip_suffix('h') {
            let hours: u32 = hours.trim().parse().ok()?;
            return (hours > 0).then(|| hours.div_ceil(24));
        }
        let days: u32 = raw.strip_suffix('d').unwrap_or(&raw).trim().parse().ok()?;
        (days > 0).then_some(days)
    }
}

/// How the per-day latency series aggregates a day's values.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LatencyMode {
    /// Nearest-rank 95th percentile
    #[default]
    P95,
    /// Arithmetic mean
    Avg,
}

impl LatencyMode {
    pub fn as_str(&self) -> &'static str {
        match self {
            LatencyMode::P95 => "p95",
            LatencyMode::Avg => "avg",
        }
    }

    /// Chart title for this mode
    pub fn title(&self) -> &'static str {
        match self {
            LatencyMode::P95 => "Latency (p95, s)",
            LatencyMode::Avg => "Latency (avg, s)",
        }
    }
}

impl std::fmt::Display for LatencyMode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

impl std::str::FromStr for LatencyMode {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "p95" => Ok(LatencyMode::P95),
            "avg" | "average" => Ok(LatencyMode::Avg),
            _ => Err(format!("unknown latency mode: {}", s)),
        }
    }
}

// ============================================
// Provenance
// ============================================

/// Where the current working set came from.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DataSource {
    /// Fresh rows from the remote source
    Live,
    /// Snapshot from the local cache after a failed fetch
    Cached,
    /// Neither live nor cached data is available
    #[default]
    Empty,
}

impl DataSource {
    pub fn as_str(&self) -> &'static str {
        match self {
            DataSource::Live => "live",
            DataSource::Cached => "cached",
            DataSource::Empty => "empty",
        }
    }

    /// Status indicator label
    pub fn status_label(&self) -> &'static str {
        match self {
            DataSource::Live => "Connected",
            DataSource::Cached => "Disconnected (cached)",
            DataSource::Empty => "Disconnected",
        }
    }
}

impl std::fmt::Display for DataSource {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// Liveness record for the chatbot itself.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ChatbotStatus {
    pub bot_id: String,
    pub is_up: bool,
    #[serde(default)]
    pub updated_at: Option<DateTime<Utc>>,
}

/// Chatbot indicator state.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ChatbotState {
    Online,
    Offline,
    /// No status record, or the status call failed
    Disconnected,
}

impl ChatbotState {
    /// Map a best-effort status lookup to an indicator state.
    pub fn from_lookup(status: Option<&ChatbotStatus>) -> Self {
        match status {
            Some(s) if s.is_up => ChatbotState::Online,
            Some(_) => ChatbotState::Offline,
            None => ChatbotState::Disconnected,
        }
    }

    pub fn label(&self) -> &'static str {
        match self {
            ChatbotState::Online => "Online",
            ChatbotState::Offline => "Offline",
            ChatbotState::Disconnected => "Disconnected",
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn raw_row_dotted_lookup() {
        let row = RawRow::from(json!({
            "metrics": { "latency_ms": 120, "tokens": null },
            "success": true
        }));
        assert_eq!(row.get("metrics.latency_ms"), Some(&json!(120)));
        assert_eq!(row.get("metrics.tokens"), None);
        assert_eq!(row.get("metrics.cost"), None);
        assert_eq!(row.get("success.nested"), None);
        assert_eq!(row.get("success"), Some(&json!(true)));
    }

    #[test]
    fn non_object_row_is_empty() {
        let row = RawRow::from(json!([1, 2, 3]));
        assert!(row.0.is_empty());
    }

    #[test]
    fn parse_range_variants() {
        assert_eq!(FilterState::parse_range("7d"), Some(7));
        assert_eq!(FilterState::parse_range("30"), Some(30));
        assert_eq!(FilterState::parse_range(" 90 d "), Some(90));
        assert_eq!(FilterState::parse_range("24h"), Some(1));
        assert_eq!(FilterState::parse_range("all"), None);
        assert_eq!(FilterState::parse_range("0"), None);
        assert_eq!(FilterState::parse_range("soon"), None);
    }

    #[test]
    fn latency_mode_round_trip() {
        assert_eq!("p95".parse::<LatencyMode>(), Ok(LatencyMode::P95));
        assert_eq!("AVG".parse::<LatencyMode>(), Ok(LatencyMode::Avg));
        assert!("median".parse::<LatencyMode>().is_err());
        assert_eq!(LatencyMode::Avg.title(), "Latency (avg, s)");
    }

    #[test]
    fn chatbot_state_from_lookup() {
        let up = ChatbotStatus {
            bot_id: "chatbot".to_string(),
            is_up: true,
            updated_at: None,
        };
        let down = ChatbotStatus {
            is_up: false,
            ..up.clone()
        };
        assert_eq!(ChatbotState::from_lookup(Some(&up)), ChatbotState::Online);
        assert_eq!(ChatbotState::from_lookup(Some(&down)), ChatbotState::Offline);
        assert_eq!(ChatbotState::from_lookup(None), ChatbotState::Disconnected);
    }
}
