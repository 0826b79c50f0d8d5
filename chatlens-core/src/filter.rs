//! Turn filtering and derived conversation subsets
//!
//! Filters always run on turns. The conversation list is derived from the
//! surviving turns and is never filtered on its own attributes.

use crate::types::{Conversation, FilterState, Turn, ALL};
use chrono::{DateTime, Duration, NaiveDate, TimeZone, Utc};
use serde::Serialize;
use std::collections::{BTreeSet, HashSet};

/// Apply the active filters to a turn set.
///
/// Predicates are AND-combined:
/// 1. range: `created_at >= now - range_days`; untimed turns always pass
/// 2. channel: exact match unless [`ALL`]
/// 3. type: exact match unless [`ALL`]
/// 4. search: case-insensitive substring of user + assistant text, or of the
///    conversation id
pub fn apply(turns: &[Turn], filter: &FilterState, now: DateTime<Utc>) -> Vec<Turn> {
    let since = filter
        .range_days
        .map(|days| now - Duration::days(i64::from(days)));
    let search = filter.search.trim().to_lowercase();

    turns
        .iter()
        .filter(|t| match (since, t.created_at) {
            (Some(since), Some(created_at)) => created_at >= since,
            _ => true,
        })
        .filter(|t| filter.channel == ALL || t.channel == filter.channel)
        .filter(|t| filter.turn_type == ALL || t.turn_type == filter.turn_type)
        .filter(|t| {
            search.is_empty()
                || t.text().to_lowercase().contains(&search)
                || t.conversation_id.to_lowercase().contains(&search)
        })
        .cloned()
        .collect()
}

/// Keep the conversations that still have at least one surviving turn.
///
/// Input order is preserved, so a list sorted by [`crate::group::group`]
/// stays sorted.
pub fn retain_conversations(conversations: &[Conversation], turns: &[Turn]) -> Vec<Conversation> {
    let allowed: HashSet<&str> = turns.iter().map(|t| t.conversation_id.as_str()).collect();
    conversations
        .iter()
        .filter(|c| allowed.contains(c.conversation_id.as_str()))
        .cloned()
        .collect()
}

/// Keep the previous selection if it survived, otherwise pick the most
/// recent conversation (the list is sorted newest first).
pub fn default_selection(previous: Option<&str>, conversations: &[Conversation]) -> Option<String> {
    if let Some(prev) = previous {
        if conversations.iter().any(|c| c.conversation_id == prev) {
            return Some(prev.to_string());
        }
    }
    conversations.first().map(|c| c.conversation_id.clone())
}

/// Outcome buckets used by the outcomes chart and its drill-down.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum OutcomeLabel {
    Success,
    Escalated,
    Lead,
    /// None of success / escalated / lead
    Other,
}

impl OutcomeLabel {
    /// Chart order
    pub const ALL: [OutcomeLabel; 4] = [
        OutcomeLabel::Success,
        OutcomeLabel::Escalated,
        OutcomeLabel::Lead,
        OutcomeLabel::Other,
    ];

    pub fn label(&self) -> &'static str {
        match self {
            OutcomeLabel::Success => "Success",
            OutcomeLabel::Escalated => "Escalated",
            OutcomeLabel::Lead => "Lead",
            OutcomeLabel::Other => "Other",
        }
    }

    /// Whether a turn falls in this bucket. Buckets overlap except `Other`.
    pub fn matches(&self, turn: &Turn) -> bool {
        match self {
            OutcomeLabel::Success => turn.success,
            OutcomeLabel::Escalated => turn.escalated,
            OutcomeLabel::Lead => turn.lead,
            OutcomeLabel::Other => turn.is_other_outcome(),
        }
    }
}

impl std::str::FromStr for OutcomeLabel {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        OutcomeLabel::ALL
            .into_iter()
            .find(|o| o.label().eq_ignore_ascii_case(s.trim()))
            .ok_or_else(|| format!("unknown outcome: {}", s))
    }
}

/// What a chart click selects.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DrillKey {
    /// Calendar day in the dashboard's time zone
    Day(NaiveDate),
    Topic(String),
    Outcome(OutcomeLabel),
}

impl DrillKey {
    /// Overlay title for this selection
    pub fn title(&self) -> String {
        match self {
            DrillKey::Day(day) => format!("Chats • {}", crate::format::format_day_label(*day)),
            DrillKey::Topic(topic) => format!("Topic • {}", topic),
            DrillKey::Outcome(outcome) => format!("Outcome • {}", outcome.label()),
        }
    }
}

/// Turns behind one chart element.
///
/// Day drill-downs use the same local-day bucketing as the per-day series, so
/// untimed turns never match a day.
pub fn drill_down<Tz: TimeZone>(turns: &[Turn], key: &DrillKey, tz: &Tz) -> Vec<Turn> {
    turns
        .iter()
        .filter(|t| match key {
            DrillKey::Day(day) => t
                .created_at
                .is_some_and(|ts| ts.with_timezone(tz).date_naive() == *day),
            DrillKey::Topic(topic) => &t.topic == topic,
            DrillKey::Outcome(outcome) => outcome.matches(t),
        })
        .cloned()
        .collect()
}

/// Values offered by the channel and type selectors.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct FilterOptions {
    /// [`ALL`] followed by distinct channels, sorted
    pub channels: Vec<String>,
    /// [`ALL`] followed by distinct types, sorted
    pub types: Vec<String>,
}

impl FilterOptions {
    /// Collect options from the full (unfiltered) turn set.
    pub fn from_turns(turns: &[Turn]) -> Self {
        let channels: BTreeSet<&str> = turns.iter().map(|t| t.channel.as_str()).collect();
        let types: BTreeSet<&str> = turns.iter().map(|t| t.turn_type.as_str()).collect();

        let with_all = |values: BTreeSet<&str>| -> Vec<String> {
            std::iter::once(ALL)
                .chain(values.into_iter().filter(|v| *v != ALL))
                .map(str::to_string)
                .collect()
        };

        Self {
            channels: with_all(channels),
            types: with_all(types),
        }
    }

    /// Keep a selection only if it is still offered.
    pub fn sanitize(values: &[String], selected: &str) -> String {
        if values.iter().any(|v| v == selected) {
            selected.to_string()
        } else {
            ALL.to_string()
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::group::group;
    use crate::types::{TurnMetrics, OTHER_TOPIC};
    use chrono::{TimeZone, Utc};

    fn now() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2025, 3, 31, 12, 0, 0).unwrap()
    }

    fn turn(convo: &str, days_ago: Option<i64>) -> Turn {
        Turn {
            id: None,
            event_id: None,
            conversation_id: convo.to_string(),
            created_at: days_ago.map(|d| now() - Duration::days(d)),
            channel: "web".to_string(),
            turn_type: "general".to_string(),
            topic: OTHER_TOPIC.to_string(),
            prompt_version: None,
            user_message: "Hoe laat gaan jullie open?".to_string(),
            ai_output: "Om negen uur.".to_string(),
            success: true,
            escalated: false,
            lead: false,
            reason: None,
            inferred: false,
            metrics: TurnMetrics::default(),
        }
    }

    #[test]
    fn range_keeps_recent_and_untimed_turns() {
        let mut turns: Vec<Turn> = (0..10)
            .map(|i| turn(&format!("c{i}"), Some(i * 3)))
            .collect();
        turns.push(turn("untimed", None));

        let filter = FilterState {
            range_days: Some(7),
            ..Default::default()
        };
        let ids: Vec<String> = apply(&turns, &filter, now())
            .into_iter()
            .map(|t| t.conversation_id)
            .collect();
        assert_eq!(ids, vec!["c0", "c1", "c2", "untimed"]);
    }

    #[test]
    fn unbounded_range_keeps_everything() {
        let turns = vec![turn("a", Some(400)), turn("b", None)];
        let filter = FilterState {
            range_days: None,
            ..Default::default()
        };
        assert_eq!(apply(&turns, &filter, now()).len(), 2);
    }

    #[test]
    fn channel_and_type_are_exact() {
        let mut whatsapp = turn("a", Some(1));
        whatsapp.channel = "whatsapp".to_string();
        whatsapp.turn_type = "policy".to_string();
        let turns = vec![turn("b", Some(1)), whatsapp];

        let filter = FilterState {
            channel: "whatsapp".to_string(),
            ..Default::default()
        };
        assert_eq!(apply(&turns, &filter, now()).len(), 1);

        let filter = FilterState {
            turn_type: "polic".to_string(),
            ..Default::default()
        };
        assert!(apply(&turns, &filter, now()).is_empty());
    }

    #[test]
    fn search_matches_assistant_output_and_keeps_conversation() {
        let mut target = turn("c-target", Some(1));
        target.ai_output = "Je kunt RETOURNEREN binnen 30 dagen.".to_string();
        let turns = vec![turn("c-other", Some(1)), target];

        let filter = FilterState {
            search: "retourneren".to_string(),
            ..Default::default()
        };
        let filtered = apply(&turns, &filter, now());
        assert_eq!(filtered.len(), 1);

        let convos = retain_conversations(&group(&turns), &filtered);
        assert_eq!(convos.len(), 1);
        assert_eq!(convos[0].conversation_id, "c-target");
    }

    #[test]
    fn search_matches_conversation_id() {
        let turns = vec![turn("ABC-123", Some(1)), turn("xyz", Some(1))];
        let filter = FilterState {
            search: " abc ".to_string(),
            ..Default::default()
        };
        assert_eq!(apply(&turns, &filter, now()).len(), 1);
    }

    #[test]
    fn selection_survives_or_falls_back_to_most_recent() {
        let turns = vec![turn("old", Some(5)), turn("new", Some(1))];
        let convos = group(&turns);

        assert_eq!(default_selection(Some("old"), &convos).as_deref(), Some("old"));
        assert_eq!(default_selection(Some("gone"), &convos).as_deref(), Some("new"));
        assert_eq!(default_selection(None, &convos).as_deref(), Some("new"));
        assert_eq!(default_selection(Some("old"), &[]), None);
    }

    #[test]
    fn drill_down_by_day_topic_outcome() {
        let mut failed = turn("b", Some(2));
        failed.success = false;
        failed.topic = "Shipping".to_string();
        let turns = vec![turn("a", Some(1)), failed, turn("c", None)];

        let day = (now() - Duration::days(2)).date_naive();
        assert_eq!(drill_down(&turns, &DrillKey::Day(day), &Utc).len(), 1);
        assert_eq!(
            drill_down(&turns, &DrillKey::Topic("Shipping".to_string()), &Utc).len(),
            1
        );
        assert_eq!(
            drill_down(&turns, &DrillKey::Outcome(OutcomeLabel::Other), &Utc).len(),
            1
        );
        assert_eq!(
            drill_down(&turns, &DrillKey::Outcome(OutcomeLabel::Success), &Utc).len(),
            2
        );
    }

    #[test]
    fn outcome_label_parsing() {
        assert_eq!("escalated".parse::<OutcomeLabel>(), Ok(OutcomeLabel::Escalated));
        assert!("maybe".parse::<OutcomeLabel>().is_err());
    }

    #[test]
    fn filter_options_are_sorted_and_prefixed() {
        let mut a = turn("a", Some(1));
        a.channel = "whatsapp".to_string();
        let mut b = turn("b", Some(1));
        b.turn_type = "product".to_string();
        let options = FilterOptions::from_turns(&[a, b, turn("c", None)]);
        assert_eq!(options.channels, vec!["all", "web", "whatsapp"]);
        assert_eq!(options.types, vec!["all", "general", "product"]);

        assert_eq!(FilterOptions::sanitize(&options.channels, "web"), "web");
        assert_eq!(FilterOptions::sanitize(&options.channels, "email"), "all");
    }
}
