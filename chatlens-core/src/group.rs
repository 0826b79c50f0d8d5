//! Conversation grouping
//!
//! Folds turns into [`Conversation`] aggregates keyed by conversation id.
//!
//! The fold runs over the turns in a canonical order (timestamp, then ids),
//! so the output does not depend on the order the rows arrived in. Grouping
//! the same turns twice, in any permutation, yields identical conversations.

use crate::types::{
    Conversation, ConversationMessage, ConversationMetrics, ConversationOutcome, Role, Turn,
    OTHER_TOPIC, UNKNOWN,
};
use std::cmp::Ordering;
use std::collections::BTreeMap;

fn cmp_latency(a: Option<f64>, b: Option<f64>) -> Ordering {
    match (a, b) {
        (Some(a), Some(b)) => a.total_cmp(&b),
        _ => a.is_some().cmp(&b.is_some()),
    }
}

/// Canonical fold order: oldest first, untimed turns last, then every other
/// field as a tie-breaker. The order is total, so turns that compare equal
/// are interchangeable.
fn canonical_order(a: &Turn, b: &Turn) -> Ordering {
    (a.created_at.is_none(), a.created_at)
        .cmp(&(b.created_at.is_none(), b.created_at))
        .then_with(|| a.event_id.cmp(&b.event_id))
        .then_with(|| a.id.cmp(&b.id))
        .then_with(|| a.conversation_id.cmp(&b.conversation_id))
        .then_with(|| a.user_message.cmp(&b.user_message))
        .then_with(|| a.ai_output.cmp(&b.ai_output))
        .then_with(|| a.channel.cmp(&b.channel))
        .then_with(|| a.turn_type.cmp(&b.turn_type))
        .then_with(|| a.topic.cmp(&b.topic))
        .then_with(|| a.reason.cmp(&b.reason))
        .then_with(|| a.prompt_version.cmp(&b.prompt_version))
        .then_with(|| {
            (a.success, a.escalated, a.lead, a.inferred)
                .cmp(&(b.success, b.escalated, b.lead, b.inferred))
        })
        .then_with(|| a.metrics.tokens.cmp(&b.metrics.tokens))
        .then_with(|| cmp_latency(a.metrics.latency_ms, b.metrics.latency_ms))
        .then_with(|| a.metrics.total_cost.total_cmp(&b.metrics.total_cost))
}

fn new_conversation(turn: &Turn) -> Conversation {
    Conversation {
        conversation_id: turn.conversation_id.clone(),
        created_at: turn.created_at,
        updated_at: turn.created_at,
        channel: turn.channel.clone(),
        topic: turn.topic.clone(),
        prompt_version: turn.prompt_version.clone(),
        messages: Vec::new(),
        outcome: ConversationOutcome::default(),
        metrics: ConversationMetrics::default(),
        turn_count: 0,
    }
}

fn message(turn: &Turn, role: Role, content: &str, seq: usize) -> ConversationMessage {
    ConversationMessage {
        seq,
        role,
        content: content.to_string(),
        at: turn.created_at,
        turn_id: turn.id.clone().or_else(|| turn.event_id.clone()),
        success: turn.success,
        escalated: turn.escalated,
        lead: turn.lead,
        reason: turn.reason.clone(),
        latency_ms: turn.metrics.latency_ms,
        tokens: turn.metrics.tokens,
        total_cost: turn.metrics.total_cost,
    }
}

fn fold_turn(convo: &mut Conversation, turn: &Turn) {
    if let Some(ts) = turn.created_at {
        convo.created_at = Some(convo.created_at.map_or(ts, |c| c.min(ts)));
        convo.updated_at = Some(convo.updated_at.map_or(ts, |u| u.max(ts)));
    }

    // Two entries per turn: the user side first, then the reply.
    let seq = convo.turn_count * 2;
    if !turn.user_message.is_empty() {
        convo
            .messages
            .push(message(turn, Role::User, &turn.user_message, seq));
    }
    if !turn.ai_output.is_empty() {
        convo
            .messages
            .push(message(turn, Role::Assistant, &turn.ai_output, seq + 1));
    }

    convo.turn_count += 1;
    convo.outcome.success |= turn.success;
    convo.outcome.escalated |= turn.escalated;
    convo.outcome.lead |= turn.lead;
    if turn.reason.is_some() {
        convo.outcome.reason = turn.reason.clone();
    }

    convo.metrics.tokens = convo.metrics.tokens.saturating_add(turn.metrics.tokens);
    if turn.metrics.total_cost.is_finite() {
        convo.metrics.total_cost += turn.metrics.total_cost;
    }

    // First value wins unless it is still the sentinel.
    if convo.channel == UNKNOWN && turn.channel != UNKNOWN {
        convo.channel = turn.channel.clone();
    }
    if convo.topic == OTHER_TOPIC && turn.topic != OTHER_TOPIC {
        convo.topic = turn.topic.clone();
    }
    if convo.prompt_version.is_none() {
        convo.prompt_version = turn.prompt_version.clone();
    }
}

/// Group turns into conversations.
///
/// Conversations are ordered by `updated_at` descending (most recent first,
/// untimed last); messages inside each conversation are ordered newest first.
/// Turns without a conversation id land in one catch-all conversation under
/// the [`UNKNOWN`] key.
pub fn group(turns: &[Turn]) -> Vec<Conversation> {
    let mut ordered: Vec<&Turn> = turns.iter().collect();
    ordered.sort_by(|a, b| canonical_order(a, b));

    let mut by_id: BTreeMap<&str, Conversation> = BTreeMap::new();
    for turn in ordered {
        let convo = by_id
            .entry(turn.conversation_id.as_str())
            .or_insert_with(|| new_conversation(turn));
        fold_turn(convo, turn);
    }

    let mut conversations: Vec<Conversation> = by_id.into_values().collect();
    for convo in &mut conversations {
        convo
            .messages
            .sort_by(|a, b| (b.at.is_some(), b.at, b.seq).cmp(&(a.at.is_some(), a.at, a.seq)));
    }

    // BTreeMap yields ids ascending; the stable sort keeps that for ties.
    conversations.sort_by(|a, b| {
        (b.updated_at.is_some(), b.updated_at).cmp(&(a.updated_at.is_some(), a.updated_at))
    });

    tracing::debug!(
        turns = turns.len(),
        conversations = conversations.len(),
        "Grouped turns into conversations"
    );

    conversations
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::TurnMetrics;
    use chrono::{DateTime, TimeZone, Utc};

    fn ts(hour: u32) -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2025, 3, 1, hour, 0, 0).unwrap()
    }

    fn turn(id: &str, convo: &str, hour: Option<u32>) -> Turn {
        Turn {
            id: Some(id.to_string()),
            event_id: None,
            conversation_id: convo.to_string(),
            created_at: hour.map(ts),
            channel: "web".to_string(),
            turn_type: "general".to_string(),
            topic: OTHER_TOPIC.to_string(),
            prompt_version: None,
            user_message: format!("question {id}"),
            ai_output: format!("answer {id}"),
            success: true,
            escalated: false,
            lead: false,
            reason: None,
            inferred: false,
            metrics: TurnMetrics {
                latency_ms: Some(500.0),
                tokens: 100,
                total_cost: 0.001,
            },
        }
    }

    #[test]
    fn folds_interval_counts_and_sums() {
        let turns = vec![
            turn("t2", "c1", Some(12)),
            turn("t1", "c1", Some(9)),
            turn("t3", "c1", Some(15)),
        ];
        let convos = group(&turns);
        assert_eq!(convos.len(), 1);

        let c = &convos[0];
        assert_eq!(c.created_at, Some(ts(9)));
        assert_eq!(c.updated_at, Some(ts(15)));
        assert_eq!(c.turn_count, 3);
        assert_eq!(c.metrics.tokens, 300);
        assert!((c.metrics.total_cost - 0.003).abs() < 1e-12);
        assert_eq!(c.messages.len(), 6);
    }

    #[test]
    fn messages_are_newest_first_with_reply_before_question() {
        let turns = vec![turn("t1", "c1", Some(9)), turn("t2", "c1", Some(10))];
        let c = &group(&turns)[0];
        let order: Vec<(Role, &str)> = c
            .messages
            .iter()
            .map(|m| (m.role, m.content.as_str()))
            .collect();
        assert_eq!(
            order,
            vec![
                (Role::Assistant, "answer t2"),
                (Role::User, "question t2"),
                (Role::Assistant, "answer t1"),
                (Role::User, "question t1"),
            ]
        );
    }

    #[test]
    fn per_message_flags_keep_the_failed_exchange_visible() {
        let mut failed = turn("t2", "c1", Some(10));
        failed.success = false;
        failed.reason = Some("No product/link/next-step".to_string());
        let turns = vec![turn("t1", "c1", Some(9)), failed];

        let c = &group(&turns)[0];
        assert!(c.outcome.success, "OR across turns");
        assert_eq!(c.outcome.reason.as_deref(), Some("No product/link/next-step"));
        let failed_entries = c.messages.iter().filter(|m| !m.success).count();
        assert_eq!(failed_entries, 2);
    }

    #[test]
    fn outcome_is_or_across_turns() {
        let mut escalated = turn("t2", "c1", Some(10));
        escalated.success = false;
        escalated.escalated = true;
        let mut lead = turn("t3", "c1", Some(11));
        lead.lead = true;

        let c = &group(&[turn("t1", "c1", Some(9)), escalated, lead])[0];
        assert!(c.outcome.success);
        assert!(c.outcome.escalated);
        assert!(c.outcome.lead);
    }

    #[test]
    fn conversations_sorted_by_recent_activity() {
        let turns = vec![
            turn("a", "old", Some(8)),
            turn("b", "new", Some(14)),
            turn("c", "mid", Some(11)),
            turn("d", "untimed", None),
        ];
        let ids: Vec<String> = group(&turns)
            .into_iter()
            .map(|c| c.conversation_id)
            .collect();
        assert_eq!(ids, vec!["new", "mid", "old", "untimed"]);
    }

    #[test]
    fn missing_conversation_id_groups_under_sentinel() {
        let turns = vec![turn("a", UNKNOWN, Some(8)), turn("b", UNKNOWN, Some(9))];
        let convos = group(&turns);
        assert_eq!(convos.len(), 1);
        assert_eq!(convos[0].conversation_id, UNKNOWN);
        assert_eq!(convos[0].turn_count, 2);
    }

    #[test]
    fn sentinel_channel_and_topic_are_filled_later() {
        let mut first = turn("t1", "c1", Some(9));
        first.channel = UNKNOWN.to_string();
        let mut second = turn("t2", "c1", Some(10));
        second.channel = "whatsapp".to_string();
        second.topic = "Shipping".to_string();
        second.prompt_version = Some("v2".to_string());
        let mut third = turn("t3", "c1", Some(11));
        third.channel = "email".to_string();
        third.topic = "Returns".to_string();

        let c = &group(&[third, first, second])[0];
        assert_eq!(c.channel, "whatsapp");
        assert_eq!(c.topic, "Shipping");
        assert_eq!(c.prompt_version.as_deref(), Some("v2"));
    }

    #[test]
    fn grouping_is_order_independent() {
        let mut turns = vec![
            turn("t1", "c1", Some(9)),
            turn("t2", "c2", Some(10)),
            turn("t3", "c1", Some(11)),
            turn("t4", "c3", None),
            turn("t5", "c2", Some(13)),
        ];
        turns[1].escalated = true;
        turns[1].success = false;
        turns[2].channel = "email".to_string();

        let expected = group(&turns);
        assert_eq!(group(&turns), expected, "idempotent");

        for rotation in 0..turns.len() {
            let mut permuted = turns.clone();
            permuted.rotate_left(rotation);
            assert_eq!(group(&permuted), expected);
            permuted.reverse();
            assert_eq!(group(&permuted), expected);
        }
    }

    #[test]
    fn fully_tied_turns_resolve_the_same_in_any_order() {
        let untimed = |reason: &str| {
            let mut t = turn("x", "c1", None);
            t.id = None;
            t.user_message = String::new();
            t.ai_output = String::new();
            t.success = false;
            t.reason = Some(reason.to_string());
            t
        };
        let a = untimed("Out of stock");
        let b = untimed("Missing price");
        let forward = group(&[a.clone(), b.clone()]);
        let reversed = group(&[b, a]);
        assert_eq!(forward, reversed);
        assert_eq!(forward[0].outcome.reason.as_deref(), Some("Out of stock"));

        let mut shipping = turn("t1", "c2", Some(9));
        shipping.topic = "Shipping".to_string();
        let mut returns = turn("t1", "c2", Some(9));
        returns.topic = "Returns".to_string();
        let forward = group(&[shipping.clone(), returns.clone()]);
        let reversed = group(&[returns, shipping]);
        assert_eq!(forward, reversed);
        assert_eq!(forward[0].topic, "Returns");
    }

    #[test]
    fn empty_input() {
        assert!(group(&[]).is_empty());
    }
}
