//! Synthetic chat events for running without a backend.
//!
//! Rows are generated from a seeded linear congruential generator, so the
//! same seed and anchor time always produce the same rows. A share of the
//! rows omits explicit outcome flags or latency, exercising the normalizer's
//! fallback paths.

use crate::error::Result;
use crate::source::{RowQuery, RowSource};
use crate::types::{ChatbotStatus, RawRow};
use chrono::{DateTime, Duration, TimeZone, Timelike, Utc};
use serde_json::{json, Map, Value};

/// Numerical Recipes LCG constants, 32-bit state.
struct Lcg(u32);

impl Lcg {
    fn next_f64(&mut self) -> f64 {
        self.0 = self.0.wrapping_mul(1_664_525).wrapping_add(1_013_904_223);
        f64::from(self.0) / 4_294_967_296.0
    }

    fn below(&mut self, n: usize) -> usize {
        ((self.next_f64() * n as f64) as usize).min(n.saturating_sub(1))
    }

    fn pick<'a, T>(&mut self, items: &'a [T]) -> &'a T {
        &items[self.below(items.len())]
    }

    fn chance(&mut self, p: f64) -> bool {
        self.next_f64() < p
    }
}

const CHANNELS: &[&str] = &["web", "whatsapp", "email"];
const TYPES: &[&str] = &["product", "policy", "general", "unknown"];

fn subjects(turn_type: &str) -> &'static [&'static str] {
    match turn_type {
        "product" => &["maat", "compatibiliteit", "budget", "installatie", "accessoires"],
        "policy" => &["retour", "verzending", "garantie", "betaling", "annuleren"],
        "general" => &["openingstijden", "contact", "locatie", "handleiding"],
        _ => &["??", "vage vraag", "onduidelijk"],
    }
}

fn question(turn_type: &str, subject: &str, rng: &mut Lcg) -> String {
    let templates: &[&str] = match turn_type {
        "product" => &[
            "Welke {} moet ik kiezen?",
            "Ik zoek iets voor {}, wat raad je aan?",
        ],
        "policy" => &["Hoe werkt jullie {}?", "Wat is het {} beleid?"],
        "general" => &["Wat zijn jullie {}?", "Waar vind ik info over {}?"],
        _ => &["huh {} ???", "kan ik dat ermee doen ofzo"],
    };
    rng.pick(templates).replace("{}", subject)
}

fn answer(turn_type: &str, subject: &str, success: bool, escalated: bool, rng: &mut Lcg) -> String {
    if escalated {
        return "Ik kan dit niet met zekerheid beantwoorden. Ik zet je door naar onze klantenservice via info@shop.example."
            .to_string();
    }
    if !success {
        return rng
            .pick(&[
                "Sorry, ik weet het niet.",
                "Ik begrijp je vraag niet helemaal.",
                "Daar heb ik niet genoeg informatie over.",
            ])
            .to_string();
    }
    match turn_type {
        "product" => format!(
            "Voor {} raad ik Product A aan: https://shop.example/p/1001. Welke maat zoek je?",
            subject
        ),
        "policy" => format!(
            "Alles over {} staat op https://shop.example/service/{}.",
            subject,
            subject.replace(' ', "-")
        ),
        _ => format!(
            "Meer over {} vind je op https://shop.example/info. Kun je aangeven wat je precies zoekt?",
            subject
        ),
    }
}

fn fail_reason(turn_type: &str, rng: &mut Lcg) -> &'static str {
    let reasons: &[&str] = match turn_type {
        "product" => &["Missing product data", "Geen match gevonden"],
        "policy" => &["Policy content ontbreekt", "Onzeker antwoord"],
        "general" => &["Bedrijfsinfo ontbreekt", "Onvoldoende context"],
        _ => &["Onbegrijpelijke input", "Intent niet herkend"],
    };
    *rng.pick(reasons)
}

/// Deterministic demo data set.
#[derive(Debug, Clone)]
pub struct DemoSource {
    pub days: u32,
    pub seed: u32,
    /// Generated timestamps never pass this instant
    pub now: DateTime<Utc>,
}

impl DemoSource {
    pub fn new(days: u32, seed: u32, now: DateTime<Utc>) -> Self {
        Self {
            days: days.max(1),
            seed,
            now,
        }
    }

    /// Generate all rows, oldest first.
    pub fn rows(&self) -> Vec<RawRow> {
        let mut rng = Lcg(self.seed);
        let mut rows = Vec::new();
        let midnight = self
            .now
            .with_hour(0)
            .and_then(|t| t.with_minute(0))
            .and_then(|t| t.with_second(0))
            .and_then(|t| t.with_nanosecond(0))
            .unwrap_or(self.now);
        let start = midnight - Duration::days(i64::from(self.days) - 1);

        let mut convo_counter = 0u32;
        let mut event_counter = 0u32;

        for d in 0..self.days {
            let day = start + Duration::days(i64::from(d));
            let per_day = 6 + rng.below(14);

            for _ in 0..per_day {
                convo_counter += 1;
                let conversation_id = format!("c_{}", convo_counter);
                let channel = *rng.pick(CHANNELS);
                let turn_type = *rng.pick(TYPES);
                let prompt_version = if rng.chance(0.85) { "v1" } else { "v2" };

                let mut at = day
                    + Duration::hours(rng.below(24) as i64)
                    + Duration::minutes(rng.below(60) as i64);
                if at > self.now {
                    at = self.now - Duration::minutes(rng.below(120) as i64);
                }

                let turns = 1 + rng.below(3);
                for _ in 0..turns {
                    event_counter += 1;
                    rows.push(self.row(
                        &mut rng,
                        event_counter,
                        &conversation_id,
                        channel,
                        turn_type,
                        prompt_version,
                        at,
                    ));
                    at = (at + Duration::seconds(20 + rng.below(120) as i64)).min(self.now);
                }
            }
        }

        tracing::debug!(rows = rows.len(), days = self.days, seed = self.seed, "Generated demo rows");
        rows
    }

    #[allow(clippy::too_many_arguments)]
    fn row(
        &self,
        rng: &mut Lcg,
        n: u32,
        conversation_id: &str,
        channel: &str,
        turn_type: &str,
        prompt_version: &str,
        at: DateTime<Utc>,
    ) -> RawRow {
        let subject = *rng.pick(subjects(turn_type));
        let success_prob = match turn_type {
            "product" => 0.82,
            "policy" => 0.86,
            "unknown" => 0.35,
            _ => 0.78,
        };
        let success = rng.chance(success_prob);
        let escalated = if success { rng.chance(0.05) } else { rng.chance(0.55) };
        let lead = escalated && rng.chance(0.35);

        let latency_ms = (450.0 + rng.next_f64() * 1300.0 + if escalated { 150.0 } else { 0.0 }).round();
        let tokens = (250.0 + rng.next_f64() * 900.0).round();
        let cost = tokens * 0.000_002;

        let mut row = Map::new();
        row.insert("id".to_string(), json!(format!("row_{}", n)));
        row.insert("event_id".to_string(), json!(format!("evt_{:06}", n)));
        row.insert("conversation_id".to_string(), json!(conversation_id));
        row.insert("created_at".to_string(), json!(at.to_rfc3339()));
        row.insert("channel".to_string(), json!(channel));
        row.insert("type".to_string(), json!(turn_type));
        row.insert("prompt_version".to_string(), json!(prompt_version));
        row.insert(
            "user_message".to_string(),
            json!(question(turn_type, subject, rng)),
        );
        row.insert(
            "ai_output".to_string(),
            json!(answer(turn_type, subject, success && !escalated, escalated, rng)),
        );

        // Roughly one row in six leaves the outcome to content heuristics.
        if !rng.chance(0.16) {
            let products: Vec<Value> = if turn_type == "product" && success && !escalated {
                vec![json!({ "id": "sku_1001", "name": "Product A" })]
            } else {
                Vec::new()
            };
            let reason = (!success || escalated).then(|| fail_reason(turn_type, rng));
            row.insert(
                "outcome".to_string(),
                json!({
                    "success": success,
                    "escalated": escalated,
                    "lead": lead,
                    "reason": reason,
                    "products": products,
                }),
            );
        }

        let latency = if rng.chance(0.08) { Value::Null } else { json!(latency_ms) };
        row.insert(
            "metrics".to_string(),
            json!({ "latency_ms": latency, "tokens": tokens, "total_cost": cost }),
        );

        RawRow(row)
    }
}

impl Default for DemoSource {
    fn default() -> Self {
        Self::new(30, 42, Utc::now())
    }
}

impl RowSource for DemoSource {
    async fn fetch_rows(&self, query: &RowQuery) -> Result<Vec<RawRow>> {
        let mut rows: Vec<(DateTime<Utc>, RawRow)> = self
            .rows()
            .into_iter()
            .filter_map(|row| {
                let at = row
                    .get("created_at")
                    .and_then(Value::as_str)
                    .and_then(|at| DateTime::parse_from_rfc3339(at).ok())?
                    .with_timezone(&Utc);
                Some((at, row))
            })
            .filter(|(at, _)| query.since.map_or(true, |since| *at >= since))
            .collect();

        // Newest first, like the REST source.
        rows.sort_by(|a, b| b.0.cmp(&a.0));
        rows.truncate(query.limit);
        Ok(rows.into_iter().map(|(_, row)| row).collect())
    }

    async fn fetch_status(&self, bot_id: &str) -> Result<Option<ChatbotStatus>> {
        Ok(Some(ChatbotStatus {
            bot_id: bot_id.to_string(),
            is_up: true,
            updated_at: Some(self.now),
        }))
    }

    fn label(&self) -> &'static str {
        "demo"
    }
}

/// Fixed anchor used by tests and `--demo` snapshots.
pub fn demo_epoch() -> DateTime<Utc> {
    Utc.with_ymd_and_hms(2025, 3, 31, 18, 0, 0)
        .single()
        .unwrap_or_default()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::normalize::normalize_rows;

    #[test]
    fn same_seed_same_rows() {
        let a = DemoSource::new(10, 7, demo_epoch()).rows();
        let b = DemoSource::new(10, 7, demo_epoch()).rows();
        assert_eq!(a, b);
        assert!(!a.is_empty());

        let c = DemoSource::new(10, 8, demo_epoch()).rows();
        assert_ne!(a, c);
    }

    #[test]
    fn rows_stay_within_window() {
        let now = demo_epoch();
        let turns = normalize_rows(&DemoSource::new(5, 42, now).rows());
        let earliest = now - Duration::days(5);
        for t in &turns {
            let at = t.created_at.expect("demo rows are timed");
            assert!(at <= now && at >= earliest, "{at} outside window");
        }
    }

    #[test]
    fn mixes_explicit_and_inferred_outcomes() {
        let turns = normalize_rows(&DemoSource::new(30, 42, demo_epoch()).rows());
        assert!(turns.iter().any(|t| t.inferred));
        assert!(turns.iter().any(|t| !t.inferred));
        assert!(turns.iter().any(|t| t.metrics.latency_ms.is_none()));
        assert!(turns.iter().all(|t| !(t.escalated && t.success)));
    }

    #[test]
    fn fetch_respects_since_and_limit() {
        let source = DemoSource::new(10, 42, demo_epoch());
        let since = demo_epoch() - Duration::days(2);
        let rows = block_on(source.fetch_rows(&RowQuery {
            since: Some(since),
            limit: 5,
        }))
        .unwrap();
        assert_eq!(rows.len(), 5);

        let first = rows[0].get("created_at").and_then(Value::as_str).unwrap();
        let first = DateTime::parse_from_rfc3339(first)
            .unwrap()
            .with_timezone(&Utc);
        assert!(first >= since);
    }

    fn block_on<F: std::future::Future>(future: F) -> F::Output {
        tokio::runtime::Builder::new_current_thread()
            .build()
            .unwrap()
            .block_on(future)
    }
}
