//! Dashboard metrics over a (filtered) turn set.
//!
//! All metrics are computed from turns, never from conversations. Every
//! function here is total: empty input yields zeros and empty series, and
//! nothing produces NaN.
//!
//! ## Day skeleton
//!
//! The per-day count series defines the set of days shown on every day-based
//! chart. The latency series is reported over exactly the same days, with an
//! explicit `0` for a day that has turns but no usable latency values.

use crate::filter::OutcomeLabel;
use crate::format;
use crate::types::{LatencyMode, Turn};
use chrono::{DateTime, Duration, Local, NaiveDate, TimeZone, Utc};
use serde::Serialize;
use std::collections::BTreeMap;

/// Default minimum sample for the "today" success ring.
pub const DEFAULT_TODAY_MIN_SAMPLE: usize = 20;

/// Default trailing window used when today's sample is too small.
pub const DEFAULT_FALLBACK_WINDOW_DAYS: u32 = 7;

// ============================================
// Output types
// ============================================

/// Headline numbers.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct Kpis {
    pub total: usize,
    pub successful: usize,
    pub escalated: usize,
    pub leads: usize,
    pub total_tokens: u64,
    /// Full precision; format with [`format::format_cost`]
    pub total_cost: f64,
}

impl Kpis {
    /// successful / total, or 0 for an empty set
    pub fn success_rate(&self) -> f64 {
        ratio(self.successful, self.total)
    }

    /// escalated / total, or 0 for an empty set
    pub fn escalation_rate(&self) -> f64 {
        ratio(self.escalated, self.total)
    }

    pub fn format_success_rate(&self) -> String {
        format::format_percent(self.success_rate())
    }

    pub fn format_escalation_rate(&self) -> String {
        format::format_percent(self.escalation_rate())
    }

    pub fn format_cost(&self) -> String {
        format::format_cost(self.total_cost)
    }
}

/// Turn count for one calendar day.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct DayCount {
    pub day: NaiveDate,
    pub count: usize,
}

impl DayCount {
    pub fn label(&self) -> String {
        format::format_day_label(self.day)
    }
}

/// Latency for one skeleton day.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct LatencyPoint {
    pub day: NaiveDate,
    /// p95 or mean in seconds; 0 when the day had no usable values
    pub seconds: f64,
    /// Number of latency values behind this point
    pub samples: usize,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct LatencySeries {
    pub mode: LatencyMode,
    pub points: Vec<LatencyPoint>,
}

/// One bar of a category distribution.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct CategoryCount {
    pub label: String,
    pub count: usize,
}

/// The "today" success ring.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct TodaySuccess {
    /// Local calendar day the ring is anchored on
    pub day: NaiveDate,
    pub successful: usize,
    pub sample: usize,
    /// True when today's sample was too small and the trailing window was used
    pub fallback: bool,
    /// Days covered by the sample (1 unless `fallback`)
    pub window_days: u32,
}

impl TodaySuccess {
    pub fn rate(&self) -> f64 {
        ratio(self.successful, self.sample)
    }

    pub fn rate_pct(&self) -> u32 {
        format::percent(self.rate())
    }

    /// Caption under the ring, e.g. "n too small, showing 7-day window".
    pub fn caption(&self) -> String {
        if self.fallback {
            format!("n too small, showing {}-day window", self.window_days)
        } else {
            format!("n = {}", self.sample)
        }
    }
}

/// Everything the charts and KPI cards need.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct DashboardMetrics {
    pub kpis: Kpis,
    /// Ascending by day; this is the day skeleton
    pub day_counts: Vec<DayCount>,
    pub latency: LatencySeries,
    /// Descending by count, ties in first-seen order
    pub topics: Vec<CategoryCount>,
    /// Descending by count, ties in chart order
    pub outcomes: Vec<CategoryCount>,
    pub today: TodaySuccess,
}

// ============================================
// Engine
// ============================================

/// Computes [`DashboardMetrics`] with days bucketed in a fixed time zone.
#[derive(Debug, Clone)]
pub struct MetricsEngine<Tz: TimeZone = Local> {
    tz: Tz,
    today_min_sample: usize,
    fallback_window_days: u32,
}

impl MetricsEngine<Local> {
    /// Engine bucketing days in the local time zone.
    pub fn new() -> Self {
        Self::with_timezone(Local)
    }

    pub fn from_config(config: &crate::config::MetricsConfig) -> Self {
        Self::new()
            .with_today_min_sample(config.today_min_sample)
            .with_fallback_window_days(config.fallback_window_days)
    }
}

impl Default for MetricsEngine<Local> {
    fn default() -> Self {
        Self::new()
    }
}

impl<Tz: TimeZone> MetricsEngine<Tz> {
    pub fn with_timezone(tz: Tz) -> Self {
        Self {
            tz,
            today_min_sample: DEFAULT_TODAY_MIN_SAMPLE,
            fallback_window_days: DEFAULT_FALLBACK_WINDOW_DAYS,
        }
    }

    pub fn with_today_min_sample(mut self, min_sample: usize) -> Self {
        self.today_min_sample = min_sample;
        self
    }

    pub fn with_fallback_window_days(mut self, days: u32) -> Self {
        self.fallback_window_days = days.max(1);
        self
    }

    pub fn timezone(&self) -> &Tz {
        &self.tz
    }

    /// Compute every metric over `turns`.
    pub fn compute(&self, turns: &[Turn], mode: LatencyMode, now: DateTime<Utc>) -> DashboardMetrics {
        let day_counts = self.day_counts(turns);
        let latency = self.latency_series(turns, &day_counts, mode);

        DashboardMetrics {
            kpis: kpis(turns),
            latency,
            day_counts,
            topics: topic_distribution(turns),
            outcomes: outcome_distribution(turns),
            today: self.today_success(turns, now),
        }
    }

    /// Local calendar day of a turn, if it has a timestamp.
    pub fn day_of(&self, turn: &Turn) -> Option<NaiveDate> {
        turn.created_at
            .map(|ts| ts.with_timezone(&self.tz).date_naive())
    }

    /// Turns per local day, ascending. Untimed turns are excluded.
    pub fn day_counts(&self, turns: &[Turn]) -> Vec<DayCount> {
        let mut by_day: BTreeMap<NaiveDate, usize> = BTreeMap::new();
        for day in turns.iter().filter_map(|t| self.day_of(t)) {
            *by_day.entry(day).or_insert(0) += 1;
        }
        by_day
            .into_iter()
            .map(|(day, count)| DayCount { day, count })
            .collect()
    }

    /// Latency per skeleton day, in seconds.
    ///
    /// Only latencies > 0 count. A skeleton day without any reports 0.
    pub fn latency_series(
        &self,
        turns: &[Turn],
        skeleton: &[DayCount],
        mode: LatencyMode,
    ) -> LatencySeries {
        let mut by_day: BTreeMap<NaiveDate, Vec<f64>> = BTreeMap::new();
        for turn in turns {
            let (Some(day), Some(ms)) = (self.day_of(turn), turn.metrics.latency_ms) else {
                continue;
            };
            if ms.is_finite() && ms > 0.0 {
                by_day.entry(day).or_default().push(ms / 1000.0);
            }
        }

        let points = skeleton
            .iter()
            .map(|dc| {
                let values = by_day.get(&dc.day).map(Vec::as_slice).unwrap_or(&[]);
                let seconds = match mode {
                    LatencyMode::P95 => percentile(values, 0.95),
                    LatencyMode::Avg => mean(values),
                };
                LatencyPoint {
                    day: dc.day,
                    seconds: seconds.unwrap_or(0.0),
                    samples: values.len(),
                }
            })
            .collect();

        LatencySeries { mode, points }
    }

    /// Success ratio for today, widening to the trailing window when today's
    /// sample is below the minimum.
    pub fn today_success(&self, turns: &[Turn], now: DateTime<Utc>) -> TodaySuccess {
        let today = now.with_timezone(&self.tz).date_naive();
        let tally = |from: NaiveDate| -> (usize, usize) {
            turns
                .iter()
                .filter(|t| self.day_of(t).is_some_and(|d| d >= from && d <= today))
                .fold((0, 0), |(ok, n), t| (ok + usize::from(t.success), n + 1))
        };

        let (successful, sample) = tally(today);
        if sample >= self.today_min_sample {
            return TodaySuccess {
                day: today,
                successful,
                sample,
                fallback: false,
                window_days: 1,
            };
        }

        let window = self.fallback_window_days.max(1);
        let from = today - Duration::days(i64::from(window) - 1);
        let (successful, sample) = tally(from);
        tracing::debug!(
            today_sample = sample,
            window_days = window,
            "Today sample below minimum, using trailing window"
        );
        TodaySuccess {
            day: today,
            successful,
            sample,
            fallback: true,
            window_days: window,
        }
    }
}

// ============================================
// Free functions
// ============================================

fn ratio(part: usize, total: usize) -> f64 {
    if total == 0 {
        0.0
    } else {
        part as f64 / total as f64
    }
}

/// KPI scalars over all turns, timed or not.
pub fn kpis(turns: &[Turn]) -> Kpis {
    let mut k = Kpis {
        total: turns.len(),
        ..Kpis::default()
    };
    for t in turns {
        k.successful += usize::from(t.success);
        k.escalated += usize::from(t.escalated);
        k.leads += usize::from(t.lead);
        k.total_tokens = k.total_tokens.saturating_add(t.metrics.tokens);
        if t.metrics.total_cost.is_finite() {
            k.total_cost += t.metrics.total_cost;
        }
    }
    k
}

/// Nearest-rank percentile: sort ascending, take index `ceil(p * n) - 1`
/// clamped to `[0, n - 1]`. `None` for an empty sample.
pub fn percentile(values: &[f64], p: f64) -> Option<f64> {
    if values.is_empty() {
        return None;
    }
    let mut sorted = values.to_vec();
    sorted.sort_by(f64::total_cmp);

    let n = sorted.len();
    let rank = (p * n as f64).ceil() as i64 - 1;
    let idx = rank.clamp(0, n as i64 - 1) as usize;
    Some(sorted[idx])
}

/// Arithmetic mean; `None` for an empty sample.
pub fn mean(values: &[f64]) -> Option<f64> {
    if values.is_empty() {
        return None;
    }
    Some(values.iter().sum::<f64>() / values.len() as f64)
}

/// Sort descending by count. `sort_by` is stable, so ties keep input order.
fn sort_desc(mut counts: Vec<CategoryCount>) -> Vec<CategoryCount> {
    counts.sort_by(|a, b| b.count.cmp(&a.count));
    counts
}

/// Turns per topic, descending; ties keep first-seen order.
pub fn topic_distribution(turns: &[Turn]) -> Vec<CategoryCount> {
    let mut counts: Vec<CategoryCount> = Vec::new();
    for t in turns {
        match counts.iter_mut().find(|c| c.label == t.topic) {
            Some(c) => c.count += 1,
            None => counts.push(CategoryCount {
                label: t.topic.clone(),
                count: 1,
            }),
        }
    }
    sort_desc(counts)
}

/// Turns per outcome bucket, descending. Empty buckets are left out.
pub fn outcome_distribution(turns: &[Turn]) -> Vec<CategoryCount> {
    let counts = OutcomeLabel::ALL
        .iter()
        .map(|outcome| CategoryCount {
            label: outcome.label().to_string(),
            count: turns.iter().filter(|t| outcome.matches(t)).count(),
        })
        .filter(|c| c.count > 0)
        .collect();
    sort_desc(counts)
}
