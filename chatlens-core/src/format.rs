//! Formatting helpers shared by the CLI report and export.

use chrono::{DateTime, NaiveDate, Utc};

/// Format a timestamp relative to `now` (e.g., "2m ago").
pub fn format_relative_time_at(ts: DateTime<Utc>, now: DateTime<Utc>) -> String {
    let duration = now.signed_duration_since(ts);

    if duration.num_seconds() < 0 {
        "just now".to_string()
    } else if duration.num_seconds() < 60 {
        format!("{}s ago", duration.num_seconds())
    } else if duration.num_minutes() < 60 {
        format!("{}m ago", duration.num_minutes())
    } else if duration.num_hours() < 24 {
        format!("{}h ago", duration.num_hours())
    } else if duration.num_days() < 7 {
        format!("{}d ago", duration.num_days())
    } else {
        format_day_label(ts.date_naive())
    }
}

/// Format a timestamp as relative time (e.g., "2m ago").
pub fn format_relative_time(ts: DateTime<Utc>) -> String {
    format_relative_time_at(ts, Utc::now())
}

/// Format an optional timestamp as relative time, or "-" if missing.
pub fn format_relative_time_opt(ts: Option<DateTime<Utc>>) -> String {
    match ts {
        Some(ts) => format_relative_time(ts),
        None => "-".to_string(),
    }
}

/// Chart axis label for a day bucket: `DD/MM/YYYY`.
pub fn format_day_label(day: NaiveDate) -> String {
    day.format("%d/%m/%Y").to_string()
}

/// Ratio in `[0, 1]` as a whole percentage. Non-finite input is 0.
pub fn percent(ratio: f64) -> u32 {
    if !ratio.is_finite() || ratio <= 0.0 {
        return 0;
    }
    (ratio * 100.0).round().min(100.0) as u32
}

/// Ratio as a display percentage, e.g. `"67%"`.
pub fn format_percent(ratio: f64) -> String {
    format!("{}%", percent(ratio))
}

/// USD cost at full precision to 6 decimals, e.g. `"$0.001200"`.
pub fn format_cost(cost: f64) -> String {
    let cost = if cost.is_finite() { cost } else { 0.0 };
    format!("${:.6}", cost)
}

/// Latency in seconds: 3 decimals below 10s, 2 above.
pub fn format_seconds(seconds: f64) -> String {
    if !seconds.is_finite() {
        return "0.000s".to_string();
    }
    if seconds < 10.0 {
        format!("{:.3}s", seconds)
    } else {
        format!("{:.2}s", seconds)
    }
}

/// Optional latency in milliseconds, shown in seconds or "-".
pub fn format_latency_ms(latency_ms: Option<f64>) -> String {
    latency_ms
        .map(|ms| format_seconds(ms / 1000.0))
        .unwrap_or_else(|| "-".to_string())
}

/// Truncate to at most `max` characters, appending "..." when cut.
pub fn truncate(text: &str, max: usize) -> String {
    let flat: String = text.split_whitespace().collect::<Vec<_>>().join(" ");
    if flat.chars().count() <= max {
        return flat;
    }
    let kept: String = flat.chars().take(max.saturating_sub(3)).collect();
    format!("{}...", kept.trim_end())
}
