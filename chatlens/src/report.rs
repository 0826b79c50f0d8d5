//! Text and JSON rendering of dashboard state.

use std::path::Path;

use anyhow::Result;
use chatlens_core::db::SnapshotCache;
use chatlens_core::format::{
    format_cost, format_latency_ms, format_relative_time, format_relative_time_opt,
    format_seconds, truncate,
};
use chatlens_core::logging::log_file_path;
use chatlens_core::metrics::{CategoryCount, DashboardMetrics};
use chatlens_core::{
    ChatbotState, Config, Conversation, ConversationMessage, DashboardView, DataSource, Database,
    FilterState, LatencyMode, Role, Turn,
};
use chrono::{DateTime, Local, Utc};
use clap::ValueEnum;
use serde::Serialize;
use serde_json::json;

/// Rows shown per outcome table in the text summary.
const TABLE_ROWS: usize = 5;

#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
pub enum OutputFormat {
    Text,
    Json,
}

fn print_json<T: Serialize + ?Sized>(value: &T) -> Result<()> {
    println!("{}", serde_json::to_string_pretty(value)?);
    Ok(())
}

// ============================================
// Summary
// ============================================

#[derive(Serialize)]
struct SummaryJson<'a> {
    source: DataSource,
    source_status: &'static str,
    chatbot: ChatbotState,
    last_loaded_at: Option<DateTime<Utc>>,
    prompt_version: Option<&'a str>,
    filter: &'a FilterState,
    latency_mode: LatencyMode,
    channels: &'a [String],
    types: &'a [String],
    turns: usize,
    conversations: usize,
    selected_id: Option<&'a str>,
    failed: usize,
    escalated: usize,
    metrics: &'a DashboardMetrics,
}

pub fn print_summary(view: &DashboardView, format: OutputFormat) -> Result<()> {
    if format == OutputFormat::Json {
        return print_json(&SummaryJson {
            source: view.source,
            source_status: view.source.status_label(),
            chatbot: view.chatbot,
            last_loaded_at: view.last_loaded_at,
            prompt_version: view.prompt_version.as_deref(),
            filter: &view.filter,
            latency_mode: view.latency_mode,
            channels: &view.options.channels,
            types: &view.options.types,
            turns: view.filtered_turns.len(),
            conversations: view.conversations.len(),
            selected_id: view.selected_id.as_deref(),
            failed: view.failed.len(),
            escalated: view.escalated.len(),
            metrics: &view.metrics,
        });
    }

    let metrics = &view.metrics;
    let kpis = &metrics.kpis;

    println!("Data:           {}", view.source.status_label());
    println!("Last loaded:    {}", format_relative_time_opt(view.last_loaded_at));
    println!("Chatbot:        {}", view.chatbot.label());
    println!(
        "Prompt version: {}",
        view.prompt_version.as_deref().unwrap_or("-")
    );
    println!("Filters:        {}", describe_filter(&view.filter));

    if view.source == DataSource::Empty {
        println!();
        println!("No data available. Configure [source] or run with --demo.");
    }

    println!();
    println!("Turns:           {}", kpis.total);
    println!("Conversations:   {}", view.conversations.len());
    println!("Success rate:    {}", kpis.format_success_rate());
    println!("Escalation rate: {}", kpis.format_escalation_rate());
    println!("Leads:           {}", kpis.leads);
    println!("Tokens:          {}", kpis.total_tokens);
    println!("Cost:            {}", kpis.format_cost());
    println!(
        "Success today:   {}% ({})",
        metrics.today.rate_pct(),
        metrics.today.caption()
    );

    println!();
    println!("{:<12} {:>6}  {}", "Day", "Turns", metrics.latency.mode.title());
    for (count, point) in metrics.day_counts.iter().zip(&metrics.latency.points) {
        println!(
            "{:<12} {:>6}  {}",
            count.label(),
            count.count,
            format_seconds(point.seconds)
        );
    }

    print_distribution("Topics", &metrics.topics);
    print_distribution("Outcomes", &metrics.outcomes);

    print_table("Failed turns", &view.failed);
    print_table("Escalations", &view.escalated);

    Ok(())
}

fn describe_filter(filter: &FilterState) -> String {
    let range = filter
        .range_days
        .map(|d| format!("{}d", d))
        .unwrap_or_else(|| "all".to_string());
    let mut parts = vec![
        format!("range {}", range),
        format!("channel {}", filter.channel),
        format!("type {}", filter.turn_type),
    ];
    if !filter.search.trim().is_empty() {
        parts.push(format!("search \"{}\"", filter.search.trim()));
    }
    parts.join(", ")
}

fn print_distribution(title: &str, counts: &[CategoryCount]) {
    println!();
    println!("{}", title);
    if counts.is_empty() {
        println!("  (none)");
    }
    for c in counts {
        println!("  {:<24} {:>6}", c.label, c.count);
    }
}

fn print_table(title: &str, turns: &[Turn]) {
    println!();
    println!("{} ({})", title, turns.len());
    for turn in turns.iter().take(TABLE_ROWS) {
        println!("  {}", turn_row(turn));
    }
    if turns.len() > TABLE_ROWS {
        println!("  ... {} more", turns.len() - TABLE_ROWS);
    }
}

// ============================================
// Turns and conversations
// ============================================

fn turn_badge(success: bool, escalated: bool, lead: bool) -> String {
    let outcome = if escalated {
        "ESC"
    } else if success {
        "OK"
    } else {
        "FAIL"
    };
    if lead {
        format!("{}+lead", outcome)
    } else {
        outcome.to_string()
    }
}

fn local_time(ts: Option<DateTime<Utc>>) -> String {
    ts.map(|ts| ts.with_timezone(&Local).format("%d/%m/%Y %H:%M").to_string())
        .unwrap_or_else(|| "-".to_string())
}

fn turn_row(turn: &Turn) -> String {
    format!(
        "{:<16} {:<14} {:<9} {:<8} {:<9} {:>7}  {}",
        local_time(turn.created_at),
        truncate(&turn.conversation_id, 14),
        truncate(&turn.channel, 9),
        truncate(&turn.turn_type, 8),
        turn_badge(turn.success, turn.escalated, turn.lead),
        format_latency_ms(turn.metrics.latency_ms),
        truncate(&turn.user_message, 60)
    )
}

pub fn print_turns(title: &str, turns: &[Turn], format: OutputFormat) -> Result<()> {
    if format == OutputFormat::Json {
        return print_json(&json!({ "title": title, "turns": turns }));
    }

    println!("{} ({} turns)", title, turns.len());
    for turn in turns {
        println!("  {}", turn_row(turn));
        if let Some(reason) = &turn.reason {
            println!("    reason: {}", reason);
        }
    }
    Ok(())
}

pub fn print_conversations(view: &DashboardView, limit: usize, format: OutputFormat) -> Result<()> {
    let shown: Vec<&Conversation> = view.conversations.iter().take(limit).collect();

    if format == OutputFormat::Json {
        return print_json(&json!({
            "total": view.conversations.len(),
            "selected_id": view.selected_id,
            "conversations": shown,
        }));
    }

    if shown.is_empty() {
        println!("No conversations match the current filters.");
        return Ok(());
    }

    println!(
        "  {:<14} {:>10} {:<9} {:<16} {:>5}  {}",
        "Conversation", "Updated", "Channel", "Topic", "Turns", "Outcome"
    );
    for c in &shown {
        let marker = if view.selected_id.as_deref() == Some(c.conversation_id.as_str()) {
            '*'
        } else {
            ' '
        };
        println!(
            "{} {:<14} {:>10} {:<9} {:<16} {:>5}  {}",
            marker,
            truncate(&c.conversation_id, 14),
            format_relative_time_opt(c.updated_at),
            truncate(&c.channel, 9),
            truncate(&c.topic, 16),
            c.turn_count,
            turn_badge(c.outcome.success, c.outcome.escalated, c.outcome.lead)
        );
    }
    println!();
    println!(
        "Showing {} of {} conversations",
        shown.len(),
        view.conversations.len()
    );
    Ok(())
}

pub fn print_conversation(conversation: &Conversation, format: OutputFormat) -> Result<()> {
    if format == OutputFormat::Json {
        return print_json(conversation);
    }

    let c = conversation;
    println!("Conversation {}", c.conversation_id);
    println!("  Channel:   {}", c.channel);
    println!("  Topic:     {}", c.topic);
    println!("  Prompt:    {}", c.prompt_version.as_deref().unwrap_or("-"));
    println!("  Started:   {}", local_time(c.created_at));
    println!("  Updated:   {}", local_time(c.updated_at));
    println!(
        "  Outcome:   {}",
        turn_badge(c.outcome.success, c.outcome.escalated, c.outcome.lead)
    );
    if let Some(reason) = &c.outcome.reason {
        println!("  Reason:    {}", reason);
    }
    println!(
        "  Usage:     {} tokens, {}",
        c.metrics.tokens,
        format_cost(c.metrics.total_cost)
    );

    for message in &c.messages {
        println!();
        println!("{}", message_header(message));
        for line in message.content.lines() {
            println!("    {}", line);
        }
    }
    Ok(())
}

fn message_header(message: &ConversationMessage) -> String {
    let at = local_time(message.at);
    match message.role {
        Role::User => format!("[user] {}", at),
        Role::Assistant => format!(
            "[assistant] {} {} {} {} tokens",
            at,
            turn_badge(message.success, message.escalated, message.lead),
            format_latency_ms(message.latency_ms),
            message.tokens
        ),
    }
}

// ============================================
// Export and status
// ============================================

pub fn print_export(path: &Path, rows: usize, format: OutputFormat) -> Result<()> {
    if format == OutputFormat::Json {
        return print_json(&json!({ "path": path.display().to_string(), "rows": rows }));
    }
    println!("Exported {} rows to {}", rows, path.display());
    Ok(())
}

pub fn print_status(config: &Config, db: &Database, limit: usize, format: OutputFormat) -> Result<()> {
    let scope = config.cache.scope_key();
    let snapshot = db.read_snapshot(scope)?;
    let fetches = db.recent_fetches(scope, limit)?;
    let config_path = Config::config_path();

    if format == OutputFormat::Json {
        return print_json(&json!({
            "config_path": config_path.display().to_string(),
            "config_found": config_path.exists(),
            "cache_enabled": config.cache.enabled,
            "cache_path": Config::cache_path().display().to_string(),
            "cache_scope": scope,
            "log_path": log_file_path().display().to_string(),
            "source_ready": config.source.is_ready(),
            "source_table": config.source.table,
            "snapshot": snapshot.as_ref().map(|s| &s.meta),
            "snapshot_turns": snapshot.as_ref().map(|s| s.data.turns.len()),
            "fetches": fetches,
        }));
    }

    let found = if config_path.exists() { "" } else { " (not found, using defaults)" };
    println!("Config:   {}{}", config_path.display(), found);
    if config.cache.enabled {
        println!("Cache:    {}", Config::cache_path().display());
    } else {
        println!("Cache:    disabled");
    }
    println!("Log:      {}", log_file_path().display());
    println!(
        "Source:   {} ({})",
        config.source.url.as_deref().unwrap_or("(not configured)"),
        if config.source.is_ready() { "ready" } else { "not ready" }
    );

    match &snapshot {
        Some(s) => println!(
            "Snapshot: {} turns from {}, cached {}",
            s.data.turns.len(),
            s.meta.source,
            format_relative_time(s.meta.cached_at)
        ),
        None => println!("Snapshot: none"),
    }

    println!();
    if fetches.is_empty() {
        println!("No fetch attempts recorded.");
        return Ok(());
    }
    println!("Recent fetches:");
    for f in &fetches {
        let outcome = match &f.error {
            Some(error) => format!("error: {}", truncate(error, 60)),
            None => "ok".to_string(),
        };
        println!(
            "  {:<10} {:<5} {:>6} rows  {}",
            format_relative_time(f.fetched_at),
            f.source,
            f.row_count,
            outcome
        );
    }
    Ok(())
}
