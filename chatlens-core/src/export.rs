//! CSV export of the filtered turn set.
//!
//! One record per turn, fixed column order. Every field is quoted.

use crate::error::Result;
use crate::types::Turn;
use chrono::{NaiveDate, SecondsFormat};
use csv::{QuoteStyle, WriterBuilder};
use serde::Serialize;
use std::io::Write;

/// Flat export row.
///
/// Field order here is the column order of the file.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ExportRecord {
    pub conversation_id: String,
    /// RFC 3339, empty when unknown
    pub created_at: String,
    pub channel: String,
    #[serde(rename = "type")]
    pub turn_type: String,
    pub topic: String,
    pub success: bool,
    pub escalated: bool,
    pub lead: bool,
    /// Empty when successful
    pub reason: String,
    /// Empty when unknown
    pub latency_ms: Option<f64>,
    pub tokens: u64,
    pub total_cost_usd: f64,
    pub user_message: String,
    pub ai_output: String,
}

impl ExportRecord {
    pub fn from_turn(turn: &Turn) -> Self {
        Self {
            conversation_id: turn.conversation_id.clone(),
            created_at: turn
                .created_at
                .map(|ts| ts.to_rfc3339_opts(SecondsFormat::Millis, true))
                .unwrap_or_default(),
            channel: turn.channel.clone(),
            turn_type: turn.turn_type.clone(),
            topic: turn.topic.clone(),
            success: turn.success,
            escalated: turn.escalated,
            lead: turn.lead,
            reason: turn.reason.clone().unwrap_or_default(),
            latency_ms: turn.metrics.latency_ms,
            tokens: turn.metrics.tokens,
            total_cost_usd: turn.metrics.total_cost,
            user_message: turn.user_message.clone(),
            ai_output: turn.ai_output.clone(),
        }
    }
}

/// Default export file name for a given day: `chat_events_export_<YYYY-MM-DD>.csv`
pub fn export_file_name(day: NaiveDate) -> String {
    format!("chat_events_export_{}.csv", day.format("%Y-%m-%d"))
}

/// Write records as CSV with a header row. Returns the number of records.
pub fn write_csv<W: Write>(writer: W, records: &[ExportRecord]) -> Result<usize> {
    let mut csv_writer = WriterBuilder::new()
        .has_headers(false)
        .quote_style(QuoteStyle::Always)
        .from_writer(writer);

    // Written explicitly so an empty export still has a header.
    csv_writer.write_record(HEADER)?;
    for record in records {
        csv_writer.serialize(record)?;
    }
    csv_writer.flush()?;

    tracing::debug!(records = records.len(), "Wrote CSV export");
    Ok(records.len())
}

/// Export turns directly.
pub fn write_turns_csv<W: Write>(writer: W, turns: &[Turn]) -> Result<usize> {
    let records: Vec<ExportRecord> = turns.iter().map(ExportRecord::from_turn).collect();
    write_csv(writer, &records)
}

const HEADER: [&str; 14] = [
    "conversation_id",
    "created_at",
    "channel",
    "type",
    "topic",
    "success",
    "escalated",
    "lead",
    "reason",
    "latency_ms",
    "tokens",
    "total_cost_usd",
    "user_message",
    "ai_output",
];
