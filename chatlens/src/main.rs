//! chatlens - chatbot conversation analytics
//!
//! Loads chat events from the configured REST backend (falling back to the
//! local snapshot cache, or synthetic demo rows with `--demo`) and prints
//! dashboard reports.

mod report;

use std::fs::File;
use std::io::BufWriter;
use std::path::PathBuf;

use anyhow::{Context, Result};
use chatlens_core::config::API_KEY_ENV;
use chatlens_core::db::FetchRecord;
use chatlens_core::demo::DemoSource;
use chatlens_core::export::{export_file_name, write_turns_csv};
use chatlens_core::filter::{DrillKey, OutcomeLabel};
use chatlens_core::metrics::MetricsEngine;
use chatlens_core::{
    Config, Conversation, Dashboard, DataSource, Database, FilterState, LatencyMode,
    RestRowSource, RowQuery, RowSource,
};
use chrono::{Local, NaiveDate, Utc};
use clap::{Parser, Subcommand};
use tokio::runtime::Runtime;

use crate::report::OutputFormat;

/// Days of synthetic rows generated for `--demo`, at minimum.
const DEMO_DAYS: u32 = 30;

#[derive(Parser)]
#[command(name = "chatlens")]
#[command(about = "Analytics for customer-service chatbot conversations")]
#[command(version)]
struct Args {
    #[command(subcommand)]
    command: Option<Command>,

    /// Time range: 7d, 30d, 90d, 24h or all (default from config)
    #[arg(short, long, global = true)]
    range: Option<String>,

    /// Only turns from this channel
    #[arg(long, global = true)]
    channel: Option<String>,

    /// Only turns of this type (product, policy, general, unknown)
    #[arg(long = "type", global = true)]
    turn_type: Option<String>,

    /// Case-insensitive search over messages and conversation ids
    #[arg(short, long, global = true)]
    search: Option<String>,

    /// Latency aggregation: p95 or avg (default from config)
    #[arg(long, global = true)]
    latency: Option<LatencyMode>,

    /// Use synthetic demo rows instead of the REST backend
    #[arg(long, global = true, conflicts_with = "offline")]
    demo: bool,

    /// Seed for demo rows
    #[arg(long, global = true, default_value_t = 42)]
    seed: u32,

    /// Skip the fetch and serve the cached snapshot
    #[arg(long, global = true)]
    offline: bool,

    /// Output format
    #[arg(short, long, global = true, value_enum, default_value_t = OutputFormat::Text)]
    format: OutputFormat,
}

#[derive(Subcommand, Clone)]
enum Command {
    /// KPIs, per-day series, distributions and outcome tables (default)
    Summary,

    /// List conversations, or show one conversation thread
    Conversations {
        /// Conversation id (partial match supported)
        #[arg(long)]
        id: Option<String>,

        /// Maximum conversations to list
        #[arg(short = 'n', long, default_value_t = 20)]
        limit: usize,
    },

    /// Turns behind one chart element
    Drill {
        #[command(subcommand)]
        target: DrillTarget,
    },

    /// Write the filtered turns as CSV
    Export {
        /// Output file (default: chat_events_export_<today>.csv)
        #[arg(short, long)]
        output: Option<PathBuf>,
    },

    /// Paths, source readiness and recent fetch attempts
    Status {
        /// Fetch attempts to show
        #[arg(short = 'n', long, default_value_t = 10)]
        limit: usize,
    },
}

#[derive(Subcommand, Clone)]
enum DrillTarget {
    /// One calendar day (DD/MM/YYYY or YYYY-MM-DD)
    Day { day: String },
    /// One topic label
    Topic { label: String },
    /// Success, Escalated, Lead or Other
    Outcome { label: OutcomeLabel },
}

fn main() -> Result<()> {
    let args = Args::parse();

    Config::ensure_xdg_env();

    // Load configuration
    let config = Config::load().context("failed to load configuration")?;

    // Initialize logging (to file, stdout carries the report)
    let _log_guard =
        chatlens_core::logging::init(&config.logging).context("failed to initialize logging")?;

    tracing::info!("chatlens starting up");

    let format = args.format;
    let command = args.command.clone().unwrap_or(Command::Summary);

    match command {
        Command::Status { limit } => {
            let db = open_cache(&config)?;
            report::print_status(&config, &db, limit, format)
        }
        Command::Summary => {
            let mut dashboard = load_dashboard(&args, &config)?;
            let view = dashboard.view(Utc::now());
            report::print_summary(&view, format)
        }
        Command::Conversations { id, limit } => {
            let mut dashboard = load_dashboard(&args, &config)?;
            let view = dashboard.view(Utc::now());
            match id {
                Some(id) => {
                    let conversation = find_conversation(&view.conversations, &id)?;
                    report::print_conversation(conversation, format)
                }
                None => report::print_conversations(&view, limit, format),
            }
        }
        Command::Drill { target } => {
            let key = drill_key(target)?;
            let dashboard = load_dashboard(&args, &config)?;
            let turns = dashboard.drill_down(&key, Utc::now());
            report::print_turns(&key.title(), &turns, format)
        }
        Command::Export { output } => {
            let mut dashboard = load_dashboard(&args, &config)?;
            let view = dashboard.view(Utc::now());

            let path = output
                .unwrap_or_else(|| PathBuf::from(export_file_name(Local::now().date_naive())));
            let file = File::create(&path)
                .with_context(|| format!("failed to create {}", path.display()))?;
            let written = write_turns_csv(BufWriter::new(file), &view.filtered_turns)
                .context("failed to write CSV export")?;

            tracing::info!(path = %path.display(), rows = written, "Exported turns");
            report::print_export(&path, written, format)
        }
    }
}

/// Open the snapshot cache, or an in-memory stand-in when caching is off.
fn open_cache(config: &Config) -> Result<Database> {
    let db = if config.cache.enabled {
        let db_path = Config::cache_path();
        tracing::info!(path = %db_path.display(), "Opening cache database");
        Database::open(&db_path).context("failed to open cache database")?
    } else {
        Database::open_in_memory().context("failed to open in-memory cache")?
    };
    db.migrate().context("failed to run cache migrations")?;
    Ok(db)
}

/// Config filters overridden by command-line flags.
fn filter_state(args: &Args, config: &Config) -> FilterState {
    let mut filter = config.filters.initial_state();
    if let Some(range) = &args.range {
        filter.range_days = FilterState::parse_range(range);
    }
    if let Some(channel) = &args.channel {
        filter.channel = channel.clone();
    }
    if let Some(turn_type) = &args.turn_type {
        filter.turn_type = turn_type.clone();
    }
    if let Some(search) = &args.search {
        filter.search = search.clone();
    }
    filter
}

fn load_dashboard(args: &Args, config: &Config) -> Result<Dashboard<Database>> {
    let db = open_cache(config)?;
    let filter = filter_state(args, config);
    let now = Utc::now();
    let query = RowQuery::for_range(filter.range_days, config.source.limit, now);
    let scope = config.cache.scope_key().to_string();

    let mut dashboard = Dashboard::new(db, scope.clone(), MetricsEngine::from_config(&config.metrics))
        .with_filter(filter)
        .with_latency_mode(args.latency.unwrap_or(config.metrics.latency_mode));

    if args.offline {
        dashboard.load_cached();
        return Ok(dashboard);
    }

    let runtime = tokio::runtime::Builder::new_current_thread()
        .enable_all()
        .build()
        .context("failed to create async runtime")?;

    if args.demo {
        let days = dashboard
            .filter()
            .range_days
            .unwrap_or(DEMO_DAYS)
            .clamp(DEMO_DAYS, 365);
        let source = DemoSource::new(days, args.seed, now);
        refresh(&mut dashboard, &source, &runtime, &query, &scope, &config.source.bot_id);
    } else if config.source.is_ready() {
        let source =
            RestRowSource::new(config.source.clone()).context("failed to create REST source")?;
        refresh(&mut dashboard, &source, &runtime, &query, &scope, &config.source.bot_id);
    } else {
        eprintln!(
            "No source configured (set [source] url and api_key in {} or {}); using cached data.",
            Config::config_path().display(),
            API_KEY_ENV
        );
        dashboard.load_cached();
    }

    Ok(dashboard)
}

/// Fetch rows and status from `source`, log the attempt and feed the dashboard.
fn refresh<S: RowSource>(
    dashboard: &mut Dashboard<Database>,
    source: &S,
    runtime: &Runtime,
    query: &RowQuery,
    scope: &str,
    bot_id: &str,
) -> DataSource {
    let fetched = runtime.block_on(source.fetch_rows(query));

    let record = FetchRecord {
        scope: scope.to_string(),
        fetched_at: Utc::now(),
        source: source.label().to_string(),
        row_count: fetched.as_ref().map_or(0, Vec::len),
        error: fetched.as_ref().err().map(ToString::to_string),
    };
    if let Err(e) = dashboard.cache().record_fetch(&record) {
        tracing::warn!(error = %e, "Failed to record fetch attempt");
    }

    let loaded = dashboard.ingest_fetch(fetched, source.label(), query.since);
    dashboard.ingest_status(runtime.block_on(source.fetch_status(bot_id)));

    if let Some(error) = record.error {
        eprintln!("Fetch failed: {} ({})", error, loaded.status_label());
    }
    loaded
}

/// Exact id first, then a unique partial match.
fn find_conversation<'a>(conversations: &'a [Conversation], id: &str) -> Result<&'a Conversation> {
    if let Some(exact) = conversations.iter().find(|c| c.conversation_id == id) {
        return Ok(exact);
    }

    let matches: Vec<&Conversation> = conversations
        .iter()
        .filter(|c| c.conversation_id.contains(id))
        .collect();

    match matches.as_slice() {
        [] => anyhow::bail!("No conversation found matching '{}'", id),
        [only] => Ok(*only),
        many => anyhow::bail!(
            "'{}' matches {} conversations; use a longer id",
            id,
            many.len()
        ),
    }
}

fn drill_key(target: DrillTarget) -> Result<DrillKey> {
    Ok(match target {
        DrillTarget::Day { day } => DrillKey::Day(parse_day(&day)?),
        DrillTarget::Topic { label } => DrillKey::Topic(label),
        DrillTarget::Outcome { label } => DrillKey::Outcome(label),
    })
}

fn parse_day(raw: &str) -> Result<NaiveDate> {
    ["%d/%m/%Y", "%Y-%m-%d"]
        .iter()
        .find_map(|fmt| NaiveDate::parse_from_str(raw.trim(), fmt).ok())
        .with_context(|| format!("invalid day '{}', expected DD/MM/YYYY or YYYY-MM-DD", raw))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parse_day_accepts_both_layouts() {
        let expected = NaiveDate::from_ymd_opt(2025, 3, 9).unwrap();
        assert_eq!(parse_day("09/03/2025").unwrap(), expected);
        assert_eq!(parse_day("2025-03-09").unwrap(), expected);
        assert!(parse_day("March 9").is_err());
    }

    #[test]
    fn flags_override_config_filters() {
        let args = Args::parse_from([
            "chatlens",
            "--range",
            "7d",
            "--channel",
            "web",
            "--search",
            "retour",
        ]);
        let filter = filter_state(&args, &Config::default());
        assert_eq!(filter.range_days, Some(7));
        assert_eq!(filter.channel, "web");
        assert_eq!(filter.turn_type, "all");
        assert_eq!(filter.search, "retour");

        let defaults = filter_state(&Args::parse_from(["chatlens"]), &Config::default());
        assert_eq!(defaults, FilterState::default());
    }

    #[test]
    fn demo_conflicts_with_offline() {
        assert!(Args::try_parse_from(["chatlens", "--demo", "--offline"]).is_err());
    }

    #[test]
    fn drill_outcome_parses_label() {
        let args = Args::parse_from(["chatlens", "drill", "outcome", "escalated"]);
        match args.command {
            Some(Command::Drill {
                target: DrillTarget::Outcome { label },
            }) => assert_eq!(label, OutcomeLabel::Escalated),
            _ => panic!("expected drill outcome"),
        }
    }
}
