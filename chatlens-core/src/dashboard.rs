//! Dashboard state machine
//!
//! Owns the working turn set and reacts to discrete triggers: a finished
//! fetch, a filter change, a latency-mode toggle, a selection. Every trigger
//! replaces derived state wholesale; nothing is merged incrementally.
//!
//! ```text
//! fetch ok ──▶ normalize ──▶ group ──▶ write snapshot ──▶ Live
//! fetch err ─▶ read snapshot ─┬─ non-empty ──▶ Cached
//!                             └─ missing ────▶ Empty
//! ```

use crate::db::{CacheSnapshot, SnapshotCache};
use crate::error::Result;
use crate::filter::{self, DrillKey, FilterOptions};
use crate::group::group;
use crate::metrics::{DashboardMetrics, MetricsEngine};
use crate::normalize::normalize_rows;
use crate::types::{
    ChatbotState, ChatbotStatus, Conversation, DataSource, FilterState, LatencyMode, RawRow, Turn,
};
use chrono::{DateTime, Local, TimeZone, Utc};
use serde::Serialize;

/// Everything a renderer needs for one frame.
#[derive(Debug, Clone, Serialize)]
pub struct DashboardView {
    pub source: DataSource,
    pub chatbot: ChatbotState,
    pub last_loaded_at: Option<DateTime<Utc>>,
    pub prompt_version: Option<String>,
    pub filter: FilterState,
    pub latency_mode: LatencyMode,
    pub options: FilterOptions,
    /// Turns passing the active filters
    pub filtered_turns: Vec<Turn>,
    /// Conversations with at least one filtered turn, most recent first
    pub conversations: Vec<Conversation>,
    pub selected_id: Option<String>,
    pub metrics: DashboardMetrics,
    /// Filtered turns that did not succeed
    pub failed: Vec<Turn>,
    /// Filtered turns that were escalated
    pub escalated: Vec<Turn>,
}

impl DashboardView {
    /// The selected conversation, if any.
    pub fn selected(&self) -> Option<&Conversation> {
        let id = self.selected_id.as_deref()?;
        self.conversations.iter().find(|c| c.conversation_id == id)
    }
}

/// Dashboard state: working set, filters and load provenance.
pub struct Dashboard<C: SnapshotCache, Tz: TimeZone = Local> {
    cache: C,
    scope: String,
    engine: MetricsEngine<Tz>,

    turns: Vec<Turn>,
    conversations: Vec<Conversation>,

    filter: FilterState,
    latency_mode: LatencyMode,
    selected: Option<String>,

    source: DataSource,
    source_label: Option<String>,
    last_loaded_at: Option<DateTime<Utc>>,
    chatbot: ChatbotState,
}

impl<C: SnapshotCache, Tz: TimeZone> Dashboard<C, Tz> {
    pub fn new(cache: C, scope: impl Into<String>, engine: MetricsEngine<Tz>) -> Self {
        Self {
            cache,
            scope: scope.into(),
            engine,
            turns: Vec::new(),
            conversations: Vec::new(),
            filter: FilterState::default(),
            latency_mode: LatencyMode::default(),
            selected: None,
            source: DataSource::Empty,
            source_label: None,
            last_loaded_at: None,
            chatbot: ChatbotState::Disconnected,
        }
    }

    pub fn with_filter(mut self, filter: FilterState) -> Self {
        self.filter = filter;
        self
    }

    pub fn with_latency_mode(mut self, mode: LatencyMode) -> Self {
        self.latency_mode = mode;
        self
    }

    // ============================================
    // Triggers
    // ============================================

    /// Apply the outcome of a row fetch.
    ///
    /// Success replaces the working set and refreshes the snapshot. Failure
    /// falls back to the cached snapshot, and to an empty state without one.
    pub fn ingest_fetch(
        &mut self,
        fetched: Result<Vec<RawRow>>,
        origin: &str,
        since: Option<DateTime<Utc>>,
    ) -> DataSource {
        match fetched {
            Ok(rows) => {
                let turns = normalize_rows(&rows);
                let snapshot = CacheSnapshot::new(turns, origin, rows.len(), since);
                if let Err(e) = self.cache.write_snapshot(&self.scope, &snapshot) {
                    tracing::warn!(error = %e, scope = %self.scope, "Failed to write cache snapshot");
                }

                self.replace_turns(snapshot.data.turns, DataSource::Live);
                self.source_label = Some(origin.to_string());
                self.last_loaded_at = Some(snapshot.meta.cached_at);

                tracing::info!(
                    rows = rows.len(),
                    conversations = self.conversations.len(),
                    origin,
                    "Loaded live rows"
                );
                self.source
            }
            Err(e) => {
                tracing::warn!(error = %e, "Row fetch failed, falling back to cache");
                self.load_cached()
            }
        }
    }

    /// Load the cached snapshot without fetching.
    pub fn load_cached(&mut self) -> DataSource {
        let snapshot = match self.cache.read_snapshot(&self.scope) {
            Ok(snapshot) => snapshot,
            Err(e) => {
                tracing::warn!(error = %e, scope = %self.scope, "Cache read failed");
                None
            }
        };

        match snapshot.filter(|s| !s.data.turns.is_empty()) {
            Some(snapshot) => {
                tracing::info!(
                    turns = snapshot.data.turns.len(),
                    cached_at = %snapshot.meta.cached_at,
                    "Loaded cached snapshot"
                );
                self.replace_turns(snapshot.data.turns, DataSource::Cached);
                self.source_label = Some(snapshot.meta.source);
                self.last_loaded_at = Some(snapshot.meta.cached_at);
            }
            None => {
                tracing::info!(scope = %self.scope, "No usable data, dashboard is empty");
                self.replace_turns(Vec::new(), DataSource::Empty);
                self.source_label = None;
                self.last_loaded_at = None;
                self.selected = None;
            }
        }
        self.source
    }

    /// Apply a best-effort chatbot status lookup.
    pub fn ingest_status(&mut self, status: Result<Option<ChatbotStatus>>) -> ChatbotState {
        self.chatbot = match status {
            Ok(status) => ChatbotState::from_lookup(status.as_ref()),
            Err(e) => {
                tracing::warn!(error = %e, "Chatbot status lookup failed");
                ChatbotState::Disconnected
            }
        };
        self.chatbot
    }

    pub fn set_filter(&mut self, filter: FilterState) {
        self.filter = filter;
    }

    pub fn set_latency_mode(&mut self, mode: LatencyMode) {
        self.latency_mode = mode;
    }

    /// Select a conversation by id. Unknown ids are ignored.
    pub fn select(&mut self, conversation_id: &str) -> bool {
        let known = self
            .conversations
            .iter()
            .any(|c| c.conversation_id == conversation_id);
        if known {
            self.selected = Some(conversation_id.to_string());
        }
        known
    }

    fn replace_turns(&mut self, turns: Vec<Turn>, source: DataSource) {
        self.conversations = group(&turns);
        self.turns = turns;
        self.source = source;

        // Drop channel/type selections that no longer exist.
        let options = FilterOptions::from_turns(&self.turns);
        self.filter.channel = FilterOptions::sanitize(&options.channels, &self.filter.channel);
        self.filter.turn_type = FilterOptions::sanitize(&options.types, &self.filter.turn_type);
    }

    // ============================================
    // Derived state
    // ============================================

    /// Run filter and metrics for the current state.
    ///
    /// The resolved selection is kept, so it survives the next refilter when
    /// the conversation is still visible.
    pub fn view(&mut self, now: DateTime<Utc>) -> DashboardView {
        let filtered_turns = filter::apply(&self.turns, &self.filter, now);
        let conversations = filter::retain_conversations(&self.conversations, &filtered_turns);
        self.selected = filter::default_selection(self.selected.as_deref(), &conversations);

        let metrics = self.engine.compute(&filtered_turns, self.latency_mode, now);
        let failed = filtered_turns.iter().filter(|t| !t.success).cloned().collect();
        let escalated = filtered_turns.iter().filter(|t| t.escalated).cloned().collect();

        DashboardView {
            source: self.source,
            chatbot: self.chatbot,
            last_loaded_at: self.last_loaded_at,
            prompt_version: self.prompt_version(),
            filter: self.filter.clone(),
            latency_mode: self.latency_mode,
            options: FilterOptions::from_turns(&self.turns),
            filtered_turns,
            conversations,
            selected_id: self.selected.clone(),
            metrics,
            failed,
            escalated,
        }
    }

    /// Filtered turns behind one chart element.
    pub fn drill_down(&self, key: &DrillKey, now: DateTime<Utc>) -> Vec<Turn> {
        let filtered = filter::apply(&self.turns, &self.filter, now);
        filter::drill_down(&filtered, key, self.engine.timezone())
    }

    /// First prompt version among the loaded turns.
    pub fn prompt_version(&self) -> Option<String> {
        self.turns
            .iter()
            .filter_map(|t| t.prompt_version.as_deref())
            .find(|v| !v.trim().is_empty())
            .map(str::to_string)
    }

    pub fn turns(&self) -> &[Turn] {
        &self.turns
    }

    pub fn conversations(&self) -> &[Conversation] {
        &self.conversations
    }

    pub fn conversation(&self, conversation_id: &str) -> Option<&Conversation> {
        self.conversations
            .iter()
            .find(|c| c.conversation_id == conversation_id)
    }

    pub fn source(&self) -> DataSource {
        self.source
    }

    pub fn source_label(&self) -> Option<&str> {
        self.source_label.as_deref()
    }

    pub fn filter(&self) -> &FilterState {
        &self.filter
    }

    pub fn cache(&self) -> &C {
        &self.cache
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::Database;
    use crate::error::Error;
    use crate::filter::OutcomeLabel;
    use chrono::{Duration, TimeZone};
    use serde_json::json;

    fn now() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2025, 3, 31, 12, 0, 0).unwrap()
    }

    fn dashboard() -> Dashboard<Database, Utc> {
        let db = Database::open_in_memory().unwrap();
        db.migrate().unwrap();
        Dashboard::new(db, "", MetricsEngine::with_timezone(Utc))
    }

    fn row(convo: &str, hours_ago: i64, output: &str) -> RawRow {
        RawRow::from(json!({
            "conversation_id": convo,
            "created_at": (now() - Duration::hours(hours_ago)).to_rfc3339(),
            "channel": "web",
            "bot_key": "v3",
            "user_message": "Hoi",
            "ai_output": output,
            "metrics": { "latency_ms": 800, "tokens": 100, "total_cost": 0.25 }
        }))
    }

    fn rows() -> Vec<RawRow> {
        vec![
            row("c1", 1, "Bekijk https://shop.example/p/1"),
            row("c1", 2, "Sorry, ik weet het niet."),
            row("c2", 30, "Mail info@shop.example"),
        ]
    }

    #[test]
    fn live_fetch_populates_and_caches() {
        let mut d = dashboard();
        assert_eq!(d.ingest_fetch(Ok(rows()), "rest", None), DataSource::Live);
        assert_eq!(d.turns().len(), 3);
        assert_eq!(d.conversations().len(), 2);
        assert_eq!(d.prompt_version().as_deref(), Some("v3"));

        let cached = d.cache().read_snapshot("").unwrap().unwrap();
        assert_eq!(cached.data.turns.len(), 3);
        assert_eq!(cached.meta.row_count, 3);
        assert_eq!(cached.meta.source, "rest");
    }

    #[test]
    fn failed_fetch_falls_back_to_cache_then_empty() {
        let mut d = dashboard();
        d.ingest_fetch(Ok(rows()), "rest", None);

        let failure = || Err(Error::Source("HTTP request failed: timeout".to_string()));
        assert_eq!(d.ingest_fetch(failure(), "rest", None), DataSource::Cached);
        assert_eq!(d.turns().len(), 3);
        assert_eq!(d.source_label(), Some("rest"));

        let mut fresh = dashboard();
        assert_eq!(fresh.ingest_fetch(failure(), "rest", None), DataSource::Empty);
        let view = fresh.view(now());
        assert!(view.filtered_turns.is_empty());
        assert!(view.selected_id.is_none());
        assert_eq!(view.metrics.kpis.format_success_rate(), "0%");
    }

    #[test]
    fn empty_snapshot_counts_as_absent() {
        let mut d = dashboard();
        d.ingest_fetch(Ok(Vec::new()), "rest", None);
        assert_eq!(d.source(), DataSource::Live);

        let err = Err(Error::Source("offline".to_string()));
        assert_eq!(d.ingest_fetch(err, "rest", None), DataSource::Empty);
    }

    #[test]
    fn view_derives_tables_and_selection() {
        let mut d = dashboard();
        d.ingest_fetch(Ok(rows()), "rest", None);

        let view = d.view(now());
        assert_eq!(view.filtered_turns.len(), 3);
        assert_eq!(view.selected_id.as_deref(), Some("c1"));
        assert_eq!(view.failed.len(), 2);
        assert_eq!(view.escalated.len(), 1);
        assert_eq!(view.options.channels, vec!["all", "web"]);
        assert_eq!(view.selected().map(|c| c.turn_count), Some(2));
    }

    #[test]
    fn selection_survives_refilter_only_while_visible() {
        let mut d = dashboard();
        d.ingest_fetch(Ok(rows()), "rest", None);
        assert!(d.select("c2"));
        assert!(!d.select("nope"));
        assert_eq!(d.view(now()).selected_id.as_deref(), Some("c2"));

        d.set_filter(FilterState {
            search: "shop.example/p".to_string(),
            ..FilterState::default()
        });
        let view = d.view(now());
        assert_eq!(view.conversations.len(), 1);
        assert_eq!(view.selected_id.as_deref(), Some("c1"));
    }

    #[test]
    fn stale_channel_selection_resets_on_reload() {
        let mut d = dashboard().with_filter(FilterState {
            channel: "whatsapp".to_string(),
            ..FilterState::default()
        });
        d.ingest_fetch(Ok(rows()), "rest", None);
        assert_eq!(d.filter().channel, "all");
    }

    #[test]
    fn latency_toggle_changes_series_only() {
        let mut d = dashboard();
        d.ingest_fetch(Ok(rows()), "rest", None);
        let p95 = d.view(now());
        d.set_latency_mode(LatencyMode::Avg);
        let avg = d.view(now());
        assert_eq!(avg.latency_mode, LatencyMode::Avg);
        assert_eq!(p95.metrics.kpis, avg.metrics.kpis);
        assert_eq!(p95.metrics.day_counts, avg.metrics.day_counts);
    }

    #[test]
    fn drill_down_uses_filtered_turns() {
        let mut d = dashboard();
        d.ingest_fetch(Ok(rows()), "rest", None);
        let escalated = d.drill_down(&DrillKey::Outcome(OutcomeLabel::Escalated), now());
        assert_eq!(escalated.len(), 1);
        assert_eq!(escalated[0].conversation_id, "c2");
    }

    #[test]
    fn chatbot_status_mapping() {
        let mut d = dashboard();
        let up = ChatbotStatus {
            bot_id: "chatbot".to_string(),
            is_up: true,
            updated_at: None,
        };
        assert_eq!(d.ingest_status(Ok(Some(up))), ChatbotState::Online);
        assert_eq!(d.ingest_status(Ok(None)), ChatbotState::Disconnected);
        assert_eq!(
            d.ingest_status(Err(Error::Source("down".to_string()))),
            ChatbotState::Disconnected
        );
    }
}
