//! Remote row source
//!
//! Fetches raw chat event rows from a PostgREST-style REST backend (such as
//! Supabase). This is the only asynchronous boundary: callers await a fetch
//! and hand the outcome to [`crate::dashboard::Dashboard::ingest_fetch`].

use std::future::Future;
use std::time::Duration;

use chrono::{DateTime, SecondsFormat, Utc};
use reqwest::header::{HeaderMap, HeaderName, HeaderValue, AUTHORIZATION, CONTENT_TYPE};

use crate::config::SourceConfig;
use crate::error::{Error, Result};
use crate::types::{ChatbotStatus, RawRow};

/// Columns requested from the events table.
pub const EVENT_COLUMNS: &str = "id,workspace_id,bot_key,event_id,conversation_id,created_at,\
updated_at,channel,type,topic,prompt_version,user_message,ai_output,success,escalated,lead,\
reason,outcome,metrics";

/// Window and size of one fetch.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RowQuery {
    /// Only rows created at or after this instant
    pub since: Option<DateTime<Utc>>,
    pub limit: usize,
}

impl RowQuery {
    /// Query covering the last `range_days` days (or everything for `None`).
    pub fn for_range(range_days: Option<u32>, limit: usize, now: DateTime<Utc>) -> Self {
        Self {
            since: range_days.map(|d| now - chrono::Duration::days(i64::from(d))),
            limit,
        }
    }
}

/// Something that can produce raw rows and a chatbot liveness record.
pub trait RowSource {
    /// Fetch rows, newest first.
    fn fetch_rows(&self, query: &RowQuery) -> impl Future<Output = Result<Vec<RawRow>>> + Send;

    /// Best-effort liveness lookup; `Ok(None)` when the bot has no record.
    fn fetch_status(
        &self,
        bot_id: &str,
    ) -> impl Future<Output = Result<Option<ChatbotStatus>>> + Send;

    /// Label recorded in cache metadata and the fetch log.
    fn label(&self) -> &'static str;
}

/// HTTP client for a PostgREST-style events table
pub struct RestRowSource {
    config: SourceConfig,
    http_client: reqwest::Client,
    base_url: String,
}

impl RestRowSource {
    /// Create a new source from configuration
    ///
    /// Returns an error if the URL or API key is missing or malformed.
    pub fn new(config: SourceConfig) -> Result<Self> {
        config.validate()?;

        let base_url = config
            .url
            .clone()
            .filter(|u| !u.trim().is_empty())
            .ok_or_else(|| Error::Config("source.url is required".to_string()))?
            .trim_end_matches('/')
            .to_string();

        let api_key = config.resolved_api_key().ok_or_else(|| {
            Error::Config(format!(
                "source.api_key (or {}) is required",
                crate::config::API_KEY_ENV
            ))
        })?;

        let mut headers = HeaderMap::new();
        headers.insert(CONTENT_TYPE, HeaderValue::from_static("application/json"));

        let key_value = HeaderValue::from_str(&api_key)
            .map_err(|e| Error::Config(format!("invalid api_key: {}", e)))?;
        headers.insert(HeaderName::from_static("apikey"), key_value);

        let auth_value = format!("Bearer {}", api_key);
        headers.insert(
            AUTHORIZATION,
            HeaderValue::from_str(&auth_value)
                .map_err(|e| Error::Config(format!("invalid api_key: {}", e)))?,
        );

        let http_client = reqwest::Client::builder()
            .timeout(Duration::from_secs(config.timeout_secs))
            .default_headers(headers)
            .build()
            .map_err(|e| Error::Config(format!("failed to create HTTP client: {}", e)))?;

        Ok(Self {
            config,
            http_client,
            base_url,
        })
    }

    /// URL for a rows query
    pub fn rows_url(&self, query: &RowQuery) -> String {
        let mut url = format!(
            "{}/rest/v1/{}?select={}",
            self.base_url,
            urlencoding::encode(&self.config.table),
            urlencoding::encode(EVENT_COLUMNS)
        );
        if let Some(since) = query.since {
            let since = since.to_rfc3339_opts(SecondsFormat::Millis, true);
            url.push_str(&format!("&created_at=gte.{}", urlencoding::encode(&since)));
        }
        let limit = query.limit.min(self.config.limit).max(1);
        url.push_str(&format!("&order=created_at.desc&limit={}", limit));
        url
    }

    /// URL for a chatbot status lookup
    pub fn status_url(&self, bot_id: &str) -> String {
        format!(
            "{}/rest/v1/{}?select=bot_id,is_up,updated_at&bot_id=eq.{}&limit=1",
            self.base_url,
            urlencoding::encode(&self.config.status_table),
            urlencoding::encode(bot_id)
        )
    }

    async fn get_json(&self, url: &str) -> Result<serde_json::Value> {
        let response = self
            .http_client
            .get(url)
            .send()
            .await
            .map_err(|e| Error::Source(format!("HTTP request failed: {}", e)))?;

        let status = response.status();

        if status.is_success() {
            response
                .json()
                .await
                .map_err(|e| Error::Source(format!("failed to parse response: {}", e)))
        } else {
            let error_text = response
                .text()
                .await
                .unwrap_or_else(|_| "unknown".to_string());
            Err(Error::Source(format!("API error ({}): {}", status, error_text)))
        }
    }
}

impl RowSource for RestRowSource {
    async fn fetch_rows(&self, query: &RowQuery) -> Result<Vec<RawRow>> {
        let url = self.rows_url(query);
        tracing::debug!(table = %self.config.table, since = ?query.since, "Fetching rows");

        let rows = rows_from_json(self.get_json(&url).await?)?;
        tracing::info!(rows = rows.len(), "Fetched rows");
        Ok(rows)
    }

    async fn fetch_status(&self, bot_id: &str) -> Result<Option<ChatbotStatus>> {
        let body = self.get_json(&self.status_url(bot_id)).await?;
        let mut records: Vec<ChatbotStatus> = serde_json::from_value(body)?;
        Ok(if records.is_empty() {
            None
        } else {
            Some(records.swap_remove(0))
        })
    }

    fn label(&self) -> &'static str {
        "rest"
    }
}

/// Turn a response body into rows. The body must be a JSON array.
pub fn rows_from_json(body: serde_json::Value) -> Result<Vec<RawRow>> {
    match body {
        serde_json::Value::Array(items) => Ok(items.into_iter().map(RawRow::from_value).collect()),
        other => Err(Error::Source(format!(
            "expected a JSON array of rows, got {}",
            json_kind(&other)
        ))),
    }
}

fn json_kind(value: &serde_json::Value) -> &'static str {
    match value {
        serde_json::Value::Null => "null",
        serde_json::Value::Bool(_) => "a boolean",
        serde_json::Value::Number(_) => "a number",
        serde_json::Value::String(_) => "a string",
        serde_json::Value::Array(_) => "an array",
        serde_json::Value::Object(_) => "an object",
    }
}
