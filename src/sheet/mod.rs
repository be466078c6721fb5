//! Denormalized spreadsheet-like mirror of meetings, participants and summaries.
//!
//! Writes are search-then-create-or-update keyed by a single field. The mirror
//! is eventually consistent with the database; nothing is compensated.

use anyhow::{anyhow, Context, Result};
use async_trait::async_trait;
use serde::Deserialize;
use serde_json::{json, Map, Value};
use std::time::Duration;
use tracing::{debug, error, info};

use crate::config::SheetConfig;
use crate::platform::{MeetingInfo, ParticipantIdentity};

pub type Fields = Map<String, Value>;

#[async_trait]
pub trait SheetStore: Send + Sync {
    /// Find the record in `table` whose `key_field` equals `key` and update it,
    /// or create it. Returns the store's record id.
    async fn upsert_record(
        &self,
        table: &str,
        key_field: &str,
        key: &str,
        fields: Fields,
    ) -> Result<String>;
}

/// Table names the handlers and the pipeline write to.
#[derive(Debug, Clone)]
pub struct SheetTables {
    pub meetings: String,
    pub participants: String,
    pub summaries: String,
}

impl From<&SheetConfig> for SheetTables {
    fn from(config: &SheetConfig) -> Self {
        Self {
            meetings: config.meetings_table.clone(),
            participants: config.participants_table.clone(),
            summaries: config.summaries_table.clone(),
        }
    }
}

/// Key field of the meetings table.
pub const MEETING_KEY_FIELD: &str = "meeting_key";
/// Key field of the participants and summaries tables.
pub const RECORD_KEY_FIELD: &str = "record_key";

pub fn meeting_key(platform: &str, info: &MeetingInfo) -> String {
    format!("{}:{}:{}", platform, info.meeting_id, info.sub_meeting_key())
}

pub fn meeting_fields(platform: &str, info: &MeetingInfo, status: Option<&str>) -> Fields {
    let mut fields = Fields::new();
    fields.insert(MEETING_KEY_FIELD.into(), json!(meeting_key(platform, info)));
    fields.insert("meeting_id".into(), json!(info.meeting_id));
    fields.insert("sub_meeting_id".into(), json!(info.sub_meeting_key()));
    if let Some(code) = &info.meeting_code {
        fields.insert("meeting_code".into(), json!(code));
    }
    if !info.subject.is_empty() {
        fields.insert("subject".into(), json!(info.subject));
    }
    if let Some(creator) = &info.creator.name {
        fields.insert("creator".into(), json!(creator));
    }
    if info.start_time > 0 {
        fields.insert("start_time".into(), json!(info.start_time));
    }
    if info.end_time > 0 {
        fields.insert("end_time".into(), json!(info.end_time));
    }
    if let Some(status) = status {
        fields.insert("status".into(), json!(status));
    }
    fields
}

/// Fields for one participant row; `record_key` combines the meeting key
/// with the participant's stable key.
pub fn participant_fields(
    platform: &str,
    info: &MeetingInfo,
    participant_key: &str,
    identity: &ParticipantIdentity,
    joined_at: i64,
) -> Fields {
    let meeting = meeting_key(platform, info);
    let mut fields = Fields::new();
    fields.insert(
        RECORD_KEY_FIELD.into(),
        json!(format!("{}:{}", meeting, participant_key)),
    );
    fields.insert(MEETING_KEY_FIELD.into(), json!(meeting));
    fields.insert("participant_key".into(), json!(participant_key));
    fields.insert("name".into(), json!(identity.display_name()));
    if let Some(userid) = &identity.userid {
        fields.insert("userid".into(), json!(userid));
    }
    if joined_at > 0 {
        fields.insert("joined_at".into(), json!(joined_at));
    }
    fields
}

/// Used when no sheet endpoint is configured.
pub struct DisabledSheetStore;

#[async_trait]
impl SheetStore for DisabledSheetStore {
    async fn upsert_record(
        &self,
        table: &str,
        _key_field: &str,
        key: &str,
        _fields: Fields,
    ) -> Result<String> {
        debug!("Sheet mirror disabled, skipping {} record {}", table, key);
        Ok(String::new())
    }
}

#[derive(Debug, Deserialize)]
struct SearchResponse {
    #[serde(default)]
    data: SearchData,
}

#[derive(Debug, Default, Deserialize)]
struct SearchData {
    #[serde(default)]
    items: Vec<RecordRef>,
}

#[derive(Debug, Deserialize)]
struct RecordResponse {
    data: RecordData,
}

#[derive(Debug, Deserialize)]
struct RecordData {
    record: RecordRef,
}

#[derive(Debug, Deserialize)]
struct RecordRef {
    record_id: String,
}

pub struct HttpSheetStore {
    client: reqwest::Client,
    endpoint: String,
    app_token: Option<String>,
}

impl HttpSheetStore {
    pub fn new(endpoint: &str, config: &SheetConfig) -> Result<Self> {
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(config.timeout_secs))
            .build()
            .context("Failed to build sheet client")?;

        info!("Initialized sheet mirror with endpoint: {}", endpoint);

        Ok(Self {
            client,
            endpoint: endpoint.trim_end_matches('/').to_string(),
            app_token: config.app_token.clone(),
        })
    }

    async fn send(&self, request: reqwest::RequestBuilder, what: &str) -> Result<String> {
        let request = match &self.app_token {
            Some(token) => request.bearer_auth(token),
            None => request,
        };

        let response = request
            .send()
            .await
            .with_context(|| format!("Failed to send sheet {} request", what))?;

        let status = response.status();
        let response_text = response
            .text()
            .await
            .with_context(|| format!("Failed to read sheet {} response", what))?;

        if !status.is_success() {
            error!(
                "Sheet {} request failed with status {}: {}",
                what, status, response_text
            );
            return Err(anyhow!(
                "Sheet {} request failed with status {}: {}",
                what,
                status,
                response_text
            ));
        }

        Ok(response_text)
    }

    async fn search(&self, table: &str, key_field: &str, key: &str) -> Result<Option<String>> {
        let url = format!("{}/tables/{}/records/search", self.endpoint, table);
        let body = search_body(key_field, key);

        let text = self.send(self.client.post(&url).json(&body), "search").await?;
        let parsed: SearchResponse =
            serde_json::from_str(&text).context("Failed to parse sheet search response")?;

        Ok(parsed.data.items.into_iter().next().map(|r| r.record_id))
    }
}

#[async_trait]
impl SheetStore for HttpSheetStore {
    async fn upsert_record(
        &self,
        table: &str,
        key_field: &str,
        key: &str,
        mut fields: Fields,
    ) -> Result<String> {
        fields.insert(key_field.to_string(), Value::String(key.to_string()));
        let body = json!({ "fields": fields });

        let text = match self.search(table, key_field, key).await? {
            Some(record_id) => {
                debug!("Updating sheet record {} in {}", record_id, table);
                let url = format!("{}/tables/{}/records/{}", self.endpoint, table, record_id);
                self.send(self.client.put(&url).json(&body), "update").await?
            }
            None => {
                debug!("Creating sheet record for {} in {}", key, table);
                let url = format!("{}/tables/{}/records", self.endpoint, table);
                self.send(self.client.post(&url).json(&body), "create").await?
            }
        };

        let parsed: RecordResponse =
            serde_json::from_str(&text).context("Failed to parse sheet record response")?;
        Ok(parsed.data.record.record_id)
    }
}

fn search_body(key_field: &str, key: &str) -> Value {
    json!({
        "page_size": 1,
        "filter": {
            "conjunction": "and",
            "conditions": [
                { "field_name": key_field, "operator": "is", "value": [key] }
            ]
        }
    })
}

/// Builds the configured store, or the disabled one when no endpoint is set.
pub fn from_config(config: &SheetConfig) -> Result<std::sync::Arc<dyn SheetStore>> {
    match config.endpoint.as_deref().filter(|e| !e.trim().is_empty()) {
        Some(endpoint) => Ok(std::sync::Arc::new(HttpSheetStore::new(endpoint, config)?)),
        None => {
            info!("No sheet endpoint configured, spreadsheet mirror disabled");
            Ok(std::sync::Arc::new(DisabledSheetStore))
        }
    }
}
