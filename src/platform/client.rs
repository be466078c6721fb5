use anyhow::{anyhow, Context, Result};
use async_trait::async_trait;
use base64::{engine::general_purpose::STANDARD as BASE64, Engine};
use hmac::{Hmac, Mac};
use reqwest::{Method, Url};
use serde::de::DeserializeOwned;
use serde::Deserialize;
use sha2::Sha256;
use std::time::{Duration, SystemTime, UNIX_EPOCH};
use tracing::{debug, error, info};

use super::{MeetingInfo, Participant, SmartSummary, Transcript, TranscriptParagraph};
use crate::config::MeetingApiConfig;

type HmacSha256 = Hmac<Sha256>;

const PARTICIPANT_PAGE_SIZE: usize = 100;
/// Guards against a server that keeps reporting more pages.
const MAX_PAGES: usize = 1000;

/// Read access to the meeting platform's REST API.
#[async_trait]
pub trait MeetingApi: Send + Sync {
    /// Confirmed participant roster for a meeting (occurrence).
    async fn participants(
        &self,
        meeting: &MeetingInfo,
        operator_userid: &str,
    ) -> Result<Vec<Participant>>;

    /// Smart summary, minutes and todo list generated for a recording file.
    async fn smart_summary(&self, record_file_id: &str, operator_userid: &str)
        -> Result<SmartSummary>;

    /// Full transcript with per-paragraph speaker info.
    async fn transcript(
        &self,
        meeting_id: &str,
        record_file_id: &str,
        operator_userid: &str,
    ) -> Result<Transcript>;
}

#[derive(Debug, Deserialize)]
struct ErrorResponse {
    error_info: ErrorInfo,
}

#[derive(Debug, Deserialize)]
struct ErrorInfo {
    #[serde(default)]
    error_code: i64,
    #[serde(default)]
    message: String,
}

#[derive(Debug, Deserialize)]
struct ParticipantsPage {
    #[serde(default)]
    participants: Vec<Participant>,
    #[serde(default)]
    has_remaining: bool,
    #[serde(default)]
    next_pos: Option<i64>,
}

#[derive(Debug, Default, Deserialize)]
struct FullSummaryResponse {
    #[serde(default)]
    ai_summary: String,
}

#[derive(Debug, Default, Deserialize)]
struct MinutesResponse {
    #[serde(default)]
    meeting_minute: MeetingMinute,
}

#[derive(Debug, Default, Deserialize)]
struct MeetingMinute {
    #[serde(default)]
    minute: String,
    #[serde(default)]
    todo: String,
}

#[derive(Debug, Deserialize)]
struct TranscriptPage {
    #[serde(default)]
    minutes: Transcript,
    #[serde(default)]
    more: Option<bool>,
}

pub struct RestMeetingApi {
    client: reqwest::Client,
    config: MeetingApiConfig,
}

impl RestMeetingApi {
    pub fn new(config: MeetingApiConfig) -> Result<Self> {
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(config.timeout_secs))
            .build()
            .context("Failed to build meeting API client")?;

        info!(
            "Initialized meeting API client with endpoint: {}",
            config.endpoint
        );

        Ok(Self { client, config })
    }

    fn url(&self, path: &str, query: &[(&str, &str)]) -> Result<Url> {
        let base = self.config.endpoint.trim_end_matches('/');
        let mut url =
            Url::parse(&format!("{}{}", base, path)).context("Invalid meeting API endpoint")?;
        if !query.is_empty() {
            let mut pairs = url.query_pairs_mut();
            for (key, value) in query {
                pairs.append_pair(key, value);
            }
        }
        Ok(url)
    }

    async fn get_json<T: DeserializeOwned>(&self, url: Url) -> Result<T> {
        let uri = match url.query() {
            Some(query) => format!("{}?{}", url.path(), query),
            None => url.path().to_string(),
        };
        let timestamp = SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .context("System clock before UNIX epoch")?
            .as_secs()
            .to_string();
        let nonce = (uuid::Uuid::new_v4().as_u128() % 100_000_000).to_string();
        let signature = sign_request(
            &self.config.secret_id,
            &self.config.secret_key,
            Method::GET.as_str(),
            &nonce,
            &timestamp,
            &uri,
            "",
        )?;

        debug!("GET {}", uri);

        let response = self
            .client
            .get(url)
            .header("Content-Type", "application/json")
            .header("X-TC-Key", &self.config.secret_id)
            .header("X-TC-Timestamp", &timestamp)
            .header("X-TC-Nonce", &nonce)
            .header("X-TC-Signature", signature)
            .header("AppId", &self.config.app_id)
            .header("SdkId", &self.config.sdk_id)
            .header("X-TC-Registered", "1")
            .send()
            .await
            .with_context(|| format!("Failed to send request to meeting API: {}", uri))?;

        let status = response.status();
        let response_text = response
            .text()
            .await
            .context("Failed to read meeting API response body")?;

        if !status.is_success() {
            error!(
                "Meeting API request {} failed with status {}: {}",
                uri, status, response_text
            );

            if let Ok(error_response) = serde_json::from_str::<ErrorResponse>(&response_text) {
                return Err(anyhow!(
                    "Meeting API error {}: {}",
                    error_response.error_info.error_code,
                    error_response.error_info.message
                ));
            }

            return Err(anyhow!(
                "Meeting API request failed with status {}: {}",
                status,
                response_text
            ));
        }

        serde_json::from_str(&response_text)
            .with_context(|| format!("Failed to parse meeting API response for {}", uri))
    }
}

#[async_trait]
impl MeetingApi for RestMeetingApi {
    async fn participants(
        &self,
        meeting: &MeetingInfo,
        operator_userid: &str,
    ) -> Result<Vec<Participant>> {
        let path = format!("/v1/meetings/{}/participants", meeting.meeting_id);
        let size = PARTICIPANT_PAGE_SIZE.to_string();
        let mut pos = 0i64;
        let mut participants = Vec::new();

        for _ in 0..MAX_PAGES {
            let pos_str = pos.to_string();
            let mut query = vec![
                ("userid", operator_userid),
                ("pos", pos_str.as_str()),
                ("size", size.as_str()),
            ];
            if let Some(sub) = meeting.sub_meeting_id.as_deref() {
                query.push(("sub_meeting_id", sub));
            }

            let page: ParticipantsPage = self.get_json(self.url(&path, &query)?).await?;
            let fetched = page.participants.len();
            participants.extend(page.participants);

            match page.next_pos {
                Some(next) if page.has_remaining && fetched > 0 => pos = next,
                _ => break,
            }
        }

        debug!(
            "Fetched {} participants for meeting {}",
            participants.len(),
            meeting.meeting_id
        );
        Ok(participants)
    }

    async fn smart_summary(
        &self,
        record_file_id: &str,
        operator_userid: &str,
    ) -> Result<SmartSummary> {
        let query = [
            ("record_file_id", record_file_id),
            ("operator_id", operator_userid),
            ("operator_id_type", "1"),
        ];
        let summary_url = self.url("/v1/smart/fullsummary", &query)?;
        let minutes_url = self.url(
            &format!("/v1/smart/minutes/{}", record_file_id),
            &query[1..],
        )?;

        let (full, minutes): (FullSummaryResponse, MinutesResponse) = tokio::try_join!(
            self.get_json(summary_url),
            self.get_json(minutes_url)
        )?;

        Ok(SmartSummary {
            summary: full.ai_summary,
            minutes: minutes.meeting_minute.minute,
            todo: minutes.meeting_minute.todo,
        })
    }

    async fn transcript(
        &self,
        meeting_id: &str,
        record_file_id: &str,
        operator_userid: &str,
    ) -> Result<Transcript> {
        let limit = self.config.transcript_page_size.max(1);
        let limit_str = limit.to_string();
        let mut next_pid = String::from("0");
        let mut paragraphs: Vec<TranscriptParagraph> = Vec::new();

        for _ in 0..MAX_PAGES {
            let query = [
                ("meeting_id", meeting_id),
                ("record_file_id", record_file_id),
                ("operator_id", operator_userid),
                ("operator_id_type", "1"),
                ("pid", next_pid.as_str()),
                ("limit", limit_str.as_str()),
            ];
            let url = self.url("/v1/records/transcripts/details", &query)?;
            let page: TranscriptPage = self.get_json(url).await?;

            let fetched = page.minutes.paragraphs.len();
            let last_pid = page.minutes.paragraphs.last().map(|p| p.pid.clone());
            paragraphs.extend(page.minutes.paragraphs);

            let more = page.more.unwrap_or(fetched >= limit);
            match last_pid.as_deref().and_then(next_paragraph_id) {
                Some(pid) if more && fetched > 0 => next_pid = pid,
                _ => break,
            }
        }

        debug!(
            "Fetched {} transcript paragraphs for record file {}",
            paragraphs.len(),
            record_file_id
        );
        Ok(Transcript { paragraphs })
    }
}

/// Paging resumes after the last paragraph id returned; non-numeric ids end paging.
fn next_paragraph_id(pid: &str) -> Option<String> {
    pid.parse::<u64>().ok().map(|n| (n + 1).to_string())
}

/// base64(hex(HMAC-SHA256(secret_key, string_to_sign))).
pub fn sign_request(
    secret_id: &str,
    secret_key: &str,
    method: &str,
    nonce: &str,
    timestamp: &str,
    uri: &str,
    body: &str,
) -> Result<String> {
    let header_string = format!(
        "X-TC-Key={}&X-TC-Nonce={}&X-TC-Timestamp={}",
        secret_id, nonce, timestamp
    );
    let string_to_sign = format!("{}\n{}\n{}\n{}", method, header_string, uri, body);

    let mut mac = HmacSha256::new_from_slice(secret_key.as_bytes())
        .map_err(|e| anyhow!("Invalid meeting API secret key: {}", e))?;
    mac.update(string_to_sign.as_bytes());
    let hex = format!("{:x}", mac.finalize().into_bytes());

    Ok(BASE64.encode(hex))
}
