//! Meeting platform data types and REST client.

pub mod client;

use base64::{engine::general_purpose::STANDARD as BASE64, Engine};
use serde::{Deserialize, Deserializer, Serialize};

pub use client::{MeetingApi, RestMeetingApi};

/// Sub-meeting id used for meetings that are not part of a recurring series.
pub const ROOT_SUB_MEETING: &str = "__ROOT__";

/// Everything the platform may tell us about who someone is.
/// Only `uuid` is stable across sessions and devices.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ParticipantIdentity {
    #[serde(default, deserialize_with = "non_empty_string")]
    pub userid: Option<String>,
    #[serde(default, deserialize_with = "non_empty_string")]
    pub uuid: Option<String>,
    #[serde(default, deserialize_with = "non_empty_string")]
    pub open_id: Option<String>,
    #[serde(default, deserialize_with = "non_empty_string")]
    pub ms_open_id: Option<String>,
    #[serde(
        default,
        rename = "user_name",
        alias = "username",
        deserialize_with = "non_empty_string"
    )]
    pub name: Option<String>,
}

impl ParticipantIdentity {
    /// The external key identities are upserted by: uuid, else userid.
    pub fn external_key(&self) -> Option<&str> {
        self.uuid.as_deref().or(self.userid.as_deref())
    }

    pub fn display_name(&self) -> &str {
        self.name.as_deref().unwrap_or("")
    }

    /// Key for rows that must survive re-delivery, from the strongest
    /// identifier present. `None` when the identity is completely empty.
    pub fn stable_key(&self) -> Option<String> {
        if let Some(uuid) = &self.uuid {
            return Some(uuid.clone());
        }
        [
            ("userid", &self.userid),
            ("open_id", &self.open_id),
            ("ms_open_id", &self.ms_open_id),
            ("name", &self.name),
        ]
        .into_iter()
        .find_map(|(kind, value)| value.as_ref().map(|v| format!("{}:{}", kind, v)))
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct MeetingInfo {
    pub meeting_id: String,
    #[serde(default, deserialize_with = "non_empty_string")]
    pub meeting_code: Option<String>,
    #[serde(default, deserialize_with = "non_empty_string")]
    pub sub_meeting_id: Option<String>,
    #[serde(default)]
    pub subject: String,
    #[serde(default)]
    pub creator: ParticipantIdentity,
    #[serde(default, deserialize_with = "lenient_i64")]
    pub meeting_type: i64,
    #[serde(default, deserialize_with = "lenient_i64")]
    pub start_time: i64,
    #[serde(default, deserialize_with = "lenient_i64")]
    pub end_time: i64,
}

impl MeetingInfo {
    pub fn sub_meeting_key(&self) -> &str {
        self.sub_meeting_id.as_deref().unwrap_or(ROOT_SUB_MEETING)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RecordingFileRef {
    pub record_file_id: String,
    #[serde(default, deserialize_with = "non_empty_string")]
    pub lang: Option<String>,
}

/// A confirmed attendee from the participant roster.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Participant {
    #[serde(flatten)]
    pub identity: ParticipantIdentity,
    #[serde(default, deserialize_with = "non_empty_string")]
    pub phone: Option<String>,
    #[serde(default, alias = "instanceid", deserialize_with = "non_empty_string")]
    pub instance_id: Option<String>,
    #[serde(default, deserialize_with = "non_empty_string")]
    pub ip: Option<String>,
    #[serde(default, deserialize_with = "non_empty_string")]
    pub location: Option<String>,
    #[serde(default, deserialize_with = "non_empty_string")]
    pub os: Option<String>,
    #[serde(default)]
    pub is_enterprise_user: bool,
    #[serde(default, deserialize_with = "lenient_i64")]
    pub join_time: i64,
    #[serde(default, deserialize_with = "lenient_i64")]
    pub left_time: i64,
}

/// Transient identity attached to a transcript paragraph by diarization,
/// optionally enriched with roster or identity-store attributes.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct SpeakerInfo {
    #[serde(flatten)]
    pub identity: ParticipantIdentity,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub phone: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub instance_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub ip: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub location: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub os: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub is_enterprise_user: Option<bool>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct TranscriptWord {
    #[serde(default)]
    pub wid: String,
    #[serde(default, deserialize_with = "lenient_i64")]
    pub start_time: i64,
    #[serde(default, deserialize_with = "lenient_i64")]
    pub end_time: i64,
    #[serde(default)]
    pub text: String,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct TranscriptSentence {
    #[serde(default)]
    pub sid: String,
    #[serde(default, deserialize_with = "lenient_i64")]
    pub start_time: i64,
    #[serde(default, deserialize_with = "lenient_i64")]
    pub end_time: i64,
    #[serde(default, deserialize_with = "non_empty_string")]
    pub text: Option<String>,
    #[serde(default)]
    pub words: Vec<TranscriptWord>,
}

impl TranscriptSentence {
    /// Explicit sentence text, or its words joined.
    pub fn text(&self) -> String {
        match &self.text {
            Some(text) => text.clone(),
            None => self.words.iter().map(|w| w.text.as_str()).collect(),
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct TranscriptParagraph {
    #[serde(default)]
    pub pid: String,
    #[serde(default, deserialize_with = "lenient_i64")]
    pub start_time: i64,
    #[serde(default, deserialize_with = "lenient_i64")]
    pub end_time: i64,
    #[serde(default)]
    pub speaker_info: SpeakerInfo,
    #[serde(default)]
    pub sentences: Vec<TranscriptSentence>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Transcript {
    #[serde(default)]
    pub paragraphs: Vec<TranscriptParagraph>,
}

impl Transcript {
    pub fn is_empty(&self) -> bool {
        self.paragraphs.is_empty()
    }
}

/// AI-generated meeting content from the platform's smart features.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct SmartSummary {
    pub summary: String,
    pub minutes: String,
    pub todo: String,
}

/// Platform display names are sometimes base64 encoded. Decode only when the
/// result is non-empty printable UTF-8; otherwise keep the original.
pub fn decode_display_name(raw: &str) -> String {
    let trimmed = raw.trim();
    if trimmed.is_empty() || trimmed.len() % 4 != 0 {
        return raw.to_string();
    }
    match BASE64.decode(trimmed) {
        Ok(bytes) => match String::from_utf8(bytes) {
            Ok(decoded)
                if !decoded.trim().is_empty() && !decoded.chars().any(char::is_control) =>
            {
                decoded
            }
            _ => raw.to_string(),
        },
        Err(_) => raw.to_string(),
    }
}

fn non_empty_string<'de, D>(deserializer: D) -> Result<Option<String>, D::Error>
where
    D: Deserializer<'de>,
{
    let value = Option::<serde_json::Value>::deserialize(deserializer)?;
    Ok(match value {
        Some(serde_json::Value::String(s)) if !s.trim().is_empty() => Some(s),
        Some(serde_json::Value::Number(n)) => Some(n.to_string()),
        _ => None,
    })
}

/// Platform timestamps arrive as numbers or numeric strings.
pub(crate) fn lenient_i64<'de, D>(deserializer: D) -> Result<i64, D::Error>
where
    D: Deserializer<'de>,
{
    let value = Option::<serde_json::Value>::deserialize(deserializer)?;
    match value {
        None | Some(serde_json::Value::Null) => Ok(0),
        Some(serde_json::Value::Number(n)) => n
            .as_i64()
            .or_else(|| n.as_f64().map(|f| f as i64))
            .ok_or_else(|| serde::de::Error::custom(format!("invalid integer: {}", n))),
        Some(serde_json::Value::String(s)) if s.trim().is_empty() => Ok(0),
        Some(serde_json::Value::String(s)) => s
            .trim()
            .parse()
            .map_err(|_| serde::de::Error::custom(format!("invalid integer: {}", s))),
        Some(other) => Err(serde::de::Error::custom(format!(
            "expected integer, got {}",
            other
        ))),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_meeting_info_defaults_to_root_sub_meeting() {
        let info: MeetingInfo = serde_json::from_str(
            r#"{"meeting_id":"m1","subject":"Weekly","start_time":"1700000000","sub_meeting_id":""}"#,
        )
        .unwrap();
        assert_eq!(info.sub_meeting_key(), ROOT_SUB_MEETING);
        assert_eq!(info.start_time, 1_700_000_000);
        assert_eq!(info.end_time, 0);
    }

    #[test]
    fn test_identity_accepts_both_name_spellings() {
        let a: ParticipantIdentity =
            serde_json::from_str(r#"{"userid":"u1","user_name":"Alice"}"#).unwrap();
        let b: ParticipantIdentity =
            serde_json::from_str(r#"{"userid":"u1","username":"Alice"}"#).unwrap();
        assert_eq!(a, b);
        assert_eq!(a.display_name(), "Alice");
    }

    #[test]
    fn test_empty_identifiers_are_absent() {
        let identity: ParticipantIdentity =
            serde_json::from_str(r#"{"userid":"","uuid":"U-1","open_id":""}"#).unwrap();
        assert!(identity.userid.is_none());
        assert!(identity.open_id.is_none());
        assert_eq!(identity.external_key(), Some("U-1"));
    }

    #[test]
    fn test_stable_key_prefers_uuid() {
        let mut identity = ParticipantIdentity {
            userid: Some("u1".to_string()),
            uuid: Some("U-1".to_string()),
            name: Some("Alice".to_string()),
            ..Default::default()
        };
        assert_eq!(identity.stable_key().as_deref(), Some("U-1"));

        identity.uuid = None;
        assert_eq!(identity.stable_key().as_deref(), Some("userid:u1"));

        identity.userid = None;
        assert_eq!(identity.stable_key().as_deref(), Some("name:Alice"));

        assert_eq!(ParticipantIdentity::default().stable_key(), None);
    }

    #[test]
    fn test_sentence_text_falls_back_to_words() {
        let sentence: TranscriptSentence = serde_json::from_str(
            r#"{"sid":"s1","start_time":0,"end_time":900,
                "words":[{"wid":"w1","text":"Hello"},{"wid":"w2","text":" there"}]}"#,
        )
        .unwrap();
        assert_eq!(sentence.text(), "Hello there");
    }

    #[test]
    fn test_decode_display_name() {
        // "张三" base64
        assert_eq!(decode_display_name("5byg5LiJ"), "张三");
        assert_eq!(decode_display_name("QWxpY2U="), "Alice");
        // Plain names survive: not a multiple of 4, or decodes to garbage.
        assert_eq!(decode_display_name("Bob"), "Bob");
        assert_eq!(decode_display_name("abcd"), "abcd");
        assert_eq!(decode_display_name(""), "");
    }
}
