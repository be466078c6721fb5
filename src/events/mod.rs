//! Webhook event model, dispatch and the background worker that runs it.
//!
//! A decrypted delivery is an [`Envelope`]: one event name and a payload
//! array. Each payload item is decoded into an [`EventPayload`] variant and
//! handed to the single handler registered for the event.

pub mod dispatcher;
pub mod handlers;
pub mod worker;

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::platform::{lenient_i64, MeetingInfo, Participant, ParticipantIdentity, RecordingFileRef};

pub use dispatcher::{DispatchReport, EventDispatcher, EventHandler};
pub use worker::{EventWorker, SubmitError};

/// Decrypted webhook message.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Envelope {
    pub event: String,
    #[serde(default)]
    pub trace_id: String,
    #[serde(default)]
    pub payload: Vec<Value>,
}

impl Envelope {
    pub fn parse(plaintext: &str) -> Result<Self, serde_json::Error> {
        serde_json::from_str(plaintext)
    }
}

/// Event names the service knows how to decode.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum EventKind {
    MeetingStarted,
    MeetingEnded,
    ParticipantJoined,
    RecordingCompleted,
    SmartFullSummary,
    SmartTranscripts,
    SmartMinutes,
}

impl EventKind {
    pub fn parse(event: &str) -> Option<Self> {
        match event {
            "meeting.started" => Some(EventKind::MeetingStarted),
            "meeting.end" => Some(EventKind::MeetingEnded),
            "meeting.participant-joined" => Some(EventKind::ParticipantJoined),
            "recording.completed" => Some(EventKind::RecordingCompleted),
            "smart.fullsummary" => Some(EventKind::SmartFullSummary),
            "smart.transcripts" => Some(EventKind::SmartTranscripts),
            "smart.minutes" => Some(EventKind::SmartMinutes),
            _ => None,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            EventKind::MeetingStarted => "meeting.started",
            EventKind::MeetingEnded => "meeting.end",
            EventKind::ParticipantJoined => "meeting.participant-joined",
            EventKind::RecordingCompleted => "recording.completed",
            EventKind::SmartFullSummary => "smart.fullsummary",
            EventKind::SmartTranscripts => "smart.transcripts",
            EventKind::SmartMinutes => "smart.minutes",
        }
    }
}

/// Payload of the meeting lifecycle events.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct MeetingEvent {
    #[serde(default, deserialize_with = "lenient_i64")]
    pub operate_time: i64,
    #[serde(default)]
    pub operator: Participant,
    pub meeting_info: MeetingInfo,
}

/// Payload of `recording.completed`.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct RecordingCompletedEvent {
    #[serde(default, deserialize_with = "lenient_i64")]
    pub operate_time: i64,
    #[serde(default)]
    pub operator: ParticipantIdentity,
    pub meeting_info: MeetingInfo,
    #[serde(default)]
    pub recording_files: Vec<RecordingFileRef>,
}

/// Payload of the `smart.*` notifications.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct SmartEvent {
    #[serde(default, deserialize_with = "lenient_i64")]
    pub operate_time: i64,
    pub meeting_info: MeetingInfo,
    #[serde(default)]
    pub recording_files: Vec<RecordingFileRef>,
}

/// One decoded payload item.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum EventPayload {
    MeetingStarted(MeetingEvent),
    MeetingEnded(MeetingEvent),
    ParticipantJoined(MeetingEvent),
    RecordingCompleted(RecordingCompletedEvent),
    Smart(EventKind, SmartEvent),
}

impl EventPayload {
    pub fn decode(kind: EventKind, item: Value) -> Result<Self, serde_json::Error> {
        Ok(match kind {
            EventKind::MeetingStarted => EventPayload::MeetingStarted(serde_json::from_value(item)?),
            EventKind::MeetingEnded => EventPayload::MeetingEnded(serde_json::from_value(item)?),
            EventKind::ParticipantJoined => {
                EventPayload::ParticipantJoined(serde_json::from_value(item)?)
            }
            EventKind::RecordingCompleted => {
                EventPayload::RecordingCompleted(serde_json::from_value(item)?)
            }
            EventKind::SmartFullSummary | EventKind::SmartTranscripts | EventKind::SmartMinutes => {
                EventPayload::Smart(kind, serde_json::from_value(item)?)
            }
        })
    }

    pub fn kind(&self) -> EventKind {
        match self {
            EventPayload::MeetingStarted(_) => EventKind::MeetingStarted,
            EventPayload::MeetingEnded(_) => EventKind::MeetingEnded,
            EventPayload::ParticipantJoined(_) => EventKind::ParticipantJoined,
            EventPayload::RecordingCompleted(_) => EventKind::RecordingCompleted,
            EventPayload::Smart(kind, _) => *kind,
        }
    }

    pub fn meeting_info(&self) -> &MeetingInfo {
        match self {
            EventPayload::MeetingStarted(e)
            | EventPayload::MeetingEnded(e)
            | EventPayload::ParticipantJoined(e) => &e.meeting_info,
            EventPayload::RecordingCompleted(e) => &e.meeting_info,
            EventPayload::Smart(_, e) => &e.meeting_info,
        }
    }
}
