//! Plain-text rendering of a transcript for prompts.

use std::collections::BTreeSet;
use thiserror::Error;

use crate::platform::{decode_display_name, Transcript, TranscriptParagraph};

pub const UNKNOWN_SPEAKER: &str = "unknown speaker";

#[derive(Debug, Error, PartialEq)]
pub enum TimestampError {
    #[error("timestamp must not be negative, got {0}")]
    Negative(f64),
    #[error("timestamp must be finite")]
    NotFinite,
}

/// Milliseconds to zero-padded `HH:MM:SS`, truncating sub-second parts.
pub fn format_timestamp(ms: f64) -> Result<String, TimestampError> {
    if !ms.is_finite() {
        return Err(TimestampError::NotFinite);
    }
    if ms < 0.0 {
        return Err(TimestampError::Negative(ms));
    }

    let total_seconds = ms as u64 / 1000;
    let hours = total_seconds / 3600;
    let minutes = (total_seconds % 3600) / 60;
    let seconds = total_seconds % 60;
    Ok(format!("{:02}:{:02}:{:02}", hours, minutes, seconds))
}

/// Rendered transcript plus the names of everyone detected speaking.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct FormattedTranscript {
    pub text: String,
    pub speakers: BTreeSet<String>,
}

impl FormattedTranscript {
    pub fn spoke(&self, name: &str) -> bool {
        self.speakers.contains(name)
    }
}

/// Display name for a paragraph's speaker, decoding base64 names.
pub fn speaker_name(paragraph: &TranscriptParagraph) -> Option<String> {
    paragraph
        .speaker_info
        .identity
        .name
        .as_deref()
        .map(decode_display_name)
        .filter(|name| !name.trim().is_empty())
}

/// Render `"{speaker}({HH:MM:SS})：{text}"` per paragraph, separated by a
/// blank line. Fails on the first paragraph with an invalid start time.
pub fn format_transcript(transcript: &Transcript) -> Result<FormattedTranscript, TimestampError> {
    let mut formatted = FormattedTranscript::default();
    let mut blocks = Vec::with_capacity(transcript.paragraphs.len());

    for paragraph in &transcript.paragraphs {
        let start = paragraph
            .sentences
            .first()
            .map(|s| s.start_time)
            .unwrap_or(paragraph.start_time);
        let timestamp = format_timestamp(start as f64)?;

        let speaker = match speaker_name(paragraph) {
            Some(name) => {
                formatted.speakers.insert(name.clone());
                name
            }
            None => UNKNOWN_SPEAKER.to_string(),
        };

        let text: String = paragraph.sentences.iter().map(|s| s.text()).collect();
        blocks.push(format!("{}({})：{}", speaker, timestamp, text));
    }

    formatted.text = blocks.join("\n\n");
    Ok(formatted)
}
