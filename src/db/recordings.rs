//! Recording files and their platform-generated meeting summaries.

use anyhow::{Context, Result};
use rusqlite::{params, Connection, OptionalExtension, Transaction};

use crate::platform::{RecordingFileRef, SmartSummary};

#[derive(Debug, Clone)]
pub struct RecordingRecord {
    pub id: i64,
    pub meeting_row_id: i64,
    pub record_file_id: String,
    pub lang: Option<String>,
}

pub struct RecordingRepository;

impl RecordingRepository {
    /// Insert or refresh the recording addressed by (meeting, file id).
    pub fn upsert(conn: &Connection, meeting_row_id: i64, file: &RecordingFileRef) -> Result<i64> {
        conn.execute(
            "INSERT INTO recordings (meeting_row_id, record_file_id, lang) VALUES (?1, ?2, ?3) \
             ON CONFLICT(meeting_row_id, record_file_id) DO UPDATE SET \
             lang = COALESCE(excluded.lang, lang), updated_at = CURRENT_TIMESTAMP",
            params![meeting_row_id, file.record_file_id, file.lang],
        )
        .context("Failed to upsert recording")?;

        conn.query_row(
            "SELECT id FROM recordings WHERE meeting_row_id = ?1 AND record_file_id = ?2",
            params![meeting_row_id, file.record_file_id],
            |row| row.get(0),
        )
        .context("Failed to read recording id")
    }

    pub fn find(
        conn: &Connection,
        meeting_row_id: i64,
        record_file_id: &str,
    ) -> Result<Option<RecordingRecord>> {
        conn.query_row(
            "SELECT id, meeting_row_id, record_file_id, lang FROM recordings \
             WHERE meeting_row_id = ?1 AND record_file_id = ?2",
            params![meeting_row_id, record_file_id],
            |row| {
                Ok(RecordingRecord {
                    id: row.get(0)?,
                    meeting_row_id: row.get(1)?,
                    record_file_id: row.get(2)?,
                    lang: row.get(3)?,
                })
            },
        )
        .optional()
        .context("Failed to query recording")
    }

    pub fn count(conn: &Connection) -> Result<i64> {
        conn.query_row("SELECT COUNT(*) FROM recordings", [], |row| row.get(0))
            .context("Failed to count recordings")
    }
}

#[derive(Debug, Clone)]
pub struct MeetingSummaryRecord {
    pub id: i64,
    pub summary: String,
    pub minutes: String,
    pub todo: String,
    pub version: i64,
}

pub struct MeetingSummaryRepository;

impl MeetingSummaryRepository {
    /// Write `content` as the sole latest summary of (meeting, recording),
    /// superseding the previous latest row. Returns the new version number.
    pub fn replace_latest(
        tx: &Transaction<'_>,
        meeting_row_id: i64,
        recording_id: i64,
        content: &SmartSummary,
    ) -> Result<i64> {
        let version: i64 = tx
            .query_row(
                "SELECT COALESCE(MAX(version), 0) + 1 FROM meeting_summaries \
                 WHERE meeting_row_id = ?1 AND recording_id = ?2",
                params![meeting_row_id, recording_id],
                |row| row.get(0),
            )
            .context("Failed to compute meeting summary version")?;

        tx.execute(
            "UPDATE meeting_summaries SET is_latest = 0 \
             WHERE meeting_row_id = ?1 AND recording_id = ?2 AND is_latest = 1",
            params![meeting_row_id, recording_id],
        )
        .context("Failed to supersede meeting summary")?;

        tx.execute(
            "INSERT INTO meeting_summaries \
             (meeting_row_id, recording_id, summary, minutes, todo, version, is_latest) \
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, 1)",
            params![
                meeting_row_id,
                recording_id,
                content.summary,
                content.minutes,
                content.todo,
                version,
            ],
        )
        .context("Failed to insert meeting summary")?;

        Ok(version)
    }

    pub fn latest(
        conn: &Connection,
        meeting_row_id: i64,
        recording_id: i64,
    ) -> Result<Option<MeetingSummaryRecord>> {
        conn.query_row(
            "SELECT id, summary, minutes, todo, version FROM meeting_summaries \
             WHERE meeting_row_id = ?1 AND recording_id = ?2 AND is_latest = 1",
            params![meeting_row_id, recording_id],
            |row| {
                Ok(MeetingSummaryRecord {
                    id: row.get(0)?,
                    summary: row.get(1)?,
                    minutes: row.get(2)?,
                    todo: row.get(3)?,
                    version: row.get(4)?,
                })
            },
        )
        .optional()
        .context("Failed to query latest meeting summary")
    }

    pub fn count_latest(conn: &Connection, meeting_row_id: i64, recording_id: i64) -> Result<i64> {
        conn.query_row(
            "SELECT COUNT(*) FROM meeting_summaries \
             WHERE meeting_row_id = ?1 AND recording_id = ?2 AND is_latest = 1",
            params![meeting_row_id, recording_id],
            |row| row.get(0),
        )
        .context("Failed to count meeting summaries")
    }
}
