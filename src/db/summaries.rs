//! Versioned AI-written summaries per (participant, meeting, recording).

use anyhow::{Context, Result};
use rusqlite::{params, Connection, OptionalExtension, Transaction};

/// A generated summary about to be stored.
#[derive(Debug, Clone)]
pub struct NewParticipantSummary<'a> {
    pub user_id: Option<i64>,
    pub participant_key: &'a str,
    pub participant_name: &'a str,
    pub meeting_row_id: i64,
    pub recording_id: i64,
    pub content: &'a str,
}

#[derive(Debug, Clone)]
pub struct ParticipantSummaryRecord {
    pub id: i64,
    pub user_id: Option<i64>,
    pub participant_key: String,
    pub participant_name: String,
    pub content: String,
    pub version: i64,
}

pub struct ParticipantSummaryRepository;

impl ParticipantSummaryRepository {
    /// Store `summary` as the latest version for its key, superseding the
    /// previous latest row. Returns the new version number.
    pub fn replace_latest(tx: &Transaction<'_>, summary: &NewParticipantSummary<'_>) -> Result<i64> {
        let version: i64 = tx
            .query_row(
                "SELECT COALESCE(MAX(version), 0) + 1 FROM participant_summaries \
                 WHERE participant_key = ?1 AND meeting_row_id = ?2 AND recording_id = ?3",
                params![
                    summary.participant_key,
                    summary.meeting_row_id,
                    summary.recording_id
                ],
                |row| row.get(0),
            )
            .context("Failed to compute participant summary version")?;

        tx.execute(
            "UPDATE participant_summaries SET is_latest = 0 \
             WHERE participant_key = ?1 AND meeting_row_id = ?2 AND recording_id = ?3 AND is_latest = 1",
            params![
                summary.participant_key,
                summary.meeting_row_id,
                summary.recording_id
            ],
        )
        .context("Failed to supersede participant summary")?;

        tx.execute(
            "INSERT INTO participant_summaries \
             (user_id, participant_key, participant_name, meeting_row_id, recording_id, content, version, is_latest) \
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, 1)",
            params![
                summary.user_id,
                summary.participant_key,
                summary.participant_name,
                summary.meeting_row_id,
                summary.recording_id,
                summary.content,
                version,
            ],
        )
        .context("Failed to insert participant summary")?;

        Ok(version)
    }

    pub fn latest(
        conn: &Connection,
        participant_key: &str,
        meeting_row_id: i64,
        recording_id: i64,
    ) -> Result<Option<ParticipantSummaryRecord>> {
        conn.query_row(
            "SELECT id, user_id, participant_key, participant_name, content, version \
             FROM participant_summaries \
             WHERE participant_key = ?1 AND meeting_row_id = ?2 AND recording_id = ?3 AND is_latest = 1",
            params![participant_key, meeting_row_id, recording_id],
            |row| {
                Ok(ParticipantSummaryRecord {
                    id: row.get(0)?,
                    user_id: row.get(1)?,
                    participant_key: row.get(2)?,
                    participant_name: row.get(3)?,
                    content: row.get(4)?,
                    version: row.get(5)?,
                })
            },
        )
        .optional()
        .context("Failed to query participant summary")
    }

    /// Latest summaries for one recording, ordered by participant name.
    pub fn list_latest(
        conn: &Connection,
        meeting_row_id: i64,
        recording_id: i64,
    ) -> Result<Vec<ParticipantSummaryRecord>> {
        let mut stmt = conn
            .prepare(
                "SELECT id, user_id, participant_key, participant_name, content, version \
                 FROM participant_summaries \
                 WHERE meeting_row_id = ?1 AND recording_id = ?2 AND is_latest = 1 \
                 ORDER BY participant_name, id",
            )
            .context("Failed to prepare participant summary query")?;

        let rows = stmt
            .query_map(params![meeting_row_id, recording_id], |row| {
                Ok(ParticipantSummaryRecord {
                    id: row.get(0)?,
                    user_id: row.get(1)?,
                    participant_key: row.get(2)?,
                    participant_name: row.get(3)?,
                    content: row.get(4)?,
                    version: row.get(5)?,
                })
            })
            .context("Failed to query participant summaries")?;

        let mut summaries = Vec::new();
        for row in rows {
            summaries.push(row.context("Failed to read participant summary row")?);
        }
        Ok(summaries)
    }

    pub fn count_versions(
        conn: &Connection,
        participant_key: &str,
        meeting_row_id: i64,
        recording_id: i64,
    ) -> Result<i64> {
        conn.query_row(
            "SELECT COUNT(*) FROM participant_summaries \
             WHERE participant_key = ?1 AND meeting_row_id = ?2 AND recording_id = ?3",
            params![participant_key, meeting_row_id, recording_id],
            |row| row.get(0),
        )
        .context("Failed to count participant summaries")
    }
}
