//! Meeting record persistence.
//!
//! CRUD operations for the `meetings` and `meeting_participants` tables.
//! Raw SQL with rusqlite, no ORM.

use anyhow::{Context, Result};
use rusqlite::{params, Connection, OptionalExtension, Row};

use crate::platform::{MeetingInfo, ParticipantIdentity};

/// Lifecycle state recorded from meeting events.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MeetingStatus {
    Started,
    Ended,
}

impl MeetingStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            MeetingStatus::Started => "started",
            MeetingStatus::Ended => "ended",
        }
    }
}

/// A meeting record from the database.
#[derive(Debug, Clone)]
pub struct MeetingRecord {
    pub id: i64,
    pub platform: String,
    pub meeting_id: String,
    pub sub_meeting_id: String,
    pub meeting_code: Option<String>,
    pub subject: String,
    pub creator_userid: Option<String>,
    pub meeting_type: i64,
    pub start_time: i64,
    pub end_time: i64,
    pub status: Option<String>,
}

impl MeetingRecord {
    fn from_row(row: &Row<'_>) -> rusqlite::Result<Self> {
        Ok(Self {
            id: row.get(0)?,
            platform: row.get(1)?,
            meeting_id: row.get(2)?,
            sub_meeting_id: row.get(3)?,
            meeting_code: row.get(4)?,
            subject: row.get(5)?,
            creator_userid: row.get(6)?,
            meeting_type: row.get(7)?,
            start_time: row.get(8)?,
            end_time: row.get(9)?,
            status: row.get(10)?,
        })
    }
}

/// A participant row recorded from `participant-joined` events.
#[derive(Debug, Clone)]
pub struct MeetingParticipantRecord {
    pub id: i64,
    pub meeting_row_id: i64,
    pub participant_key: String,
    pub userid: Option<String>,
    pub uuid: Option<String>,
    pub name: Option<String>,
    pub joined_at: i64,
}

const MEETING_COLUMNS: &str = "id, platform, meeting_id, sub_meeting_id, meeting_code, subject, \
     creator_userid, meeting_type, start_time, end_time, status";

/// Repository for meeting records.
pub struct MeetingRepository;

impl MeetingRepository {
    /// Insert or update the meeting addressed by (platform, meeting_id, sub_meeting_id).
    /// Empty or zero fields in `info` never overwrite stored values, and
    /// `status = None` keeps the current status. Returns the row id.
    pub fn upsert(
        conn: &Connection,
        platform: &str,
        info: &MeetingInfo,
        status: Option<MeetingStatus>,
    ) -> Result<i64> {
        conn.execute(
            "INSERT INTO meetings (platform, meeting_id, sub_meeting_id, meeting_code, subject, \
             creator_userid, creator_uuid, meeting_type, start_time, end_time, status) \
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11) \
             ON CONFLICT(platform, meeting_id, sub_meeting_id) DO UPDATE SET \
             meeting_code = COALESCE(excluded.meeting_code, meeting_code), \
             subject = CASE WHEN excluded.subject <> '' THEN excluded.subject ELSE subject END, \
             creator_userid = COALESCE(excluded.creator_userid, creator_userid), \
             creator_uuid = COALESCE(excluded.creator_uuid, creator_uuid), \
             meeting_type = CASE WHEN excluded.meeting_type <> 0 THEN excluded.meeting_type ELSE meeting_type END, \
             start_time = CASE WHEN excluded.start_time > 0 THEN excluded.start_time ELSE start_time END, \
             end_time = CASE WHEN excluded.end_time > 0 THEN excluded.end_time ELSE end_time END, \
             status = COALESCE(excluded.status, status), \
             updated_at = CURRENT_TIMESTAMP",
            params![
                platform,
                info.meeting_id,
                info.sub_meeting_key(),
                info.meeting_code,
                info.subject,
                info.creator.userid,
                info.creator.uuid,
                info.meeting_type,
                info.start_time,
                info.end_time,
                status.map(|s| s.as_str()),
            ],
        )
        .context("Failed to upsert meeting")?;

        conn.query_row(
            "SELECT id FROM meetings WHERE platform = ?1 AND meeting_id = ?2 AND sub_meeting_id = ?3",
            params![platform, info.meeting_id, info.sub_meeting_key()],
            |row| row.get(0),
        )
        .context("Failed to read meeting id")
    }

    /// Get a meeting by its natural key.
    pub fn find(
        conn: &Connection,
        platform: &str,
        meeting_id: &str,
        sub_meeting_id: &str,
    ) -> Result<Option<MeetingRecord>> {
        let sql = format!(
            "SELECT {} FROM meetings WHERE platform = ?1 AND meeting_id = ?2 AND sub_meeting_id = ?3",
            MEETING_COLUMNS
        );
        conn.query_row(
            &sql,
            params![platform, meeting_id, sub_meeting_id],
            MeetingRecord::from_row,
        )
        .optional()
        .context("Failed to query meeting")
    }

    /// Get a meeting by row id.
    pub fn get(conn: &Connection, id: i64) -> Result<Option<MeetingRecord>> {
        let sql = format!("SELECT {} FROM meetings WHERE id = ?1", MEETING_COLUMNS);
        conn.query_row(&sql, params![id], MeetingRecord::from_row)
            .optional()
            .context("Failed to query meeting")
    }

    pub fn count(conn: &Connection) -> Result<i64> {
        conn.query_row("SELECT COUNT(*) FROM meetings", [], |row| row.get(0))
            .context("Failed to count meetings")
    }

    /// Record that `identity` joined the meeting. Re-joins keep the first
    /// join time and refresh the name. Returns `None` for an identity with
    /// no identifiers at all.
    pub fn record_participant(
        conn: &Connection,
        meeting_row_id: i64,
        identity: &ParticipantIdentity,
        joined_at: i64,
    ) -> Result<Option<i64>> {
        let Some(key) = identity.stable_key() else {
            return Ok(None);
        };

        conn.execute(
            "INSERT INTO meeting_participants (meeting_row_id, participant_key, userid, uuid, name, joined_at) \
             VALUES (?1, ?2, ?3, ?4, ?5, ?6) \
             ON CONFLICT(meeting_row_id, participant_key) DO UPDATE SET \
             userid = COALESCE(excluded.userid, userid), \
             uuid = COALESCE(excluded.uuid, uuid), \
             name = COALESCE(excluded.name, name)",
            params![
                meeting_row_id,
                key,
                identity.userid,
                identity.uuid,
                identity.name,
                joined_at,
            ],
        )
        .context("Failed to record meeting participant")?;

        conn.query_row(
            "SELECT id FROM meeting_participants WHERE meeting_row_id = ?1 AND participant_key = ?2",
            params![meeting_row_id, key],
            |row| row.get(0),
        )
        .map(Some)
        .context("Failed to read meeting participant id")
    }

    /// Participants of a meeting in join order.
    pub fn list_participants(
        conn: &Connection,
        meeting_row_id: i64,
    ) -> Result<Vec<MeetingParticipantRecord>> {
        let mut stmt = conn
            .prepare(
                "SELECT id, meeting_row_id, participant_key, userid, uuid, name, joined_at \
                 FROM meeting_participants WHERE meeting_row_id = ?1 ORDER BY joined_at, id",
            )
            .context("Failed to prepare participant query")?;

        let rows = stmt
            .query_map(params![meeting_row_id], |row| {
                Ok(MeetingParticipantRecord {
                    id: row.get(0)?,
                    meeting_row_id: row.get(1)?,
                    participant_key: row.get(2)?,
                    userid: row.get(3)?,
                    uuid: row.get(4)?,
                    name: row.get(5)?,
                    joined_at: row.get(6)?,
                })
            })
            .context("Failed to query participants")?;

        let mut participants = Vec::new();
        for row in rows {
            participants.push(row.context("Failed to read participant row")?);
        }
        Ok(participants)
    }
}
