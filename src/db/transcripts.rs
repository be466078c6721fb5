//! Transcript hierarchy: transcript → paragraph → sentence → word, plus
//! the durable speakers paragraphs point at.

use anyhow::{Context, Result};
use rusqlite::{params, Connection, OptionalExtension};

use crate::platform::{
    ParticipantIdentity, SpeakerInfo, TranscriptParagraph, TranscriptSentence, TranscriptWord,
};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TranscriptStatus {
    Ingesting,
    Completed,
}

impl TranscriptStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            TranscriptStatus::Ingesting => "ingesting",
            TranscriptStatus::Completed => "completed",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "ingesting" => Some(TranscriptStatus::Ingesting),
            "completed" => Some(TranscriptStatus::Completed),
            _ => None,
        }
    }
}

#[derive(Debug, Clone)]
pub struct TranscriptRecord {
    pub id: i64,
    pub recording_id: i64,
    pub status: TranscriptStatus,
    pub paragraph_count: i64,
    /// Token of the ingest currently writing this transcript.
    pub owner: Option<String>,
    /// Unix seconds of the owner's last committed batch.
    pub heartbeat_at: i64,
}

impl TranscriptRecord {
    pub fn is_completed(&self) -> bool {
        self.status == TranscriptStatus::Completed
    }

    /// An unfinished transcript whose owner released it or stopped
    /// renewing its lease.
    pub fn is_abandoned(&self, now: i64, lease_secs: i64) -> bool {
        !self.is_completed() && (self.owner.is_none() || now - self.heartbeat_at >= lease_secs)
    }
}

/// Row counts for one transcript.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct TranscriptCounts {
    pub paragraphs: i64,
    pub sentences: i64,
    pub words: i64,
}

pub struct TranscriptRepository;

impl TranscriptRepository {
    pub fn find_by_recording(conn: &Connection, recording_id: i64) -> Result<Option<TranscriptRecord>> {
        let row = conn
            .query_row(
                "SELECT id, recording_id, status, paragraph_count, owner, heartbeat_at \
                 FROM transcripts WHERE recording_id = ?1",
                params![recording_id],
                |row| {
                    Ok((
                        row.get::<_, i64>(0)?,
                        row.get::<_, i64>(1)?,
                        row.get::<_, String>(2)?,
                        row.get::<_, i64>(3)?,
                        row.get::<_, Option<String>>(4)?,
                        row.get::<_, i64>(5)?,
                    ))
                },
            )
            .optional()
            .context("Failed to query transcript")?;

        Ok(row.map(
            |(id, recording_id, status, paragraph_count, owner, heartbeat_at)| TranscriptRecord {
                id,
                recording_id,
                // Unknown states are treated as unfinished so they get redone.
                status: TranscriptStatus::parse(&status).unwrap_or(TranscriptStatus::Ingesting),
                paragraph_count,
                owner,
                heartbeat_at,
            },
        ))
    }

    /// Create the transcript row in the ingesting state, owned by `owner`.
    pub fn create(conn: &Connection, recording_id: i64, owner: &str, now: i64) -> Result<i64> {
        conn.execute(
            "INSERT INTO transcripts (recording_id, status, owner, heartbeat_at) VALUES (?1, ?2, ?3, ?4)",
            params![recording_id, TranscriptStatus::Ingesting.as_str(), owner, now],
        )
        .context("Failed to create transcript")?;
        Ok(conn.last_insert_rowid())
    }

    /// Take over an abandoned transcript.
    pub fn claim(conn: &Connection, transcript_id: i64, owner: &str, now: i64) -> Result<()> {
        conn.execute(
            "UPDATE transcripts SET owner = ?1, heartbeat_at = ?2 WHERE id = ?3",
            params![owner, now, transcript_id],
        )
        .context("Failed to claim transcript")?;
        Ok(())
    }

    /// Extend the owner's lease. False when `owner` no longer holds the
    /// transcript.
    pub fn renew(conn: &Connection, transcript_id: i64, owner: &str, now: i64) -> Result<bool> {
        let updated = conn
            .execute(
                "UPDATE transcripts SET heartbeat_at = ?1 \
                 WHERE id = ?2 AND owner = ?3 AND status = ?4",
                params![now, transcript_id, owner, TranscriptStatus::Ingesting.as_str()],
            )
            .context("Failed to renew transcript lease")?;
        Ok(updated == 1)
    }

    /// Give up ownership so the next delivery can redo the ingest at once.
    pub fn release(conn: &Connection, transcript_id: i64, owner: &str) -> Result<()> {
        conn.execute(
            "UPDATE transcripts SET owner = NULL WHERE id = ?1 AND owner = ?2",
            params![transcript_id, owner],
        )
        .context("Failed to release transcript")?;
        Ok(())
    }

    /// Drop everything an interrupted ingest left behind. Sentences and
    /// words go with their paragraphs.
    pub fn clear_partial(conn: &Connection, transcript_id: i64) -> Result<usize> {
        conn.execute(
            "DELETE FROM transcript_paragraphs WHERE transcript_id = ?1",
            params![transcript_id],
        )
        .context("Failed to clear partial transcript")
    }

    /// Complete the transcript if `owner` still holds it.
    pub fn mark_completed(
        conn: &Connection,
        transcript_id: i64,
        owner: &str,
        paragraph_count: i64,
    ) -> Result<bool> {
        let updated = conn
            .execute(
                "UPDATE transcripts SET status = ?1, paragraph_count = ?2, owner = NULL, \
                 completed_at = CURRENT_TIMESTAMP WHERE id = ?3 AND owner = ?4",
                params![
                    TranscriptStatus::Completed.as_str(),
                    paragraph_count,
                    transcript_id,
                    owner
                ],
            )
            .context("Failed to mark transcript completed")?;
        Ok(updated == 1)
    }

    pub fn count_for_recording(conn: &Connection, recording_id: i64) -> Result<i64> {
        conn.query_row(
            "SELECT COUNT(*) FROM transcripts WHERE recording_id = ?1",
            params![recording_id],
            |row| row.get(0),
        )
        .context("Failed to count transcripts")
    }

    pub fn counts(conn: &Connection, transcript_id: i64) -> Result<TranscriptCounts> {
        conn.query_row(
            "SELECT \
               (SELECT COUNT(*) FROM transcript_paragraphs p WHERE p.transcript_id = ?1), \
               (SELECT COUNT(*) FROM transcript_sentences s \
                  JOIN transcript_paragraphs p ON s.paragraph_id = p.id WHERE p.transcript_id = ?1), \
               (SELECT COUNT(*) FROM transcript_words w \
                  JOIN transcript_sentences s ON w.sentence_id = s.id \
                  JOIN transcript_paragraphs p ON s.paragraph_id = p.id WHERE p.transcript_id = ?1)",
            params![transcript_id],
            |row| {
                Ok(TranscriptCounts {
                    paragraphs: row.get(0)?,
                    sentences: row.get(1)?,
                    words: row.get(2)?,
                })
            },
        )
        .context("Failed to count transcript rows")
    }

    pub fn insert_paragraph(
        conn: &Connection,
        transcript_id: i64,
        paragraph: &TranscriptParagraph,
        speaker_id: Option<i64>,
    ) -> Result<i64> {
        let mut stmt = conn
            .prepare_cached(
                "INSERT INTO transcript_paragraphs (transcript_id, pid, speaker_id, start_ms, end_ms) \
                 VALUES (?1, ?2, ?3, ?4, ?5)",
            )
            .context("Failed to prepare paragraph insert")?;
        stmt.execute(params![
            transcript_id,
            paragraph.pid,
            speaker_id,
            paragraph.start_time,
            paragraph.end_time,
        ])
        .with_context(|| format!("Failed to insert paragraph {}", paragraph.pid))?;
        Ok(conn.last_insert_rowid())
    }

    pub fn insert_sentence(
        conn: &Connection,
        paragraph_row_id: i64,
        sentence: &TranscriptSentence,
    ) -> Result<i64> {
        let mut stmt = conn
            .prepare_cached(
                "INSERT INTO transcript_sentences (paragraph_id, sid, start_ms, end_ms, text) \
                 VALUES (?1, ?2, ?3, ?4, ?5)",
            )
            .context("Failed to prepare sentence insert")?;
        stmt.execute(params![
            paragraph_row_id,
            sentence.sid,
            sentence.start_time,
            sentence.end_time,
            sentence.text(),
        ])
        .with_context(|| format!("Failed to insert sentence {}", sentence.sid))?;
        Ok(conn.last_insert_rowid())
    }

    pub fn insert_word(
        conn: &Connection,
        sentence_row_id: i64,
        order: usize,
        word: &TranscriptWord,
    ) -> Result<()> {
        let mut stmt = conn
            .prepare_cached(
                "INSERT INTO transcript_words (sentence_id, wid, word_order, start_ms, end_ms, text) \
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6)",
            )
            .context("Failed to prepare word insert")?;
        stmt.execute(params![
            sentence_row_id,
            word.wid,
            order as i64,
            word.start_time,
            word.end_time,
            word.text,
        ])
        .with_context(|| format!("Failed to insert word {}", word.wid))?;
        Ok(())
    }
}

pub struct SpeakerRepository;

struct SpeakerRow {
    id: i64,
    key: String,
    identity: ParticipantIdentity,
    phone: Option<String>,
}

impl SpeakerRepository {
    /// Find the speaker for `info` by any identifier it carries, creating it
    /// on first sight. Known attributes are filled in, never cleared, and the
    /// key moves to the strongest identifier once one is known. `None` when
    /// the speaker carries no identifier at all.
    pub fn resolve_or_create(conn: &Connection, info: &SpeakerInfo) -> Result<Option<i64>> {
        let Some(key) = info.identity.stable_key() else {
            return Ok(None);
        };

        let Some(existing) = Self::find_match(conn, &info.identity, &key)? else {
            conn.execute(
                "INSERT INTO speakers (speaker_key, uuid, userid, open_id, ms_open_id, name, phone) \
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)",
                params![
                    key,
                    info.identity.uuid,
                    info.identity.userid,
                    info.identity.open_id,
                    info.identity.ms_open_id,
                    info.identity.name,
                    info.phone,
                ],
            )
            .context("Failed to insert speaker")?;
            return Ok(Some(conn.last_insert_rowid()));
        };

        let merged = ParticipantIdentity {
            uuid: existing.identity.uuid.or_else(|| info.identity.uuid.clone()),
            userid: existing.identity.userid.or_else(|| info.identity.userid.clone()),
            open_id: existing.identity.open_id.or_else(|| info.identity.open_id.clone()),
            ms_open_id: existing.identity.ms_open_id.or_else(|| info.identity.ms_open_id.clone()),
            name: existing.identity.name.or_else(|| info.identity.name.clone()),
        };
        let phone = existing.phone.or_else(|| info.phone.clone());
        let merged_key = merged.stable_key().unwrap_or(existing.key);

        conn.execute(
            "UPDATE speakers SET uuid = ?1, userid = ?2, open_id = ?3, ms_open_id = ?4, \
             name = ?5, phone = ?6 WHERE id = ?7",
            params![
                merged.uuid,
                merged.userid,
                merged.open_id,
                merged.ms_open_id,
                merged.name,
                phone,
                existing.id,
            ],
        )
        .context("Failed to update speaker")?;
        // A row already holding the stronger key keeps it.
        conn.execute(
            "UPDATE speakers SET speaker_key = ?1 WHERE id = ?2 \
             AND NOT EXISTS (SELECT 1 FROM speakers WHERE speaker_key = ?1 AND id <> ?2)",
            params![merged_key, existing.id],
        )
        .context("Failed to rekey speaker")?;

        Ok(Some(existing.id))
    }

    /// The row sharing an identifier with `identity`, strongest identifier
    /// first. A row with a different uuid never matches on a weaker one.
    fn find_match(
        conn: &Connection,
        identity: &ParticipantIdentity,
        key: &str,
    ) -> Result<Option<SpeakerRow>> {
        let mut lookup = conn
            .prepare_cached(
                "SELECT id, speaker_key, uuid, userid, open_id, ms_open_id, name, phone \
                 FROM speakers \
                 WHERE (uuid = ?1) \
                    OR ((uuid IS NULL OR ?1 IS NULL) AND \
                        (userid = ?2 OR open_id = ?3 OR ms_open_id = ?4)) \
                    OR speaker_key = ?5 \
                 ORDER BY (uuid = ?1) DESC, (userid = ?2) DESC, (open_id = ?3) DESC, \
                          (ms_open_id = ?4) DESC, id \
                 LIMIT 1",
            )
            .context("Failed to prepare speaker lookup")?;
        lookup
            .query_row(
                params![
                    identity.uuid,
                    identity.userid,
                    identity.open_id,
                    identity.ms_open_id,
                    key,
                ],
                |row| {
                    Ok(SpeakerRow {
                        id: row.get(0)?,
                        key: row.get(1)?,
                        identity: ParticipantIdentity {
                            uuid: row.get(2)?,
                            userid: row.get(3)?,
                            open_id: row.get(4)?,
                            ms_open_id: row.get(5)?,
                            name: row.get(6)?,
                        },
                        phone: row.get(7)?,
                    })
                },
            )
            .optional()
            .context("Failed to look up speaker")
    }

    pub fn count(conn: &Connection) -> Result<i64> {
        conn.query_row("SELECT COUNT(*) FROM speakers", [], |row| row.get(0))
            .context("Failed to count speakers")
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::meetings::MeetingRepository;
    use crate::db::migrate;
    use crate::db::recordings::RecordingRepository;
    use crate::platform::{MeetingInfo, ParticipantIdentity, RecordingFileRef};

    fn setup() -> (Connection, i64) {
        let conn = Connection::open_in_memory().unwrap();
        conn.execute_batch("PRAGMA foreign_keys = ON;").unwrap();
        migrate(&conn).unwrap();
        let meeting = MeetingRepository::upsert(
            &conn,
            "tencent",
            &MeetingInfo {
                meeting_id: "m-1".to_string(),
                ..Default::default()
            },
            None,
        )
        .unwrap();
        let recording = RecordingRepository::upsert(
            &conn,
            meeting,
            &RecordingFileRef {
                record_file_id: "f-1".to_string(),
                lang: None,
            },
        )
        .unwrap();
        (conn, recording)
    }

    fn paragraph() -> TranscriptParagraph {
        TranscriptParagraph {
            pid: "0".to_string(),
            start_time: 0,
            end_time: 2000,
            sentences: vec![TranscriptSentence {
                sid: "0".to_string(),
                start_time: 0,
                end_time: 2000,
                text: None,
                words: vec![
                    TranscriptWord {
                        wid: "0".to_string(),
                        start_time: 0,
                        end_time: 1000,
                        text: "Hello".to_string(),
                    },
                    TranscriptWord {
                        wid: "1".to_string(),
                        start_time: 1000,
                        end_time: 2000,
                        text: " world".to_string(),
                    },
                ],
            }],
            ..Default::default()
        }
    }

    fn insert_all(conn: &Connection, transcript: i64, paragraph: &TranscriptParagraph) {
        let p = TranscriptRepository::insert_paragraph(conn, transcript, paragraph, None).unwrap();
        for sentence in &paragraph.sentences {
            let s = TranscriptRepository::insert_sentence(conn, p, sentence).unwrap();
            for (order, word) in sentence.words.iter().enumerate() {
                TranscriptRepository::insert_word(conn, s, order, word).unwrap();
            }
        }
    }

    #[test]
    fn test_transcript_lifecycle() {
        let (conn, recording) = setup();
        assert!(TranscriptRepository::find_by_recording(&conn, recording).unwrap().is_none());

        let transcript = TranscriptRepository::create(&conn, recording, "ingest-a", 100).unwrap();
        insert_all(&conn, transcript, &paragraph());

        let record = TranscriptRepository::find_by_recording(&conn, recording).unwrap().unwrap();
        assert!(!record.is_completed());
        assert_eq!(record.owner.as_deref(), Some("ingest-a"));

        assert!(!TranscriptRepository::mark_completed(&conn, transcript, "ingest-b", 1).unwrap());
        assert!(TranscriptRepository::mark_completed(&conn, transcript, "ingest-a", 1).unwrap());
        let record = TranscriptRepository::find_by_recording(&conn, recording).unwrap().unwrap();
        assert!(record.is_completed());
        assert_eq!(record.paragraph_count, 1);
        assert_eq!(record.owner, None);

        assert_eq!(
            TranscriptRepository::counts(&conn, transcript).unwrap(),
            TranscriptCounts {
                paragraphs: 1,
                sentences: 1,
                words: 2
            }
        );
        let text: String = conn
            .query_row("SELECT text FROM transcript_sentences", [], |row| row.get(0))
            .unwrap();
        assert_eq!(text, "Hello world");
    }

    #[test]
    fn test_one_transcript_per_recording() {
        let (conn, recording) = setup();
        TranscriptRepository::create(&conn, recording, "ingest-a", 100).unwrap();
        assert!(TranscriptRepository::create(&conn, recording, "ingest-b", 100).is_err());
        assert_eq!(TranscriptRepository::count_for_recording(&conn, recording).unwrap(), 1);
    }

    #[test]
    fn test_clear_partial_cascades() {
        let (conn, recording) = setup();
        let transcript = TranscriptRepository::create(&conn, recording, "ingest-a", 100).unwrap();
        insert_all(&conn, transcript, &paragraph());

        TranscriptRepository::clear_partial(&conn, transcript).unwrap();
        assert_eq!(
            TranscriptRepository::counts(&conn, transcript).unwrap(),
            TranscriptCounts::default()
        );
        let orphans: i64 = conn
            .query_row("SELECT COUNT(*) FROM transcript_words", [], |row| row.get(0))
            .unwrap();
        assert_eq!(orphans, 0);
    }

    #[test]
    fn test_lease_ownership() {
        let (conn, recording) = setup();
        let transcript = TranscriptRepository::create(&conn, recording, "ingest-a", 100).unwrap();
        let record = TranscriptRepository::find_by_recording(&conn, recording).unwrap().unwrap();
        assert!(!record.is_abandoned(150, 60));
        assert!(record.is_abandoned(160, 60));

        assert!(TranscriptRepository::renew(&conn, transcript, "ingest-a", 150).unwrap());
        assert!(!TranscriptRepository::renew(&conn, transcript, "ingest-b", 150).unwrap());

        TranscriptRepository::claim(&conn, transcript, "ingest-b", 200).unwrap();
        assert!(!TranscriptRepository::renew(&conn, transcript, "ingest-a", 210).unwrap());

        // Only the holder can release.
        TranscriptRepository::release(&conn, transcript, "ingest-a").unwrap();
        let record = TranscriptRepository::find_by_recording(&conn, recording).unwrap().unwrap();
        assert_eq!(record.owner.as_deref(), Some("ingest-b"));
        TranscriptRepository::release(&conn, transcript, "ingest-b").unwrap();
        let record = TranscriptRepository::find_by_recording(&conn, recording).unwrap().unwrap();
        assert!(record.is_abandoned(200, 60));
    }

    #[test]
    fn test_sentence_requires_paragraph() {
        let (conn, _) = setup();
        let result = TranscriptRepository::insert_sentence(&conn, 9999, &paragraph().sentences[0]);
        assert!(result.is_err());
    }

    #[test]
    fn test_speaker_resolve_or_create() {
        let (conn, _) = setup();
        let mut info = SpeakerInfo {
            identity: ParticipantIdentity {
                uuid: Some("U1".to_string()),
                name: Some("Alice".to_string()),
                ..Default::default()
            },
            ..Default::default()
        };

        let first = SpeakerRepository::resolve_or_create(&conn, &info).unwrap();
        info.phone = Some("555".to_string());
        let second = SpeakerRepository::resolve_or_create(&conn, &info).unwrap();
        assert!(first.is_some());
        assert_eq!(first, second);
        assert_eq!(SpeakerRepository::count(&conn).unwrap(), 1);

        let anonymous = SpeakerRepository::resolve_or_create(&conn, &SpeakerInfo::default()).unwrap();
        assert_eq!(anonymous, None);
    }

    fn speaker(uuid: Option<&str>, userid: Option<&str>) -> SpeakerInfo {
        SpeakerInfo {
            identity: ParticipantIdentity {
                uuid: uuid.map(str::to_string),
                userid: userid.map(str::to_string),
                name: Some("Alice".to_string()),
                ..Default::default()
            },
            ..Default::default()
        }
    }

    #[test]
    fn test_speaker_matches_any_identifier() {
        let (conn, _) = setup();

        // Without the roster only the userid is known.
        let bare = SpeakerRepository::resolve_or_create(&conn, &speaker(None, Some("alice"))).unwrap();
        let enriched =
            SpeakerRepository::resolve_or_create(&conn, &speaker(Some("U-1"), Some("alice"))).unwrap();
        let bare_again =
            SpeakerRepository::resolve_or_create(&conn, &speaker(None, Some("alice"))).unwrap();
        let by_uuid = SpeakerRepository::resolve_or_create(&conn, &speaker(Some("U-1"), None)).unwrap();

        assert!(bare.is_some());
        assert_eq!(bare, enriched);
        assert_eq!(bare, bare_again);
        assert_eq!(bare, by_uuid);
        assert_eq!(SpeakerRepository::count(&conn).unwrap(), 1);

        let (key, uuid): (String, Option<String>) = conn
            .query_row("SELECT speaker_key, uuid FROM speakers", [], |row| {
                Ok((row.get(0)?, row.get(1)?))
            })
            .unwrap();
        assert_eq!(key, "U-1");
        assert_eq!(uuid.as_deref(), Some("U-1"));
    }

    #[test]
    fn test_speaker_with_other_uuid_is_distinct() {
        let (conn, _) = setup();
        let first =
            SpeakerRepository::resolve_or_create(&conn, &speaker(Some("U-1"), Some("alice"))).unwrap();
        let second =
            SpeakerRepository::resolve_or_create(&conn, &speaker(Some("U-2"), Some("alice"))).unwrap();
        assert_ne!(first, second);
        assert_eq!(SpeakerRepository::count(&conn).unwrap(), 2);
    }
}
