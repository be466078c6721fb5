use anyhow::{Context, Result};
use rusqlite::Connection;

pub fn migrate(conn: &Connection) -> Result<()> {
    conn.execute(
        "CREATE TABLE IF NOT EXISTS users (
            id INTEGER PRIMARY KEY AUTOINCREMENT,
            platform TEXT NOT NULL,
            uuid TEXT,
            userid TEXT,
            open_id TEXT,
            ms_open_id TEXT,
            name TEXT,
            phone TEXT,
            created_at TIMESTAMP DEFAULT CURRENT_TIMESTAMP,
            updated_at TIMESTAMP DEFAULT CURRENT_TIMESTAMP
        )",
        [],
    )
    .context("Failed to create users table")?;

    conn.execute(
        "CREATE UNIQUE INDEX IF NOT EXISTS idx_users_platform_uuid
            ON users(platform, uuid) WHERE uuid IS NOT NULL",
        [],
    )
    .context("Failed to create users uuid index")?;

    conn.execute(
        "CREATE INDEX IF NOT EXISTS idx_users_platform_userid ON users(platform, userid)",
        [],
    )
    .context("Failed to create users userid index")?;

    conn.execute(
        "CREATE INDEX IF NOT EXISTS idx_users_platform_name ON users(platform, name)",
        [],
    )
    .context("Failed to create users name index")?;

    // One row per (platform, meeting, occurrence)
    conn.execute(
        "CREATE TABLE IF NOT EXISTS meetings (
            id INTEGER PRIMARY KEY AUTOINCREMENT,
            platform TEXT NOT NULL,
            meeting_id TEXT NOT NULL,
            sub_meeting_id TEXT NOT NULL,
            meeting_code TEXT,
            subject TEXT NOT NULL DEFAULT '',
            creator_userid TEXT,
            creator_uuid TEXT,
            meeting_type INTEGER NOT NULL DEFAULT 0,
            start_time INTEGER NOT NULL DEFAULT 0,
            end_time INTEGER NOT NULL DEFAULT 0,
            status TEXT,
            created_at TIMESTAMP DEFAULT CURRENT_TIMESTAMP,
            updated_at TIMESTAMP DEFAULT CURRENT_TIMESTAMP,
            UNIQUE(platform, meeting_id, sub_meeting_id)
        )",
        [],
    )
    .context("Failed to create meetings table")?;

    conn.execute(
        "CREATE TABLE IF NOT EXISTS meeting_participants (
            id INTEGER PRIMARY KEY AUTOINCREMENT,
            meeting_row_id INTEGER NOT NULL REFERENCES meetings(id) ON DELETE CASCADE,
            participant_key TEXT NOT NULL,
            userid TEXT,
            uuid TEXT,
            name TEXT,
            joined_at INTEGER NOT NULL DEFAULT 0,
            created_at TIMESTAMP DEFAULT CURRENT_TIMESTAMP,
            UNIQUE(meeting_row_id, participant_key)
        )",
        [],
    )
    .context("Failed to create meeting_participants table")?;

    conn.execute(
        "CREATE TABLE IF NOT EXISTS recordings (
            id INTEGER PRIMARY KEY AUTOINCREMENT,
            meeting_row_id INTEGER NOT NULL REFERENCES meetings(id) ON DELETE CASCADE,
            record_file_id TEXT NOT NULL,
            lang TEXT,
            created_at TIMESTAMP DEFAULT CURRENT_TIMESTAMP,
            updated_at TIMESTAMP DEFAULT CURRENT_TIMESTAMP,
            UNIQUE(meeting_row_id, record_file_id)
        )",
        [],
    )
    .context("Failed to create recordings table")?;

    conn.execute(
        "CREATE TABLE IF NOT EXISTS meeting_summaries (
            id INTEGER PRIMARY KEY AUTOINCREMENT,
            meeting_row_id INTEGER NOT NULL REFERENCES meetings(id) ON DELETE CASCADE,
            recording_id INTEGER NOT NULL REFERENCES recordings(id) ON DELETE CASCADE,
            summary TEXT NOT NULL DEFAULT '',
            minutes TEXT NOT NULL DEFAULT '',
            todo TEXT NOT NULL DEFAULT '',
            version INTEGER NOT NULL,
            is_latest INTEGER NOT NULL DEFAULT 1,
            created_at TIMESTAMP DEFAULT CURRENT_TIMESTAMP
        )",
        [],
    )
    .context("Failed to create meeting_summaries table")?;

    conn.execute(
        "CREATE UNIQUE INDEX IF NOT EXISTS idx_meeting_summaries_latest
            ON meeting_summaries(meeting_row_id, recording_id) WHERE is_latest = 1",
        [],
    )
    .context("Failed to create meeting_summaries latest index")?;

    conn.execute(
        "CREATE TABLE IF NOT EXISTS transcripts (
            id INTEGER PRIMARY KEY AUTOINCREMENT,
            recording_id INTEGER NOT NULL UNIQUE REFERENCES recordings(id) ON DELETE CASCADE,
            status TEXT NOT NULL DEFAULT 'ingesting',
            paragraph_count INTEGER NOT NULL DEFAULT 0,
            owner TEXT,
            heartbeat_at INTEGER NOT NULL DEFAULT 0,
            created_at TIMESTAMP DEFAULT CURRENT_TIMESTAMP,
            completed_at TIMESTAMP
        )",
        [],
    )
    .context("Failed to create transcripts table")?;

    conn.execute(
        "CREATE TABLE IF NOT EXISTS speakers (
            id INTEGER PRIMARY KEY AUTOINCREMENT,
            speaker_key TEXT NOT NULL UNIQUE,
            uuid TEXT,
            userid TEXT,
            open_id TEXT,
            ms_open_id TEXT,
            name TEXT,
            phone TEXT,
            created_at TIMESTAMP DEFAULT CURRENT_TIMESTAMP
        )",
        [],
    )
    .context("Failed to create speakers table")?;

    conn.execute(
        "CREATE INDEX IF NOT EXISTS idx_speakers_uuid ON speakers(uuid)",
        [],
    )
    .context("Failed to create speakers uuid index")?;

    conn.execute(
        "CREATE INDEX IF NOT EXISTS idx_speakers_userid ON speakers(userid)",
        [],
    )
    .context("Failed to create speakers userid index")?;

    conn.execute(
        "CREATE TABLE IF NOT EXISTS transcript_paragraphs (
            id INTEGER PRIMARY KEY AUTOINCREMENT,
            transcript_id INTEGER NOT NULL REFERENCES transcripts(id) ON DELETE CASCADE,
            pid TEXT NOT NULL,
            speaker_id INTEGER REFERENCES speakers(id),
            start_ms INTEGER NOT NULL,
            end_ms INTEGER NOT NULL
        )",
        [],
    )
    .context("Failed to create transcript_paragraphs table")?;

    conn.execute(
        "CREATE INDEX IF NOT EXISTS idx_transcript_paragraphs_transcript
            ON transcript_paragraphs(transcript_id)",
        [],
    )
    .context("Failed to create transcript_paragraphs index")?;

    conn.execute(
        "CREATE TABLE IF NOT EXISTS transcript_sentences (
            id INTEGER PRIMARY KEY AUTOINCREMENT,
            paragraph_id INTEGER NOT NULL REFERENCES transcript_paragraphs(id) ON DELETE CASCADE,
            sid TEXT NOT NULL,
            start_ms INTEGER NOT NULL,
            end_ms INTEGER NOT NULL,
            text TEXT NOT NULL
        )",
        [],
    )
    .context("Failed to create transcript_sentences table")?;

    conn.execute(
        "CREATE INDEX IF NOT EXISTS idx_transcript_sentences_paragraph
            ON transcript_sentences(paragraph_id)",
        [],
    )
    .context("Failed to create transcript_sentences index")?;

    conn.execute(
        "CREATE TABLE IF NOT EXISTS transcript_words (
            id INTEGER PRIMARY KEY AUTOINCREMENT,
            sentence_id INTEGER NOT NULL REFERENCES transcript_sentences(id) ON DELETE CASCADE,
            wid TEXT NOT NULL,
            word_order INTEGER NOT NULL,
            start_ms INTEGER NOT NULL,
            end_ms INTEGER NOT NULL,
            text TEXT NOT NULL
        )",
        [],
    )
    .context("Failed to create transcript_words table")?;

    conn.execute(
        "CREATE INDEX IF NOT EXISTS idx_transcript_words_sentence
            ON transcript_words(sentence_id)",
        [],
    )
    .context("Failed to create transcript_words index")?;

    conn.execute(
        "CREATE TABLE IF NOT EXISTS participant_summaries (
            id INTEGER PRIMARY KEY AUTOINCREMENT,
            user_id INTEGER REFERENCES users(id),
            participant_key TEXT NOT NULL,
            participant_name TEXT NOT NULL,
            meeting_row_id INTEGER NOT NULL REFERENCES meetings(id) ON DELETE CASCADE,
            recording_id INTEGER NOT NULL REFERENCES recordings(id) ON DELETE CASCADE,
            content TEXT NOT NULL,
            version INTEGER NOT NULL,
            is_latest INTEGER NOT NULL DEFAULT 1,
            created_at TIMESTAMP DEFAULT CURRENT_TIMESTAMP
        )",
        [],
    )
    .context("Failed to create participant_summaries table")?;

    conn.execute(
        "CREATE UNIQUE INDEX IF NOT EXISTS idx_participant_summaries_latest
            ON participant_summaries(participant_key, meeting_row_id, recording_id)
            WHERE is_latest = 1",
        [],
    )
    .context("Failed to create participant_summaries latest index")?;

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_migrate_creates_tables() {
        let conn = Connection::open_in_memory().unwrap();
        migrate(&conn).unwrap();

        for table in [
            "users",
            "meetings",
            "meeting_participants",
            "recordings",
            "meeting_summaries",
            "transcripts",
            "speakers",
            "transcript_paragraphs",
            "transcript_sentences",
            "transcript_words",
            "participant_summaries",
        ] {
            let count: i64 = conn
                .query_row(
                    "SELECT COUNT(*) FROM sqlite_master WHERE type='table' AND name=?1",
                    [table],
                    |row| row.get(0),
                )
                .unwrap();
            assert_eq!(count, 1, "missing table {}", table);
        }
    }

    #[test]
    fn test_migrate_is_idempotent() {
        let conn = Connection::open_in_memory().unwrap();
        migrate(&conn).unwrap();
        migrate(&conn).unwrap();
    }
}
