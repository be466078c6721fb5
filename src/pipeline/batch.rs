//! Transactional, size-bounded writer for the transcript hierarchy.
//!
//! Each paragraph batch commits in its own transaction, so a failure in a
//! later batch leaves earlier batches in place. The transcript row stays
//! `ingesting` until every batch has committed.
//!
//! An ingest owns the row through a token and a lease it renews with every
//! batch. A concurrent delivery of the same recording finds the lease held
//! and backs off; a re-delivery clears and redoes an ingest whose owner
//! failed or stopped renewing.

use anyhow::{bail, Context, Result};
use chrono::Utc;
use rusqlite::Transaction;
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::config::PipelineConfig;
use crate::db::transcripts::{
    SpeakerRepository, TranscriptCounts, TranscriptRepository,
};
use crate::db::Database;
use crate::platform::{TranscriptParagraph, TranscriptSentence};

/// Result of one ingest call.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum IngestOutcome {
    /// A completed transcript already exists for the recording.
    AlreadyIngested { transcript_id: i64 },
    /// Another ingest of the recording holds the transcript.
    InProgress { transcript_id: i64 },
    Ingested {
        transcript_id: i64,
        batches: usize,
        counts: TranscriptCounts,
    },
}

pub struct TranscriptBatchProcessor {
    db: Database,
    paragraph_batch_size: usize,
    sentence_batch_size: usize,
    lease_secs: i64,
}

impl TranscriptBatchProcessor {
    pub fn new(db: Database, config: &PipelineConfig) -> Self {
        Self {
            db,
            paragraph_batch_size: config.paragraph_batch_size.max(1),
            sentence_batch_size: config.sentence_batch_size.max(1),
            lease_secs: i64::try_from(config.ingest_lease_secs).unwrap_or(i64::MAX),
        }
    }

    /// Persist `paragraphs` for the recording unless a completed transcript
    /// already exists or another ingest is writing it. Speaker infos should
    /// be enriched beforehand.
    pub async fn ingest(
        &self,
        recording_id: i64,
        paragraphs: Vec<TranscriptParagraph>,
    ) -> Result<IngestOutcome> {
        let owner = Uuid::new_v4().to_string();
        let lease_secs = self.lease_secs;
        let claim_owner = owner.clone();
        let start = self
            .db
            .call(move |conn| {
                let tx = conn.transaction()?;
                let now = Utc::now().timestamp();
                let start = match TranscriptRepository::find_by_recording(&tx, recording_id)? {
                    Some(existing) if existing.is_completed() => IngestStart::Skip(existing.id),
                    Some(existing) if !existing.is_abandoned(now, lease_secs) => {
                        IngestStart::Busy(existing.id)
                    }
                    Some(partial) => {
                        let cleared = TranscriptRepository::clear_partial(&tx, partial.id)?;
                        TranscriptRepository::claim(&tx, partial.id, &claim_owner, now)?;
                        info!(
                            transcript_id = partial.id,
                            cleared,
                            "Redoing partially ingested transcript"
                        );
                        IngestStart::Own(partial.id)
                    }
                    None => IngestStart::Own(TranscriptRepository::create(
                        &tx,
                        recording_id,
                        &claim_owner,
                        now,
                    )?),
                };
                tx.commit().context("Failed to commit transcript row")?;
                Ok(start)
            })
            .await?;

        let transcript_id = match start {
            IngestStart::Skip(transcript_id) => {
                debug!(recording_id, transcript_id, "Transcript already ingested, skipping");
                return Ok(IngestOutcome::AlreadyIngested { transcript_id });
            }
            IngestStart::Busy(transcript_id) => {
                info!(recording_id, transcript_id, "Transcript ingest already in progress, skipping");
                return Ok(IngestOutcome::InProgress { transcript_id });
            }
            IngestStart::Own(transcript_id) => transcript_id,
        };

        match self.write_owned(transcript_id, &owner, &paragraphs).await {
            Ok((batches, counts)) => {
                info!(
                    transcript_id,
                    batches,
                    paragraphs = counts.paragraphs,
                    sentences = counts.sentences,
                    words = counts.words,
                    "Transcript ingested"
                );
                Ok(IngestOutcome::Ingested {
                    transcript_id,
                    batches,
                    counts,
                })
            }
            Err(e) => {
                let release_owner = owner.clone();
                if let Err(release) = self
                    .db
                    .call(move |conn| TranscriptRepository::release(conn, transcript_id, &release_owner))
                    .await
                {
                    warn!(transcript_id, "Failed to release transcript: {:#}", release);
                }
                Err(e)
            }
        }
    }

    /// Write every batch and complete the transcript, checking before each
    /// commit that `owner` still holds it.
    async fn write_owned(
        &self,
        transcript_id: i64,
        owner: &str,
        paragraphs: &[TranscriptParagraph],
    ) -> Result<(usize, TranscriptCounts)> {
        let mut counts = TranscriptCounts::default();
        let mut batches = 0;
        let sentence_batch_size = self.sentence_batch_size;

        for (index, chunk) in paragraphs.chunks(self.paragraph_batch_size).enumerate() {
            let chunk = chunk.to_vec();
            let owner = owner.to_string();
            let written = self
                .db
                .call(move |conn| {
                    let tx = conn.transaction()?;
                    let now = Utc::now().timestamp();
                    if !TranscriptRepository::renew(&tx, transcript_id, &owner, now)? {
                        bail!("Transcript {} was taken over by another ingest", transcript_id);
                    }
                    let written = write_batch(&tx, transcript_id, &chunk, sentence_batch_size)?;
                    tx.commit().context("Failed to commit paragraph batch")?;
                    Ok(written)
                })
                .await
                .with_context(|| format!("Paragraph batch {} failed", index))?;

            counts.paragraphs += written.paragraphs;
            counts.sentences += written.sentences;
            counts.words += written.words;
            batches += 1;
            debug!(transcript_id, batch = index, ?written, "Committed paragraph batch");
        }

        let paragraph_count = counts.paragraphs;
        let owner = owner.to_string();
        let completed = self
            .db
            .call(move |conn| {
                TranscriptRepository::mark_completed(conn, transcript_id, &owner, paragraph_count)
            })
            .await?;
        if !completed {
            bail!("Transcript {} was taken over by another ingest", transcript_id);
        }

        Ok((batches, counts))
    }
}

enum IngestStart {
    Skip(i64),
    Busy(i64),
    Own(i64),
}

/// Write one paragraph batch: speakers and paragraphs first, then the
/// collected sentences (with their words) in chunks.
fn write_batch(
    tx: &Transaction<'_>,
    transcript_id: i64,
    paragraphs: &[TranscriptParagraph],
    sentence_batch_size: usize,
) -> Result<TranscriptCounts> {
    let mut counts = TranscriptCounts::default();
    let mut pending: Vec<(i64, &TranscriptSentence)> = Vec::new();

    for paragraph in paragraphs {
        let speaker_id = SpeakerRepository::resolve_or_create(tx, &paragraph.speaker_info)?;
        let paragraph_row =
            TranscriptRepository::insert_paragraph(tx, transcript_id, paragraph, speaker_id)?;
        counts.paragraphs += 1;
        pending.extend(paragraph.sentences.iter().map(|s| (paragraph_row, s)));
    }

    for sentences in pending.chunks(sentence_batch_size) {
        for (paragraph_row, sentence) in sentences {
            let sentence_row = TranscriptRepository::insert_sentence(tx, *paragraph_row, sentence)?;
            counts.sentences += 1;
            for (order, word) in sentence.words.iter().enumerate() {
                TranscriptRepository::insert_word(tx, sentence_row, order, word)?;
                counts.words += 1;
            }
        }
    }

    Ok(counts)
}
