//! Recording pipeline: everything that happens after `recording.completed`.
//!
//! Per recording file, in order:
//! 1. fetch and dedup the participant roster
//! 2. fetch smart summary and transcript concurrently, each failure isolated
//! 3. resolve speakers and render the transcript
//! 4. upsert meeting, recording and the latest meeting summary
//! 5. ingest the transcript hierarchy unless already ingested
//! 6. generate a summary for every participant who spoke
//!
//! Files are processed one after another; a failed file does not stop the
//! next one.

pub mod batch;
pub mod format;
pub mod roster;
pub mod speaker;
pub mod summaries;

use anyhow::{Context, Result};
use std::sync::Arc;
use tracing::{error, info, warn};

use crate::ai::SummaryContext;
use crate::db::meetings::MeetingRepository;
use crate::db::recordings::{MeetingSummaryRepository, RecordingRepository};
use crate::db::Database;
use crate::events::RecordingCompletedEvent;
use crate::platform::{MeetingApi, MeetingInfo, Participant, RecordingFileRef, SmartSummary, Transcript};

pub use batch::{IngestOutcome, TranscriptBatchProcessor};
pub use format::{format_timestamp, format_transcript, FormattedTranscript, TimestampError};
pub use speaker::SpeakerService;
pub use summaries::{GenerationReport, ParticipantSummaryGenerator, SummaryTarget};

/// Outcome of one recording file.
#[derive(Debug, Clone)]
pub struct FileReport {
    pub record_file_id: String,
    pub recording_id: i64,
    pub roster_size: usize,
    pub summary_fetched: bool,
    pub transcript_fetched: bool,
    /// `None` when there was no transcript to ingest.
    pub ingest: Option<IngestOutcome>,
    pub generation: GenerationReport,
}

/// Outcome of one notification.
#[derive(Debug, Default)]
pub struct PipelineReport {
    pub files: Vec<FileReport>,
    pub failed_files: Vec<String>,
}

pub struct RecordingPipeline {
    platform: String,
    api: Arc<dyn MeetingApi>,
    db: Database,
    speakers: SpeakerService,
    batches: TranscriptBatchProcessor,
    summaries: ParticipantSummaryGenerator,
    default_operator: Option<String>,
    utc_offset_minutes: i32,
}

impl RecordingPipeline {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        platform: String,
        api: Arc<dyn MeetingApi>,
        db: Database,
        speakers: SpeakerService,
        batches: TranscriptBatchProcessor,
        summaries: ParticipantSummaryGenerator,
        default_operator: Option<String>,
        utc_offset_minutes: i32,
    ) -> Self {
        Self {
            platform,
            api,
            db,
            speakers,
            batches,
            summaries,
            default_operator,
            utc_offset_minutes,
        }
    }

    /// Run every file of the notification sequentially.
    pub async fn process(&self, event: &RecordingCompletedEvent) -> PipelineReport {
        let meeting = &event.meeting_info;
        let operator = self.operator_for(event);
        if operator.is_empty() {
            warn!(
                meeting_id = %meeting.meeting_id,
                "No operator userid for meeting API calls; fetches will likely fail"
            );
        }

        let mut report = PipelineReport::default();
        for file in &event.recording_files {
            match self.process_file(meeting, &operator, file).await {
                Ok(file_report) => {
                    info!(
                        meeting_id = %meeting.meeting_id,
                        record_file_id = %file.record_file_id,
                        recording_id = file_report.recording_id,
                        summaries = file_report.generation.succeeded.len(),
                        summary_failures = file_report.generation.failed.len(),
                        "Recording file processed"
                    );
                    report.files.push(file_report);
                }
                Err(e) => {
                    error!(
                        meeting_id = %meeting.meeting_id,
                        record_file_id = %file.record_file_id,
                        "Recording file failed: {:#}",
                        e
                    );
                    report.failed_files.push(file.record_file_id.clone());
                }
            }
        }
        report
    }

    /// Operator for API calls: the event operator, else the meeting creator,
    /// else the configured default.
    fn operator_for(&self, event: &RecordingCompletedEvent) -> String {
        event
            .operator
            .userid
            .clone()
            .or_else(|| event.meeting_info.creator.userid.clone())
            .or_else(|| self.default_operator.clone())
            .unwrap_or_default()
    }

    pub async fn process_file(
        &self,
        meeting: &MeetingInfo,
        operator: &str,
        file: &RecordingFileRef,
    ) -> Result<FileReport> {
        let file_id = file.record_file_id.as_str();

        let roster = roster::fetch_roster(self.api.as_ref(), meeting, operator).await;

        let (summary, transcript) = tokio::join!(
            self.api.smart_summary(file_id, operator),
            self.api.transcript(&meeting.meeting_id, file_id, operator)
        );
        let summary_fetched = summary.is_ok();
        let summary = summary.unwrap_or_else(|e| {
            warn!(record_file_id = %file_id, "Smart summary fetch failed, using placeholders: {:#}", e);
            SmartSummary::default()
        });
        let transcript_fetched = transcript.is_ok();
        let mut transcript = transcript.unwrap_or_else(|e| {
            warn!(record_file_id = %file_id, "Transcript fetch failed, continuing without it: {:#}", e);
            Transcript::default()
        });

        self.speakers.enrich_transcript(&mut transcript, &roster).await;
        let formatted = format_transcript(&transcript).context("Failed to format transcript")?;

        let (meeting_row_id, recording_id) = self.store_recording(meeting, file, &summary).await?;

        let ingest = if transcript.is_empty() {
            None
        } else {
            Some(
                self.batches
                    .ingest(recording_id, transcript.paragraphs)
                    .await
                    .context("Transcript ingestion failed")?,
            )
        };

        let speaking: Vec<Participant> = roster
            .iter()
            .filter(|p| p.identity.name.as_deref().is_some_and(|name| formatted.spoke(name)))
            .cloned()
            .collect();

        let context = SummaryContext {
            subject: meeting.subject.clone(),
            start_time: meeting.start_time,
            end_time: meeting.end_time,
            summary: summary.summary,
            minutes: summary.minutes,
            todo: summary.todo,
            transcript: formatted.text,
            utc_offset_minutes: self.utc_offset_minutes,
        };
        let target = SummaryTarget {
            platform: self.platform.clone(),
            meeting: meeting.clone(),
            meeting_row_id,
            recording_id,
            record_file_id: file_id.to_string(),
        };
        let generation = self.summaries.generate_all(&target, &context, &speaking).await;

        Ok(FileReport {
            record_file_id: file_id.to_string(),
            recording_id,
            roster_size: roster.len(),
            summary_fetched,
            transcript_fetched,
            ingest,
            generation,
        })
    }

    /// Meeting, recording and latest meeting summary in one transaction.
    async fn store_recording(
        &self,
        meeting: &MeetingInfo,
        file: &RecordingFileRef,
        summary: &SmartSummary,
    ) -> Result<(i64, i64)> {
        let platform = self.platform.clone();
        let meeting = meeting.clone();
        let file = file.clone();
        let summary = summary.clone();

        self.db
            .call(move |conn| {
                let tx = conn.transaction()?;
                let meeting_row_id = MeetingRepository::upsert(&tx, &platform, &meeting, None)?;
                let recording_id = RecordingRepository::upsert(&tx, meeting_row_id, &file)?;
                MeetingSummaryRepository::replace_latest(&tx, meeting_row_id, recording_id, &summary)?;
                tx.commit().context("Failed to commit recording")?;
                Ok((meeting_row_id, recording_id))
            })
            .await
            .context("Failed to store recording")
    }
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use crate::ai::CompletionClient;
    use crate::config::{PipelineConfig, SheetConfig};
    use crate::db::summaries::ParticipantSummaryRepository;
    use crate::db::transcripts::{TranscriptCounts, TranscriptRepository};
    use crate::db::SqliteUserStore;
    use crate::platform::{
        ParticipantIdentity, SpeakerInfo, TranscriptParagraph, TranscriptSentence, TranscriptWord,
    };
    use crate::sheet::{DisabledSheetStore, SheetTables};
    use anyhow::bail;
    use async_trait::async_trait;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use tokio::sync::Semaphore;

    /// Canned meeting API with switchable failures.
    #[derive(Default)]
    pub(crate) struct FakeMeetingApi {
        pub roster: Vec<Participant>,
        pub transcript: Transcript,
        pub summary: SmartSummary,
        pub fail_summary: bool,
        pub fail_transcript: bool,
        pub fail_roster: bool,
        /// Files whose transcript comes back with an invalid start time.
        pub broken_files: Vec<String>,
    }

    #[async_trait]
    impl MeetingApi for FakeMeetingApi {
        async fn participants(&self, _meeting: &MeetingInfo, _operator: &str) -> Result<Vec<Participant>> {
            if self.fail_roster {
                bail!("roster unavailable");
            }
            Ok(self.roster.clone())
        }

        async fn smart_summary(&self, _file: &str, _operator: &str) -> Result<SmartSummary> {
            if self.fail_summary {
                bail!("summary unavailable");
            }
            Ok(self.summary.clone())
        }

        async fn transcript(&self, _meeting: &str, file: &str, _operator: &str) -> Result<Transcript> {
            if self.fail_transcript {
                bail!("transcript unavailable");
            }
            let mut transcript = self.transcript.clone();
            if self.broken_files.iter().any(|f| f == file) {
                transcript.paragraphs[0].sentences[0].start_time = -1;
            }
            Ok(transcript)
        }
    }

    /// Echoes the prompt so tests can inspect what was sent.
    #[derive(Default)]
    pub(crate) struct EchoCompletion {
        pub calls: AtomicUsize,
    }

    #[async_trait]
    impl CompletionClient for EchoCompletion {
        async fn complete(&self, _system: &str, prompt: &str) -> Result<String> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            Ok(prompt.to_string())
        }
    }

    pub(crate) fn participant(uuid: &str, userid: &str, name: &str, join_time: i64) -> Participant {
        Participant {
            identity: ParticipantIdentity {
                uuid: Some(uuid.to_string()),
                userid: Some(userid.to_string()),
                name: Some(name.to_string()),
                ..Default::default()
            },
            join_time,
            ..Default::default()
        }
    }

    /// Alice and Bob speak in alternating paragraphs; Carol stays silent.
    pub(crate) fn fake_api() -> FakeMeetingApi {
        let paragraphs = (0..20)
            .map(|p| {
                let userid = if p % 2 == 0 { "alice" } else { "bob" };
                TranscriptParagraph {
                    pid: p.to_string(),
                    start_time: p * 5000,
                    end_time: p * 5000 + 4000,
                    speaker_info: SpeakerInfo {
                        identity: ParticipantIdentity {
                            userid: Some(userid.to_string()),
                            ..Default::default()
                        },
                        ..Default::default()
                    },
                    sentences: vec![TranscriptSentence {
                        sid: format!("{}-0", p),
                        start_time: p * 5000,
                        end_time: p * 5000 + 4000,
                        text: None,
                        words: vec![
                            TranscriptWord {
                                wid: format!("{}-0", p),
                                start_time: p * 5000,
                                end_time: p * 5000 + 2000,
                                text: "Status".to_string(),
                            },
                            TranscriptWord {
                                wid: format!("{}-1", p),
                                start_time: p * 5000 + 2000,
                                end_time: p * 5000 + 4000,
                                text: " update.".to_string(),
                            },
                        ],
                    }],
                }
            })
            .collect();

        FakeMeetingApi {
            roster: vec![
                participant("U-ALICE", "alice", "Alice", 100),
                participant("U-BOB", "bob", "Bob", 110),
                participant("U-ALICE", "alice", "Alice", 300),
                participant("U-CAROL", "carol", "Carol", 120),
            ],
            transcript: Transcript { paragraphs },
            summary: SmartSummary {
                summary: "Shipped the release.".to_string(),
                minutes: "1. Release".to_string(),
                todo: "Write notes".to_string(),
            },
            ..Default::default()
        }
    }

    pub(crate) fn pipeline(
        db: &Database,
        api: FakeMeetingApi,
        completion: Arc<dyn CompletionClient>,
    ) -> RecordingPipeline {
        let users = Arc::new(SqliteUserStore::new(db.clone(), "tencent"));
        RecordingPipeline::new(
            "tencent".to_string(),
            Arc::new(api),
            db.clone(),
            SpeakerService::new(users.clone()),
            TranscriptBatchProcessor::new(db.clone(), &PipelineConfig::default()),
            ParticipantSummaryGenerator::new(
                completion,
                Arc::new(Semaphore::new(5)),
                "system".to_string(),
                db.clone(),
                users,
                Arc::new(DisabledSheetStore),
                SheetTables::from(&SheetConfig::default()),
            ),
            None,
            480,
        )
    }

    pub(crate) fn event(files: &[&str]) -> RecordingCompletedEvent {
        RecordingCompletedEvent {
            operate_time: 1_700_000_000_000,
            operator: ParticipantIdentity {
                userid: Some("alice".to_string()),
                ..Default::default()
            },
            meeting_info: MeetingInfo {
                meeting_id: "m-42".to_string(),
                subject: "Release review".to_string(),
                start_time: 1_700_000_000,
                end_time: 1_700_003_600,
                ..Default::default()
            },
            recording_files: files
                .iter()
                .map(|id| RecordingFileRef {
                    record_file_id: id.to_string(),
                    lang: None,
                })
                .collect(),
        }
    }

    async fn transcript_counts(db: &Database, recording_id: i64) -> TranscriptCounts {
        db.call(move |conn| {
            let transcript = TranscriptRepository::find_by_recording(conn, recording_id)?
                .context("transcript missing")?;
            TranscriptRepository::counts(conn, transcript.id)
        })
        .await
        .unwrap()
    }

    #[tokio::test]
    async fn test_full_pipeline() {
        let db = Database::open_in_memory().unwrap();
        let completion = Arc::new(EchoCompletion::default());
        let pipeline = pipeline(&db, fake_api(), completion.clone());

        let report = pipeline.process(&event(&["f-1"])).await;
        assert!(report.failed_files.is_empty());
        let file = &report.files[0];

        // Roster deduplicated by uuid.
        assert_eq!(file.roster_size, 3);
        assert!(matches!(file.ingest, Some(IngestOutcome::Ingested { .. })));
        // Carol never spoke.
        assert_eq!(file.generation.succeeded.len(), 2);
        assert_eq!(completion.calls.load(Ordering::SeqCst), 2);

        let counts = transcript_counts(&db, file.recording_id).await;
        assert_eq!(
            counts,
            TranscriptCounts {
                paragraphs: 20,
                sentences: 20,
                words: 40
            }
        );

        let recording_id = file.recording_id;
        let summaries = db
            .call(move |conn| {
                let latest = ParticipantSummaryRepository::latest(conn, "U-ALICE", 1, recording_id)?
                    .context("summary missing")?;
                Ok(latest.content)
            })
            .await
            .unwrap();
        assert!(summaries.contains("Participant: Alice"));
        assert!(summaries.contains("Alice(00:00:00)：Status update."));
        assert!(summaries.contains("Bob(00:00:05)：Status update."));
        assert!(summaries.contains("Shipped the release."));
    }

    #[tokio::test]
    async fn test_redelivery_is_idempotent() {
        let db = Database::open_in_memory().unwrap();
        let completion: Arc<dyn CompletionClient> = Arc::new(EchoCompletion::default());

        let first = pipeline(&db, fake_api(), completion.clone())
            .process(&event(&["f-1"]))
            .await;
        let second = pipeline(&db, fake_api(), completion)
            .process(&event(&["f-1"]))
            .await;

        let recording_id = first.files[0].recording_id;
        assert_eq!(second.files[0].recording_id, recording_id);
        assert!(matches!(
            second.files[0].ingest,
            Some(IngestOutcome::AlreadyIngested { .. })
        ));

        let counts = transcript_counts(&db, recording_id).await;
        assert_eq!(counts.paragraphs, 20);
        assert_eq!(counts.sentences, 20);
        assert_eq!(counts.words, 40);

        let (recordings, transcripts, latest_summaries) = db
            .call(move |conn| {
                Ok((
                    RecordingRepository::count(conn)?,
                    TranscriptRepository::count_for_recording(conn, recording_id)?,
                    MeetingSummaryRepository::count_latest(conn, 1, recording_id)?,
                ))
            })
            .await
            .unwrap();
        assert_eq!(recordings, 1);
        assert_eq!(transcripts, 1);
        assert_eq!(latest_summaries, 1);
    }

    #[tokio::test]
    async fn test_transcript_failure_still_creates_recording() {
        let db = Database::open_in_memory().unwrap();
        let mut api = fake_api();
        api.fail_transcript = true;
        let completion = Arc::new(EchoCompletion::default());
        let report = pipeline(&db, api, completion.clone())
            .process(&event(&["f-1"]))
            .await;

        let file = &report.files[0];
        assert!(!file.transcript_fetched);
        assert!(file.summary_fetched);
        assert!(file.ingest.is_none());
        // Nobody was detected speaking, so nothing is generated.
        assert!(file.generation.succeeded.is_empty());

        let recordings = db.call(|conn| RecordingRepository::count(conn)).await.unwrap();
        assert_eq!(recordings, 1);
    }

    #[tokio::test]
    async fn test_summary_failure_uses_placeholders() {
        let db = Database::open_in_memory().unwrap();
        let mut api = fake_api();
        api.fail_summary = true;
        let completion = Arc::new(EchoCompletion::default());
        let report = pipeline(&db, api, completion)
            .process(&event(&["f-1"]))
            .await;

        let file = &report.files[0];
        assert!(!file.summary_fetched);
        assert_eq!(file.generation.succeeded.len(), 2);

        let recording_id = file.recording_id;
        let content = db
            .call(move |conn| {
                let latest = ParticipantSummaryRepository::latest(conn, "U-BOB", 1, recording_id)?
                    .context("summary missing")?;
                Ok(latest.content)
            })
            .await
            .unwrap();
        assert!(content.contains("## Meeting summary\n(none)"));
        assert!(content.contains("Bob(00:00:05)"));
    }

    #[tokio::test]
    async fn test_failed_file_does_not_stop_next() {
        let db = Database::open_in_memory().unwrap();
        let mut api = fake_api();
        api.broken_files = vec!["f-1".to_string()];
        let report = pipeline(&db, api, Arc::new(EchoCompletion::default()))
            .process(&event(&["f-1", "f-2"]))
            .await;

        assert_eq!(report.failed_files, vec!["f-1".to_string()]);
        assert_eq!(report.files.len(), 1);
        assert_eq!(report.files[0].record_file_id, "f-2");
        assert_eq!(report.files[0].generation.succeeded.len(), 2);
    }
}
