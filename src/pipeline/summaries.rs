//! Per-participant AI summaries under a shared concurrency limit.

use anyhow::{anyhow, Context, Result};
use futures::future::join_all;
use serde_json::json;
use std::sync::Arc;
use tokio::sync::Semaphore;
use tracing::{debug, info, warn};

use crate::ai::{build_participant_prompt, CompletionClient, SummaryContext};
use crate::db::summaries::{NewParticipantSummary, ParticipantSummaryRepository};
use crate::db::{Database, UserStore};
use crate::platform::{MeetingInfo, Participant};
use crate::sheet::{self, Fields, SheetStore, SheetTables};

/// Where generated summaries belong.
#[derive(Debug, Clone)]
pub struct SummaryTarget {
    pub platform: String,
    pub meeting: MeetingInfo,
    pub meeting_row_id: i64,
    pub recording_id: i64,
    pub record_file_id: String,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct GenerationFailure {
    pub participant: String,
    pub error: String,
}

/// Aggregated outcome of one fan-out. Order is not meaningful.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct GenerationReport {
    pub succeeded: Vec<String>,
    pub failed: Vec<GenerationFailure>,
}

pub struct ParticipantSummaryGenerator {
    completion: Arc<dyn CompletionClient>,
    limiter: Arc<Semaphore>,
    system_prompt: String,
    db: Database,
    users: Arc<dyn UserStore>,
    sheet: Arc<dyn SheetStore>,
    tables: SheetTables,
}

impl ParticipantSummaryGenerator {
    pub fn new(
        completion: Arc<dyn CompletionClient>,
        limiter: Arc<Semaphore>,
        system_prompt: String,
        db: Database,
        users: Arc<dyn UserStore>,
        sheet: Arc<dyn SheetStore>,
        tables: SheetTables,
    ) -> Self {
        Self {
            completion,
            limiter,
            system_prompt,
            db,
            users,
            sheet,
            tables,
        }
    }

    /// Generate and store one summary per participant. Every participant is
    /// attempted; failures are logged and collected.
    pub async fn generate_all(
        &self,
        target: &SummaryTarget,
        context: &SummaryContext,
        participants: &[Participant],
    ) -> GenerationReport {
        let outcomes = join_all(participants.iter().map(|participant| async move {
            let label = participant_label(participant);
            (label, self.generate_one(target, context, participant).await)
        }))
        .await;

        let mut report = GenerationReport::default();
        for (label, outcome) in outcomes {
            match outcome {
                Ok(()) => report.succeeded.push(label),
                Err(e) => {
                    warn!(
                        meeting_id = %target.meeting.meeting_id,
                        record_file_id = %target.record_file_id,
                        participant = %label,
                        "Participant summary failed: {:#}",
                        e
                    );
                    report.failed.push(GenerationFailure {
                        participant: label,
                        error: format!("{:#}", e),
                    });
                }
            }
        }

        info!(
            meeting_id = %target.meeting.meeting_id,
            record_file_id = %target.record_file_id,
            succeeded = report.succeeded.len(),
            failed = report.failed.len(),
            "Participant summaries generated"
        );
        report
    }

    async fn generate_one(
        &self,
        target: &SummaryTarget,
        context: &SummaryContext,
        participant: &Participant,
    ) -> Result<()> {
        let identity = &participant.identity;
        let key = identity
            .stable_key()
            .ok_or_else(|| anyhow!("participant has no identifier"))?;
        let name = identity.display_name().to_string();
        let prompt = build_participant_prompt(context, &name);

        let content = {
            let _permit = self
                .limiter
                .acquire()
                .await
                .context("Completion limiter closed")?;
            debug!(participant = %key, "Requesting participant summary");
            self.completion
                .complete(&self.system_prompt, &prompt)
                .await
                .context("Completion request failed")?
        };

        // Linking to the identity store is best effort.
        let user_id = match self.users.upsert(identity, participant.phone.as_deref()).await {
            Ok(id) => id,
            Err(e) => {
                warn!(participant = %key, "Failed to upsert participant identity: {:#}", e);
                None
            }
        };

        let meeting_row_id = target.meeting_row_id;
        let recording_id = target.recording_id;
        let version = {
            let key = key.clone();
            let name = name.clone();
            let content = content.clone();
            self.db
                .call(move |conn| {
                    let tx = conn.transaction()?;
                    let version = ParticipantSummaryRepository::replace_latest(
                        &tx,
                        &NewParticipantSummary {
                            user_id,
                            participant_key: &key,
                            participant_name: &name,
                            meeting_row_id,
                            recording_id,
                            content: &content,
                        },
                    )?;
                    tx.commit().context("Failed to commit participant summary")?;
                    Ok(version)
                })
                .await?
        };

        let fields = summary_fields(target, &key, &name, &content, version);
        let record_key = fields
            .get(sheet::RECORD_KEY_FIELD)
            .and_then(|v| v.as_str())
            .unwrap_or_default()
            .to_string();
        if let Err(e) = self
            .sheet
            .upsert_record(&self.tables.summaries, sheet::RECORD_KEY_FIELD, &record_key, fields)
            .await
        {
            // The database row is authoritative; the mirror catches up on regeneration.
            warn!(participant = %key, "Failed to mirror participant summary: {:#}", e);
        }

        Ok(())
    }
}

fn participant_label(participant: &Participant) -> String {
    let identity = &participant.identity;
    match (identity.name.as_deref(), identity.stable_key()) {
        (Some(name), Some(key)) => format!("{} ({})", name, key),
        (Some(name), None) => name.to_string(),
        (None, Some(key)) => key,
        (None, None) => "anonymous".to_string(),
    }
}

fn summary_fields(
    target: &SummaryTarget,
    participant_key: &str,
    name: &str,
    content: &str,
    version: i64,
) -> Fields {
    let meeting_key = sheet::meeting_key(&target.platform, &target.meeting);
    let mut fields = Fields::new();
    fields.insert(
        sheet::RECORD_KEY_FIELD.into(),
        json!(format!(
            "{}:{}:{}",
            meeting_key, target.record_file_id, participant_key
        )),
    );
    fields.insert(sheet::MEETING_KEY_FIELD.into(), json!(meeting_key));
    fields.insert("record_file_id".into(), json!(target.record_file_id));
    fields.insert("participant_key".into(), json!(participant_key));
    fields.insert("name".into(), json!(name));
    fields.insert("summary".into(), json!(content));
    fields.insert("version".into(), json!(version));
    fields
}
