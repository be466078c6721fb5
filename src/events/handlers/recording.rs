use anyhow::{bail, Result};
use async_trait::async_trait;
use std::sync::Arc;
use tracing::{info, warn};

use crate::events::{EventHandler, EventKind, EventPayload};
use crate::pipeline::RecordingPipeline;

/// Hands completed recordings to the pipeline.
pub struct RecordingCompletedHandler {
    pipeline: Arc<RecordingPipeline>,
}

impl RecordingCompletedHandler {
    pub fn new(pipeline: Arc<RecordingPipeline>) -> Self {
        Self { pipeline }
    }
}

#[async_trait]
impl EventHandler for RecordingCompletedHandler {
    fn name(&self) -> &'static str {
        "recording-completed"
    }

    fn kinds(&self) -> &'static [EventKind] {
        &[EventKind::RecordingCompleted]
    }

    async fn handle(&self, payload: EventPayload, index: usize) -> Result<()> {
        let EventPayload::RecordingCompleted(event) = payload else {
            bail!("{} cannot handle {}", self.name(), payload.kind().as_str());
        };
        let meeting_id = &event.meeting_info.meeting_id;
        if event.recording_files.is_empty() {
            warn!(meeting_id = %meeting_id, index, "Recording event carries no files");
            return Ok(());
        }

        info!(
            meeting_id = %meeting_id,
            files = event.recording_files.len(),
            index,
            "Recording completed"
        );
        let report = self.pipeline.process(&event).await;

        if !report.failed_files.is_empty() {
            bail!(
                "{} of {} recording files failed: {}",
                report.failed_files.len(),
                event.recording_files.len(),
                report.failed_files.join(", ")
            );
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::Database;
    use crate::pipeline::tests::{event, fake_api, pipeline, EchoCompletion};
    use std::sync::atomic::Ordering;

    #[tokio::test]
    async fn test_runs_pipeline_for_every_file() {
        let db = Database::open_in_memory().unwrap();
        let completion = Arc::new(EchoCompletion::default());
        let handler = RecordingCompletedHandler::new(Arc::new(pipeline(
            &db,
            fake_api(),
            completion.clone(),
        )));

        handler
            .handle(EventPayload::RecordingCompleted(event(&["f-1", "f-2"])), 0)
            .await
            .unwrap();

        // Alice and Bob spoke in each file.
        assert_eq!(completion.calls.load(Ordering::SeqCst), 4);
    }

    #[tokio::test]
    async fn test_failed_file_is_reported() {
        let db = Database::open_in_memory().unwrap();
        let mut api = fake_api();
        api.broken_files = vec!["f-1".to_string()];
        let handler = RecordingCompletedHandler::new(Arc::new(pipeline(
            &db,
            api,
            Arc::new(EchoCompletion::default()),
        )));

        let err = handler
            .handle(EventPayload::RecordingCompleted(event(&["f-1", "f-2"])), 0)
            .await
            .unwrap_err();
        assert_eq!(err.to_string(), "1 of 2 recording files failed: f-1");
    }

    #[tokio::test]
    async fn test_no_files_is_a_noop() {
        let db = Database::open_in_memory().unwrap();
        let completion = Arc::new(EchoCompletion::default());
        let handler = RecordingCompletedHandler::new(Arc::new(pipeline(
            &db,
            fake_api(),
            completion.clone(),
        )));

        handler
            .handle(EventPayload::RecordingCompleted(event(&[])), 0)
            .await
            .unwrap();
        assert_eq!(completion.calls.load(Ordering::SeqCst), 0);
    }
}
