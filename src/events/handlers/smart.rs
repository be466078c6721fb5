use anyhow::{bail, Result};
use async_trait::async_trait;
use tracing::info;

use crate::events::{EventHandler, EventKind, EventPayload};

/// Acknowledges the AI notification events. Their content is fetched by
/// the recording pipeline instead, so these only log.
pub struct SmartNotificationHandler;

#[async_trait]
impl EventHandler for SmartNotificationHandler {
    fn name(&self) -> &'static str {
        "smart-notification"
    }

    fn kinds(&self) -> &'static [EventKind] {
        &[
            EventKind::SmartFullSummary,
            EventKind::SmartTranscripts,
            EventKind::SmartMinutes,
        ]
    }

    async fn handle(&self, payload: EventPayload, index: usize) -> Result<()> {
        let EventPayload::Smart(kind, event) = payload else {
            bail!("{} cannot handle {}", self.name(), payload.kind().as_str());
        };
        let files: Vec<&str> = event
            .recording_files
            .iter()
            .map(|f| f.record_file_id.as_str())
            .collect();
        info!(
            event = kind.as_str(),
            meeting_id = %event.meeting_info.meeting_id,
            ?files,
            index,
            "Smart notification received"
        );
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::events::SmartEvent;

    #[test]
    fn test_supports_all_smart_events() {
        let handler = SmartNotificationHandler;
        for event in ["smart.fullsummary", "smart.transcripts", "smart.minutes"] {
            assert!(handler.supports(event), "{}", event);
        }
        assert!(!handler.supports("recording.completed"));
    }

    #[tokio::test]
    async fn test_handle_is_a_noop() {
        let payload = EventPayload::Smart(EventKind::SmartMinutes, SmartEvent::default());
        SmartNotificationHandler.handle(payload, 0).await.unwrap();
    }
}
