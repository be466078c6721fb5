use anyhow::{bail, Result};
use async_trait::async_trait;
use tracing::info;

use super::{run_writes, store_write, HandlerStores};
use crate::db::meetings::{MeetingRepository, MeetingStatus};
use crate::events::{EventHandler, EventKind, EventPayload, MeetingEvent};
use crate::sheet;

pub struct MeetingStartedHandler {
    stores: HandlerStores,
}

impl MeetingStartedHandler {
    pub fn new(stores: HandlerStores) -> Self {
        Self { stores }
    }
}

#[async_trait]
impl EventHandler for MeetingStartedHandler {
    fn name(&self) -> &'static str {
        "meeting-started"
    }

    fn kinds(&self) -> &'static [EventKind] {
        &[EventKind::MeetingStarted]
    }

    async fn handle(&self, payload: EventPayload, index: usize) -> Result<()> {
        let EventPayload::MeetingStarted(event) = payload else {
            bail!("{} cannot handle {}", self.name(), payload.kind().as_str());
        };
        let info = &event.meeting_info;
        info!(
            meeting_id = %info.meeting_id,
            subject = %info.subject,
            index,
            "Meeting started"
        );

        let creator = &info.creator;
        let writes = vec![
            store_write(
                "meeting",
                upsert_meeting(&self.stores, &event, MeetingStatus::Started),
            ),
            store_write("creator", async move {
                self.stores.users.upsert(creator, None).await?;
                Ok(())
            }),
            store_write(
                "sheet-meeting",
                mirror_meeting(&self.stores, &event, MeetingStatus::Started),
            ),
        ];

        run_writes(EventKind::MeetingStarted.as_str(), &info.meeting_id, writes).await
    }
}

pub struct MeetingEndedHandler {
    stores: HandlerStores,
}

impl MeetingEndedHandler {
    pub fn new(stores: HandlerStores) -> Self {
        Self { stores }
    }
}

#[async_trait]
impl EventHandler for MeetingEndedHandler {
    fn name(&self) -> &'static str {
        "meeting-ended"
    }

    fn kinds(&self) -> &'static [EventKind] {
        &[EventKind::MeetingEnded]
    }

    async fn handle(&self, payload: EventPayload, index: usize) -> Result<()> {
        let EventPayload::MeetingEnded(event) = payload else {
            bail!("{} cannot handle {}", self.name(), payload.kind().as_str());
        };
        let info = &event.meeting_info;
        info!(
            meeting_id = %info.meeting_id,
            end_time = info.end_time,
            index,
            "Meeting ended"
        );

        let writes = vec![
            store_write(
                "meeting",
                upsert_meeting(&self.stores, &event, MeetingStatus::Ended),
            ),
            store_write(
                "sheet-meeting",
                mirror_meeting(&self.stores, &event, MeetingStatus::Ended),
            ),
        ];

        run_writes(EventKind::MeetingEnded.as_str(), &info.meeting_id, writes).await
    }
}

async fn upsert_meeting(stores: &HandlerStores, event: &MeetingEvent, status: MeetingStatus) -> Result<()> {
    let platform = stores.platform.clone();
    let info = event.meeting_info.clone();
    stores
        .db
        .call(move |conn| MeetingRepository::upsert(conn, &platform, &info, Some(status)))
        .await?;
    Ok(())
}

async fn mirror_meeting(stores: &HandlerStores, event: &MeetingEvent, status: MeetingStatus) -> Result<()> {
    let info = &event.meeting_info;
    let key = sheet::meeting_key(&stores.platform, info);
    let fields = sheet::meeting_fields(&stores.platform, info, Some(status.as_str()));
    stores
        .sheet
        .upsert_record(&stores.tables.meetings, sheet::MEETING_KEY_FIELD, &key, fields)
        .await?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::events::handlers::tests::{stores, RecordingSheet};
    use crate::platform::{MeetingInfo, ParticipantIdentity, ROOT_SUB_MEETING};
    use std::sync::Arc;

    fn event(end_time: i64) -> MeetingEvent {
        MeetingEvent {
            operate_time: 1_700_000_000_000,
            meeting_info: MeetingInfo {
                meeting_id: "m-7".to_string(),
                subject: "Standup".to_string(),
                creator: ParticipantIdentity {
                    userid: Some("alice".to_string()),
                    uuid: Some("U-ALICE".to_string()),
                    name: Some("Alice".to_string()),
                    ..Default::default()
                },
                start_time: 1_700_000_000,
                end_time,
                ..Default::default()
            },
            ..Default::default()
        }
    }

    #[tokio::test]
    async fn test_started_writes_all_stores() {
        let sheet = Arc::new(RecordingSheet::default());
        let stores = stores(sheet.clone());
        let handler = MeetingStartedHandler::new(stores.clone());

        handler
            .handle(EventPayload::MeetingStarted(event(0)), 0)
            .await
            .unwrap();

        let record = stores
            .db
            .call(|conn| MeetingRepository::find(conn, "tencent", "m-7", ROOT_SUB_MEETING))
            .await
            .unwrap()
            .unwrap();
        assert_eq!(record.status.as_deref(), Some("started"));
        assert!(stores.users.find_by_uuid("U-ALICE").await.unwrap().is_some());

        let writes = sheet.writes.lock().unwrap();
        assert_eq!(writes.len(), 1);
        assert_eq!(writes[0].0, "meetings");
        assert_eq!(writes[0].1, "tencent:m-7:__ROOT__");
        assert_eq!(writes[0].2["status"], "started");
    }

    #[tokio::test]
    async fn test_sheet_failure_does_not_block_database() {
        let sheet = Arc::new(RecordingSheet {
            fail: true,
            ..Default::default()
        });
        let stores = stores(sheet);
        let handler = MeetingEndedHandler::new(stores.clone());

        let result = handler
            .handle(EventPayload::MeetingEnded(event(1_700_003_600)), 0)
            .await;
        assert!(result.is_err());

        let record = stores
            .db
            .call(|conn| MeetingRepository::find(conn, "tencent", "m-7", ROOT_SUB_MEETING))
            .await
            .unwrap()
            .unwrap();
        assert_eq!(record.status.as_deref(), Some("ended"));
        assert_eq!(record.end_time, 1_700_003_600);
    }

    #[test]
    fn test_supports() {
        let stores = stores(Arc::new(RecordingSheet::default()));
        let handler = MeetingStartedHandler::new(stores);
        assert!(handler.supports("meeting.started"));
        assert!(!handler.supports("meeting.end"));
    }
}
