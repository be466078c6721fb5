use anyhow::{anyhow, bail, Context, Result};
use async_trait::async_trait;
use tracing::info;

use super::{run_writes, store_write, HandlerStores};
use crate::db::meetings::MeetingRepository;
use crate::events::{EventHandler, EventKind, EventPayload, MeetingEvent};
use crate::sheet;

pub struct ParticipantJoinedHandler {
    stores: HandlerStores,
}

impl ParticipantJoinedHandler {
    pub fn new(stores: HandlerStores) -> Self {
        Self { stores }
    }

    async fn record_join(&self, event: &MeetingEvent) -> Result<()> {
        let platform = self.stores.platform.clone();
        let info = event.meeting_info.clone();
        let identity = event.operator.identity.clone();
        let joined_at = event.operate_time;

        self.stores
            .db
            .call(move |conn| {
                let tx = conn.transaction()?;
                let meeting_row_id = MeetingRepository::upsert(&tx, &platform, &info, None)?;
                MeetingRepository::record_participant(&tx, meeting_row_id, &identity, joined_at)?;
                tx.commit().context("Failed to commit participant join")?;
                Ok(())
            })
            .await
    }

    async fn mirror_join(&self, event: &MeetingEvent) -> Result<()> {
        let identity = &event.operator.identity;
        let key = identity
            .stable_key()
            .ok_or_else(|| anyhow!("participant has no identifier"))?;
        let fields = sheet::participant_fields(
            &self.stores.platform,
            &event.meeting_info,
            &key,
            identity,
            event.operate_time,
        );
        let record_key = format!(
            "{}:{}",
            sheet::meeting_key(&self.stores.platform, &event.meeting_info),
            key
        );
        self.stores
            .sheet
            .upsert_record(
                &self.stores.tables.participants,
                sheet::RECORD_KEY_FIELD,
                &record_key,
                fields,
            )
            .await?;
        Ok(())
    }
}

#[async_trait]
impl EventHandler for ParticipantJoinedHandler {
    fn name(&self) -> &'static str {
        "participant-joined"
    }

    fn kinds(&self) -> &'static [EventKind] {
        &[EventKind::ParticipantJoined]
    }

    async fn handle(&self, payload: EventPayload, index: usize) -> Result<()> {
        let EventPayload::ParticipantJoined(event) = payload else {
            bail!("{} cannot handle {}", self.name(), payload.kind().as_str());
        };
        let operator = &event.operator;
        info!(
            meeting_id = %event.meeting_info.meeting_id,
            participant = %operator.identity.display_name(),
            index,
            "Participant joined"
        );

        let writes = vec![
            store_write("user", async move {
                self.stores
                    .users
                    .upsert(&operator.identity, operator.phone.as_deref())
                    .await?;
                Ok(())
            }),
            store_write("participant", self.record_join(&event)),
            store_write("sheet-participant", self.mirror_join(&event)),
        ];

        run_writes(
            EventKind::ParticipantJoined.as_str(),
            &event.meeting_info.meeting_id,
            writes,
        )
        .await
    }
}
