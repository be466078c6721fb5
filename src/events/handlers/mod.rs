//! One handler per event kind, registered in a fixed table.

pub mod meeting;
pub mod participant;
pub mod recording;
pub mod smart;

use anyhow::{bail, Result};
use futures::future::{join_all, BoxFuture};
use std::future::Future;
use std::sync::Arc;
use tracing::{debug, warn};

use super::{EventDispatcher, EventHandler};
use crate::db::{Database, UserStore};
use crate::pipeline::RecordingPipeline;
use crate::sheet::{SheetStore, SheetTables};

pub use meeting::{MeetingEndedHandler, MeetingStartedHandler};
pub use participant::ParticipantJoinedHandler;
pub use recording::RecordingCompletedHandler;
pub use smart::SmartNotificationHandler;

/// Stores the lifecycle handlers write to.
#[derive(Clone)]
pub struct HandlerStores {
    pub platform: String,
    pub db: Database,
    pub users: Arc<dyn UserStore>,
    pub sheet: Arc<dyn SheetStore>,
    pub tables: SheetTables,
}

impl EventDispatcher {
    /// The service's handler table.
    pub fn standard(stores: HandlerStores, pipeline: Arc<RecordingPipeline>) -> Self {
        let handlers: Vec<Arc<dyn EventHandler>> = vec![
            Arc::new(MeetingStartedHandler::new(stores.clone())),
            Arc::new(MeetingEndedHandler::new(stores.clone())),
            Arc::new(ParticipantJoinedHandler::new(stores)),
            Arc::new(RecordingCompletedHandler::new(pipeline)),
            Arc::new(SmartNotificationHandler),
        ];
        Self::new(handlers)
    }
}

/// A named store write.
pub(crate) type StoreWrite<'a> = (&'static str, BoxFuture<'a, Result<()>>);

pub(crate) fn store_write<'a, F>(name: &'static str, write: F) -> StoreWrite<'a>
where
    F: Future<Output = Result<()>> + Send + 'a,
{
    (name, Box::pin(write))
}

/// Run independent writes concurrently. Each failure is logged; none is
/// rolled back. Errors when any write failed.
pub(crate) async fn run_writes(event: &str, meeting_id: &str, writes: Vec<StoreWrite<'_>>) -> Result<()> {
    let total = writes.len();
    let results = join_all(
        writes
            .into_iter()
            .map(|(name, write)| async move { (name, write.await) }),
    )
    .await;

    let mut failed = 0;
    for (name, result) in results {
        match result {
            Ok(()) => debug!(event, meeting_id, write = name, "Store write succeeded"),
            Err(e) => {
                failed += 1;
                warn!(event, meeting_id, write = name, "Store write failed: {:#}", e);
            }
        }
    }

    if failed > 0 {
        bail!("{} of {} store writes failed", failed, total);
    }
    Ok(())
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use crate::config::SheetConfig;
    use crate::db::SqliteUserStore;
    use crate::sheet::Fields;
    use anyhow::anyhow;
    use async_trait::async_trait;
    use std::sync::Mutex;

    /// Records every upsert; optionally fails them all.
    #[derive(Default)]
    pub(crate) struct RecordingSheet {
        pub writes: Mutex<Vec<(String, String, Fields)>>,
        pub fail: bool,
    }

    #[async_trait]
    impl SheetStore for RecordingSheet {
        async fn upsert_record(
            &self,
            table: &str,
            _key_field: &str,
            key: &str,
            fields: Fields,
        ) -> Result<String> {
            if self.fail {
                return Err(anyhow!("sheet offline"));
            }
            let mut writes = self.writes.lock().unwrap();
            writes.push((table.to_string(), key.to_string(), fields));
            Ok(format!("rec{}", writes.len()))
        }
    }

    pub(crate) fn stores(sheet: Arc<RecordingSheet>) -> HandlerStores {
        let db = Database::open_in_memory().unwrap();
        HandlerStores {
            platform: "tencent".to_string(),
            users: Arc::new(SqliteUserStore::new(db.clone(), "tencent")),
            db,
            sheet,
            tables: SheetTables::from(&SheetConfig::default()),
        }
    }

    #[tokio::test]
    async fn test_run_writes_reports_failures_without_stopping_others() {
        let ran = Arc::new(Mutex::new(Vec::new()));
        let (a, b) = (ran.clone(), ran.clone());
        let writes = vec![
            store_write("first", async { Err(anyhow!("nope")) }),
            store_write("second", async move {
                a.lock().unwrap().push("second");
                Ok(())
            }),
            store_write("third", async move {
                b.lock().unwrap().push("third");
                Ok(())
            }),
        ];

        let result = run_writes("meeting.started", "m1", writes).await;
        assert_eq!(result.unwrap_err().to_string(), "1 of 3 store writes failed");
        assert_eq!(ran.lock().unwrap().len(), 2);
    }
}
