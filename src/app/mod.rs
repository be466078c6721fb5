//! Service wiring: builds every collaborator once and injects it.

use crate::ai::{CompletionClient, OpenAiCompletionClient};
use crate::api::{ApiServer, WebhookState};
use crate::config::Config;
use crate::db::{Database, SqliteUserStore, UserStore};
use crate::events::handlers::HandlerStores;
use crate::events::{EventDispatcher, EventWorker};
use crate::pipeline::{
    ParticipantSummaryGenerator, RecordingPipeline, SpeakerService, TranscriptBatchProcessor,
};
use crate::platform::{MeetingApi, RestMeetingApi};
use crate::sheet::{self, SheetStore, SheetTables};
use anyhow::Result;
use std::path::Path;
use std::sync::Arc;
use tokio::sync::Semaphore;
use tracing::{error, info};

/// Shared state of a running service.
#[derive(Clone)]
pub struct AppContext {
    pub config: Config,
    pub db: Database,
    pub users: Arc<dyn UserStore>,
    pub sheet: Arc<dyn SheetStore>,
    pub meeting_api: Arc<dyn MeetingApi>,
    pub completion: Arc<dyn CompletionClient>,
    /// Caps in-flight completion calls across all deliveries.
    pub ai_limiter: Arc<Semaphore>,
}

impl AppContext {
    pub fn from_config(config: Config) -> Result<Self> {
        let db_path = config.database_path()?;
        let db = Database::open(&db_path)?;
        info!("Database ready at {:?}", db_path);

        let users: Arc<dyn UserStore> =
            Arc::new(SqliteUserStore::new(db.clone(), &config.webhook.platform));
        let sheet = sheet::from_config(&config.sheet)?;
        let meeting_api: Arc<dyn MeetingApi> =
            Arc::new(RestMeetingApi::new(config.meeting_api.clone())?);
        let completion: Arc<dyn CompletionClient> =
            Arc::new(OpenAiCompletionClient::new(&config.ai)?);
        let ai_limiter = Arc::new(Semaphore::new(config.ai.max_concurrency.max(1)));

        Ok(Self {
            config,
            db,
            users,
            sheet,
            meeting_api,
            completion,
            ai_limiter,
        })
    }

    pub fn pipeline(&self) -> RecordingPipeline {
        let config = &self.config;
        RecordingPipeline::new(
            config.webhook.platform.clone(),
            self.meeting_api.clone(),
            self.db.clone(),
            SpeakerService::new(self.users.clone()),
            TranscriptBatchProcessor::new(self.db.clone(), &config.pipeline),
            ParticipantSummaryGenerator::new(
                self.completion.clone(),
                self.ai_limiter.clone(),
                config.ai.system_prompt.clone(),
                self.db.clone(),
                self.users.clone(),
                self.sheet.clone(),
                SheetTables::from(&config.sheet),
            ),
            config.meeting_api.default_operator_userid.clone(),
            config.pipeline.utc_offset_minutes,
        )
    }

    pub fn dispatcher(&self) -> EventDispatcher {
        let stores = HandlerStores {
            platform: self.config.webhook.platform.clone(),
            db: self.db.clone(),
            users: self.users.clone(),
            sheet: self.sheet.clone(),
            tables: SheetTables::from(&self.config.sheet),
        };
        EventDispatcher::standard(stores, Arc::new(self.pipeline()))
    }
}

pub async fn run_service(config_path: Option<&Path>) -> Result<()> {
    info!("Starting meetingest service");

    let config = Config::load(config_path)?;
    let context = AppContext::from_config(config)?;

    let dispatcher = Arc::new(context.dispatcher());
    info!("Registered handlers: {:?}", dispatcher.handler_names());

    let webhook_config = context.config.webhook.clone();
    let (worker, worker_handle) = EventWorker::spawn(
        dispatcher,
        webhook_config.queue_capacity,
        webhook_config.worker_concurrency,
    );

    let server = ApiServer::new(
        &context.config.server,
        WebhookState {
            config: webhook_config,
            worker,
        },
    );

    info!("meetingest is ready");
    if let Err(e) = server.start().await {
        error!("API server failed: {:#}", e);
        worker_handle.abort();
        return Err(e);
    }

    // The server owned the last worker handle; let queued deliveries finish.
    if let Err(e) = worker_handle.await {
        error!("Event worker terminated abnormally: {}", e);
    }
    Ok(())
}
