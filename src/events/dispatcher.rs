use anyhow::Result;
use async_trait::async_trait;
use std::sync::Arc;
use tracing::{debug, error, info, warn};

use super::{EventKind, EventPayload, Envelope};

/// One handler per event kind.
#[async_trait]
pub trait EventHandler: Send + Sync {
    fn name(&self) -> &'static str;

    /// Event kinds this handler accepts.
    fn kinds(&self) -> &'static [EventKind];

    fn supports(&self, event: &str) -> bool {
        EventKind::parse(event).is_some_and(|kind| self.kinds().contains(&kind))
    }

    async fn handle(&self, payload: EventPayload, index: usize) -> Result<()>;
}

/// Outcome of dispatching one envelope.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct DispatchReport {
    pub event: String,
    pub trace_id: String,
    pub handled: usize,
    pub failed: usize,
    /// No handler was registered for the event.
    pub unhandled: bool,
}

/// Routes envelopes to the first registered handler supporting the event.
pub struct EventDispatcher {
    handlers: Vec<Arc<dyn EventHandler>>,
}

impl EventDispatcher {
    pub fn new(handlers: Vec<Arc<dyn EventHandler>>) -> Self {
        Self { handlers }
    }

    pub fn get_handler(&self, event: &str) -> Option<&Arc<dyn EventHandler>> {
        self.handlers.iter().find(|handler| handler.supports(event))
    }

    pub fn handler_names(&self) -> Vec<&'static str> {
        self.handlers.iter().map(|h| h.name()).collect()
    }

    /// Dispatch every payload item in order. Item failures are logged and
    /// counted; they never abort the remaining items.
    pub async fn dispatch(&self, envelope: Envelope) -> DispatchReport {
        let mut report = DispatchReport {
            event: envelope.event.clone(),
            trace_id: envelope.trace_id.clone(),
            ..Default::default()
        };

        let Some(handler) = self.get_handler(&envelope.event) else {
            warn!(
                event = %envelope.event,
                trace_id = %envelope.trace_id,
                "No handler registered for event, dropping"
            );
            report.unhandled = true;
            return report;
        };
        // A handler only supports names that parse.
        let Some(kind) = EventKind::parse(&envelope.event) else {
            report.unhandled = true;
            return report;
        };

        debug!(
            event = %envelope.event,
            handler = handler.name(),
            items = envelope.payload.len(),
            "Dispatching envelope"
        );

        for (index, item) in envelope.payload.into_iter().enumerate() {
            let payload = match EventPayload::decode(kind, item) {
                Ok(payload) => payload,
                Err(e) => {
                    error!(
                        event = %envelope.event,
                        trace_id = %envelope.trace_id,
                        index,
                        error = %e,
                        "Malformed payload item"
                    );
                    report.failed += 1;
                    continue;
                }
            };

            match handler.handle(payload, index).await {
                Ok(()) => report.handled += 1,
                Err(e) => {
                    error!(
                        event = %envelope.event,
                        trace_id = %envelope.trace_id,
                        handler = handler.name(),
                        index,
                        "Handler failed: {:#}",
                        e
                    );
                    report.failed += 1;
                }
            }
        }

        info!(
            event = %report.event,
            trace_id = %report.trace_id,
            handled = report.handled,
            failed = report.failed,
            "Envelope dispatched"
        );
        report
    }
}
