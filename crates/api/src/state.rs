use std::sync::Arc;

use law_journal_domain::services::{
    telemetry::{AbuseTracker, TelemetryGuard},
    workflow::Workflow,
};
use law_journal_storage::SeaOrmStorage;

pub type JournalWorkflow = Workflow<SeaOrmStorage>;

#[derive(Clone)]
pub struct AppState {
    workflow: Arc<JournalWorkflow>,
    telemetry: TelemetryGuard,
    abuse_tracker: AbuseTracker,
}

impl AppState {
    pub fn new(
        workflow: Arc<JournalWorkflow>,
        telemetry: TelemetryGuard,
        abuse_tracker: AbuseTracker,
    ) -> Self {
        Self {
            workflow,
            telemetry,
            abuse_tracker,
        }
    }

    pub fn workflow(&self) -> &JournalWorkflow {
        self.workflow.as_ref()
    }

    pub fn telemetry(&self) -> &TelemetryGuard {
        &self.telemetry
    }

    pub fn abuse_tracker(&self) -> &AbuseTracker {
        &self.abuse_tracker
    }
}
