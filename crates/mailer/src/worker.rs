use std::sync::Arc;

use chrono::{DateTime, Utc};
use metrics::{counter, gauge, histogram};
use thiserror::Error;
use tokio::time::sleep;
use tracing::{error, info};

use law_journal_domain::{
    config::{ConfigError, OutboxConfig},
    notification::{deliver_queued, NotificationError, Notifier},
    services::telemetry::TelemetryError,
    storage::{OutboxStore, StorageError},
};

#[derive(Debug, Error)]
pub enum MailerError {
    #[error("config error: {0}")]
    Config(#[from] ConfigError),
    #[error("storage error: {0}")]
    Storage(#[from] StorageError),
    #[error("notification error: {0}")]
    Notification(#[from] NotificationError),
    #[error("telemetry error: {0}")]
    Telemetry(#[from] TelemetryError),
}

/// Counts for one sweep over due outbox rows.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct OutboxPass {
    pub attempted: usize,
    pub delivered: usize,
}

/// Polls the outbox forever, retrying due emails with backoff.
pub async fn run_outbox<S>(
    config: OutboxConfig,
    storage: S,
    notifier: Arc<dyn Notifier>,
) -> Result<(), MailerError>
where
    S: OutboxStore,
{
    info!(
        poll_secs = config.poll_interval().as_secs(),
        max_attempts = config.max_attempts(),
        "outbox worker started"
    );
    loop {
        match drain_outbox(
            &storage,
            notifier.as_ref(),
            config.max_attempts(),
            config.batch_size(),
            Utc::now(),
        )
        .await
        {
            Ok(pass) if pass.attempted > 0 => {
                info!(
                    attempted = pass.attempted,
                    delivered = pass.delivered,
                    "outbox pass finished"
                );
            }
            Ok(_) => {}
            Err(err) => {
                counter!("outbox_deliveries_total", "result" => "error").increment(1);
                error!(?err, "outbox pass failed");
            }
        }

        match storage.pending_count().await {
            Ok(pending) => gauge!("outbox_pending").set(pending as f64),
            Err(err) => error!(?err, "failed to count pending emails"),
        }
        sleep(config.poll_interval()).await;
    }
}

/// Attempts every due email once. Transport failures are recorded on the row
/// and do not abort the pass; storage failures do.
pub async fn drain_outbox<S>(
    store: &S,
    notifier: &dyn Notifier,
    max_attempts: u32,
    batch_size: u64,
    now: DateTime<Utc>,
) -> Result<OutboxPass, MailerError>
where
    S: OutboxStore + ?Sized,
{
    let due = store.due_emails(now, batch_size).await?;
    histogram!("outbox_batch_entries").record(due.len() as f64);

    let mut pass = OutboxPass::default();
    for row in due {
        pass.attempted += 1;
        let result = deliver_queued(
            store,
            notifier,
            row.id,
            &row.email,
            row.attempts,
            max_attempts,
            now,
        )
        .await;
        let label = if result.is_ok() {
            pass.delivered += 1;
            "delivered"
        } else {
            "failed"
        };
        counter!("outbox_deliveries_total", "result" => label).increment(1);
    }
    Ok(pass)
}
