//! Outbox worker binary that retries queued journal emails.

use std::io;
use std::sync::Arc;

use law_journal_domain::config::{MailConfig, OutboxConfig};
use law_journal_domain::services::telemetry::{init_telemetry, TelemetryConfig};
use law_journal_mailer::{run_outbox, HttpMailTransport, MailerError};
use law_journal_storage::SeaOrmStorage;

#[tokio::main]
async fn main() -> io::Result<()> {
    if let Err(err) = bootstrap().await {
        eprintln!("[mailer] bootstrap failed: {err}");
        return Err(io::Error::other(err.to_string()));
    }

    Ok(())
}

async fn bootstrap() -> Result<(), MailerError> {
    let config = OutboxConfig::load_from_env()?;
    let mail_config = MailConfig::load_from_env()?;
    let telemetry_config = TelemetryConfig::from_env("MAILER");
    init_telemetry(&telemetry_config)?;
    let storage = SeaOrmStorage::connect(config.database_url()).await?;
    let transport = HttpMailTransport::new(&mail_config)?;
    run_outbox(config, storage, Arc::new(transport)).await
}
