use std::{path::Path, sync::Arc};

#[cfg(unix)]
use std::fs;

use actix_web::{error::Error as ActixError, middleware::Logger, web, App, HttpServer};
use law_journal_domain::config::{ApiConfig, ConfigError, MailConfig, OutboxConfig, WorkflowConfig};
use law_journal_domain::notification::{NotificationError, Notifier, PaymentCodes};
use law_journal_domain::services::{
    telemetry::{init_telemetry, TelemetryConfig, TelemetryError},
    workflow::Workflow,
};
use law_journal_domain::storage::StorageError;
use law_journal_mailer::{HttpMailTransport, UpiQrCodes};
use law_journal_storage::SeaOrmStorage;
use thiserror::Error;
use tracing::info;

use crate::{
    handlers::{
        approve_handler, feature_handler, history_handler, invite_co_author_handler,
        metrics_handler, published_article_handler, reject_handler, resend_approval_handler,
        submit_article_handler, submit_utr_handler, validate_token_handler,
        verify_and_publish_handler, ApiError,
    },
    state::AppState,
};

pub async fn run() -> Result<(), BootstrapError> {
    let config = ApiConfig::load_from_env()?;
    let workflow_config = WorkflowConfig::load_from_env()?;
    let mail_config = MailConfig::load_from_env()?;
    let outbox_config = OutboxConfig::load_from_env()?;

    let telemetry_config = TelemetryConfig::from_env("API");
    let telemetry = init_telemetry(&telemetry_config)?;

    let storage = SeaOrmStorage::connect(config.database_url()).await?;
    let notifier: Arc<dyn Notifier> = Arc::new(HttpMailTransport::new(&mail_config)?);
    let payment_codes: Arc<dyn PaymentCodes> = Arc::new(UpiQrCodes::from_config(&workflow_config));
    let workflow = Workflow::new(storage, notifier, payment_codes, workflow_config)
        .with_max_delivery_attempts(outbox_config.max_attempts());

    let state = AppState::new(
        Arc::new(workflow),
        telemetry.clone(),
        telemetry.abuse_tracker(),
    );

    let include_metrics_on_public = !config.has_internal_listener();

    let public_state = state.clone();
    let mut public_server = HttpServer::new(move || {
        let mut app = App::new()
            .app_data(web::Data::new(public_state.clone()))
            .wrap(Logger::default())
            .configure(configure_routes);

        if include_metrics_on_public {
            app = app.route("/metrics", web::get().to(metrics_handler));
        }

        app
    });

    #[cfg(unix)]
    {
        if let Some(socket) = config.api_unix_socket() {
            cleanup_socket(socket)?;
            public_server = public_server.bind_uds(socket)?;
        } else {
            public_server = public_server.bind(config.api_bind_address())?;
        }
    }

    #[cfg(not(unix))]
    {
        if let Some(socket) = config.api_unix_socket() {
            return Err(BootstrapError::Io(std::io::Error::other(format!(
                "unix socket '{socket}' requested but this platform does not support it"
            ))));
        }
        public_server = public_server.bind(config.api_bind_address())?;
    }

    info!(
        bind = config.api_unix_socket().unwrap_or(config.api_bind_address()),
        "api listening"
    );
    let public_server = public_server.run();

    let internal_server = if config.has_internal_listener() {
        let internal_state = state.clone();
        let mut internal_server = HttpServer::new(move || {
            App::new()
                .app_data(web::Data::new(internal_state.clone()))
                .wrap(Logger::default())
                .route("/metrics", web::get().to(metrics_handler))
        });

        #[cfg(unix)]
        {
            if let Some(socket) = config.internal_unix_socket() {
                cleanup_socket(socket)?;
                internal_server = internal_server.bind_uds(socket)?;
            } else if let Some(addr) = config.internal_bind_address() {
                internal_server = internal_server.bind(addr)?;
            } else {
                return Err(BootstrapError::Io(std::io::Error::other(
                    "internal listener configured but no bind target provided",
                )));
            }
        }

        #[cfg(not(unix))]
        {
            if let Some(socket) = config.internal_unix_socket() {
                return Err(BootstrapError::Io(std::io::Error::other(format!(
                    "internal unix socket '{socket}' requested but this platform does not support it"
                ))));
            }
            if let Some(addr) = config.internal_bind_address() {
                internal_server = internal_server.bind(addr)?;
            } else {
                return Err(BootstrapError::Io(std::io::Error::other(
                    "internal listener configured but no bind target provided",
                )));
            }
        }

        Some(internal_server.run())
    } else {
        None
    };

    if let Some(internal) = internal_server {
        tokio::try_join!(public_server, internal)?;
    } else {
        public_server.await?;
    }

    Ok(())
}

/// Public and admin routes plus the extractor configs that turn malformed
/// input into the JSON error envelope.
pub fn configure_routes(cfg: &mut web::ServiceConfig) {
    cfg.app_data(web::JsonConfig::default().error_handler(|err, _| bad_request(err)))
        .app_data(web::PathConfig::default().error_handler(|err, _| bad_request(err)))
        .app_data(web::QueryConfig::default().error_handler(|err, _| bad_request(err)))
        .route("/articles", web::post().to(submit_article_handler))
        .route("/articles/{slug}", web::get().to(published_article_handler))
        .route(
            "/articles/{id}/co-authors",
            web::post().to(invite_co_author_handler),
        )
        .route("/articles/{id}/feature", web::put().to(feature_handler))
        .service(
            web::scope("/admin/articles/{id}")
                .route("/approve", web::post().to(approve_handler))
                .route("/reject", web::post().to(reject_handler))
                .route(
                    "/resend-approval",
                    web::post().to(resend_approval_handler),
                )
                .route(
                    "/verify-and-publish",
                    web::post().to(verify_and_publish_handler),
                )
                .route("/history", web::get().to(history_handler)),
        )
        .service(
            web::scope("/payment")
                .route("/validate-token", web::get().to(validate_token_handler))
                .route("/submit-utr", web::post().to(submit_utr_handler)),
        );
}

fn bad_request(err: impl std::fmt::Display) -> ActixError {
    ApiError::BadRequest(err.to_string()).into()
}

#[derive(Debug, Error)]
pub enum BootstrapError {
    #[error("config error: {0}")]
    Config(#[from] ConfigError),
    #[error("telemetry error: {0}")]
    Telemetry(#[from] TelemetryError),
    #[error("storage error: {0}")]
    Storage(#[from] StorageError),
    #[error("mail transport error: {0}")]
    Mail(#[from] NotificationError),
    #[error(transparent)]
    Io(#[from] std::io::Error),
}

/// Removes a stale socket file left by an unclean shutdown.
#[cfg(unix)]
fn cleanup_socket(path: &str) -> std::io::Result<()> {
    let socket_path = Path::new(path);
    if socket_path.exists() {
        fs::remove_file(socket_path)?;
    }
    Ok(())
}

#[cfg(not(unix))]
fn cleanup_socket(_path: &str) -> std::io::Result<()> {
    Ok(())
}

#[cfg(test)]
mod tests {
    #[cfg(unix)]
    #[actix_web::test]
    async fn cleanup_socket_removes_stale_file() {
        use super::cleanup_socket;

        let path = std::env::temp_dir().join(format!(
            "law-journal-test-{}-{}.sock",
            std::process::id(),
            std::time::SystemTime::now()
                .duration_since(std::time::SystemTime::UNIX_EPOCH)
                .unwrap()
                .as_nanos()
        ));
        std::fs::write(&path, b"stub").expect("write socket file");
        cleanup_socket(path.to_str().unwrap()).expect("cleanup succeeds");
        assert!(!path.exists());
    }
}
