pub mod admin;
pub mod articles;
pub mod metrics;
pub mod payment;

pub use admin::{
    approve_handler, history_handler, reject_handler, resend_approval_handler,
    verify_and_publish_handler,
};
pub use articles::{
    feature_handler, invite_co_author_handler, published_article_handler, submit_article_handler,
};
pub use metrics::metrics_handler;
pub use payment::{submit_utr_handler, validate_token_handler};

use actix_web::{http::StatusCode, HttpResponse, ResponseError};
use chrono::{DateTime, Utc};
use law_journal_domain::model::{ArticleFlags, ArticleId, ArticleRecord, ArticleStatus, UserId};
use law_journal_domain::notification::NotificationError;
use law_journal_domain::services::workflow::WorkflowError;
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::{error, warn};
use validator::{Validate, ValidationErrors};

const NOTIFICATION_WARNING: &str =
    "the change was saved but the email could not be sent; it will be retried";

/// Request fields reported by name, keyed by the name validator uses.
const REQUEST_FIELDS: [(&str, &str); 6] = [
    ("title", "title"),
    ("abstract", "abstract"),
    ("abstract_text", "abstract"),
    ("file_reference", "file_reference"),
    ("email", "email"),
    ("name", "name"),
];

#[derive(Debug, Error)]
pub enum ApiError {
    #[error(transparent)]
    Workflow(#[from] WorkflowError),
    #[error("malformed request: {0}")]
    BadRequest(String),
    #[error("application state is not configured")]
    MissingState,
}

impl ApiError {
    fn public_message(&self) -> String {
        match self {
            ApiError::Workflow(WorkflowError::Storage(_) | WorkflowError::Entropy(_))
            | ApiError::MissingState => "internal server error".to_string(),
            other => other.to_string(),
        }
    }
}

impl ResponseError for ApiError {
    fn status_code(&self) -> StatusCode {
        match self {
            ApiError::Workflow(err) => match err {
                WorkflowError::Validation { .. }
                | WorkflowError::PreconditionFailed(_)
                | WorkflowError::TokenAlreadyUsed
                | WorkflowError::TokenExpired => StatusCode::BAD_REQUEST,
                WorkflowError::Unauthenticated => StatusCode::UNAUTHORIZED,
                WorkflowError::Forbidden => StatusCode::FORBIDDEN,
                WorkflowError::ArticleNotFound | WorkflowError::TokenNotFound => {
                    StatusCode::NOT_FOUND
                }
                WorkflowError::Storage(_)
                | WorkflowError::Entropy(_)
                | WorkflowError::Notification(_) => StatusCode::INTERNAL_SERVER_ERROR,
            },
            ApiError::BadRequest(_) => StatusCode::BAD_REQUEST,
            ApiError::MissingState => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }

    fn error_response(&self) -> HttpResponse {
        let status = self.status_code();
        if status.is_server_error() {
            error!(error = %self, "request failed");
        }
        HttpResponse::build(status).json(Envelope::<()>::failure(self.public_message()))
    }
}

/// Runs the derived request checks; the first failing field becomes a 400.
pub(crate) fn validate_request<T: Validate>(request: &T) -> Result<(), ApiError> {
    request.validate().map_err(validation_failure)
}

fn validation_failure(errors: ValidationErrors) -> ApiError {
    let fields = errors.field_errors();
    for (key, field) in REQUEST_FIELDS {
        if let Some(first) = fields.get(key).and_then(|list| list.first()) {
            let message = first
                .message
                .as_ref()
                .map(ToString::to_string)
                .unwrap_or_else(|| first.code.to_string());
            return WorkflowError::Validation { field, message }.into();
        }
    }
    ApiError::BadRequest(errors.to_string())
}

/// Body shape shared by every JSON endpoint.
#[derive(Debug, Serialize, Deserialize)]
pub struct Envelope<T> {
    pub success: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub data: Option<T>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub warning: Option<String>,
}

impl<T> Envelope<T> {
    pub fn success(data: T) -> Self {
        Self {
            success: true,
            error: None,
            data: Some(data),
            warning: None,
        }
    }

    pub fn failure(error: String) -> Self {
        Self {
            success: false,
            error: Some(error),
            data: None,
            warning: None,
        }
    }
}

/// Response for a committed change. A failed inline email still carries the
/// saved data; the outbox worker retries the delivery.
pub(crate) fn committed<T: Serialize>(
    status: StatusCode,
    data: T,
    notification_error: Option<NotificationError>,
) -> HttpResponse {
    let (status, envelope) = committed_envelope(status, data, notification_error);
    HttpResponse::build(status).json(envelope)
}

pub(crate) fn committed_envelope<T>(
    status: StatusCode,
    data: T,
    notification_error: Option<NotificationError>,
) -> (StatusCode, Envelope<T>) {
    match notification_error {
        None => (status, Envelope::success(data)),
        Some(err) => {
            warn!(error = %err, "responding with committed data after mail failure");
            (
                StatusCode::INTERNAL_SERVER_ERROR,
                Envelope {
                    success: false,
                    error: Some(err.to_string()),
                    data: Some(data),
                    warning: Some(NOTIFICATION_WARNING.to_string()),
                },
            )
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ArticleView {
    pub id: ArticleId,
    pub slug: String,
    pub author_id: UserId,
    pub title: String,
    #[serde(rename = "abstract")]
    pub abstract_text: String,
    pub tags: Vec<String>,
    pub file_reference: String,
    pub status: ArticleStatus,
    #[serde(flatten)]
    pub flags: ArticleFlags,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub rejection_reason: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub utr_number: Option<String>,
    pub is_featured: bool,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    pub published_at: Option<DateTime<Utc>>,
}

impl ArticleView {
    /// Readers of the public site never see payment or review details.
    pub fn public(record: ArticleRecord) -> Self {
        let mut view = Self::from(record);
        view.rejection_reason = None;
        view.utr_number = None;
        view
    }
}

impl From<ArticleRecord> for ArticleView {
    fn from(record: ArticleRecord) -> Self {
        Self {
            id: record.id,
            slug: record.slug,
            author_id: record.author_id,
            title: record.title,
            abstract_text: record.abstract_text,
            tags: record.tags,
            file_reference: record.file_reference,
            flags: record.status.flags(),
            status: record.status,
            rejection_reason: record.rejection_reason,
            utr_number: record.utr_number,
            is_featured: record.is_featured,
            created_at: record.created_at,
            updated_at: record.updated_at,
            published_at: record.published_at,
        }
    }
}
