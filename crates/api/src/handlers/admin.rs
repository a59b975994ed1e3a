use actix_web::{http::StatusCode, web, HttpResponse};
use chrono::{DateTime, Utc};
use law_journal_domain::model::{ArticleId, TransitionRecord};
use law_journal_domain::services::workflow::{Outcome, PaymentLinkIssued};
use serde::{Deserialize, Serialize};

use crate::auth::AdminCaller;
use crate::state::AppState;

use super::{committed, committed_envelope, ApiError, ArticleView, Envelope};

#[derive(Debug, Deserialize, Serialize)]
pub struct RejectRequest {
    pub rejection_reason: String,
}

#[derive(Debug, Deserialize, Serialize)]
pub struct PaymentLinkResponse {
    pub expires_at: DateTime<Utc>,
    pub article: ArticleView,
}

/// Payment link envelope; the expiry is repeated beside `data` for callers
/// that read it from the top level.
#[derive(Debug, Serialize)]
struct PaymentLinkEnvelope {
    #[serde(flatten)]
    envelope: Envelope<PaymentLinkResponse>,
    expires_at: DateTime<Utc>,
}

fn payment_link_response(outcome: Outcome<PaymentLinkIssued>) -> HttpResponse {
    let Outcome {
        data,
        notification_error,
    } = outcome;
    let expires_at = data.expires_at;
    let (status, envelope) = committed_envelope(
        StatusCode::OK,
        PaymentLinkResponse {
            expires_at,
            article: ArticleView::from(data.article),
        },
        notification_error,
    );
    HttpResponse::build(status).json(PaymentLinkEnvelope {
        envelope,
        expires_at,
    })
}

pub async fn approve_handler(
    state: web::Data<AppState>,
    caller: AdminCaller,
    path: web::Path<i64>,
) -> Result<HttpResponse, ApiError> {
    let outcome = state
        .workflow()
        .approve(&caller.0, ArticleId::new(path.into_inner()))
        .await?;
    Ok(payment_link_response(outcome))
}

pub async fn resend_approval_handler(
    state: web::Data<AppState>,
    caller: AdminCaller,
    path: web::Path<i64>,
) -> Result<HttpResponse, ApiError> {
    let outcome = state
        .workflow()
        .resend_approval(&caller.0, ArticleId::new(path.into_inner()))
        .await?;
    Ok(payment_link_response(outcome))
}

pub async fn reject_handler(
    state: web::Data<AppState>,
    caller: AdminCaller,
    path: web::Path<i64>,
    payload: web::Json<RejectRequest>,
) -> Result<HttpResponse, ApiError> {
    let outcome = state
        .workflow()
        .reject(
            &caller.0,
            ArticleId::new(path.into_inner()),
            &payload.rejection_reason,
        )
        .await?;
    Ok(committed(
        StatusCode::OK,
        ArticleView::from(outcome.data),
        outcome.notification_error,
    ))
}

pub async fn verify_and_publish_handler(
    state: web::Data<AppState>,
    caller: AdminCaller,
    path: web::Path<i64>,
) -> Result<HttpResponse, ApiError> {
    let outcome = state
        .workflow()
        .verify_and_publish(&caller.0, ArticleId::new(path.into_inner()))
        .await?;
    Ok(committed(
        StatusCode::OK,
        ArticleView::from(outcome.data),
        outcome.notification_error,
    ))
}

pub async fn history_handler(
    state: web::Data<AppState>,
    caller: AdminCaller,
    path: web::Path<i64>,
) -> Result<HttpResponse, ApiError> {
    let transitions: Vec<TransitionRecord> = state
        .workflow()
        .history(&caller.0, ArticleId::new(path.into_inner()))
        .await?;
    Ok(HttpResponse::Ok().json(Envelope::success(transitions)))
}
