use actix_web::{web, HttpRequest, HttpResponse};
use law_journal_domain::model::{ArticleStatus, ArticleSummary};
use law_journal_domain::services::workflow::WorkflowError;
use metrics::counter;
use serde::{Deserialize, Serialize};
use strum_macros::AsRefStr;

use crate::state::AppState;

use super::{ApiError, Envelope};

#[derive(Debug, Clone, Copy, AsRefStr)]
#[strum(serialize_all = "snake_case")]
enum PaymentEndpoint {
    ValidateToken,
    SubmitUtr,
}

#[derive(Debug, Deserialize, Serialize)]
pub struct TokenQuery {
    pub token: String,
}

#[derive(Debug, Deserialize, Serialize)]
pub struct SubmitUtrRequest {
    pub token: String,
    pub utr_number: String,
}

#[derive(Debug, Deserialize, Serialize)]
pub struct PaymentRecorded {
    #[serde(flatten)]
    pub article: ArticleSummary,
    pub status: ArticleStatus,
}

pub async fn validate_token_handler(
    state: web::Data<AppState>,
    req: HttpRequest,
    query: web::Query<TokenQuery>,
) -> Result<HttpResponse, ApiError> {
    let result = state.workflow().validate_token(&query.token).await;
    observe(&state, &req, PaymentEndpoint::ValidateToken, &result);
    Ok(HttpResponse::Ok().json(Envelope::success(result?)))
}

pub async fn submit_utr_handler(
    state: web::Data<AppState>,
    req: HttpRequest,
    payload: web::Json<SubmitUtrRequest>,
) -> Result<HttpResponse, ApiError> {
    let result = state
        .workflow()
        .submit_utr(&payload.token, &payload.utr_number)
        .await;
    observe(&state, &req, PaymentEndpoint::SubmitUtr, &result);
    let article = result?;
    Ok(HttpResponse::Ok().json(Envelope::success(PaymentRecorded {
        article: article.summary(),
        status: article.status,
    })))
}

/// Counts the request and feeds token-guessing shapes to the abuse tracker.
fn observe<T>(
    state: &AppState,
    req: &HttpRequest,
    endpoint: PaymentEndpoint,
    result: &Result<T, WorkflowError>,
) {
    let status = match result {
        Ok(_) => "ok",
        Err(err) => err.kind(),
    };
    counter!(
        "payment_token_requests_total",
        "endpoint" => endpoint.as_ref().to_owned(),
        "status" => status
    )
    .increment(1);

    let guessing = matches!(
        result,
        Err(WorkflowError::TokenNotFound | WorkflowError::Validation { field: "token", .. })
    );
    if guessing {
        let client = req
            .connection_info()
            .realip_remote_addr()
            .unwrap_or("unknown")
            .to_owned();
        state.abuse_tracker().record(client);
    }
}
