use actix_web::{http::StatusCode, web, HttpResponse};
use law_journal_domain::model::ArticleId;
use law_journal_domain::services::workflow::ArticleDraft;
use serde::{Deserialize, Serialize};
use validator::Validate;

use crate::auth::{AdminCaller, AuthorCaller};
use crate::state::AppState;

use super::{committed, validate_request, ApiError, ArticleView, Envelope};

#[derive(Debug, Deserialize, Serialize, Validate)]
pub struct SubmitArticleRequest {
    #[validate(length(min = 5, message = "must be at least 5 characters"))]
    pub title: String,
    #[validate(length(min = 50, message = "must be at least 50 characters"))]
    #[serde(rename = "abstract")]
    pub abstract_text: String,
    #[serde(default)]
    pub tags: Vec<String>,
    #[validate(length(min = 1, message = "is required"))]
    pub file_reference: String,
}

#[derive(Debug, Deserialize, Serialize, Validate)]
pub struct InviteCoAuthorRequest {
    #[validate(email(message = "must be a valid email address"))]
    pub email: String,
    #[validate(length(min = 1, message = "is required"))]
    pub name: String,
}

#[derive(Debug, Deserialize, Serialize)]
pub struct InviteQueued {
    pub article_id: ArticleId,
    pub recipient: String,
}

#[derive(Debug, Deserialize, Serialize)]
pub struct FeatureRequest {
    pub is_featured: bool,
}

pub async fn submit_article_handler(
    state: web::Data<AppState>,
    caller: AuthorCaller,
    payload: web::Json<SubmitArticleRequest>,
) -> Result<HttpResponse, ApiError> {
    validate_request(&*payload)?;
    let SubmitArticleRequest {
        title,
        abstract_text,
        tags,
        file_reference,
    } = payload.into_inner();
    let article = state
        .workflow()
        .submit_article(
            &caller.0,
            ArticleDraft {
                title,
                abstract_text,
                tags,
                file_reference,
            },
        )
        .await?;
    Ok(HttpResponse::Created().json(Envelope::success(ArticleView::from(article))))
}

pub async fn published_article_handler(
    state: web::Data<AppState>,
    path: web::Path<String>,
) -> Result<HttpResponse, ApiError> {
    let article = state.workflow().published_article(&path.into_inner()).await?;
    Ok(HttpResponse::Ok().json(Envelope::success(ArticleView::public(article))))
}

pub async fn invite_co_author_handler(
    state: web::Data<AppState>,
    caller: AuthorCaller,
    path: web::Path<i64>,
    payload: web::Json<InviteCoAuthorRequest>,
) -> Result<HttpResponse, ApiError> {
    validate_request(&*payload)?;
    let article_id = ArticleId::new(path.into_inner());
    let outcome = state
        .workflow()
        .invite_co_author(&caller.0, article_id, &payload.email, &payload.name)
        .await?;
    Ok(committed(
        StatusCode::ACCEPTED,
        InviteQueued {
            article_id,
            recipient: payload.email.trim().to_string(),
        },
        outcome.notification_error,
    ))
}

pub async fn feature_handler(
    state: web::Data<AppState>,
    caller: AdminCaller,
    path: web::Path<i64>,
    payload: web::Json<FeatureRequest>,
) -> Result<HttpResponse, ApiError> {
    let article = state
        .workflow()
        .set_featured(&caller.0, ArticleId::new(path.into_inner()), payload.is_featured)
        .await?;
    Ok(HttpResponse::Ok().json(Envelope::success(ArticleView::from(article))))
}
