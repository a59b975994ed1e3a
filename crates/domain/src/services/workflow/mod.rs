//! Sequences guard, lifecycle, token and notification steps for every
//! article action and reports one outcome per request.


use std::sync::Arc;

use chrono::{DateTime, Utc};
use hex::encode as hex_encode;
use metrics::counter;
use serde::Serialize;
use thiserror::Error;
use tracing::{info, warn};

use crate::config::WorkflowConfig;
use crate::lifecycle::{
    next_status, validate_email, validate_rejection_reason, validate_submission, validate_utr,
    FieldError, TransitionError,
};
use crate::model::{
    payment_token_ttl, slugify, AppliedChange, ArticleChange, ArticleId, ArticleRecord,
    ArticleStatus, ArticleSummary, ArticleUpdate, NewArticle, NewPaymentToken, OutboundEmail,
    ProfileRecord, RedemptionOutcome, TokenFormatError, TokenRedemption, TokenRejection,
    TokenValue, TransitionRecord, WorkflowAction,
};
use crate::notification::{
    deliver_queued, ApprovalNotice, Notice, NotificationError, Notifier, PaymentCodes,
    PaymentRequest, DEFAULT_MAX_DELIVERY_ATTEMPTS,
};
use crate::services::clock::{Clock, SystemClock};
use crate::services::guard::{AccessError, AdminProfile};
use crate::storage::{StorageError, WorkflowStore};

const MAX_TAGS: usize = 10;

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum WorkflowError {
    #[error("authentication required")]
    Unauthenticated,
    #[error("not allowed to perform this action")]
    Forbidden,
    #[error("invalid {field}: {message}")]
    Validation { field: &'static str, message: String },
    #[error("article not found")]
    ArticleNotFound,
    #[error("payment token not found")]
    TokenNotFound,
    #[error("{0}")]
    PreconditionFailed(String),
    #[error("payment token has already been used")]
    TokenAlreadyUsed,
    #[error("payment token has expired")]
    TokenExpired,
    #[error("storage failure: {0}")]
    Storage(#[from] StorageError),
    #[error("could not generate secure random value: {0}")]
    Entropy(String),
    #[error(transparent)]
    Notification(#[from] NotificationError),
}

impl WorkflowError {
    /// Short label used for metrics.
    pub fn kind(&self) -> &'static str {
        match self {
            WorkflowError::Unauthenticated => "unauthenticated",
            WorkflowError::Forbidden => "forbidden",
            WorkflowError::Validation { .. } => "validation",
            WorkflowError::ArticleNotFound | WorkflowError::TokenNotFound => "not_found",
            WorkflowError::PreconditionFailed(_) => "precondition_failed",
            WorkflowError::TokenAlreadyUsed => "already_used",
            WorkflowError::TokenExpired => "expired",
            WorkflowError::Storage(_) | WorkflowError::Entropy(_) => "storage",
            WorkflowError::Notification(_) => "notification",
        }
    }
}

impl From<AccessError> for WorkflowError {
    fn from(value: AccessError) -> Self {
        match value {
            AccessError::Unauthenticated => WorkflowError::Unauthenticated,
            AccessError::Forbidden => WorkflowError::Forbidden,
            AccessError::Storage(err) => WorkflowError::Storage(err),
        }
    }
}

impl From<FieldError> for WorkflowError {
    fn from(value: FieldError) -> Self {
        WorkflowError::Validation {
            field: value.field,
            message: value.message,
        }
    }
}

impl From<TransitionError> for WorkflowError {
    fn from(value: TransitionError) -> Self {
        WorkflowError::PreconditionFailed(value.to_string())
    }
}

impl From<TokenRejection> for WorkflowError {
    fn from(value: TokenRejection) -> Self {
        match value {
            TokenRejection::AlreadyUsed => WorkflowError::TokenAlreadyUsed,
            TokenRejection::Expired => WorkflowError::TokenExpired,
        }
    }
}

impl From<TokenFormatError> for WorkflowError {
    fn from(value: TokenFormatError) -> Self {
        WorkflowError::Validation {
            field: "token",
            message: value.to_string(),
        }
    }
}

/// Result of a committed action. `notification_error` is set when the state
/// change stuck but the inline email did not go out; the outbox retries it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Outcome<T> {
    pub data: T,
    pub notification_error: Option<NotificationError>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PaymentLinkIssued {
    pub article: ArticleRecord,
    pub expires_at: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct TokenCheck {
    #[serde(flatten)]
    pub article: ArticleSummary,
    pub expires_at: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ArticleDraft {
    pub title: String,
    pub abstract_text: String,
    pub tags: Vec<String>,
    pub file_reference: String,
}

pub struct Workflow<S> {
    store: S,
    notifier: Arc<dyn Notifier>,
    payment_codes: Arc<dyn PaymentCodes>,
    clock: Arc<dyn Clock>,
    config: WorkflowConfig,
    max_delivery_attempts: u32,
}

impl<S> Workflow<S>
where
    S: WorkflowStore,
{
    pub fn new(
        store: S,
        notifier: Arc<dyn Notifier>,
        payment_codes: Arc<dyn PaymentCodes>,
        config: WorkflowConfig,
    ) -> Self {
        Self {
            store,
            notifier,
            payment_codes,
            clock: Arc::new(SystemClock),
            config,
            max_delivery_attempts: DEFAULT_MAX_DELIVERY_ATTEMPTS,
        }
    }

    pub fn with_clock(mut self, clock: Arc<dyn Clock>) -> Self {
        self.clock = clock;
        self
    }

    pub fn with_max_delivery_attempts(mut self, attempts: u32) -> Self {
        self.max_delivery_attempts = attempts.max(1);
        self
    }

    pub fn store(&self) -> &S {
        &self.store
    }

    pub fn config(&self) -> &WorkflowConfig {
        &self.config
    }

    pub async fn submit_article(
        &self,
        author: &ProfileRecord,
        draft: ArticleDraft,
    ) -> Result<ArticleRecord, WorkflowError> {
        let result = self.submit_article_inner(author, draft).await;
        record(WorkflowAction::Submit, &result);
        result
    }

    async fn submit_article_inner(
        &self,
        author: &ProfileRecord,
        draft: ArticleDraft,
    ) -> Result<ArticleRecord, WorkflowError> {
        validate_submission(&draft.title, &draft.abstract_text, &draft.file_reference)?;
        let slug = format!("{}-{}", slugify(&draft.title), random_suffix()?);
        let article = self
            .store
            .insert_article(NewArticle {
                slug,
                author_id: author.user_id.clone(),
                title: draft.title.trim().to_string(),
                abstract_text: draft.abstract_text.trim().to_string(),
                tags: normalize_tags(draft.tags),
                file_reference: draft.file_reference.trim().to_string(),
                submitted_at: self.clock.now(),
            })
            .await?;
        info!(article_id = %article.id, author = %article.author_id, "article submitted");
        Ok(article)
    }

    pub async fn approve(
        &self,
        admin: &AdminProfile,
        id: ArticleId,
    ) -> Result<Outcome<PaymentLinkIssued>, WorkflowError> {
        let result = self
            .issue_payment_link(admin, id, WorkflowAction::Approve)
            .await;
        record(WorkflowAction::Approve, &result);
        result
    }

    /// Issues a fresh 48h token for an article still awaiting payment.
    /// Earlier tokens stay valid until they expire or are used.
    pub async fn resend_approval(
        &self,
        admin: &AdminProfile,
        id: ArticleId,
    ) -> Result<Outcome<PaymentLinkIssued>, WorkflowError> {
        let result = self
            .issue_payment_link(admin, id, WorkflowAction::ResendApproval)
            .await;
        record(WorkflowAction::ResendApproval, &result);
        result
    }

    async fn issue_payment_link(
        &self,
        admin: &AdminProfile,
        id: ArticleId,
        action: WorkflowAction,
    ) -> Result<Outcome<PaymentLinkIssued>, WorkflowError> {
        let article = self.load(id).await?;
        let target = next_status(article.status, action)?;
        let author = self.author_of(&article).await?;
        let now = self.clock.now();

        let (value, token) = NewPaymentToken::issue(
            article.id,
            article.author_id.clone(),
            now,
            payment_token_ttl(),
        )
        .map_err(|err| WorkflowError::Entropy(err.to_string()))?;
        let expires_at = token.expires_at;

        let payment = self.payment_codes.payment_code(&PaymentRequest {
            payee_address: self.config.payment_upi_id().to_string(),
            payee_name: self.config.payment_payee_name().to_string(),
            amount: self.config.publication_fee(),
            note: format!("{} article {}", self.config.journal_name(), article.id),
        })?;
        let notice = ApprovalNotice {
            author_name: author.display_name.clone(),
            article_title: article.title.clone(),
            payment_link: format!(
                "{}/payment?token={}",
                self.config.public_base_url(),
                value.as_str()
            ),
            expires_at,
            fee: self.config.publication_fee(),
            payee_name: self.config.payment_payee_name().to_string(),
            payment,
        };
        let notice = if action == WorkflowAction::Approve {
            Notice::Approval(notice)
        } else {
            Notice::ResendApproval(notice)
        };
        let email = notice.render(&author.email, self.config.journal_name());

        let update = if target == article.status {
            ArticleUpdate::Touch
        } else {
            ArticleUpdate::Status(target)
        };
        let (article, notification_error) = self
            .commit(
                ArticleChange {
                    article_id: article.id,
                    expected_status: article.status,
                    update,
                    actor_id: admin.user_id().clone(),
                    action,
                    note: Some(format!("payment link valid until {expires_at}")),
                    new_token: Some(token),
                    email: Some(email),
                    occurred_at: now,
                },
                now,
            )
            .await?;

        Ok(Outcome {
            data: PaymentLinkIssued {
                article,
                expires_at,
            },
            notification_error,
        })
    }

    pub async fn reject(
        &self,
        admin: &AdminProfile,
        id: ArticleId,
        reason: &str,
    ) -> Result<Outcome<ArticleRecord>, WorkflowError> {
        let result = self.reject_inner(admin, id, reason).await;
        record(WorkflowAction::Reject, &result);
        result
    }

    async fn reject_inner(
        &self,
        admin: &AdminProfile,
        id: ArticleId,
        reason: &str,
    ) -> Result<Outcome<ArticleRecord>, WorkflowError> {
        let reason = validate_rejection_reason(reason)?;
        let article = self.load(id).await?;
        next_status(article.status, WorkflowAction::Reject)?;
        let author = self.author_of(&article).await?;
        let now = self.clock.now();

        let email = Notice::Rejection {
            author_name: author.display_name.clone(),
            article_title: article.title.clone(),
            reason: reason.clone(),
        }
        .render(&author.email, self.config.journal_name());

        let (article, notification_error) = self
            .commit(
                ArticleChange {
                    article_id: article.id,
                    expected_status: article.status,
                    update: ArticleUpdate::Reject {
                        reason: reason.clone(),
                    },
                    actor_id: admin.user_id().clone(),
                    action: WorkflowAction::Reject,
                    note: Some(reason),
                    new_token: None,
                    email: Some(email),
                    occurred_at: now,
                },
                now,
            )
            .await?;
        Ok(Outcome {
            data: article,
            notification_error,
        })
    }

    pub async fn verify_and_publish(
        &self,
        admin: &AdminProfile,
        id: ArticleId,
    ) -> Result<Outcome<ArticleRecord>, WorkflowError> {
        let result = self.verify_and_publish_inner(admin, id).await;
        record(WorkflowAction::VerifyAndPublish, &result);
        result
    }

    async fn verify_and_publish_inner(
        &self,
        admin: &AdminProfile,
        id: ArticleId,
    ) -> Result<Outcome<ArticleRecord>, WorkflowError> {
        let article = self.load(id).await?;
        let target = next_status(article.status, WorkflowAction::VerifyAndPublish)?;
        let author = self.author_of(&article).await?;
        let now = self.clock.now();

        let email = Notice::Published {
            author_name: author.display_name.clone(),
            article_title: article.title.clone(),
            article_url: self.article_url(&article),
        }
        .render(&author.email, self.config.journal_name());

        let (article, notification_error) = self
            .commit(
                ArticleChange {
                    article_id: article.id,
                    expected_status: article.status,
                    update: ArticleUpdate::Status(target),
                    actor_id: admin.user_id().clone(),
                    action: WorkflowAction::VerifyAndPublish,
                    note: article.utr_number.as_ref().map(|utr| format!("utr {utr}")),
                    new_token: None,
                    email: Some(email),
                    occurred_at: now,
                },
                now,
            )
            .await?;
        Ok(Outcome {
            data: article,
            notification_error,
        })
    }

    pub async fn set_featured(
        &self,
        admin: &AdminProfile,
        id: ArticleId,
        is_featured: bool,
    ) -> Result<ArticleRecord, WorkflowError> {
        let action = if is_featured {
            WorkflowAction::Feature
        } else {
            WorkflowAction::Unfeature
        };
        let result = self.set_featured_inner(admin, id, action, is_featured).await;
        record(action, &result);
        result
    }

    async fn set_featured_inner(
        &self,
        admin: &AdminProfile,
        id: ArticleId,
        action: WorkflowAction,
        is_featured: bool,
    ) -> Result<ArticleRecord, WorkflowError> {
        let article = self.load(id).await?;
        next_status(article.status, action)?;
        let now = self.clock.now();
        let (article, _) = self
            .commit(
                ArticleChange {
                    article_id: article.id,
                    expected_status: article.status,
                    update: ArticleUpdate::Feature { is_featured },
                    actor_id: admin.user_id().clone(),
                    action,
                    note: None,
                    new_token: None,
                    email: None,
                    occurred_at: now,
                },
                now,
            )
            .await?;
        Ok(article)
    }

    /// Public lookup behind the emailed payment link.
    pub async fn validate_token(&self, raw: &str) -> Result<TokenCheck, WorkflowError> {
        let value = TokenValue::parse(raw)?;
        let token = self
            .store
            .find_token(&value.fingerprint())
            .await?
            .ok_or(WorkflowError::TokenNotFound)?;
        token.check_redeemable(self.clock.now())?;
        let article = self.load(token.article_id).await?;
        next_status(article.status, WorkflowAction::SubmitUtr)?;
        Ok(TokenCheck {
            article: article.summary(),
            expires_at: token.expires_at,
        })
    }

    /// Records the author's payment reference and burns the token. Exactly one
    /// of several concurrent submissions with the same token succeeds.
    pub async fn submit_utr(
        &self,
        raw_token: &str,
        utr_number: &str,
    ) -> Result<ArticleRecord, WorkflowError> {
        let result = self.submit_utr_inner(raw_token, utr_number).await;
        record(WorkflowAction::SubmitUtr, &result);
        result
    }

    async fn submit_utr_inner(
        &self,
        raw_token: &str,
        utr_number: &str,
    ) -> Result<ArticleRecord, WorkflowError> {
        let value = TokenValue::parse(raw_token)?;
        let utr_number = validate_utr(utr_number)?;
        let fingerprint = value.fingerprint();
        let now = self.clock.now();

        let token = self
            .store
            .find_token(&fingerprint)
            .await?
            .ok_or(WorkflowError::TokenNotFound)?;
        token.check_redeemable(now)?;

        let outcome = self
            .store
            .redeem_token(TokenRedemption {
                fingerprint: fingerprint.clone(),
                utr_number,
                redeemed_at: now,
            })
            .await?;

        match outcome {
            RedemptionOutcome::Redeemed(article) => {
                info!(article_id = %article.id, "payment reference submitted");
                Ok(article)
            }
            RedemptionOutcome::TokenRejected => {
                // Lost a race; report what the token looks like now.
                let token = self
                    .store
                    .find_token(&fingerprint)
                    .await?
                    .ok_or(WorkflowError::TokenNotFound)?;
                token.check_redeemable(now)?;
                Err(WorkflowError::TokenAlreadyUsed)
            }
            RedemptionOutcome::ArticleNotEligible => {
                let article = self.load(token.article_id).await?;
                Err(next_status(article.status, WorkflowAction::SubmitUtr)
                    .err()
                    .map(WorkflowError::from)
                    .unwrap_or_else(|| {
                        WorkflowError::PreconditionFailed(
                            "article is not awaiting payment".to_string(),
                        )
                    }))
            }
        }
    }

    /// Queues an invitation mail to a co-author named by the article's author.
    pub async fn invite_co_author(
        &self,
        inviter: &ProfileRecord,
        id: ArticleId,
        email: &str,
        name: &str,
    ) -> Result<Outcome<()>, WorkflowError> {
        let recipient = validate_email(email)?;
        let invitee_name = name.trim();
        if invitee_name.is_empty() {
            return Err(WorkflowError::Validation {
                field: "name",
                message: "is required".to_string(),
            });
        }
        let article = self.load(id).await?;
        if article.author_id != inviter.user_id && !inviter.is_admin {
            return Err(WorkflowError::Forbidden);
        }
        if article.status == ArticleStatus::Rejected {
            return Err(WorkflowError::PreconditionFailed(
                "cannot invite co-authors to a rejected article".to_string(),
            ));
        }

        let email = Notice::CoAuthorInvite {
            invitee_name: invitee_name.to_string(),
            inviter_name: inviter.display_name.clone(),
            article_title: article.title.clone(),
            article_url: self.article_url(&article),
        }
        .render(&recipient, self.config.journal_name());
        let now = self.clock.now();
        let queued = self
            .store
            .enqueue_email(Some(article.id), email.clone(), now)
            .await?;
        let notification_error = self.deliver(queued.id, &email, now).await;
        Ok(Outcome {
            data: (),
            notification_error,
        })
    }

    pub async fn history(
        &self,
        _admin: &AdminProfile,
        id: ArticleId,
    ) -> Result<Vec<TransitionRecord>, WorkflowError> {
        let article = self.load(id).await?;
        Ok(self.store.list_transitions(article.id).await?)
    }

    /// Public view of a published article; anything else is hidden.
    pub async fn published_article(&self, slug: &str) -> Result<ArticleRecord, WorkflowError> {
        match self.store.find_article_by_slug(slug).await? {
            Some(article) if article.status == ArticleStatus::Published => Ok(article),
            _ => Err(WorkflowError::ArticleNotFound),
        }
    }

    async fn load(&self, id: ArticleId) -> Result<ArticleRecord, WorkflowError> {
        self.store
            .find_article(id)
            .await?
            .ok_or(WorkflowError::ArticleNotFound)
    }

    async fn author_of(&self, article: &ArticleRecord) -> Result<ProfileRecord, WorkflowError> {
        self.store
            .find_profile(&article.author_id)
            .await?
            .ok_or_else(|| {
                WorkflowError::PreconditionFailed(
                    "article author has no contact profile".to_string(),
                )
            })
    }

    fn article_url(&self, article: &ArticleRecord) -> String {
        format!("{}/articles/{}", self.config.public_base_url(), article.slug)
    }

    /// Persists the change, then tries the queued email once inline.
    async fn commit(
        &self,
        change: ArticleChange,
        now: DateTime<Utc>,
    ) -> Result<(ArticleRecord, Option<NotificationError>), WorkflowError> {
        let action = change.action;
        let email = change.email.clone();
        let AppliedChange { article, email_id } =
            self.store.apply_change(change).await?.ok_or_else(|| {
                WorkflowError::PreconditionFailed(
                    "article was modified concurrently; reload and retry".to_string(),
                )
            })?;
        info!(
            article_id = %article.id,
            action = action.as_ref(),
            status = article.status.as_ref(),
            "article transition committed"
        );

        let notification_error = match (email_id, email) {
            (Some(id), Some(email)) => self.deliver(id, &email, now).await,
            _ => None,
        };
        Ok((article, notification_error))
    }

    async fn deliver(
        &self,
        outbox_id: i64,
        email: &OutboundEmail,
        now: DateTime<Utc>,
    ) -> Option<NotificationError> {
        let result = deliver_queued(
            &self.store,
            self.notifier.as_ref(),
            outbox_id,
            email,
            0,
            self.max_delivery_attempts,
            now,
        )
        .await;
        if let Err(err) = &result {
            warn!(outbox_id, error = %err, "inline delivery failed; left for outbox worker");
        }
        result.err()
    }
}

fn record<T>(action: WorkflowAction, result: &Result<T, WorkflowError>) {
    let outcome = match result {
        Ok(_) => "ok",
        Err(err) => err.kind(),
    };
    counter!(
        "workflow_transitions_total",
        "action" => action.as_ref().to_owned(),
        "result" => outcome
    )
    .increment(1);
}

fn random_suffix() -> Result<String, WorkflowError> {
    let mut bytes = [0u8; 4];
    getrandom::fill(&mut bytes).map_err(|err| WorkflowError::Entropy(err.to_string()))?;
    Ok(hex_encode(bytes))
}

fn normalize_tags(tags: Vec<String>) -> Vec<String> {
    let mut normalized: Vec<String> = Vec::new();
    for tag in tags {
        let tag = tag.trim().to_lowercase();
        if !tag.is_empty() && !normalized.contains(&tag) {
            normalized.push(tag);
        }
        if normalized.len() == MAX_TAGS {
            break;
        }
    }
    normalized
}
