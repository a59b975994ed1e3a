use async_trait::async_trait;
use chrono::{DateTime, Utc};
use thiserror::Error;

use crate::model::{
    AppliedChange, ArticleChange, ArticleId, ArticleRecord, NewArticle, OutboundEmail,
    OutboxEmailRecord, PaymentTokenRecord, ProfileRecord, RedemptionOutcome, TokenFingerprint,
    TokenRedemption, TransitionRecord, UserId,
};

/// Common result alias for storage operations.
pub type StorageResult<T> = Result<T, StorageError>;

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum StorageError {
    #[error("database error: {0}")]
    Database(String),
    #[error("unique constraint violated on {0}")]
    Conflict(&'static str),
}

impl StorageError {
    pub fn from_source(err: impl std::fmt::Display) -> Self {
        Self::Database(err.to_string())
    }
}

#[async_trait]
pub trait ArticleStore: Send + Sync {
    async fn insert_article(&self, article: NewArticle) -> StorageResult<ArticleRecord>;
    async fn find_article(&self, id: ArticleId) -> StorageResult<Option<ArticleRecord>>;
    async fn find_article_by_slug(&self, slug: &str) -> StorageResult<Option<ArticleRecord>>;

    /// Applies `change` only if the article is still in
    /// `change.expected_status`. Returns `None` when the row did not match
    /// (unknown article or concurrent transition); nothing is written then.
    async fn apply_change(&self, change: ArticleChange) -> StorageResult<Option<AppliedChange>>;

    /// Marks the token used and records the UTR in one transaction.
    async fn redeem_token(&self, redemption: TokenRedemption)
        -> StorageResult<RedemptionOutcome>;

    async fn list_transitions(&self, id: ArticleId) -> StorageResult<Vec<TransitionRecord>>;
}

#[async_trait]
pub trait TokenStore: Send + Sync {
    async fn find_token(
        &self,
        fingerprint: &TokenFingerprint,
    ) -> StorageResult<Option<PaymentTokenRecord>>;
    async fn tokens_for_article(&self, id: ArticleId) -> StorageResult<Vec<PaymentTokenRecord>>;
}

#[async_trait]
pub trait ProfileStore: Send + Sync {
    async fn find_profile(&self, user_id: &UserId) -> StorageResult<Option<ProfileRecord>>;
    async fn upsert_profile(&self, profile: ProfileRecord) -> StorageResult<ProfileRecord>;
}

#[async_trait]
pub trait OutboxStore: Send + Sync {
    async fn enqueue_email(
        &self,
        article_id: Option<ArticleId>,
        email: OutboundEmail,
        queued_at: DateTime<Utc>,
    ) -> StorageResult<OutboxEmailRecord>;

    /// Pending rows whose next attempt is due at `now`, oldest first.
    async fn due_emails(&self, now: DateTime<Utc>, limit: u64)
        -> StorageResult<Vec<OutboxEmailRecord>>;

    async fn mark_delivered(&self, id: i64, delivered_at: DateTime<Utc>) -> StorageResult<()>;

    /// Bumps the attempt counter; `retry_at == None` abandons the row.
    async fn record_failure(
        &self,
        id: i64,
        error: &str,
        retry_at: Option<DateTime<Utc>>,
    ) -> StorageResult<()>;

    async fn pending_count(&self) -> StorageResult<u64>;
}

/// Everything the workflow orchestrator needs from persistence.
pub trait WorkflowStore: ArticleStore + TokenStore + ProfileStore + OutboxStore {}

impl<T> WorkflowStore for T where T: ArticleStore + TokenStore + ProfileStore + OutboxStore {}
