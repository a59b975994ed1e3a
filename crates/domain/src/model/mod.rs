//! Data structures shared across the API, storage and mailer crates.

mod token;

use std::fmt;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use strum_macros::{AsRefStr, EnumIter, EnumString};

pub use token::*;

/// Opaque primary key of an article.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ArticleId(i64);

impl ArticleId {
    pub fn new(value: i64) -> Self {
        Self(value)
    }

    pub fn get(self) -> i64 {
        self.0
    }
}

impl fmt::Display for ArticleId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Identity reference resolved by the upstream identity service.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct UserId(String);

impl UserId {
    /// Returns `None` for blank identifiers so callers cannot smuggle an
    /// empty identity past the guard.
    pub fn parse(value: &str) -> Option<Self> {
        let trimmed = value.trim();
        if trimmed.is_empty() {
            None
        } else {
            Some(Self(trimmed.to_string()))
        }
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    pub fn into_inner(self) -> String {
        self.0
    }
}

impl fmt::Display for UserId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Single source of truth for where an article sits in the review pipeline.
#[derive(
    Debug,
    Clone,
    Copy,
    PartialEq,
    Eq,
    Hash,
    Serialize,
    Deserialize,
    AsRefStr,
    EnumString,
    EnumIter,
)]
#[serde(rename_all = "snake_case")]
#[strum(serialize_all = "snake_case")]
pub enum ArticleStatus {
    Pending,
    AwaitingPayment,
    PaymentSubmitted,
    Published,
    Rejected,
}

impl ArticleStatus {
    /// Legacy boolean view consumed by older clients.
    pub fn flags(self) -> ArticleFlags {
        use ArticleStatus::*;
        ArticleFlags {
            approved: matches!(self, AwaitingPayment | PaymentSubmitted | Published),
            payment_submitted: matches!(self, PaymentSubmitted | Published),
            payment_done: matches!(self, Published),
            published: matches!(self, Published),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct ArticleFlags {
    pub approved: bool,
    pub payment_submitted: bool,
    pub payment_done: bool,
    pub published: bool,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ArticleRecord {
    pub id: ArticleId,
    pub slug: String,
    pub author_id: UserId,
    pub title: String,
    pub abstract_text: String,
    pub tags: Vec<String>,
    pub file_reference: String,
    pub status: ArticleStatus,
    pub rejection_reason: Option<String>,
    pub utr_number: Option<String>,
    pub is_featured: bool,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    pub published_at: Option<DateTime<Utc>>,
}

impl ArticleRecord {
    pub fn summary(&self) -> ArticleSummary {
        ArticleSummary {
            id: self.id,
            title: self.title.clone(),
            slug: self.slug.clone(),
        }
    }
}

/// Minimal public view handed out to token holders.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ArticleSummary {
    pub id: ArticleId,
    pub title: String,
    pub slug: String,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NewArticle {
    pub slug: String,
    pub author_id: UserId,
    pub title: String,
    pub abstract_text: String,
    pub tags: Vec<String>,
    pub file_reference: String,
    pub submitted_at: DateTime<Utc>,
}

/// Field-level mutation applied together with a status change.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ArticleUpdate {
    /// Moves to the given status; `Published` also stamps `published_at`.
    Status(ArticleStatus),
    Reject { reason: String },
    Feature { is_featured: bool },
    /// Leaves the row untouched apart from `updated_at` (resends).
    Touch,
}

impl ArticleUpdate {
    pub fn target_status(&self, current: ArticleStatus) -> ArticleStatus {
        match self {
            ArticleUpdate::Status(status) => *status,
            ArticleUpdate::Reject { .. } => ArticleStatus::Rejected,
            ArticleUpdate::Feature { .. } | ArticleUpdate::Touch => current,
        }
    }
}

/// Everything one workflow step persists atomically: the conditional article
/// update, its audit row, and optionally a fresh token and a queued email.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ArticleChange {
    pub article_id: ArticleId,
    pub expected_status: ArticleStatus,
    pub update: ArticleUpdate,
    pub actor_id: UserId,
    pub action: WorkflowAction,
    pub note: Option<String>,
    pub new_token: Option<NewPaymentToken>,
    pub email: Option<OutboundEmail>,
    pub occurred_at: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AppliedChange {
    pub article: ArticleRecord,
    pub email_id: Option<i64>,
}

/// UTR submission persisted together with the token consumption.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TokenRedemption {
    pub fingerprint: TokenFingerprint,
    pub utr_number: String,
    pub redeemed_at: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RedemptionOutcome {
    Redeemed(ArticleRecord),
    /// Unknown, used or expired at the time of the conditional write.
    TokenRejected,
    /// Token was fine but the article had already left `AwaitingPayment`.
    ArticleNotEligible,
}

#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, AsRefStr, EnumString,
)]
#[serde(rename_all = "snake_case")]
#[strum(serialize_all = "snake_case")]
pub enum WorkflowAction {
    Submit,
    Approve,
    Reject,
    ResendApproval,
    SubmitUtr,
    VerifyAndPublish,
    Feature,
    Unfeature,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TransitionRecord {
    pub id: i64,
    pub article_id: ArticleId,
    pub action: WorkflowAction,
    pub from_status: Option<ArticleStatus>,
    pub to_status: ArticleStatus,
    pub actor_id: UserId,
    pub note: Option<String>,
    pub occurred_at: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProfileRecord {
    pub user_id: UserId,
    pub is_admin: bool,
    pub email: String,
    pub display_name: String,
    pub editor_role: Option<String>,
    pub institution: Option<String>,
    pub display_order: Option<i32>,
}

#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, AsRefStr, EnumString,
)]
#[serde(rename_all = "snake_case")]
#[strum(serialize_all = "snake_case")]
pub enum EmailKind {
    Approval,
    ResendApproval,
    Rejection,
    Published,
    CoAuthorInvite,
}

/// Fully rendered message, ready for the transport.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OutboundEmail {
    pub kind: EmailKind,
    pub recipient: String,
    pub subject: String,
    pub html_body: String,
    pub text_body: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, AsRefStr)]
#[strum(serialize_all = "snake_case")]
pub enum OutboxStatus {
    Pending,
    Delivered,
    Abandoned,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OutboxEmailRecord {
    pub id: i64,
    pub article_id: Option<ArticleId>,
    pub email: OutboundEmail,
    pub status: OutboxStatus,
    pub attempts: u32,
    pub last_error: Option<String>,
    pub created_at: DateTime<Utc>,
    pub next_attempt_at: DateTime<Utc>,
    pub delivered_at: Option<DateTime<Utc>>,
}

/// Turns a title into a lowercase, dash-separated slug stem.
pub fn slugify(title: &str) -> String {
    let mut slug = String::with_capacity(title.len());
    let mut pending_dash = false;
    for ch in title.chars() {
        if ch.is_ascii_alphanumeric() {
            if pending_dash && !slug.is_empty() {
                slug.push('-');
            }
            pending_dash = false;
            slug.push(ch.to_ascii_lowercase());
        } else {
            pending_dash = true;
        }
        if slug.len() >= 80 {
            break;
        }
    }
    if slug.is_empty() {
        slug.push_str("article");
    }
    slug
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::str::FromStr;
    use strum::IntoEnumIterator;

    #[test]
    fn flags_follow_status() {
        let pending = ArticleStatus::Pending.flags();
        assert!(!pending.approved && !pending.published);

        let awaiting = ArticleStatus::AwaitingPayment.flags();
        assert!(awaiting.approved && !awaiting.payment_submitted);

        let submitted = ArticleStatus::PaymentSubmitted.flags();
        assert!(submitted.payment_submitted && !submitted.payment_done);

        let published = ArticleStatus::Published.flags();
        assert!(published.published && published.payment_done);

        let rejected = ArticleStatus::Rejected.flags();
        assert!(!rejected.approved && !rejected.published);
    }

    #[test]
    fn status_names_round_trip_through_strum() {
        for status in ArticleStatus::iter() {
            assert_eq!(ArticleStatus::from_str(status.as_ref()), Ok(status));
        }
        assert_eq!(ArticleStatus::AwaitingPayment.as_ref(), "awaiting_payment");
    }

    #[test]
    fn slugify_collapses_punctuation() {
        assert_eq!(
            slugify("Article 370: A Constitutional Analysis!"),
            "article-370-a-constitutional-analysis"
        );
        assert_eq!(slugify("  --  "), "article");
    }

    #[test]
    fn user_id_rejects_blank_values() {
        assert!(UserId::parse("   ").is_none());
        assert_eq!(UserId::parse(" abc ").unwrap().as_str(), "abc");
    }
}
