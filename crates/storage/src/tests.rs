use std::sync::Arc;

use chrono::{DateTime, Duration, TimeZone, Utc};
use law_journal_domain::model::{
    ArticleChange, ArticleId, ArticleRecord, ArticleStatus, ArticleUpdate, EmailKind, NewArticle,
    NewPaymentToken, OutboundEmail, OutboxStatus, ProfileRecord, RedemptionOutcome,
    TokenRedemption, TokenValue, UserId, WorkflowAction,
};
use law_journal_domain::notification::inline_delivery_lease;
use law_journal_domain::storage::{
    ArticleStore, OutboxStore, ProfileStore, StorageError, TokenStore,
};

use crate::SeaOrmStorage;

async fn storage() -> SeaOrmStorage {
    SeaOrmStorage::builder()
        .database_url("sqlite::memory:")
        .max_connections(1)
        .build()
        .await
        .expect("in-memory sqlite")
}

fn at(hour: u32) -> DateTime<Utc> {
    Utc.with_ymd_and_hms(2024, 5, 10, hour, 0, 0).unwrap()
}

fn author() -> UserId {
    UserId::parse("author-1").unwrap()
}

fn editor() -> UserId {
    UserId::parse("editor-1").unwrap()
}

async fn insert(storage: &SeaOrmStorage, slug: &str) -> ArticleRecord {
    storage
        .insert_article(NewArticle {
            slug: slug.to_string(),
            author_id: author(),
            title: "Judicial Review in Emergencies".into(),
            abstract_text: "abstract".into(),
            tags: vec!["constitutional".into(), "emergency".into()],
            file_reference: "uploads/review.pdf".into(),
            submitted_at: at(8),
        })
        .await
        .unwrap()
}

fn email(kind: EmailKind) -> OutboundEmail {
    OutboundEmail {
        kind,
        recipient: "author@example.com".into(),
        subject: "subject".into(),
        html_body: "<p>body</p>".into(),
        text_body: "body".into(),
    }
}

fn approval(id: ArticleId, occurred_at: DateTime<Utc>) -> (TokenValue, ArticleChange) {
    let (value, token) =
        NewPaymentToken::issue(id, author(), occurred_at, Duration::hours(48)).unwrap();
    let change = ArticleChange {
        article_id: id,
        expected_status: ArticleStatus::Pending,
        update: ArticleUpdate::Status(ArticleStatus::AwaitingPayment),
        actor_id: editor(),
        action: WorkflowAction::Approve,
        note: None,
        new_token: Some(token),
        email: Some(email(EmailKind::Approval)),
        occurred_at,
    };
    (value, change)
}

fn redemption(value: &TokenValue, utr: &str, at: DateTime<Utc>) -> TokenRedemption {
    TokenRedemption {
        fingerprint: value.fingerprint(),
        utr_number: utr.to_string(),
        redeemed_at: at,
    }
}

#[tokio::test]
async fn article_round_trips_with_tags() {
    let storage = storage().await;
    let created = insert(&storage, "judicial-review").await;
    assert_eq!(created.status, ArticleStatus::Pending);

    let by_id = storage.find_article(created.id).await.unwrap().unwrap();
    assert_eq!(by_id, created);
    assert_eq!(by_id.tags, vec!["constitutional", "emergency"]);

    let by_slug = storage
        .find_article_by_slug("judicial-review")
        .await
        .unwrap()
        .unwrap();
    assert_eq!(by_slug.id, created.id);
    assert!(storage
        .find_article(ArticleId::new(999))
        .await
        .unwrap()
        .is_none());
}

#[tokio::test]
async fn duplicate_slug_is_a_conflict() {
    let storage = storage().await;
    insert(&storage, "same-slug").await;
    let err = storage
        .insert_article(NewArticle {
            slug: "same-slug".into(),
            author_id: author(),
            title: "Other".into(),
            abstract_text: "abstract".into(),
            tags: vec![],
            file_reference: "uploads/other.pdf".into(),
            submitted_at: at(9),
        })
        .await
        .unwrap_err();
    assert_eq!(err, StorageError::Conflict("articles.slug"));
}

#[tokio::test]
async fn approval_writes_token_audit_row_and_email_together() {
    let storage = storage().await;
    let article = insert(&storage, "approve-me").await;
    let (value, change) = approval(article.id, at(9));

    let applied = storage.apply_change(change).await.unwrap().unwrap();
    assert_eq!(applied.article.status, ArticleStatus::AwaitingPayment);
    assert_eq!(applied.article.updated_at, at(9));
    let email_id = applied.email_id.expect("email queued");

    let token = storage
        .find_token(&value.fingerprint())
        .await
        .unwrap()
        .unwrap();
    assert_eq!(token.article_id, article.id);
    assert_eq!(token.expires_at, at(9) + Duration::hours(48));
    assert!(!token.used);

    let history = storage.list_transitions(article.id).await.unwrap();
    assert_eq!(history.len(), 1);
    assert_eq!(history[0].action, WorkflowAction::Approve);
    assert_eq!(history[0].from_status, Some(ArticleStatus::Pending));
    assert_eq!(history[0].to_status, ArticleStatus::AwaitingPayment);
    assert_eq!(history[0].actor_id, editor());

    let due = storage
        .due_emails(at(9) + inline_delivery_lease(), 10)
        .await
        .unwrap();
    assert_eq!(due.len(), 1);
    assert_eq!(due[0].id, email_id);
    assert_eq!(due[0].email.kind, EmailKind::Approval);
}

#[tokio::test]
async fn fresh_email_waits_out_the_inline_attempt() {
    let storage = storage().await;
    let article = insert(&storage, "inline-window").await;
    let (_, change) = approval(article.id, at(9));
    let email_id = storage
        .apply_change(change)
        .await
        .unwrap()
        .unwrap()
        .email_id
        .expect("email queued");

    assert!(storage.due_emails(at(9), 10).await.unwrap().is_empty());
    let mid_send = at(9) + inline_delivery_lease() - Duration::seconds(1);
    assert!(storage.due_emails(mid_send, 10).await.unwrap().is_empty());

    let due = storage
        .due_emails(at(9) + inline_delivery_lease(), 10)
        .await
        .unwrap();
    assert_eq!(due.len(), 1);
    assert_eq!(due[0].id, email_id);

    storage.mark_delivered(email_id, at(9)).await.unwrap();
    assert!(storage.due_emails(at(10), 10).await.unwrap().is_empty());
}

#[tokio::test]
async fn stale_expected_status_writes_nothing() {
    let storage = storage().await;
    let article = insert(&storage, "stale").await;
    let (_, first) = approval(article.id, at(9));
    storage.apply_change(first).await.unwrap().unwrap();

    let (second_value, second) = approval(article.id, at(10));
    assert!(storage.apply_change(second).await.unwrap().is_none());

    assert!(storage
        .find_token(&second_value.fingerprint())
        .await
        .unwrap()
        .is_none());
    assert_eq!(storage.list_transitions(article.id).await.unwrap().len(), 1);
    assert_eq!(storage.pending_count().await.unwrap(), 1);
}

#[tokio::test]
async fn rejection_and_publication_fields_are_written() {
    let storage = storage().await;
    let rejected = insert(&storage, "to-reject").await;
    let applied = storage
        .apply_change(ArticleChange {
            article_id: rejected.id,
            expected_status: ArticleStatus::Pending,
            update: ArticleUpdate::Reject {
                reason: "Outside the journal's scope.".into(),
            },
            actor_id: editor(),
            action: WorkflowAction::Reject,
            note: None,
            new_token: None,
            email: None,
            occurred_at: at(9),
        })
        .await
        .unwrap()
        .unwrap();
    assert_eq!(applied.article.status, ArticleStatus::Rejected);
    assert_eq!(
        applied.article.rejection_reason.as_deref(),
        Some("Outside the journal's scope.")
    );
    assert!(applied.email_id.is_none());

    let article = insert(&storage, "to-publish").await;
    let (value, change) = approval(article.id, at(9));
    storage.apply_change(change).await.unwrap().unwrap();
    storage
        .redeem_token(redemption(&value, "UTR42", at(10)))
        .await
        .unwrap();
    let published = storage
        .apply_change(ArticleChange {
            article_id: article.id,
            expected_status: ArticleStatus::PaymentSubmitted,
            update: ArticleUpdate::Status(ArticleStatus::Published),
            actor_id: editor(),
            action: WorkflowAction::VerifyAndPublish,
            note: None,
            new_token: None,
            email: None,
            occurred_at: at(11),
        })
        .await
        .unwrap()
        .unwrap()
        .article;
    assert_eq!(published.status, ArticleStatus::Published);
    assert_eq!(published.published_at, Some(at(11)));
    assert_eq!(published.utr_number.as_deref(), Some("UTR42"));
}

#[tokio::test]
async fn token_redeems_exactly_once() {
    let storage = storage().await;
    let article = insert(&storage, "pay-once").await;
    let (value, change) = approval(article.id, at(9));
    storage.apply_change(change).await.unwrap().unwrap();

    let outcome = storage
        .redeem_token(redemption(&value, "UTR001", at(10)))
        .await
        .unwrap();
    let RedemptionOutcome::Redeemed(paid) = outcome else {
        panic!("expected redemption, got {outcome:?}");
    };
    assert_eq!(paid.status, ArticleStatus::PaymentSubmitted);
    assert_eq!(paid.utr_number.as_deref(), Some("UTR001"));

    let again = storage
        .redeem_token(redemption(&value, "UTR002", at(10)))
        .await
        .unwrap();
    assert_eq!(again, RedemptionOutcome::TokenRejected);

    let token = storage
        .find_token(&value.fingerprint())
        .await
        .unwrap()
        .unwrap();
    assert!(token.used);
    assert_eq!(token.used_at, Some(at(10)));

    let history = storage.list_transitions(article.id).await.unwrap();
    assert_eq!(history.last().unwrap().action, WorkflowAction::SubmitUtr);
    assert_eq!(history.last().unwrap().actor_id, author());
}

#[tokio::test]
async fn expired_token_is_rejected() {
    let storage = storage().await;
    let article = insert(&storage, "late").await;
    let (value, change) = approval(article.id, at(9));
    storage.apply_change(change).await.unwrap().unwrap();

    let outcome = storage
        .redeem_token(redemption(&value, "UTR001", at(9) + Duration::hours(48)))
        .await
        .unwrap();
    assert_eq!(outcome, RedemptionOutcome::TokenRejected);
    let article = storage.find_article(article.id).await.unwrap().unwrap();
    assert_eq!(article.status, ArticleStatus::AwaitingPayment);
}

#[tokio::test]
async fn ineligible_article_leaves_token_unused() {
    let storage = storage().await;
    let article = insert(&storage, "two-links").await;
    let (first, change) = approval(article.id, at(9));
    storage.apply_change(change).await.unwrap().unwrap();

    let (second, token) =
        NewPaymentToken::issue(article.id, author(), at(10), Duration::hours(48)).unwrap();
    storage
        .apply_change(ArticleChange {
            article_id: article.id,
            expected_status: ArticleStatus::AwaitingPayment,
            update: ArticleUpdate::Touch,
            actor_id: editor(),
            action: WorkflowAction::ResendApproval,
            note: None,
            new_token: Some(token),
            email: None,
            occurred_at: at(10),
        })
        .await
        .unwrap()
        .unwrap();
    assert_eq!(storage.tokens_for_article(article.id).await.unwrap().len(), 2);

    storage
        .redeem_token(redemption(&first, "UTR001", at(11)))
        .await
        .unwrap();
    let outcome = storage
        .redeem_token(redemption(&second, "UTR002", at(11)))
        .await
        .unwrap();
    assert_eq!(outcome, RedemptionOutcome::ArticleNotEligible);
    let token = storage
        .find_token(&second.fingerprint())
        .await
        .unwrap()
        .unwrap();
    assert!(!token.used);
}

#[tokio::test]
async fn concurrent_redemptions_have_one_winner() {
    let storage = Arc::new(storage().await);
    let article = insert(&storage, "race").await;
    let (value, change) = approval(article.id, at(9));
    storage.apply_change(change).await.unwrap().unwrap();

    let mut handles = Vec::new();
    for n in 0..4 {
        let storage = storage.clone();
        let request = redemption(&value, &format!("UTR00{n}"), at(10));
        handles.push(tokio::spawn(async move {
            storage.redeem_token(request).await.unwrap()
        }));
    }
    let mut redeemed = 0;
    for handle in handles {
        if matches!(handle.await.unwrap(), RedemptionOutcome::Redeemed(_)) {
            redeemed += 1;
        }
    }
    assert_eq!(redeemed, 1);
}

#[tokio::test]
async fn outbox_retries_then_abandons() {
    let storage = storage().await;
    let queued = storage
        .enqueue_email(None, email(EmailKind::CoAuthorInvite), at(9))
        .await
        .unwrap();
    assert_eq!(queued.status, OutboxStatus::Pending);
    assert_eq!(queued.next_attempt_at, at(9) + inline_delivery_lease());

    storage
        .record_failure(queued.id, "relay down", Some(at(10)))
        .await
        .unwrap();
    assert!(storage.due_emails(at(9), 10).await.unwrap().is_empty());
    let due = storage.due_emails(at(10), 10).await.unwrap();
    assert_eq!(due.len(), 1);
    assert_eq!(due[0].attempts, 1);
    assert_eq!(due[0].last_error.as_deref(), Some("relay down"));

    storage
        .record_failure(queued.id, "still down", None)
        .await
        .unwrap();
    assert!(storage.due_emails(at(23), 10).await.unwrap().is_empty());
    assert_eq!(storage.pending_count().await.unwrap(), 0);
}

#[tokio::test]
async fn delivered_emails_leave_the_queue() {
    let storage = storage().await;
    let first = storage
        .enqueue_email(None, email(EmailKind::Published), at(9))
        .await
        .unwrap();
    storage
        .enqueue_email(None, email(EmailKind::Rejection), at(9))
        .await
        .unwrap();
    assert_eq!(storage.pending_count().await.unwrap(), 2);
    assert_eq!(storage.due_emails(at(10), 1).await.unwrap().len(), 1);

    storage.mark_delivered(first.id, at(9)).await.unwrap();
    let due = storage.due_emails(at(10), 10).await.unwrap();
    assert_eq!(due.len(), 1);
    assert_eq!(due[0].email.kind, EmailKind::Rejection);
    assert_eq!(storage.pending_count().await.unwrap(), 1);
}

#[tokio::test]
async fn profile_upsert_overwrites() {
    let storage = storage().await;
    let mut profile = ProfileRecord {
        user_id: editor(),
        is_admin: false,
        email: "editor@example.com".into(),
        display_name: "Editor".into(),
        editor_role: None,
        institution: Some("National Law School".into()),
        display_order: None,
    };
    storage.upsert_profile(profile.clone()).await.unwrap();
    profile.is_admin = true;
    profile.editor_role = Some("Managing Editor".into());
    profile.display_order = Some(1);
    storage.upsert_profile(profile.clone()).await.unwrap();

    let stored = storage.find_profile(&editor()).await.unwrap().unwrap();
    assert_eq!(stored, profile);
    assert!(storage.find_profile(&author()).await.unwrap().is_none());
}
