use std::str::FromStr;

use chrono::{DateTime, Utc};
use law_journal_domain::model::{
    AppliedChange, ArticleChange, ArticleId, ArticleRecord, ArticleStatus, ArticleUpdate,
    NewArticle, RedemptionOutcome, TokenRedemption, TransitionRecord, UserId, WorkflowAction,
};
use law_journal_domain::storage::{ArticleStore, StorageResult};
use sea_orm::sea_query::Expr;
use sea_orm::{
    ActiveEnum, ActiveModelTrait, ColumnTrait, ConnectionTrait, DatabaseTransaction, EntityTrait,
    QueryFilter, QueryOrder, Set, TransactionTrait,
};

use crate::entity::articles::{self, ArticleStatusDb};
use crate::entity::{article_transitions, payment_tokens};
use crate::errors::{conflict_on, corrupt, db_error, StorageError};
use crate::outbox_store::insert_email;
use crate::SeaOrmStorage;

#[async_trait::async_trait]
impl ArticleStore for SeaOrmStorage {
    async fn insert_article(&self, article: NewArticle) -> StorageResult<ArticleRecord> {
        let tags = serde_json::to_string(&article.tags).map_err(StorageError::from_source)?;
        let model = articles::ActiveModel {
            slug: Set(article.slug),
            author_id: Set(article.author_id.into_inner()),
            title: Set(article.title),
            abstract_text: Set(article.abstract_text),
            tags: Set(tags),
            file_reference: Set(article.file_reference),
            status: Set(ArticleStatusDb::Pending),
            rejection_reason: Set(None),
            utr_number: Set(None),
            is_featured: Set(false),
            created_at: Set(article.submitted_at),
            updated_at: Set(article.submitted_at),
            published_at: Set(None),
            ..Default::default()
        };
        let created = model
            .insert(self.connection())
            .await
            .map_err(conflict_on("articles.slug"))?;
        article_to_record(created)
    }

    async fn find_article(&self, id: ArticleId) -> StorageResult<Option<ArticleRecord>> {
        let maybe = articles::Entity::find_by_id(id.get())
            .one(self.connection())
            .await
            .map_err(db_error)?;
        maybe.map(article_to_record).transpose()
    }

    async fn find_article_by_slug(&self, slug: &str) -> StorageResult<Option<ArticleRecord>> {
        let maybe = articles::Entity::find()
            .filter(articles::Column::Slug.eq(slug))
            .one(self.connection())
            .await
            .map_err(db_error)?;
        maybe.map(article_to_record).transpose()
    }

    async fn apply_change(&self, change: ArticleChange) -> StorageResult<Option<AppliedChange>> {
        let txn = self.connection().begin().await.map_err(db_error)?;
        let article_id = change.article_id.get();
        let target = change.update.target_status(change.expected_status);

        let mut update = articles::Entity::update_many()
            .col_expr(
                articles::Column::Status,
                Expr::value(ArticleStatusDb::from(target).to_value()),
            )
            .col_expr(articles::Column::UpdatedAt, Expr::value(change.occurred_at));
        update = match &change.update {
            ArticleUpdate::Status(ArticleStatus::Published) => {
                update.col_expr(articles::Column::PublishedAt, Expr::value(change.occurred_at))
            }
            ArticleUpdate::Reject { reason } => update.col_expr(
                articles::Column::RejectionReason,
                Expr::value(reason.clone()),
            ),
            ArticleUpdate::Feature { is_featured } => {
                update.col_expr(articles::Column::IsFeatured, Expr::value(*is_featured))
            }
            ArticleUpdate::Status(_) | ArticleUpdate::Touch => update,
        };
        let result = update
            .filter(articles::Column::Id.eq(article_id))
            .filter(articles::Column::Status.eq(ArticleStatusDb::from(change.expected_status)))
            .exec(&txn)
            .await
            .map_err(db_error)?;
        if result.rows_affected == 0 {
            txn.rollback().await.map_err(db_error)?;
            return Ok(None);
        }

        if let Some(token) = change.new_token {
            let model = payment_tokens::ActiveModel {
                fingerprint: Set(token.fingerprint.into_inner()),
                article_id: Set(token.article_id.get()),
                user_id: Set(token.user_id.into_inner()),
                issued_at: Set(token.issued_at),
                expires_at: Set(token.expires_at),
                used: Set(false),
                used_at: Set(None),
            };
            payment_tokens::Entity::insert(model)
                .exec_without_returning(&txn)
                .await
                .map_err(conflict_on("payment_tokens.fingerprint"))?;
        }

        record_transition(
            &txn,
            TransitionRow {
                article_id,
                action: change.action,
                from: Some(change.expected_status),
                to: target,
                actor_id: change.actor_id.as_str(),
                note: change.note,
                occurred_at: change.occurred_at,
            },
        )
        .await?;

        let email_id = match change.email {
            Some(email) => Some(
                insert_email(&txn, Some(article_id), email, change.occurred_at)
                    .await?
                    .id,
            ),
            None => None,
        };

        let article = reload(&txn, article_id).await?;
        txn.commit().await.map_err(db_error)?;
        Ok(Some(AppliedChange { article, email_id }))
    }

    async fn redeem_token(&self, redemption: TokenRedemption) -> StorageResult<RedemptionOutcome> {
        let txn = self.connection().begin().await.map_err(db_error)?;
        let fingerprint = redemption.fingerprint.as_str().to_owned();

        let token = payment_tokens::Entity::find_by_id(fingerprint.clone())
            .one(&txn)
            .await
            .map_err(db_error)?;
        let Some(token) = token else {
            txn.rollback().await.map_err(db_error)?;
            return Ok(RedemptionOutcome::TokenRejected);
        };
        if token.used || redemption.redeemed_at >= token.expires_at {
            txn.rollback().await.map_err(db_error)?;
            return Ok(RedemptionOutcome::TokenRejected);
        }

        let consumed = payment_tokens::Entity::update_many()
            .col_expr(payment_tokens::Column::Used, Expr::value(true))
            .col_expr(
                payment_tokens::Column::UsedAt,
                Expr::value(redemption.redeemed_at),
            )
            .filter(payment_tokens::Column::Fingerprint.eq(fingerprint))
            .filter(payment_tokens::Column::Used.eq(false))
            .exec(&txn)
            .await
            .map_err(db_error)?;
        if consumed.rows_affected != 1 {
            txn.rollback().await.map_err(db_error)?;
            return Ok(RedemptionOutcome::TokenRejected);
        }

        let advanced = articles::Entity::update_many()
            .col_expr(
                articles::Column::Status,
                Expr::value(ArticleStatusDb::PaymentSubmitted.to_value()),
            )
            .col_expr(
                articles::Column::UtrNumber,
                Expr::value(redemption.utr_number.clone()),
            )
            .col_expr(
                articles::Column::UpdatedAt,
                Expr::value(redemption.redeemed_at),
            )
            .filter(articles::Column::Id.eq(token.article_id))
            .filter(articles::Column::Status.eq(ArticleStatusDb::AwaitingPayment))
            .exec(&txn)
            .await
            .map_err(db_error)?;
        if advanced.rows_affected == 0 {
            // Token stays unused for a later attempt.
            txn.rollback().await.map_err(db_error)?;
            return Ok(RedemptionOutcome::ArticleNotEligible);
        }

        record_transition(
            &txn,
            TransitionRow {
                article_id: token.article_id,
                action: WorkflowAction::SubmitUtr,
                from: Some(ArticleStatus::AwaitingPayment),
                to: ArticleStatus::PaymentSubmitted,
                actor_id: &token.user_id,
                note: Some(format!("utr {}", redemption.utr_number)),
                occurred_at: redemption.redeemed_at,
            },
        )
        .await?;

        let article = reload(&txn, token.article_id).await?;
        txn.commit().await.map_err(db_error)?;
        Ok(RedemptionOutcome::Redeemed(article))
    }

    async fn list_transitions(&self, id: ArticleId) -> StorageResult<Vec<TransitionRecord>> {
        let rows = article_transitions::Entity::find()
            .filter(article_transitions::Column::ArticleId.eq(id.get()))
            .order_by_asc(article_transitions::Column::Id)
            .all(self.connection())
            .await
            .map_err(db_error)?;
        rows.into_iter().map(transition_to_record).collect()
    }
}

struct TransitionRow<'a> {
    article_id: i64,
    action: WorkflowAction,
    from: Option<ArticleStatus>,
    to: ArticleStatus,
    actor_id: &'a str,
    note: Option<String>,
    occurred_at: DateTime<Utc>,
}

async fn record_transition<C>(db: &C, row: TransitionRow<'_>) -> StorageResult<()>
where
    C: ConnectionTrait,
{
    let model = article_transitions::ActiveModel {
        article_id: Set(row.article_id),
        action: Set(row.action.as_ref().to_owned()),
        from_status: Set(row.from.map(|status| status.as_ref().to_owned())),
        to_status: Set(row.to.as_ref().to_owned()),
        actor_id: Set(row.actor_id.to_owned()),
        note: Set(row.note),
        occurred_at: Set(row.occurred_at),
        ..Default::default()
    };
    article_transitions::Entity::insert(model)
        .exec_without_returning(db)
        .await
        .map_err(db_error)?;
    Ok(())
}

async fn reload(txn: &DatabaseTransaction, id: i64) -> StorageResult<ArticleRecord> {
    let model = articles::Entity::find_by_id(id)
        .one(txn)
        .await
        .map_err(db_error)?
        .ok_or_else(|| corrupt("article id", &id.to_string()))?;
    article_to_record(model)
}

impl From<ArticleStatus> for ArticleStatusDb {
    fn from(value: ArticleStatus) -> Self {
        match value {
            ArticleStatus::Pending => ArticleStatusDb::Pending,
            ArticleStatus::AwaitingPayment => ArticleStatusDb::AwaitingPayment,
            ArticleStatus::PaymentSubmitted => ArticleStatusDb::PaymentSubmitted,
            ArticleStatus::Published => ArticleStatusDb::Published,
            ArticleStatus::Rejected => ArticleStatusDb::Rejected,
        }
    }
}

impl From<ArticleStatusDb> for ArticleStatus {
    fn from(value: ArticleStatusDb) -> Self {
        match value {
            ArticleStatusDb::Pending => ArticleStatus::Pending,
            ArticleStatusDb::AwaitingPayment => ArticleStatus::AwaitingPayment,
            ArticleStatusDb::PaymentSubmitted => ArticleStatus::PaymentSubmitted,
            ArticleStatusDb::Published => ArticleStatus::Published,
            ArticleStatusDb::Rejected => ArticleStatus::Rejected,
        }
    }
}

pub(crate) fn parse_user_id(value: &str) -> StorageResult<UserId> {
    UserId::parse(value).ok_or_else(|| corrupt("user id", value))
}

fn article_to_record(model: articles::Model) -> StorageResult<ArticleRecord> {
    let tags: Vec<String> =
        serde_json::from_str(&model.tags).map_err(|_| corrupt("tag list", &model.tags))?;
    Ok(ArticleRecord {
        id: ArticleId::new(model.id),
        author_id: parse_user_id(&model.author_id)?,
        slug: model.slug,
        title: model.title,
        abstract_text: model.abstract_text,
        tags,
        file_reference: model.file_reference,
        status: model.status.into(),
        rejection_reason: model.rejection_reason,
        utr_number: model.utr_number,
        is_featured: model.is_featured,
        created_at: model.created_at,
        updated_at: model.updated_at,
        published_at: model.published_at,
    })
}

fn parse_status(value: &str) -> StorageResult<ArticleStatus> {
    ArticleStatus::from_str(value).map_err(|_| corrupt("article status", value))
}

fn transition_to_record(model: article_transitions::Model) -> StorageResult<TransitionRecord> {
    Ok(TransitionRecord {
        id: model.id,
        article_id: ArticleId::new(model.article_id),
        action: WorkflowAction::from_str(&model.action)
            .map_err(|_| corrupt("workflow action", &model.action))?,
        from_status: model.from_status.as_deref().map(parse_status).transpose()?,
        to_status: parse_status(&model.to_status)?,
        actor_id: parse_user_id(&model.actor_id)?,
        note: model.note,
        occurred_at: model.occurred_at,
    })
}
