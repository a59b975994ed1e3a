use std::str::FromStr;

use chrono::{DateTime, TimeZone, Utc};
use law_journal_domain::model::{
    ArticleId, EmailKind, OutboundEmail, OutboxEmailRecord, OutboxStatus,
};
use law_journal_domain::notification::inline_delivery_lease;
use law_journal_domain::storage::{OutboxStore, StorageResult};
use sea_orm::sea_query::Expr;
use sea_orm::{
    ActiveEnum, ActiveModelTrait, ColumnTrait, ConnectionTrait, EntityTrait, PaginatorTrait,
    QueryFilter, QueryOrder, QuerySelect, Set,
};

use crate::entity::outbox_emails::{self, OutboxStatusDb};
use crate::errors::{corrupt, db_error};
use crate::SeaOrmStorage;

/// Inserts a pending row. Shared with the transactional article writes so the
/// email commits together with the state change. The row only becomes due
/// after the inline lease, so the worker cannot race the caller's own send.
pub(crate) async fn insert_email<C>(
    db: &C,
    article_id: Option<i64>,
    email: OutboundEmail,
    queued_at: DateTime<Utc>,
) -> StorageResult<outbox_emails::Model>
where
    C: ConnectionTrait,
{
    let model = outbox_emails::ActiveModel {
        article_id: Set(article_id),
        kind: Set(email.kind.as_ref().to_owned()),
        recipient: Set(email.recipient),
        subject: Set(email.subject),
        html_body: Set(email.html_body),
        text_body: Set(email.text_body),
        status: Set(OutboxStatusDb::Pending),
        attempts: Set(0),
        last_error: Set(None),
        created_at: Set(queued_at),
        next_attempt_ms: Set((queued_at + inline_delivery_lease()).timestamp_millis()),
        delivered_at: Set(None),
        ..Default::default()
    };
    model.insert(db).await.map_err(db_error)
}

#[async_trait::async_trait]
impl OutboxStore for SeaOrmStorage {
    async fn enqueue_email(
        &self,
        article_id: Option<ArticleId>,
        email: OutboundEmail,
        queued_at: DateTime<Utc>,
    ) -> StorageResult<OutboxEmailRecord> {
        let created = insert_email(
            self.connection(),
            article_id.map(ArticleId::get),
            email,
            queued_at,
        )
        .await?;
        email_to_record(created)
    }

    async fn due_emails(
        &self,
        now: DateTime<Utc>,
        limit: u64,
    ) -> StorageResult<Vec<OutboxEmailRecord>> {
        let rows = outbox_emails::Entity::find()
            .filter(outbox_emails::Column::Status.eq(OutboxStatusDb::Pending))
            .filter(outbox_emails::Column::NextAttemptMs.lte(now.timestamp_millis()))
            .order_by_asc(outbox_emails::Column::NextAttemptMs)
            .order_by_asc(outbox_emails::Column::Id)
            .limit(limit)
            .all(self.connection())
            .await
            .map_err(db_error)?;
        rows.into_iter().map(email_to_record).collect()
    }

    async fn mark_delivered(&self, id: i64, delivered_at: DateTime<Utc>) -> StorageResult<()> {
        outbox_emails::Entity::update_many()
            .col_expr(
                outbox_emails::Column::Status,
                Expr::value(OutboxStatusDb::Delivered.to_value()),
            )
            .col_expr(
                outbox_emails::Column::Attempts,
                Expr::col(outbox_emails::Column::Attempts).add(1),
            )
            .col_expr(outbox_emails::Column::DeliveredAt, Expr::value(delivered_at))
            .col_expr(
                outbox_emails::Column::LastError,
                Expr::value(Option::<String>::None),
            )
            .filter(outbox_emails::Column::Id.eq(id))
            .filter(outbox_emails::Column::Status.eq(OutboxStatusDb::Pending))
            .exec(self.connection())
            .await
            .map_err(db_error)?;
        Ok(())
    }

    async fn record_failure(
        &self,
        id: i64,
        error: &str,
        retry_at: Option<DateTime<Utc>>,
    ) -> StorageResult<()> {
        let mut update = outbox_emails::Entity::update_many()
            .col_expr(
                outbox_emails::Column::Attempts,
                Expr::col(outbox_emails::Column::Attempts).add(1),
            )
            .col_expr(
                outbox_emails::Column::LastError,
                Expr::value(error.to_owned()),
            );
        update = match retry_at {
            Some(at) => update.col_expr(
                outbox_emails::Column::NextAttemptMs,
                Expr::value(at.timestamp_millis()),
            ),
            None => update.col_expr(
                outbox_emails::Column::Status,
                Expr::value(OutboxStatusDb::Abandoned.to_value()),
            ),
        };
        update
            .filter(outbox_emails::Column::Id.eq(id))
            .filter(outbox_emails::Column::Status.eq(OutboxStatusDb::Pending))
            .exec(self.connection())
            .await
            .map_err(db_error)?;
        Ok(())
    }

    async fn pending_count(&self) -> StorageResult<u64> {
        outbox_emails::Entity::find()
            .filter(outbox_emails::Column::Status.eq(OutboxStatusDb::Pending))
            .count(self.connection())
            .await
            .map_err(db_error)
    }
}

fn email_to_record(model: outbox_emails::Model) -> StorageResult<OutboxEmailRecord> {
    let kind = EmailKind::from_str(&model.kind).map_err(|_| corrupt("email kind", &model.kind))?;
    let next_attempt_at = Utc
        .timestamp_millis_opt(model.next_attempt_ms)
        .single()
        .ok_or_else(|| corrupt("retry timestamp", &model.next_attempt_ms.to_string()))?;
    Ok(OutboxEmailRecord {
        id: model.id,
        article_id: model.article_id.map(ArticleId::new),
        email: OutboundEmail {
            kind,
            recipient: model.recipient,
            subject: model.subject,
            html_body: model.html_body,
            text_body: model.text_body,
        },
        status: match model.status {
            OutboxStatusDb::Pending => OutboxStatus::Pending,
            OutboxStatusDb::Delivered => OutboxStatus::Delivered,
            OutboxStatusDb::Abandoned => OutboxStatus::Abandoned,
        },
        attempts: u32::try_from(model.attempts).unwrap_or_default(),
        last_error: model.last_error,
        created_at: model.created_at,
        next_attempt_at,
        delivered_at: model.delivered_at,
    })
}
