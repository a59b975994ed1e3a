use sea_orm::sea_query::{ColumnDef, Index, IndexCreateStatement, Table, TableCreateStatement};
use sea_orm::{ConnectionTrait, DatabaseBackend, DatabaseConnection};

use crate::entity::{article_transitions, articles, outbox_emails, payment_tokens, profiles};
use crate::errors::db_error;
use law_journal_domain::storage::StorageResult;

pub async fn run_migrations(db: &DatabaseConnection) -> StorageResult<()> {
    let backend = db.get_database_backend();

    let articles_table = Table::create()
        .table(articles::Entity)
        .col(
            ColumnDef::new(articles::Column::Id)
                .big_integer()
                .not_null()
                .auto_increment()
                .primary_key(),
        )
        .col(
            ColumnDef::new(articles::Column::Slug)
                .string_len(128)
                .not_null()
                .unique_key(),
        )
        .col(
            ColumnDef::new(articles::Column::AuthorId)
                .string_len(128)
                .not_null(),
        )
        .col(ColumnDef::new(articles::Column::Title).text().not_null())
        .col(
            ColumnDef::new(articles::Column::AbstractText)
                .text()
                .not_null(),
        )
        .col(ColumnDef::new(articles::Column::Tags).text().not_null())
        .col(
            ColumnDef::new(articles::Column::FileReference)
                .text()
                .not_null(),
        )
        .col(
            ColumnDef::new(articles::Column::Status)
                .tiny_integer()
                .not_null()
                .default(0),
        )
        .col(ColumnDef::new(articles::Column::RejectionReason).text().null())
        .col(
            ColumnDef::new(articles::Column::UtrNumber)
                .string_len(64)
                .null(),
        )
        .col(
            ColumnDef::new(articles::Column::IsFeatured)
                .boolean()
                .not_null()
                .default(false),
        )
        .col(
            ColumnDef::new(articles::Column::CreatedAt)
                .timestamp_with_time_zone()
                .not_null(),
        )
        .col(
            ColumnDef::new(articles::Column::UpdatedAt)
                .timestamp_with_time_zone()
                .not_null(),
        )
        .col(
            ColumnDef::new(articles::Column::PublishedAt)
                .timestamp_with_time_zone()
                .null(),
        )
        .to_owned();
    create_table(db, backend, articles_table).await?;

    let tokens_table = Table::create()
        .table(payment_tokens::Entity)
        .col(
            ColumnDef::new(payment_tokens::Column::Fingerprint)
                .string_len(64)
                .not_null()
                .primary_key(),
        )
        .col(
            ColumnDef::new(payment_tokens::Column::ArticleId)
                .big_integer()
                .not_null(),
        )
        .col(
            ColumnDef::new(payment_tokens::Column::UserId)
                .string_len(128)
                .not_null(),
        )
        .col(
            ColumnDef::new(payment_tokens::Column::IssuedAt)
                .timestamp_with_time_zone()
                .not_null(),
        )
        .col(
            ColumnDef::new(payment_tokens::Column::ExpiresAt)
                .timestamp_with_time_zone()
                .not_null(),
        )
        .col(
            ColumnDef::new(payment_tokens::Column::Used)
                .boolean()
                .not_null()
                .default(false),
        )
        .col(
            ColumnDef::new(payment_tokens::Column::UsedAt)
                .timestamp_with_time_zone()
                .null(),
        )
        .to_owned();
    create_table(db, backend, tokens_table).await?;
    create_index(
        db,
        backend,
        Index::create()
            .name("idx_payment_tokens_article")
            .table(payment_tokens::Entity)
            .col(payment_tokens::Column::ArticleId)
            .to_owned(),
    )
    .await?;

    let profiles_table = Table::create()
        .table(profiles::Entity)
        .col(
            ColumnDef::new(profiles::Column::UserId)
                .string_len(128)
                .not_null()
                .primary_key(),
        )
        .col(
            ColumnDef::new(profiles::Column::IsAdmin)
                .boolean()
                .not_null()
                .default(false),
        )
        .col(ColumnDef::new(profiles::Column::Email).string().not_null())
        .col(
            ColumnDef::new(profiles::Column::DisplayName)
                .string()
                .not_null(),
        )
        .col(ColumnDef::new(profiles::Column::EditorRole).string().null())
        .col(ColumnDef::new(profiles::Column::Institution).string().null())
        .col(
            ColumnDef::new(profiles::Column::DisplayOrder)
                .integer()
                .null(),
        )
        .to_owned();
    create_table(db, backend, profiles_table).await?;

    let transitions_table = Table::create()
        .table(article_transitions::Entity)
        .col(
            ColumnDef::new(article_transitions::Column::Id)
                .big_integer()
                .not_null()
                .auto_increment()
                .primary_key(),
        )
        .col(
            ColumnDef::new(article_transitions::Column::ArticleId)
                .big_integer()
                .not_null(),
        )
        .col(
            ColumnDef::new(article_transitions::Column::Action)
                .string_len(32)
                .not_null(),
        )
        .col(
            ColumnDef::new(article_transitions::Column::FromStatus)
                .string_len(32)
                .null(),
        )
        .col(
            ColumnDef::new(article_transitions::Column::ToStatus)
                .string_len(32)
                .not_null(),
        )
        .col(
            ColumnDef::new(article_transitions::Column::ActorId)
                .string_len(128)
                .not_null(),
        )
        .col(ColumnDef::new(article_transitions::Column::Note).text().null())
        .col(
            ColumnDef::new(article_transitions::Column::OccurredAt)
                .timestamp_with_time_zone()
                .not_null(),
        )
        .to_owned();
    create_table(db, backend, transitions_table).await?;
    create_index(
        db,
        backend,
        Index::create()
            .name("idx_article_transitions_article")
            .table(article_transitions::Entity)
            .col(article_transitions::Column::ArticleId)
            .to_owned(),
    )
    .await?;

    let outbox_table = Table::create()
        .table(outbox_emails::Entity)
        .col(
            ColumnDef::new(outbox_emails::Column::Id)
                .big_integer()
                .not_null()
                .auto_increment()
                .primary_key(),
        )
        .col(
            ColumnDef::new(outbox_emails::Column::ArticleId)
                .big_integer()
                .null(),
        )
        .col(
            ColumnDef::new(outbox_emails::Column::Kind)
                .string_len(32)
                .not_null(),
        )
        .col(
            ColumnDef::new(outbox_emails::Column::Recipient)
                .string()
                .not_null(),
        )
        .col(ColumnDef::new(outbox_emails::Column::Subject).text().not_null())
        .col(
            ColumnDef::new(outbox_emails::Column::HtmlBody)
                .text()
                .not_null(),
        )
        .col(
            ColumnDef::new(outbox_emails::Column::TextBody)
                .text()
                .not_null(),
        )
        .col(
            ColumnDef::new(outbox_emails::Column::Status)
                .tiny_integer()
                .not_null()
                .default(0),
        )
        .col(
            ColumnDef::new(outbox_emails::Column::Attempts)
                .integer()
                .not_null()
                .default(0),
        )
        .col(ColumnDef::new(outbox_emails::Column::LastError).text().null())
        .col(
            ColumnDef::new(outbox_emails::Column::CreatedAt)
                .timestamp_with_time_zone()
                .not_null(),
        )
        .col(
            ColumnDef::new(outbox_emails::Column::NextAttemptMs)
                .big_integer()
                .not_null(),
        )
        .col(
            ColumnDef::new(outbox_emails::Column::DeliveredAt)
                .timestamp_with_time_zone()
                .null(),
        )
        .to_owned();
    create_table(db, backend, outbox_table).await?;
    create_index(
        db,
        backend,
        Index::create()
            .name("idx_outbox_emails_due")
            .table(outbox_emails::Entity)
            .col(outbox_emails::Column::Status)
            .col(outbox_emails::Column::NextAttemptMs)
            .to_owned(),
    )
    .await?;

    Ok(())
}

async fn create_table(
    db: &DatabaseConnection,
    backend: DatabaseBackend,
    mut statement: TableCreateStatement,
) -> StorageResult<()> {
    statement.if_not_exists();
    db.execute(backend.build(&statement))
        .await
        .map_err(db_error)?;
    Ok(())
}

async fn create_index(
    db: &DatabaseConnection,
    backend: DatabaseBackend,
    mut statement: IndexCreateStatement,
) -> StorageResult<()> {
    statement.if_not_exists();
    db.execute(backend.build(&statement))
        .await
        .map_err(db_error)?;
    Ok(())
}
