use sea_orm::{DbErr, SqlErr};

pub(crate) use law_journal_domain::storage::StorageError;

pub(crate) fn db_error(err: DbErr) -> StorageError {
    StorageError::from_source(err)
}

/// Like [`db_error`], but reports unique-key violations as conflicts on `what`.
pub(crate) fn conflict_on(what: &'static str) -> impl Fn(DbErr) -> StorageError {
    move |err| match err.sql_err() {
        Some(SqlErr::UniqueConstraintViolation(_)) => StorageError::Conflict(what),
        _ => StorageError::from_source(err),
    }
}

pub(crate) fn corrupt(what: &str, value: &str) -> StorageError {
    StorageError::Database(format!("unreadable {what} `{value}` in database"))
}
