use law_journal_domain::model::{ArticleId, PaymentTokenRecord, TokenFingerprint};
use law_journal_domain::storage::{StorageResult, TokenStore};
use sea_orm::{ColumnTrait, EntityTrait, QueryFilter, QueryOrder};

use crate::article_store::parse_user_id;
use crate::entity::payment_tokens;
use crate::errors::db_error;
use crate::SeaOrmStorage;

#[async_trait::async_trait]
impl TokenStore for SeaOrmStorage {
    async fn find_token(
        &self,
        fingerprint: &TokenFingerprint,
    ) -> StorageResult<Option<PaymentTokenRecord>> {
        let maybe = payment_tokens::Entity::find_by_id(fingerprint.as_str().to_owned())
            .one(self.connection())
            .await
            .map_err(db_error)?;
        maybe.map(token_to_record).transpose()
    }

    async fn tokens_for_article(&self, id: ArticleId) -> StorageResult<Vec<PaymentTokenRecord>> {
        let rows = payment_tokens::Entity::find()
            .filter(payment_tokens::Column::ArticleId.eq(id.get()))
            .order_by_asc(payment_tokens::Column::IssuedAt)
            .all(self.connection())
            .await
            .map_err(db_error)?;
        rows.into_iter().map(token_to_record).collect()
    }
}

fn token_to_record(model: payment_tokens::Model) -> StorageResult<PaymentTokenRecord> {
    Ok(PaymentTokenRecord {
        user_id: parse_user_id(&model.user_id)?,
        fingerprint: TokenFingerprint::from_stored(model.fingerprint),
        article_id: ArticleId::new(model.article_id),
        issued_at: model.issued_at,
        expires_at: model.expires_at,
        used: model.used,
        used_at: model.used_at,
    })
}
