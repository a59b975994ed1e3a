use law_journal_domain::model::{ProfileRecord, UserId};
use law_journal_domain::storage::{ProfileStore, StorageResult};
use sea_orm::{sea_query::OnConflict, EntityTrait, Set};

use crate::article_store::parse_user_id;
use crate::entity::profiles;
use crate::errors::db_error;
use crate::SeaOrmStorage;

#[async_trait::async_trait]
impl ProfileStore for SeaOrmStorage {
    async fn find_profile(&self, user_id: &UserId) -> StorageResult<Option<ProfileRecord>> {
        let maybe = profiles::Entity::find_by_id(user_id.as_str().to_owned())
            .one(self.connection())
            .await
            .map_err(db_error)?;
        maybe.map(profile_to_record).transpose()
    }

    async fn upsert_profile(&self, profile: ProfileRecord) -> StorageResult<ProfileRecord> {
        let active = profiles::ActiveModel {
            user_id: Set(profile.user_id.as_str().to_owned()),
            is_admin: Set(profile.is_admin),
            email: Set(profile.email.clone()),
            display_name: Set(profile.display_name.clone()),
            editor_role: Set(profile.editor_role.clone()),
            institution: Set(profile.institution.clone()),
            display_order: Set(profile.display_order),
        };
        profiles::Entity::insert(active)
            .on_conflict(
                OnConflict::column(profiles::Column::UserId)
                    .update_columns([
                        profiles::Column::IsAdmin,
                        profiles::Column::Email,
                        profiles::Column::DisplayName,
                        profiles::Column::EditorRole,
                        profiles::Column::Institution,
                        profiles::Column::DisplayOrder,
                    ])
                    .to_owned(),
            )
            .exec_without_returning(self.connection())
            .await
            .map_err(db_error)?;
        Ok(profile)
    }
}

fn profile_to_record(model: profiles::Model) -> StorageResult<ProfileRecord> {
    Ok(ProfileRecord {
        user_id: parse_user_id(&model.user_id)?,
        is_admin: model.is_admin,
        email: model.email,
        display_name: model.display_name,
        editor_role: model.editor_role,
        institution: model.institution,
        display_order: model.display_order,
    })
}
