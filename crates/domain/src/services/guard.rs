use thiserror::Error;

use crate::model::{ProfileRecord, UserId};
use crate::storage::{ProfileStore, StorageError};

/// Proof that the caller passed the admin check. Only [`authorize_admin`]
/// can build one, so workflow methods taking it cannot be reached otherwise.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AdminProfile(ProfileRecord);

impl AdminProfile {
    pub fn user_id(&self) -> &UserId {
        &self.0.user_id
    }

    pub fn profile(&self) -> &ProfileRecord {
        &self.0
    }
}

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum AccessError {
    #[error("authentication required")]
    Unauthenticated,
    #[error("admin privileges required")]
    Forbidden,
    #[error(transparent)]
    Storage(#[from] StorageError),
}

/// Resolves the caller's profile; a missing identity or profile is refused.
pub async fn authenticate<S>(
    store: &S,
    identity: Option<&UserId>,
) -> Result<ProfileRecord, AccessError>
where
    S: ProfileStore + ?Sized,
{
    let user_id = identity.ok_or(AccessError::Unauthenticated)?;
    store
        .find_profile(user_id)
        .await?
        .ok_or(AccessError::Forbidden)
}

pub async fn authorize_admin<S>(
    store: &S,
    identity: Option<&UserId>,
) -> Result<AdminProfile, AccessError>
where
    S: ProfileStore + ?Sized,
{
    let profile = authenticate(store, identity).await?;
    if profile.is_admin {
        Ok(AdminProfile(profile))
    } else {
        Err(AccessError::Forbidden)
    }
}
