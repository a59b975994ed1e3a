//! Caller identity extractors. The identity service in front of the API
//! forwards the signed-in user in [`IDENTITY_HEADER`]; everything else about
//! the caller is looked up in the profiles table.

use std::{future::Future, pin::Pin};

use actix_web::{dev::Payload, web::Data, FromRequest, HttpRequest};
use law_journal_domain::model::{ProfileRecord, UserId};
use law_journal_domain::services::guard::{authenticate, authorize_admin, AdminProfile};
use law_journal_domain::services::workflow::WorkflowError;

use crate::handlers::ApiError;
use crate::state::AppState;

pub const IDENTITY_HEADER: &str = "x-authenticated-user";

type CallerFuture<T> = Pin<Box<dyn Future<Output = Result<T, ApiError>>>>;

fn identity(req: &HttpRequest) -> Option<UserId> {
    req.headers()
        .get(IDENTITY_HEADER)
        .and_then(|value| value.to_str().ok())
        .and_then(UserId::parse)
}

fn request_parts(req: &HttpRequest) -> (Option<Data<AppState>>, Option<UserId>) {
    (req.app_data::<Data<AppState>>().cloned(), identity(req))
}

/// Caller with an admin profile. Every `/admin` route takes one.
pub struct AdminCaller(pub AdminProfile);

impl FromRequest for AdminCaller {
    type Error = ApiError;
    type Future = CallerFuture<Self>;

    fn from_request(req: &HttpRequest, _: &mut Payload) -> Self::Future {
        let (state, identity) = request_parts(req);
        Box::pin(async move {
            let state = state.ok_or(ApiError::MissingState)?;
            let admin = authorize_admin(state.workflow().store(), identity.as_ref())
                .await
                .map_err(WorkflowError::from)?;
            Ok(AdminCaller(admin))
        })
    }
}

/// Any signed-in caller with a profile.
pub struct AuthorCaller(pub ProfileRecord);

impl FromRequest for AuthorCaller {
    type Error = ApiError;
    type Future = CallerFuture<Self>;

    fn from_request(req: &HttpRequest, _: &mut Payload) -> Self::Future {
        let (state, identity) = request_parts(req);
        Box::pin(async move {
            let state = state.ok_or(ApiError::MissingState)?;
            let profile = authenticate(state.workflow().store(), identity.as_ref())
                .await
                .map_err(WorkflowError::from)?;
            Ok(AuthorCaller(profile))
        })
    }
}
