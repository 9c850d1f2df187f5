//! Request principal extraction
//!
//! A missing Authorization header means an anonymous caller. A header that
//! is present must carry a valid bearer token.

use crate::AppState;
use axum::{extract::FromRequestParts, http::request::Parts};
use scriptorium_common::{
    auth::extract_bearer,
    errors::{AppError, Result},
    Principal,
};

/// Caller identity, `None` for anonymous requests
#[derive(Debug, Clone)]
pub struct Caller(pub Option<Principal>);

impl Caller {
    pub fn principal(&self) -> Option<&Principal> {
        self.0.as_ref()
    }
}

impl FromRequestParts<AppState> for Caller {
    type Rejection = AppError;

    async fn from_request_parts(parts: &mut Parts, state: &AppState) -> Result<Self> {
        let Some(header) = parts.headers.get(axum::http::header::AUTHORIZATION) else {
            return Ok(Caller(None));
        };

        let token = header
            .to_str()
            .ok()
            .and_then(extract_bearer)
            .ok_or_else(|| AppError::Unauthorized {
                message: "Authorization header must be a bearer token".to_string(),
            })?;

        let jwt = state.jwt.as_ref().ok_or_else(|| AppError::Unauthorized {
            message: "bearer tokens are not accepted by this deployment".to_string(),
        })?;

        Ok(Caller(Some(jwt.authenticate(token)?)))
    }
}

/// Caller that must be signed in
#[derive(Debug, Clone)]
pub struct Authenticated(pub Principal);

impl FromRequestParts<AppState> for Authenticated {
    type Rejection = AppError;

    async fn from_request_parts(parts: &mut Parts, state: &AppState) -> Result<Self> {
        match Caller::from_request_parts(parts, state).await? {
            Caller(Some(principal)) => Ok(Authenticated(principal)),
            Caller(None) => Err(AppError::Unauthorized {
                message: "Missing Authorization header".to_string(),
            }),
        }
    }
}
