//! Owner extractor.
//!
//! Authentication happens in front of this server; the authenticated
//! principal arrives in the `X-Wove-Owner` header and scopes every
//! persistence call.

use axum::extract::FromRequestParts;
use axum::http::request::Parts;

use wove_types::chat::OwnerId;

use crate::http::error::AppError;

pub const OWNER_HEADER: &str = "x-wove-owner";

/// The owner a request acts for.
pub struct Owner(pub OwnerId);

impl<S: Send + Sync> FromRequestParts<S> for Owner {
    type Rejection = AppError;

    async fn from_request_parts(parts: &mut Parts, _state: &S) -> Result<Self, Self::Rejection> {
        let value = parts
            .headers
            .get(OWNER_HEADER)
            .ok_or_else(|| AppError::Unauthorized("Missing X-Wove-Owner header".to_string()))?;
        let owner = value
            .to_str()
            .map_err(|_| AppError::Unauthorized("Invalid X-Wove-Owner header encoding".to_string()))?
            .trim();

        if owner.is_empty() {
            return Err(AppError::Unauthorized("Empty X-Wove-Owner header".to_string()));
        }
        Ok(Owner(OwnerId::new(owner)))
    }
}
