//! Sign-in validation and the caller's profile.

use crate::api::{with_conn, ApiError};
use crate::middleware::UserContext;
use crate::AppState;
use assess_types::{email_domain, UserProfile};
use axum::extract::{Extension, Json};
use serde::{Deserialize, Serialize};
use std::sync::Arc;

#[derive(Debug, Deserialize)]
pub struct ValidateRequest {
    pub email: String,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct ValidateResponse {
    pub allowed: bool,
    pub domain: String,
}

/// Handler for `POST /api/auth/validate`.
///
/// Lets the sign-in page reject accounts from other organisations before
/// any protected call is made.
pub async fn validate_handler(
    Extension(state): Extension<Arc<AppState>>,
    Json(payload): Json<ValidateRequest>,
) -> Result<Json<ValidateResponse>, ApiError> {
    let domain = email_domain(&payload.email)
        .ok_or_else(|| ApiError::BadRequest(format!("not an email address: {}", payload.email)))?;
    Ok(Json(ValidateResponse {
        allowed: state.access.is_domain_allowed(&domain),
        domain,
    }))
}

#[derive(Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ProfileResponse {
    #[serde(flatten)]
    pub profile: UserProfile,
    pub name_candidates: Vec<String>,
    pub needs_name_preference: bool,
}

impl From<UserProfile> for ProfileResponse {
    fn from(profile: UserProfile) -> Self {
        Self {
            name_candidates: profile.name_candidates(),
            needs_name_preference: profile.needs_name_preference(),
            profile,
        }
    }
}

/// Handler for `GET /api/profile`.
pub async fn profile_handler(
    Extension(UserContext(profile)): Extension<UserContext>,
) -> Json<ProfileResponse> {
    Json(profile.into())
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PreferredNameRequest {
    pub preferred_name: String,
}

/// Handler for `PUT /api/profile/preferred-name`.
pub async fn preferred_name_handler(
    Extension(state): Extension<Arc<AppState>>,
    Extension(UserContext(profile)): Extension<UserContext>,
    Json(payload): Json<PreferredNameRequest>,
) -> Result<Json<ProfileResponse>, ApiError> {
    let email = profile.email;
    let updated = with_conn(&state, move |conn| {
        Ok(assess_db::users::set_preferred_name(
            conn,
            &email,
            &payload.preferred_name,
        )?)
    })
    .await?;

    tracing::info!(email = %updated.email, "stored preferred name");
    Ok(Json(updated.into()))
}
