use axum::extract::FromRequestParts;
use axum::http::request::Parts;
use jsonwebtoken::{Algorithm, DecodingKey, Validation, decode};
use serde::{Deserialize, Serialize};

use crate::AppState;
use crate::error::ApiError;
use crate::models::org::Role;

/// JWT claims. Token issuance is external; we only verify.
#[derive(Debug, Serialize, Deserialize)]
pub struct Claims {
    /// User id.
    pub sub: String,
    pub email: String,
    pub exp: i64,
}

/// Per-request identity and tenancy context, passed explicitly through the
/// call graph. Current org is the first membership unless `X-Org-Id` selects
/// another one the user belongs to.
#[derive(Debug, Clone)]
pub struct AuthContext {
    pub user_id: String,
    pub email: String,
    pub org_id: String,
    pub role: Role,
    pub ip_address: Option<String>,
    pub user_agent: Option<String>,
}

impl AuthContext {
    pub fn is_admin(&self) -> bool {
        self.role == Role::Admin
    }
}

impl FromRequestParts<AppState> for AuthContext {
    type Rejection = ApiError;

    async fn from_request_parts(
        parts: &mut Parts,
        state: &AppState,
    ) -> Result<Self, Self::Rejection> {
        let Some(secret) = state.config.jwt_secret.as_deref() else {
            tracing::warn!("ARGUS_JWT_SECRET unset; rejecting authenticated request");
            return Err(ApiError::Unauthorized);
        };
        let token = parts
            .headers
            .get("authorization")
            .and_then(|v| v.to_str().ok())
            .and_then(|v| v.strip_prefix("Bearer "))
            .ok_or(ApiError::Unauthorized)?;

        let claims = decode::<Claims>(
            token,
            &DecodingKey::from_secret(secret.as_bytes()),
            &Validation::new(Algorithm::HS256),
        )
        .map_err(|_| ApiError::Unauthorized)?
        .claims;

        let memberships = state
            .store
            .memberships_for_user(&claims.sub)
            .map_err(ApiError::Internal)?;
        if memberships.is_empty() {
            return Err(ApiError::Forbidden);
        }

        let selected = parts
            .headers
            .get("x-org-id")
            .and_then(|v| v.to_str().ok())
            .map(str::to_string);
        let membership = match selected {
            Some(org_id) => memberships
                .iter()
                .find(|m| m.org_id == org_id)
                .ok_or(ApiError::Forbidden)?,
            None => &memberships[0],
        };

        let ip_address = parts
            .headers
            .get("x-forwarded-for")
            .and_then(|v| v.to_str().ok())
            .map(|v| v.split(',').next().unwrap_or(v).trim().to_string());
        let user_agent = parts
            .headers
            .get("user-agent")
            .and_then(|v| v.to_str().ok())
            .map(str::to_string);

        Ok(AuthContext {
            user_id: claims.sub,
            email: claims.email,
            org_id: membership.org_id.clone(),
            role: membership.role,
            ip_address,
            user_agent,
        })
    }
}

/// Marker extractor for routes gated on `X-Admin-API-Key`.
pub struct AdminKey;

impl FromRequestParts<AppState> for AdminKey {
    type Rejection = ApiError;

    async fn from_request_parts(
        parts: &mut Parts,
        state: &AppState,
    ) -> Result<Self, Self::Rejection> {
        let Some(expected) = state.config.admin_api_key.as_deref() else {
            return Err(ApiError::Forbidden);
        };
        let provided = parts
            .headers
            .get("x-admin-api-key")
            .and_then(|v| v.to_str().ok())
            .ok_or(ApiError::Forbidden)?;
        if provided != expected {
            return Err(ApiError::Forbidden);
        }
        Ok(AdminKey)
    }
}
