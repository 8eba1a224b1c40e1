use axum::{
    async_trait,
    extract::FromRequestParts,
    http::{header::AUTHORIZATION, request::Parts, HeaderMap},
};

use super::{error::ApiError, ApiState};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Role {
    Admin,
    Director,
}

/// Static bearer tokens. With neither token configured every caller is a director (local dev).
#[derive(Debug, Clone, Default)]
pub struct AdminAuth {
    pub admin_token: Option<String>,
    pub director_token: Option<String>,
}

impl AdminAuth {
    pub fn new(admin_token: Option<String>, director_token: Option<String>) -> Self {
        Self {
            admin_token,
            director_token,
        }
    }

    pub fn is_enabled(&self) -> bool {
        self.admin_token.is_some() || self.director_token.is_some()
    }

    pub fn resolve(&self, headers: &HeaderMap) -> Result<Role, ApiError> {
        if !self.is_enabled() {
            return Ok(Role::Director);
        }

        let presented = headers
            .get(AUTHORIZATION)
            .and_then(|v| v.to_str().ok())
            .and_then(|v| v.strip_prefix("Bearer "))
            .map(str::trim)
            .filter(|t| !t.is_empty());

        let Some(token) = presented else {
            tracing::warn!("admin request without bearer token");
            return Err(ApiError::Unauthorized);
        };

        if self.director_token.as_deref() == Some(token) {
            Ok(Role::Director)
        } else if self.admin_token.as_deref() == Some(token) {
            Ok(Role::Admin)
        } else {
            tracing::warn!("admin request with unknown token");
            Err(ApiError::Unauthorized)
        }
    }
}

/// Authenticated caller of an admin route.
#[derive(Debug, Clone, Copy)]
pub struct Caller(pub Role);

impl Caller {
    pub fn require_director(&self, action: &str) -> Result<(), ApiError> {
        match self.0 {
            Role::Director => Ok(()),
            Role::Admin => {
                tracing::warn!(action, "non-director attempted director action");
                Err(ApiError::Forbidden(format!("{action} requires director role")))
            }
        }
    }
}

#[async_trait]
impl FromRequestParts<ApiState> for Caller {
    type Rejection = ApiError;

    async fn from_request_parts(
        parts: &mut Parts,
        state: &ApiState,
    ) -> Result<Self, Self::Rejection> {
        state.auth.resolve(&parts.headers).map(Caller)
    }
}
