use axum::{
    async_trait,
    extract::FromRequestParts,
    http::{request::Parts, StatusCode},
    response::{IntoResponse, Response},
};

use crate::error::AppError;
use crate::models::actor::{Actor, Role};

/// Identity headers set by the SSO proxy in front of the service
pub const HEADER_USER_EMAIL: &str = "x-user-email";
pub const HEADER_USER_ROLE: &str = "x-user-role";

/// Authentication error responses
#[derive(Debug)]
pub enum AuthError {
    Unauthorized,
    InvalidRole(String),
}

impl IntoResponse for AuthError {
    fn into_response(self) -> Response {
        match self {
            AuthError::Unauthorized => {
                (StatusCode::UNAUTHORIZED, "Authentication required.").into_response()
            }
            AuthError::InvalidRole(msg) => (StatusCode::UNAUTHORIZED, msg).into_response(),
        }
    }
}

fn header<'a>(parts: &'a Parts, name: &str) -> Option<&'a str> {
    parts
        .headers
        .get(name)
        .and_then(|v| v.to_str().ok())
        .map(str::trim)
        .filter(|v| !v.is_empty())
}

#[async_trait]
impl<S> FromRequestParts<S> for Actor
where
    S: Send + Sync,
{
    type Rejection = AuthError;

    async fn from_request_parts(parts: &mut Parts, _state: &S) -> Result<Self, Self::Rejection> {
        let email = header(parts, HEADER_USER_EMAIL).ok_or(AuthError::Unauthorized)?;
        let role: Role = header(parts, HEADER_USER_ROLE)
            .ok_or(AuthError::Unauthorized)?
            .parse()
            .map_err(AuthError::InvalidRole)?;

        Ok(Actor::new(email, role))
    }
}

pub fn require_admin(actor: &Actor) -> Result<(), AppError> {
    if !actor.is_admin() {
        tracing::warn!(actor = %actor.email, role = %actor.role, "Admin action refused");
        return Err(AppError::Authorization("Admin role required".to_string()));
    }
    Ok(())
}
