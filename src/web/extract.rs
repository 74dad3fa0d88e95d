//! Request extractors and the HTTP error mapping.

use async_trait::async_trait;
use axum::{
    extract::FromRequestParts,
    http::{request::Parts, StatusCode},
    response::{IntoResponse, Response},
    Json,
};
use serde_json::json;
use tracing::error;

use crate::context::Actor;
use crate::error::LogError;

/// Header carrying the caller's user id.
pub const USER_ID_HEADER: &str = "x-user-id";
/// Header marking the caller as staff.
pub const ADMIN_HEADER: &str = "x-user-admin";

/// A [`LogError`] rendered as `{"error": msg}` with a matching status code.
#[derive(Debug)]
pub struct ApiError(pub LogError);

pub type ApiResult<T> = std::result::Result<T, ApiError>;

impl ApiError {
    pub fn status(&self) -> StatusCode {
        match &self.0 {
            LogError::NotFound(_) => StatusCode::NOT_FOUND,
            LogError::Forbidden(_) => StatusCode::FORBIDDEN,
            LogError::Unauthorized => StatusCode::UNAUTHORIZED,
            LogError::Validation(_) => StatusCode::UNPROCESSABLE_ENTITY,
            LogError::Unavailable(_) => StatusCode::SERVICE_UNAVAILABLE,
            _ => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }
}

impl From<LogError> for ApiError {
    fn from(err: LogError) -> Self {
        Self(err)
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let status = self.status();
        if status.is_server_error() {
            error!("Request failed: {}", self.0);
        }
        (status, Json(json!({ "error": self.0.to_string() }))).into_response()
    }
}

#[async_trait]
impl<S> FromRequestParts<S> for Actor
where
    S: Send + Sync,
{
    type Rejection = ApiError;

    async fn from_request_parts(parts: &mut Parts, _state: &S) -> Result<Self, Self::Rejection> {
        let user_id = parts
            .headers
            .get(USER_ID_HEADER)
            .and_then(|v| v.to_str().ok())
            .map(str::trim)
            .filter(|v| !v.is_empty())
            .ok_or(ApiError(LogError::Unauthorized))?;

        let is_admin = parts
            .headers
            .get(ADMIN_HEADER)
            .and_then(|v| v.to_str().ok())
            .is_some_and(|v| v.eq_ignore_ascii_case("true") || v == "1");

        Ok(Actor {
            user_id: user_id.to_string(),
            is_admin,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::http::Request;

    async fn extract(builder: axum::http::request::Builder) -> Result<Actor, ApiError> {
        let (mut parts, _) = builder.body(()).unwrap().into_parts();
        Actor::from_request_parts(&mut parts, &()).await
    }

    #[tokio::test]
    async fn test_actor_from_headers() {
        let actor = extract(
            Request::builder()
                .header(USER_ID_HEADER, "42")
                .header(ADMIN_HEADER, "true"),
        )
        .await
        .unwrap();
        assert_eq!(actor, Actor::admin("42"));

        let actor = extract(Request::builder().header(USER_ID_HEADER, "7")).await.unwrap();
        assert_eq!(actor, Actor::user("7"));
    }

    #[tokio::test]
    async fn test_missing_actor_is_unauthorized() {
        let err = extract(Request::builder()).await.unwrap_err();
        assert_eq!(err.status(), StatusCode::UNAUTHORIZED);

        let err = extract(Request::builder().header(USER_ID_HEADER, "  ")).await.unwrap_err();
        assert_eq!(err.status(), StatusCode::UNAUTHORIZED);
    }

    #[test]
    fn test_status_mapping() {
        assert_eq!(ApiError(LogError::not_found("x")).status(), StatusCode::NOT_FOUND);
        assert_eq!(ApiError(LogError::forbidden("x")).status(), StatusCode::FORBIDDEN);
        assert_eq!(
            ApiError(LogError::validation_error("x")).status(),
            StatusCode::UNPROCESSABLE_ENTITY
        );
        assert_eq!(
            ApiError(LogError::unavailable("too many WebSocket connections")).status(),
            StatusCode::SERVICE_UNAVAILABLE
        );
        assert_eq!(
            ApiError(LogError::config_error("x")).status(),
            StatusCode::INTERNAL_SERVER_ERROR
        );
    }
}
