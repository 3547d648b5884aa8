use axum::{
    Json,
    extract::{FromRequestParts, Request, State},
    http::{HeaderMap, HeaderValue, StatusCode, header, request::Parts},
    middleware::Next,
    response::{IntoResponse, Response},
};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tower_sessions::cookie::{Cookie, Expiration, SameSite};

use super::{ApiError, ApiResponse, AppState};
use crate::config::Config;
use crate::domain::UserId;
use crate::services::{IssuedTokens, UserInfo};

const REFRESH_COOKIE_PATH: &str = "/api/auth";

// ============================================================================
// Request/Response Types
// ============================================================================

#[derive(Deserialize)]
pub struct RegisterRequest {
    pub username: String,
    pub password: String,
    #[serde(default)]
    pub name: Option<String>,
}

#[derive(Deserialize)]
pub struct LoginRequest {
    pub username: String,
    pub password: String,
}

#[derive(Serialize)]
pub struct TokenResponse {
    pub access_token: String,
    pub expires_at: DateTime<Utc>,
}

#[derive(Serialize)]
pub struct MessageResponse {
    pub message: String,
}

/// The caller, as established from a valid bearer token.
#[derive(Debug, Clone)]
pub struct AuthUser {
    pub id: UserId,
    pub name: String,
    pub roles: Vec<String>,
}

impl AuthUser {
    #[must_use]
    pub fn has_role(&self, role: &str) -> bool {
        self.roles.iter().any(|r| r.eq_ignore_ascii_case(role))
    }

    pub fn require_role(&self, role: &str) -> Result<(), ApiError> {
        if self.has_role(role) {
            Ok(())
        } else {
            Err(ApiError::Forbidden(format!("Requires the '{role}' role")))
        }
    }
}

impl<S: Send + Sync> FromRequestParts<S> for AuthUser {
    type Rejection = ApiError;

    async fn from_request_parts(parts: &mut Parts, _state: &S) -> Result<Self, Self::Rejection> {
        parts
            .extensions
            .get::<Self>()
            .cloned()
            .ok_or_else(|| ApiError::Unauthorized("Authentication required".to_string()))
    }
}

// ============================================================================
// Middleware
// ============================================================================

/// Requires `Authorization: Bearer <jwt>` and attaches the [`AuthUser`].
pub async fn auth_middleware(
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
    mut request: Request,
    next: Next,
) -> Result<Response, ApiError> {
    let token = extract_bearer(&headers)
        .ok_or_else(|| ApiError::Unauthorized("Missing bearer token".to_string()))?;

    let claims = state
        .shared
        .tokens
        .validate_access_token(token, true)
        .map_err(|e| {
            tracing::debug!(error = %e, "Rejected access token");
            ApiError::Unauthorized("Invalid or expired token".to_string())
        })?;

    let id: UserId = claims
        .sub
        .parse()
        .map_err(|_| ApiError::Unauthorized("Invalid token subject".to_string()))?;

    tracing::Span::current().record("user_id", claims.sub.as_str());
    request.extensions_mut().insert(AuthUser {
        id,
        name: claims.name,
        roles: claims.roles,
    });

    Ok(next.run(request).await)
}

fn extract_bearer(headers: &HeaderMap) -> Option<&str> {
    headers
        .get(header::AUTHORIZATION)?
        .to_str()
        .ok()?
        .strip_prefix("Bearer ")
        .map(str::trim)
        .filter(|t| !t.is_empty())
}

// ============================================================================
// Cookies
// ============================================================================

fn read_cookie(headers: &HeaderMap, name: &str) -> Option<String> {
    headers
        .get_all(header::COOKIE)
        .iter()
        .filter_map(|v| v.to_str().ok())
        .flat_map(Cookie::split_parse)
        .filter_map(Result::ok)
        .find(|c| c.name() == name)
        .map(|c| c.value().to_string())
        .filter(|v| !v.is_empty())
}

fn refresh_cookie(config: &Config, value: String, expires_at: DateTime<Utc>) -> Cookie<'static> {
    let expires = time::OffsetDateTime::from_unix_timestamp(expires_at.timestamp())
        .map_or(Expiration::Session, Expiration::DateTime);

    Cookie::build((config.auth.refresh_cookie_name.clone(), value))
        .http_only(true)
        .secure(config.server.secure_cookies)
        .same_site(SameSite::Strict)
        .path(REFRESH_COOKIE_PATH)
        .expires(expires)
        .build()
}

fn cleared_cookie(config: &Config) -> Cookie<'static> {
    Cookie::build((config.auth.refresh_cookie_name.clone(), String::new()))
        .http_only(true)
        .secure(config.server.secure_cookies)
        .same_site(SameSite::Strict)
        .path(REFRESH_COOKIE_PATH)
        .max_age(time::Duration::ZERO)
        .expires(time::OffsetDateTime::UNIX_EPOCH)
        .build()
}

fn with_cookie(mut response: Response, cookie: &Cookie<'_>) -> Response {
    match HeaderValue::from_str(&cookie.to_string()) {
        Ok(value) => {
            response.headers_mut().append(header::SET_COOKIE, value);
        }
        Err(e) => tracing::error!(error = %e, "Failed to encode cookie"),
    }
    response
}

fn token_response(config: &Config, issued: IssuedTokens) -> Response {
    let cookie = refresh_cookie(config, issued.refresh_token, issued.refresh_expires_at);
    let body = ApiResponse::success(TokenResponse {
        access_token: issued.access_token,
        expires_at: issued.access_expires_at,
    });
    with_cookie(Json(body).into_response(), &cookie)
}

// ============================================================================
// Handlers
// ============================================================================

/// POST /auth/register
pub async fn register(
    State(state): State<Arc<AppState>>,
    Json(payload): Json<RegisterRequest>,
) -> Result<(StatusCode, Json<ApiResponse<UserInfo>>), ApiError> {
    let user = state
        .auth_service()
        .register(&payload.username, &payload.password, payload.name.as_deref())
        .await?;

    Ok((StatusCode::CREATED, Json(ApiResponse::success(user))))
}

/// POST /auth/login
/// Returns an access token and sets the HTTP-only refresh cookie
pub async fn login(
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
    Json(payload): Json<LoginRequest>,
) -> Result<Response, ApiError> {
    let fingerprint = headers
        .get(header::USER_AGENT)
        .and_then(|v| v.to_str().ok());

    let issued = state
        .auth_service()
        .login(&payload.username, &payload.password, fingerprint)
        .await?;

    let config = state.config().read().await;
    Ok(token_response(&config, issued))
}

/// POST /auth/refresh
/// Rotates the refresh cookie. Every failure clears it.
pub async fn refresh(State(state): State<Arc<AppState>>, headers: HeaderMap) -> Response {
    let config = state.config().read().await.clone();

    let result = match read_cookie(&headers, &config.auth.refresh_cookie_name) {
        Some(presented) => state
            .auth_service()
            .refresh(&presented)
            .await
            .map_err(ApiError::from),
        None => Err(ApiError::Unauthorized("Missing refresh token".to_string())),
    };

    match result {
        Ok(issued) => token_response(&config, issued),
        Err(e) => with_cookie(e.into_response(), &cleared_cookie(&config)),
    }
}

/// POST /auth/logout
/// Revokes the presented refresh token and clears the cookie
pub async fn logout(State(state): State<Arc<AppState>>, headers: HeaderMap) -> Response {
    let config = state.config().read().await.clone();
    let presented = read_cookie(&headers, &config.auth.refresh_cookie_name);

    if let Err(e) = state.auth_service().logout(presented.as_deref()).await {
        tracing::warn!(error = %e, "Failed to revoke refresh token during logout");
    }

    let body = ApiResponse::success(MessageResponse {
        message: "Logged out".to_string(),
    });
    with_cookie(Json(body).into_response(), &cleared_cookie(&config))
}

/// GET /auth/me
pub async fn me(
    State(state): State<Arc<AppState>>,
    user: AuthUser,
) -> Result<Json<ApiResponse<UserInfo>>, ApiError> {
    let info = state
        .auth_service()
        .get_user_info(&user.id.to_string())
        .await?;
    Ok(Json(ApiResponse::success(info)))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_read_cookie() {
        let mut headers = HeaderMap::new();
        headers.insert(
            header::COOKIE,
            HeaderValue::from_static("theme=dark; refresh_token=abc123; other=1"),
        );
        assert_eq!(read_cookie(&headers, "refresh_token").as_deref(), Some("abc123"));
        assert_eq!(read_cookie(&headers, "missing"), None);
    }

    #[test]
    fn test_refresh_cookie_attributes() {
        let config = Config::default();
        let cookie = refresh_cookie(&config, "tok".to_string(), Utc::now()).to_string();

        assert!(cookie.starts_with("refresh_token=tok"));
        assert!(cookie.contains("HttpOnly"));
        assert!(cookie.contains("SameSite=Strict"));
        assert!(cookie.contains("Secure"));
        assert!(cookie.contains("Path=/api/auth"));
        assert!(cookie.contains("Expires="));

        let cleared = cleared_cookie(&config).to_string();
        assert!(cleared.starts_with("refresh_token=;"));
        assert!(cleared.contains("Max-Age=0"));
    }

    #[test]
    fn test_extract_bearer() {
        let mut headers = HeaderMap::new();
        assert!(extract_bearer(&headers).is_none());

        headers.insert(header::AUTHORIZATION, HeaderValue::from_static("Basic xyz"));
        assert!(extract_bearer(&headers).is_none());

        headers.insert(header::AUTHORIZATION, HeaderValue::from_static("Bearer abc.def"));
        assert_eq!(extract_bearer(&headers), Some("abc.def"));
    }

    #[test]
    fn test_require_role() {
        let user = AuthUser {
            id: UserId::new_v4(),
            name: "a".to_string(),
            roles: vec!["Admin".to_string()],
        };
        assert!(user.require_role("admin").is_ok());
        assert!(user.require_role("auditor").is_err());
    }
}
