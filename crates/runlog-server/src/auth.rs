//! Request authentication: HTTP Basic (token as password) or Bearer token.

use axum::{
    extract::{Request, State},
    http::header,
    middleware::Next,
    response::Response,
};
use base64::engine::general_purpose::STANDARD;
use base64::Engine;

use crate::error::ApiError;
use crate::state::{AppState, AuthConfig};

pub async fn require_auth(
    State(state): State<AppState>,
    request: Request,
    next: Next,
) -> Result<Response, ApiError> {
    if let Some(auth) = &state.auth {
        let provided = request
            .headers()
            .get(header::AUTHORIZATION)
            .and_then(|v| v.to_str().ok());
        match provided {
            Some(value) if is_authorized(auth, value) => {}
            Some(_) => {
                tracing::warn!(path = %request.uri().path(), "Rejected credentials");
                return Err(ApiError::Unauthenticated("Invalid credentials".into()));
            }
            None => {
                return Err(ApiError::Unauthenticated(
                    "Missing Authorization header".into(),
                ))
            }
        }
    }
    Ok(next.run(request).await)
}

fn is_authorized(auth: &AuthConfig, header_value: &str) -> bool {
    if let Some(token) = header_value.strip_prefix("Bearer ") {
        return token.trim() == auth.token;
    }
    if let Some(encoded) = header_value.strip_prefix("Basic ") {
        let Ok(decoded) = STANDARD.decode(encoded.trim()) else {
            return false;
        };
        let Ok(pair) = String::from_utf8(decoded) else {
            return false;
        };
        let Some((user, password)) = pair.split_once(':') else {
            return false;
        };
        let user_ok = auth.username.as_deref().map_or(true, |expected| expected == user);
        return user_ok && password == auth.token;
    }
    false
}
