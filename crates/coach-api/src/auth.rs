//! API authentication via bearer tokens.
//!
//! Each configured token maps to one tenant user id. The middleware
//! validates `Authorization: Bearer <token>` on protected endpoints and
//! injects the resolved identity as a request extension.

use std::collections::HashMap;

use axum::extract::{Request, State};
use axum::http::StatusCode;
use axum::middleware::Next;
use axum::response::{IntoResponse, Response};
use axum::Json;

use crate::state::AppState;

/// The authenticated tenant, resolved from the bearer token.
#[derive(Debug, Clone)]
pub struct AuthUser {
    pub user_id: String,
}

/// Token-to-user-id lookup table.
pub struct IdentityProvider {
    tokens: HashMap<String, String>,
}

impl IdentityProvider {
    pub fn new(tokens: HashMap<String, String>) -> Self {
        Self { tokens }
    }

    /// Resolve a bearer token to a user id.
    pub fn resolve(&self, token: &str) -> Option<&str> {
        self.tokens.get(token).map(String::as_str)
    }
}

fn unauthorized(message: &str) -> Response {
    (
        StatusCode::UNAUTHORIZED,
        Json(serde_json::json!({
            "error": "unauthorized",
            "message": message
        })),
    )
        .into_response()
}

/// Middleware that validates bearer token authentication.
///
/// On success the request carries an `AuthUser` extension; otherwise a 401
/// JSON body is returned and the request never reaches the handler.
pub async fn require_user(
    State(state): State<AppState>,
    mut req: Request,
    next: Next,
) -> Response {
    let header = match req.headers().get("authorization") {
        Some(value) => value,
        None => return unauthorized("Missing Authorization header"),
    };

    let value_str = match header.to_str() {
        Ok(s) => s,
        Err(_) => return unauthorized("Invalid Authorization header encoding"),
    };

    let token = match value_str.strip_prefix("Bearer ") {
        Some(t) => t,
        None => return unauthorized("Expected a bearer token"),
    };

    match state.identity.resolve(token) {
        Some(user_id) => {
            req.extensions_mut().insert(AuthUser {
                user_id: user_id.to_string(),
            });
            next.run(req).await
        }
        None => unauthorized("Invalid bearer token"),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_resolve_known_and_unknown_tokens() {
        let mut tokens = HashMap::new();
        tokens.insert("tok-1".to_string(), "U1".to_string());
        let identity = IdentityProvider::new(tokens);
        assert_eq!(identity.resolve("tok-1"), Some("U1"));
        assert!(identity.resolve("tok-2").is_none());
        assert!(identity.resolve("").is_none());
    }
}
