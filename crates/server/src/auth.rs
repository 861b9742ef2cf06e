//! Authentication middleware
//!
//! Bearer-token API key check on the signaling endpoints. Disabled by
//! default for local development; health and metrics stay public either way.

use axum::{
    extract::Request,
    http::{header, StatusCode},
    middleware::Next,
    response::{IntoResponse, Response},
};
use parking_lot::RwLock;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use voicebridge_config::Settings;

/// Warn about disabled auth only once
static AUTH_DISABLED_WARNED: AtomicBool = AtomicBool::new(false);

/// What the config says to do with this request
enum AuthCheck {
    /// Authentication disabled, pass through
    Disabled,
    /// Path is public, pass through
    PublicPath,
    /// Config error
    ConfigError(&'static str),
    /// Compare against this expected key
    CheckKey(String),
}

/// Extract the auth decision synchronously so the config guard is never
/// held across an await point.
fn check_auth_config(config: &Arc<RwLock<Settings>>, path: &str) -> AuthCheck {
    let guard = config.read();
    let auth = &guard.server.auth;

    if !auth.enabled {
        if !AUTH_DISABLED_WARNED.swap(true, Ordering::Relaxed) {
            tracing::warn!(
                "API authentication is DISABLED. Set VOICEBRIDGE__SERVER__AUTH__ENABLED=true for production."
            );
        }
        return AuthCheck::Disabled;
    }

    if auth.public_paths.iter().any(|p| path.starts_with(p)) {
        return AuthCheck::PublicPath;
    }

    match &auth.api_key {
        Some(key) if !key.is_empty() => AuthCheck::CheckKey(key.clone()),
        _ => AuthCheck::ConfigError("Auth is enabled but no API key is configured"),
    }
}

/// Middleware checking `Authorization: Bearer <api_key>`
pub async fn auth_middleware(request: Request, next: Next) -> Response {
    let config = match request.extensions().get::<Arc<RwLock<Settings>>>() {
        Some(cfg) => cfg.clone(),
        None => {
            tracing::error!("Config extension not found in request");
            return (StatusCode::INTERNAL_SERVER_ERROR, "Server configuration error")
                .into_response();
        }
    };

    let path = request.uri().path().to_string();
    match check_auth_config(&config, &path) {
        AuthCheck::Disabled | AuthCheck::PublicPath => next.run(request).await,
        AuthCheck::ConfigError(msg) => {
            tracing::error!("{}", msg);
            (
                StatusCode::INTERNAL_SERVER_ERROR,
                "Server authentication not configured",
            )
                .into_response()
        }
        AuthCheck::CheckKey(expected) => {
            let auth_header = request
                .headers()
                .get(header::AUTHORIZATION)
                .and_then(|v| v.to_str().ok())
                .map(|s| s.to_string());

            match auth_header {
                Some(header) if header.starts_with("Bearer ") => {
                    let provided = &header[7..];
                    if constant_time_compare(provided.as_bytes(), expected.as_bytes()) {
                        next.run(request).await
                    } else {
                        tracing::warn!(path = %path, "Invalid API key");
                        (StatusCode::UNAUTHORIZED, "Invalid API key").into_response()
                    }
                }
                Some(_) => (
                    StatusCode::BAD_REQUEST,
                    "Invalid Authorization header format. Expected: Bearer <token>",
                )
                    .into_response(),
                None => {
                    (StatusCode::UNAUTHORIZED, "Missing Authorization header").into_response()
                }
            }
        }
    }
}

/// Constant-time byte comparison to prevent timing attacks
fn constant_time_compare(a: &[u8], b: &[u8]) -> bool {
    if a.len() != b.len() {
        return false;
    }
    let mut result = 0u8;
    for (x, y) in a.iter().zip(b.iter()) {
        result |= x ^ y;
    }
    result == 0
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_constant_time_compare() {
        assert!(constant_time_compare(b"secret", b"secret"));
        assert!(!constant_time_compare(b"secret", b"Secret"));
        assert!(!constant_time_compare(b"secret", b"secret2"));
        assert!(!constant_time_compare(b"", b"x"));
        assert!(constant_time_compare(b"", b""));
    }

    #[test]
    fn test_public_paths_bypass() {
        let mut settings = Settings::default();
        settings.server.auth.enabled = true;
        settings.server.auth.api_key = Some("key".into());
        let config = Arc::new(RwLock::new(settings));

        assert!(matches!(
            check_auth_config(&config, "/health"),
            AuthCheck::PublicPath
        ));
        assert!(matches!(
            check_auth_config(&config, "/metrics"),
            AuthCheck::PublicPath
        ));
        assert!(matches!(
            check_auth_config(&config, "/offer"),
            AuthCheck::CheckKey(_)
        ));
    }

    #[test]
    fn test_enabled_without_key_is_config_error() {
        let mut settings = Settings::default();
        settings.server.auth.enabled = true;
        let config = Arc::new(RwLock::new(settings));

        assert!(matches!(
            check_auth_config(&config, "/offer"),
            AuthCheck::ConfigError(_)
        ));
    }
}
