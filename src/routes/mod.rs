// ABOUTME: HTTP route modules and shared helpers for the stretch coach API
// ABOUTME: Session, account, and health routers assembled over shared server resources
//
// SPDX-License-Identifier: MIT OR Apache-2.0
// Copyright (c) 2025 Stretch Coach Contributors

pub mod accounts;
pub mod health;
pub mod sessions;

pub use accounts::AccountRoutes;
pub use health::HealthRoutes;
pub use sessions::SessionRoutes;

use axum::http::HeaderMap;

/// Name of the session cookie
pub const SESSION_COOKIE: &str = "session_id";

/// Extract the session id from the request's cookie header
#[must_use]
pub fn session_id_from_cookies(headers: &HeaderMap) -> Option<String> {
    let cookies = headers.get(axum::http::header::COOKIE)?.to_str().ok()?;
    cookies.split(';').find_map(|pair| {
        let (name, value) = pair.trim().split_once('=')?;
        (name == SESSION_COOKIE && !value.is_empty()).then(|| value.to_owned())
    })
}

/// Build the `Set-Cookie` value for a session id
#[must_use]
pub fn session_cookie_value(session_id: &str, max_age_secs: i64) -> String {
    format!("{SESSION_COOKIE}={session_id}; Path=/; HttpOnly; SameSite=Lax; Max-Age={max_age_secs}")
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::http::header::COOKIE;

    #[test]
    fn extracts_session_cookie_among_others() {
        let mut headers = HeaderMap::new();
        headers.insert(
            COOKIE,
            "theme=dark; session_id=abc-123; lang=ko".parse().unwrap(),
        );
        assert_eq!(session_id_from_cookies(&headers).as_deref(), Some("abc-123"));
    }

    #[test]
    fn missing_cookie_yields_none() {
        let headers = HeaderMap::new();
        assert!(session_id_from_cookies(&headers).is_none());
    }

    #[test]
    fn cookie_value_carries_attributes() {
        let value = session_cookie_value("abc", 86400);
        assert!(value.starts_with("session_id=abc"));
        assert!(value.contains("HttpOnly"));
        assert!(value.contains("Max-Age=86400"));
    }
}
