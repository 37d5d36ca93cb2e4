//! Server-side credential store.
//!
//! The HTTP-only cookie jar is the authoritative copy of a browser session.
//! Tokens echoed in JSON bodies are informational only.

use axum::http::{header::SET_COOKIE, HeaderMap, HeaderValue};
use axum_extra::headers::Cookie;
use chrono::Duration as ChronoDuration;

use super::provider::Session;
use crate::{
    config::AppConfig,
    error::{AppError, AppResult},
};

pub const ACCESS_COOKIE_NAME: &str = "sb-access-token";
pub const REFRESH_COOKIE_NAME: &str = "sb-refresh-token";
pub const USER_ID_COOKIE_NAME: &str = "sb-user-id";

#[derive(Debug, Clone)]
pub struct CookieSettings {
    pub secure: bool,
    pub domain: Option<String>,
    pub access_max_age_seconds: i64,
    pub refresh_max_age_seconds: i64,
}

impl CookieSettings {
    pub fn from_config(config: &AppConfig) -> Self {
        Self {
            secure: config.cookie_secure,
            domain: config.cookie_domain.clone(),
            access_max_age_seconds: ChronoDuration::days(config.access_cookie_max_age_days)
                .num_seconds(),
            refresh_max_age_seconds: ChronoDuration::days(config.refresh_cookie_max_age_days)
                .num_seconds(),
        }
    }
}

/// Token pair read back from the cookie jar.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CookieCredentials {
    pub access_token: String,
    pub refresh_token: String,
}

/// Returns the pair only when both cookies are present and non-empty.
pub fn read_credentials(jar: &Cookie) -> Option<CookieCredentials> {
    let access = jar.get(ACCESS_COOKIE_NAME).filter(|v| !v.is_empty())?;
    let refresh = jar.get(REFRESH_COOKIE_NAME).filter(|v| !v.is_empty())?;
    Some(CookieCredentials {
        access_token: access.to_string(),
        refresh_token: refresh.to_string(),
    })
}

pub fn append_session_cookies(
    headers: &mut HeaderMap,
    settings: &CookieSettings,
    session: &Session,
) -> AppResult<()> {
    let user_id = session.user_id.to_string();
    let cookies = [
        (
            ACCESS_COOKIE_NAME,
            session.access_token.as_str(),
            settings.access_max_age_seconds,
        ),
        (
            REFRESH_COOKIE_NAME,
            session.refresh_token.as_str(),
            settings.refresh_max_age_seconds,
        ),
        (
            USER_ID_COOKIE_NAME,
            user_id.as_str(),
            settings.refresh_max_age_seconds,
        ),
    ];

    for (name, value, max_age) in cookies {
        headers.append(SET_COOKIE, build_cookie(settings, name, value, max_age)?);
    }
    Ok(())
}

pub fn append_cleared_cookies(headers: &mut HeaderMap, settings: &CookieSettings) -> AppResult<()> {
    for name in [ACCESS_COOKIE_NAME, REFRESH_COOKIE_NAME, USER_ID_COOKIE_NAME] {
        headers.append(SET_COOKIE, build_cookie(settings, name, "", 0)?);
    }
    Ok(())
}

fn build_cookie(
    settings: &CookieSettings,
    name: &str,
    value: &str,
    max_age: i64,
) -> AppResult<HeaderValue> {
    let mut parts = vec![format!("{name}={value}")];
    parts.push("Path=/".into());
    parts.push("HttpOnly".into());
    parts.push("SameSite=Lax".into());
    parts.push(format!("Max-Age={max_age}"));
    if max_age == 0 {
        parts.push("Expires=Thu, 01 Jan 1970 00:00:00 GMT".into());
    }
    if settings.secure {
        parts.push("Secure".into());
    }
    if let Some(domain) = &settings.domain {
        parts.push(format!("Domain={domain}"));
    }

    HeaderValue::from_str(&parts.join("; "))
        .map_err(|err| AppError::internal(format!("invalid {name} cookie: {err}")))
}
