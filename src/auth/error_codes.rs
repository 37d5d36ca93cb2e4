//! Normalises identity-provider failure text into a fixed set of codes.
//!
//! The provider does not promise stable wording, so this is a best-effort
//! mapping. All substring rules live in [`MESSAGE_RULES`].

use serde::Serialize;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum AuthErrorCode {
    InvalidCredentials,
    EmailNotConfirmed,
    RateLimited,
    UserAlreadyExists,
    WeakPassword,
    InvalidEmail,
    InvalidToken,
    SessionExpired,
    Unknown,
}

/// Lower-case fragments checked in order; the first hit wins.
const MESSAGE_RULES: &[(&str, AuthErrorCode)] = &[
    ("invalid login credentials", AuthErrorCode::InvalidCredentials),
    ("invalid email or password", AuthErrorCode::InvalidCredentials),
    ("email not confirmed", AuthErrorCode::EmailNotConfirmed),
    ("email link is invalid or has expired", AuthErrorCode::InvalidToken),
    ("rate limit", AuthErrorCode::RateLimited),
    ("too many requests", AuthErrorCode::RateLimited),
    ("for security purposes, you can only request", AuthErrorCode::RateLimited),
    ("already registered", AuthErrorCode::UserAlreadyExists),
    ("already been registered", AuthErrorCode::UserAlreadyExists),
    ("already exists", AuthErrorCode::UserAlreadyExists),
    ("password should be", AuthErrorCode::WeakPassword),
    ("weak password", AuthErrorCode::WeakPassword),
    ("invalid email", AuthErrorCode::InvalidEmail),
    ("unable to validate email", AuthErrorCode::InvalidEmail),
    ("refresh token", AuthErrorCode::SessionExpired),
    ("session not found", AuthErrorCode::SessionExpired),
    ("session expired", AuthErrorCode::SessionExpired),
    ("jwt expired", AuthErrorCode::InvalidToken),
    ("token is expired", AuthErrorCode::InvalidToken),
    ("invalid jwt", AuthErrorCode::InvalidToken),
    ("invalid token", AuthErrorCode::InvalidToken),
    ("bad_jwt", AuthErrorCode::InvalidToken),
];

impl AuthErrorCode {
    pub fn classify(message: &str) -> Self {
        let lowered = message.to_lowercase();
        MESSAGE_RULES
            .iter()
            .find(|(fragment, _)| lowered.contains(fragment))
            .map(|(_, code)| *code)
            .unwrap_or(AuthErrorCode::Unknown)
    }

    /// Like [`classify`](Self::classify), falling back to the HTTP status
    /// when the text is not recognised.
    pub fn classify_response(status: u16, message: &str) -> Self {
        match Self::classify(message) {
            AuthErrorCode::Unknown if status == 429 => AuthErrorCode::RateLimited,
            code => code,
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            AuthErrorCode::InvalidCredentials => "INVALID_CREDENTIALS",
            AuthErrorCode::EmailNotConfirmed => "EMAIL_NOT_CONFIRMED",
            AuthErrorCode::RateLimited => "RATE_LIMITED",
            AuthErrorCode::UserAlreadyExists => "USER_ALREADY_EXISTS",
            AuthErrorCode::WeakPassword => "WEAK_PASSWORD",
            AuthErrorCode::InvalidEmail => "INVALID_EMAIL",
            AuthErrorCode::InvalidToken => "INVALID_TOKEN",
            AuthErrorCode::SessionExpired => "SESSION_EXPIRED",
            AuthErrorCode::Unknown => "UNKNOWN",
        }
    }

    pub fn user_message(self) -> Option<&'static str> {
        let message = match self {
            AuthErrorCode::InvalidCredentials => "Invalid email or password",
            AuthErrorCode::EmailNotConfirmed => "Please confirm your email before logging in",
            AuthErrorCode::RateLimited => "Too many attempts, please try again later",
            AuthErrorCode::UserAlreadyExists => "An account with this email already exists",
            AuthErrorCode::WeakPassword => "Password is too weak",
            AuthErrorCode::InvalidEmail => "Email address is invalid",
            AuthErrorCode::InvalidToken => "Invalid or expired token",
            AuthErrorCode::SessionExpired => "Session expired, please sign in again",
            AuthErrorCode::Unknown => return None,
        };
        Some(message)
    }
}
