use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use thiserror::Error;
use uuid::Uuid;

use super::error_codes::AuthErrorCode;
use crate::error::{AppError, ErrorKind};

/// Principal managed by the identity provider.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Identity {
    pub id: Uuid,
    #[serde(default)]
    pub email: Option<String>,
    #[serde(default)]
    pub email_confirmed_at: Option<DateTime<Utc>>,
    #[serde(default)]
    pub created_at: Option<DateTime<Utc>>,
    #[serde(default)]
    pub last_sign_in_at: Option<DateTime<Utc>>,
    /// Linked sign-in methods. The provider returns an empty list when a
    /// sign-up hits an address that is already registered.
    #[serde(default, skip_serializing)]
    pub identities: Option<Vec<serde_json::Value>>,
}

impl Identity {
    pub fn is_confirmed(&self) -> bool {
        self.email_confirmed_at.is_some()
    }

    pub fn email_or_empty(&self) -> String {
        self.email.clone().unwrap_or_default()
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Session {
    pub access_token: String,
    pub refresh_token: String,
    /// Unix seconds.
    pub expires_at: i64,
    pub user_id: Uuid,
}

#[derive(Debug, Clone, PartialEq)]
pub struct AuthSession {
    pub identity: Identity,
    pub session: Session,
}

#[derive(Debug, Clone, Serialize)]
pub struct NewIdentity {
    pub email: String,
    pub password: String,
    pub email_confirm: bool,
}

#[derive(Debug, Clone, Default, Serialize)]
pub struct IdentityUpdate {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub email: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub password: Option<String>,
}

#[derive(Debug, Error)]
pub enum ProviderError {
    #[error("{message}")]
    Rejected { status: u16, message: String },
    #[error("identity provider unreachable: {0}")]
    Transport(String),
    #[error("unexpected identity provider response: {0}")]
    Decode(String),
}

impl ProviderError {
    pub fn rejected(status: u16, message: impl Into<String>) -> Self {
        ProviderError::Rejected {
            status,
            message: message.into(),
        }
    }

    pub fn code(&self) -> AuthErrorCode {
        match self {
            ProviderError::Rejected { status, message } => {
                AuthErrorCode::classify_response(*status, message)
            }
            _ => AuthErrorCode::Unknown,
        }
    }

    /// The provider refused the credential itself (as opposed to failing).
    pub fn is_credential_rejection(&self) -> bool {
        matches!(self, ProviderError::Rejected { status, .. } if (400..500).contains(status))
    }
}

impl From<ProviderError> for AppError {
    fn from(err: ProviderError) -> Self {
        let code = err.code();
        let kind = match code {
            AuthErrorCode::InvalidCredentials
            | AuthErrorCode::InvalidToken
            | AuthErrorCode::SessionExpired => ErrorKind::Authentication,
            AuthErrorCode::UserAlreadyExists => ErrorKind::Conflict,
            AuthErrorCode::EmailNotConfirmed
            | AuthErrorCode::RateLimited
            | AuthErrorCode::WeakPassword
            | AuthErrorCode::InvalidEmail => ErrorKind::Validation,
            AuthErrorCode::Unknown if err.is_credential_rejection() => ErrorKind::Validation,
            AuthErrorCode::Unknown => ErrorKind::Upstream,
        };
        let message = code
            .user_message()
            .map(str::to_string)
            .unwrap_or_else(|| err.to_string());
        AppError::new(kind, message).with_code(code.as_str())
    }
}

pub type ProviderResult<T> = Result<T, ProviderError>;

/// Client for the external identity provider.
///
/// Admin methods require the service-role credential and must never be
/// reachable with a client-supplied key.
#[async_trait]
pub trait IdentityProvider: Send + Sync + 'static {
    async fn sign_up(
        &self,
        email: &str,
        password: &str,
        redirect_to: Option<&str>,
    ) -> ProviderResult<Identity>;

    async fn sign_in_with_password(&self, email: &str, password: &str)
        -> ProviderResult<AuthSession>;

    /// Validates an access token with a privileged call and returns its owner.
    async fn verify_token(&self, access_token: &str) -> ProviderResult<Identity>;

    /// Establishes a session from a token pair, refreshing when the access
    /// token is expired or rejected.
    async fn set_session(&self, access_token: &str, refresh_token: &str)
        -> ProviderResult<AuthSession>;

    async fn refresh_session(&self, refresh_token: &str) -> ProviderResult<AuthSession>;

    async fn sign_out(&self, access_token: &str) -> ProviderResult<()>;

    /// Exchanges an emailed token hash (`type` is e.g. `signup` or `email`)
    /// for a session.
    async fn verify_email(&self, token_hash: &str, kind: &str) -> ProviderResult<AuthSession>;

    async fn resend_confirmation(&self, email: &str, redirect_to: Option<&str>)
        -> ProviderResult<()>;

    async fn create_user(&self, user: NewIdentity) -> ProviderResult<Identity>;

    async fn delete_user(&self, user_id: Uuid) -> ProviderResult<()>;

    async fn update_user_by_id(&self, user_id: Uuid, update: IdentityUpdate)
        -> ProviderResult<Identity>;

    async fn list_users(&self, page: u32, per_page: u32) -> ProviderResult<Vec<Identity>>;

    async fn get_user_by_id(&self, user_id: Uuid) -> ProviderResult<Identity>;
}
