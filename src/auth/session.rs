use super::cookies::CookieCredentials;
use super::provider::{Identity, IdentityProvider, Session};
use crate::error::{AppError, ErrorKind};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UnauthenticatedReason {
    /// A bearer token was supplied and the provider rejected it.
    InvalidToken,
    /// Session cookies were supplied but no session could be established.
    NoSession,
    NoCredentials,
}

impl UnauthenticatedReason {
    pub fn code(self) -> &'static str {
        match self {
            UnauthenticatedReason::InvalidToken => "INVALID_TOKEN",
            UnauthenticatedReason::NoSession => "NO_SESSION",
            UnauthenticatedReason::NoCredentials => "NO_CREDENTIALS",
        }
    }

    fn message(self) -> &'static str {
        match self {
            UnauthenticatedReason::InvalidToken => "Invalid or expired token",
            UnauthenticatedReason::NoSession => "Session expired, please sign in again",
            UnauthenticatedReason::NoCredentials => "Authentication required",
        }
    }
}

impl From<UnauthenticatedReason> for AppError {
    fn from(reason: UnauthenticatedReason) -> Self {
        AppError::new(ErrorKind::Authentication, reason.message()).with_code(reason.code())
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum Resolution {
    Authenticated {
        identity: Identity,
        /// Set when establishing the session rotated the cookie tokens; the
        /// caller must send the new pair back to the client.
        rotated: Option<Session>,
    },
    Unauthenticated(UnauthenticatedReason),
}

/// Turns the credentials carried by a request into an identity.
///
/// A bearer token takes precedence over cookies. Failures are reported as a
/// reason rather than an error so every caller renders the same 401.
pub async fn resolve(
    provider: &dyn IdentityProvider,
    bearer: Option<&str>,
    cookies: Option<&CookieCredentials>,
) -> Resolution {
    if let Some(token) = bearer {
        return match provider.verify_token(token).await {
            Ok(identity) => Resolution::Authenticated {
                identity,
                rotated: None,
            },
            Err(err) => {
                tracing::debug!(error = %err, "bearer token rejected");
                Resolution::Unauthenticated(UnauthenticatedReason::InvalidToken)
            }
        };
    }

    let Some(credentials) = cookies else {
        return Resolution::Unauthenticated(UnauthenticatedReason::NoCredentials);
    };

    match provider
        .set_session(&credentials.access_token, &credentials.refresh_token)
        .await
    {
        Ok(auth) => {
            let rotated = (auth.session.access_token != credentials.access_token
                || auth.session.refresh_token != credentials.refresh_token)
                .then_some(auth.session);
            if rotated.is_some() {
                tracing::debug!(user_id = %auth.identity.id, "session tokens rotated");
            }
            Resolution::Authenticated {
                identity: auth.identity,
                rotated,
            }
        }
        Err(err) => {
            tracing::debug!(error = %err, "cookie session rejected");
            Resolution::Unauthenticated(UnauthenticatedReason::NoSession)
        }
    }
}
