pub mod cookies;
pub mod error_codes;
pub mod jwt;
pub mod provider;
pub mod roles;
pub mod session;
pub mod supabase;

use axum::{
    async_trait,
    extract::{FromRequestParts, Request, State},
    http::request::Parts,
    middleware::Next,
    response::{IntoResponse, Response},
};
use axum_extra::headers::{authorization::Bearer, Authorization, Cookie};
use axum_extra::TypedHeader;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::{
    envelope::MobileError,
    error::{AppError, AppResult},
    policy::Role,
    state::AppState,
};
use cookies::CookieSettings;
use provider::Session;
use session::{Resolution, UnauthenticatedReason};

/// Identity and role of the caller, attached to protected requests by
/// [`require_session`] or [`require_bearer`].
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AuthenticatedUser {
    pub user_id: Uuid,
    pub email: String,
    pub role: Role,
}

#[async_trait]
impl FromRequestParts<AppState> for AuthenticatedUser {
    type Rejection = AppError;

    async fn from_request_parts(
        parts: &mut Parts,
        _state: &AppState,
    ) -> Result<Self, Self::Rejection> {
        parts
            .extensions
            .get::<AuthenticatedUser>()
            .cloned()
            .ok_or_else(AppError::unauthorized)
    }
}

/// Runs the role lookup for a resolved request.
async fn establish(
    state: &AppState,
    resolution: Resolution,
) -> AppResult<(AuthenticatedUser, Option<Session>)> {
    let (identity, rotated) = match resolution {
        Resolution::Authenticated { identity, rotated } => (identity, rotated),
        Resolution::Unauthenticated(reason) => return Err(reason.into()),
    };

    let mut conn = state.db()?;
    let (profile, role) = roles::role_of(&mut conn, identity.id)?;

    Ok((
        AuthenticatedUser {
            user_id: profile.id,
            email: identity.email.unwrap_or(profile.email),
            role,
        },
        rotated,
    ))
}

/// Browser-facing guard: accepts a bearer token or the session cookie pair
/// and writes rotated cookies back onto the response.
pub async fn require_session(
    State(state): State<AppState>,
    bearer: Option<TypedHeader<Authorization<Bearer>>>,
    jar: Option<TypedHeader<Cookie>>,
    mut request: Request,
    next: Next,
) -> Response {
    let credentials = jar
        .as_ref()
        .and_then(|TypedHeader(cookie)| cookies::read_credentials(cookie));
    let token = bearer
        .as_ref()
        .map(|TypedHeader(Authorization(bearer))| bearer.token());

    let resolution = session::resolve(state.identity.as_ref(), token, credentials.as_ref()).await;
    let stale_cookies = resolution == Resolution::Unauthenticated(UnauthenticatedReason::NoSession);
    let settings = CookieSettings::from_config(&state.config);

    let (user, rotated) = match establish(&state, resolution).await {
        Ok(established) => established,
        Err(err) => {
            let mut response = err.into_response();
            if stale_cookies {
                if let Err(err) = cookies::append_cleared_cookies(response.headers_mut(), &settings) {
                    tracing::warn!(error = %err, "failed to clear stale session cookies");
                }
            }
            return response;
        }
    };

    tracing::debug!(user_id = %user.user_id, role = %user.role, "request authenticated");
    request.extensions_mut().insert(user);
    let mut response = next.run(request).await;

    if let Some(session) = rotated {
        if let Err(err) = cookies::append_session_cookies(response.headers_mut(), &settings, &session)
        {
            tracing::warn!(error = %err, "failed to write rotated session cookies");
        }
    }

    response
}

/// Mobile guard: bearer tokens only, failures rendered as envelopes.
pub async fn require_bearer(
    State(state): State<AppState>,
    bearer: Option<TypedHeader<Authorization<Bearer>>>,
    mut request: Request,
    next: Next,
) -> Response {
    let token = bearer
        .as_ref()
        .map(|TypedHeader(Authorization(bearer))| bearer.token());
    let resolution = session::resolve(state.identity.as_ref(), token, None).await;

    match establish(&state, resolution).await {
        Ok((user, _)) => {
            request.extensions_mut().insert(user);
            next.run(request).await
        }
        Err(err) => MobileError(err).into_response(),
    }
}
