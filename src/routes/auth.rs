use axum::{
    extract::{Query, State},
    http::{HeaderMap, StatusCode},
    response::{IntoResponse, Redirect, Response},
    Json,
};
use axum_extra::{extract::WithRejection, headers::Cookie, typed_header::TypedHeader};
use serde::Deserialize;
use serde_json::{json, Value};

use crate::{
    auth::{
        cookies::{self, CookieSettings, ACCESS_COOKIE_NAME},
        provider::Session,
        AuthenticatedUser,
    },
    error::{AppError, AppResult},
    services::accounts::{self, Credentials, ProfileResponse, RegisteredAccount, SignedIn},
    state::AppState,
};

#[derive(Deserialize)]
pub struct SessionTokens {
    pub access_token: String,
    pub refresh_token: String,
}

#[derive(Deserialize)]
pub struct ConfirmQuery {
    pub token_hash: String,
    #[serde(rename = "type", default = "default_confirm_type")]
    pub kind: String,
    pub next: Option<String>,
}

fn default_confirm_type() -> String {
    "email".to_string()
}

#[derive(Deserialize)]
pub struct ResendRequest {
    pub email: String,
}

#[derive(Deserialize)]
pub struct PasswordRequest {
    pub password: String,
}

fn session_headers(state: &AppState, session: &Session) -> AppResult<HeaderMap> {
    let mut headers = HeaderMap::new();
    cookies::append_session_cookies(
        &mut headers,
        &CookieSettings::from_config(&state.config),
        session,
    )?;
    Ok(headers)
}

pub async fn register(
    State(state): State<AppState>,
    WithRejection(Json(payload), _): WithRejection<Json<Credentials>, AppError>,
) -> AppResult<(StatusCode, Json<RegisteredAccount>)> {
    let account = accounts::register(&state, payload).await?;
    Ok((StatusCode::CREATED, Json(account)))
}

pub async fn login(
    State(state): State<AppState>,
    WithRejection(Json(payload), _): WithRejection<Json<Credentials>, AppError>,
) -> AppResult<(HeaderMap, Json<SignedIn>)> {
    let signed_in = accounts::login(&state, payload).await?;
    let headers = session_headers(&state, &signed_in.session)?;
    Ok((headers, Json(signed_in)))
}

/// Stores a client-held token pair in the cookie jar.
pub async fn establish_session(
    State(state): State<AppState>,
    WithRejection(Json(payload), _): WithRejection<Json<SessionTokens>, AppError>,
) -> AppResult<(HeaderMap, Json<SignedIn>)> {
    let signed_in =
        accounts::establish_session(&state, &payload.access_token, &payload.refresh_token).await?;
    let headers = session_headers(&state, &signed_in.session)?;
    Ok((headers, Json(signed_in)))
}

pub async fn clear_session(
    State(state): State<AppState>,
    jar: Option<TypedHeader<Cookie>>,
) -> AppResult<(HeaderMap, StatusCode)> {
    let access = jar
        .as_ref()
        .and_then(|TypedHeader(cookie)| cookie.get(ACCESS_COOKIE_NAME));
    accounts::sign_out(&state, access).await;

    let mut headers = HeaderMap::new();
    cookies::append_cleared_cookies(&mut headers, &CookieSettings::from_config(&state.config))?;
    Ok((headers, StatusCode::NO_CONTENT))
}

pub async fn me(
    State(state): State<AppState>,
    user: AuthenticatedUser,
) -> AppResult<Json<ProfileResponse>> {
    Ok(Json(accounts::current_user(&state, &user).await?))
}

/// Landing point of confirmation links: verifies the token hash, sets the
/// session cookies and sends the browser on to the site.
pub async fn confirm(
    State(state): State<AppState>,
    WithRejection(Query(query), _): WithRejection<Query<ConfirmQuery>, AppError>,
) -> Response {
    let site = state.config.site_url.clone();
    let next = query
        .next
        .as_deref()
        .filter(|path| path.starts_with('/') && !path.starts_with("//"))
        .unwrap_or("/");

    let outcome = match accounts::confirm_email(&state, &query.token_hash, &query.kind).await {
        Ok(signed_in) => session_headers(&state, &signed_in.session),
        Err(err) => Err(err),
    };

    match outcome {
        Ok(headers) => (headers, Redirect::to(&format!("{site}{next}"))).into_response(),
        Err(err) => {
            tracing::warn!(code = err.code(), error = %err, "email confirmation failed");
            Redirect::to(&format!("{site}/auth/login?error={}", err.code())).into_response()
        }
    }
}

pub async fn resend_confirmation(
    State(state): State<AppState>,
    WithRejection(Json(payload), _): WithRejection<Json<ResendRequest>, AppError>,
) -> AppResult<(StatusCode, Json<Value>)> {
    accounts::resend_confirmation(&state, &payload.email).await?;
    Ok((
        StatusCode::ACCEPTED,
        Json(json!({ "message": "Confirmation email sent" })),
    ))
}

pub async fn change_password(
    State(state): State<AppState>,
    user: AuthenticatedUser,
    WithRejection(Json(payload), _): WithRejection<Json<PasswordRequest>, AppError>,
) -> AppResult<StatusCode> {
    accounts::change_password(&state, &user, &payload.password).await?;
    Ok(StatusCode::NO_CONTENT)
}
