use axum::{extract::State, Json};
use axum_extra::headers::{authorization::Bearer, Authorization};
use axum_extra::{extract::WithRejection, TypedHeader};
use serde::{Deserialize, Serialize};

use crate::{
    auth::AuthenticatedUser,
    envelope::{Envelope, MobileError, MobileResult},
    services::accounts::{self, Credentials, ProfileResponse, RegisteredAccount, SignedIn},
    state::AppState,
};

#[derive(Deserialize)]
pub struct RefreshRequest {
    pub refresh_token: String,
}

#[derive(Serialize)]
pub struct SignedOut {
    pub signed_out: bool,
}

pub async fn register(
    State(state): State<AppState>,
    WithRejection(Json(payload), _): WithRejection<Json<Credentials>, MobileError>,
) -> MobileResult<RegisteredAccount> {
    Ok(Envelope::created(accounts::register(&state, payload).await?))
}

pub async fn login(
    State(state): State<AppState>,
    WithRejection(Json(payload), _): WithRejection<Json<Credentials>, MobileError>,
) -> MobileResult<SignedIn> {
    Ok(Envelope::ok(accounts::login(&state, payload).await?))
}

pub async fn refresh(
    State(state): State<AppState>,
    WithRejection(Json(payload), _): WithRejection<Json<RefreshRequest>, MobileError>,
) -> MobileResult<SignedIn> {
    Ok(Envelope::ok(
        accounts::refresh(&state, &payload.refresh_token).await?,
    ))
}

pub async fn logout(
    State(state): State<AppState>,
    WithRejection(TypedHeader(Authorization(bearer)), _): WithRejection<
        TypedHeader<Authorization<Bearer>>,
        MobileError,
    >,
) -> MobileResult<SignedOut> {
    accounts::sign_out(&state, Some(bearer.token())).await;
    Ok(Envelope::ok(SignedOut { signed_out: true }))
}

pub async fn me(
    State(state): State<AppState>,
    user: AuthenticatedUser,
) -> MobileResult<ProfileResponse> {
    Ok(Envelope::ok(accounts::current_user(&state, &user).await?))
}
