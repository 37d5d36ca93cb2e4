use axum::{
    extract::{Path, State},
    http::StatusCode,
    Json,
};
use axum_extra::extract::WithRejection;
use serde_json::{json, Value};
use uuid::Uuid;

use crate::{
    auth::AuthenticatedUser,
    error::{AppError, AppResult},
    services::users::{self, CreateUserInput, DeletedUser, UpdateRoleInput, UserSummary},
    state::AppState,
};

pub async fn list_users(
    State(state): State<AppState>,
    user: AuthenticatedUser,
) -> AppResult<Json<Vec<UserSummary>>> {
    Ok(Json(users::list_users(&state, &user).await?))
}

pub async fn create_user(
    State(state): State<AppState>,
    user: AuthenticatedUser,
    WithRejection(Json(payload), _): WithRejection<Json<CreateUserInput>, AppError>,
) -> AppResult<(StatusCode, Json<UserSummary>)> {
    let created = users::create_user(&state, &user, payload).await?;
    Ok((StatusCode::CREATED, Json(created)))
}

pub async fn update_role(
    State(state): State<AppState>,
    user: AuthenticatedUser,
    WithRejection(Path(user_id), _): WithRejection<Path<Uuid>, AppError>,
    WithRejection(Json(payload), _): WithRejection<Json<UpdateRoleInput>, AppError>,
) -> AppResult<Json<UserSummary>> {
    Ok(Json(
        users::update_role(&state, &user, user_id, payload.role).await?,
    ))
}

pub async fn delete_user(
    State(state): State<AppState>,
    user: AuthenticatedUser,
    WithRejection(Path(user_id), _): WithRejection<Path<Uuid>, AppError>,
) -> AppResult<Json<DeletedUser>> {
    Ok(Json(users::delete_user(&state, &user, user_id).await?))
}

pub async fn reconcile_orphan(
    State(state): State<AppState>,
    user: AuthenticatedUser,
    WithRejection(Path(identity_id), _): WithRejection<Path<Uuid>, AppError>,
) -> AppResult<Json<Value>> {
    let outcome = users::reconcile_orphan(&state, &user, identity_id).await?;
    Ok(Json(json!({ "id": identity_id, "outcome": outcome })))
}
