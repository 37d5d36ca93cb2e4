use axum::{
    extract::{Path, State},
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use axum_extra::extract::WithRejection;
use serde_json::{json, Value};
use uuid::Uuid;

use crate::{
    auth::AuthenticatedUser,
    error::{AppError, AppResult},
    services::{
        assignments::{self, AssignUserInput, ProjectMember},
        files::{self, FileResponse, SignedUrlResponse},
        projects::{self, CreateProjectInput, DeletedProject, ProjectResponse},
    },
    state::AppState,
};

pub async fn list_projects(
    State(state): State<AppState>,
    user: AuthenticatedUser,
) -> AppResult<Json<Vec<ProjectResponse>>> {
    Ok(Json(projects::list_projects(&state, &user).await?))
}

pub async fn list_assigned_projects(
    State(state): State<AppState>,
    user: AuthenticatedUser,
) -> AppResult<Json<Vec<ProjectResponse>>> {
    Ok(Json(projects::list_assigned_projects(&state, &user).await?))
}

pub async fn get_project(
    State(state): State<AppState>,
    user: AuthenticatedUser,
    WithRejection(Path(project_id), _): WithRejection<Path<Uuid>, AppError>,
) -> AppResult<Json<ProjectResponse>> {
    Ok(Json(projects::get_project(&state, &user, project_id).await?))
}

pub async fn create_project(
    State(state): State<AppState>,
    user: AuthenticatedUser,
    WithRejection(Json(payload), _): WithRejection<Json<CreateProjectInput>, AppError>,
) -> AppResult<(StatusCode, Json<ProjectResponse>)> {
    let project = projects::create_project(&state, &user, payload).await?;
    Ok((StatusCode::CREATED, Json(project)))
}

pub async fn update_project(
    State(state): State<AppState>,
    user: AuthenticatedUser,
    WithRejection(Path(project_id), _): WithRejection<Path<Uuid>, AppError>,
    WithRejection(Json(body), _): WithRejection<Json<Value>, AppError>,
) -> AppResult<Json<ProjectResponse>> {
    Ok(Json(
        projects::update_project(&state, &user, project_id, &body).await?,
    ))
}

pub async fn delete_project(
    State(state): State<AppState>,
    user: AuthenticatedUser,
    WithRejection(Path(project_id), _): WithRejection<Path<Uuid>, AppError>,
) -> AppResult<Json<DeletedProject>> {
    Ok(Json(
        projects::delete_project(&state, &user, project_id).await?,
    ))
}

pub async fn list_project_users(
    State(state): State<AppState>,
    user: AuthenticatedUser,
    WithRejection(Path(project_id), _): WithRejection<Path<Uuid>, AppError>,
) -> AppResult<Json<Vec<ProjectMember>>> {
    Ok(Json(
        assignments::list_project_users(&state, &user, project_id).await?,
    ))
}

/// A repeated grant answers `{success: false, message, code}` rather than the
/// usual error body.
pub async fn assign_user(
    State(state): State<AppState>,
    user: AuthenticatedUser,
    WithRejection(Path(project_id), _): WithRejection<Path<Uuid>, AppError>,
    WithRejection(Json(payload), _): WithRejection<Json<AssignUserInput>, AppError>,
) -> AppResult<Response> {
    match assignments::assign_user(&state, &user, project_id, payload).await {
        Ok(assignment) => Ok((StatusCode::CREATED, Json(assignment)).into_response()),
        Err(err) if err.code() == "ALREADY_ASSIGNED" => Ok((
            err.status(),
            Json(json!({
                "success": false,
                "message": err.message(),
                "code": err.code(),
            })),
        )
            .into_response()),
        Err(err) => Err(err),
    }
}

pub async fn remove_assignment(
    State(state): State<AppState>,
    user: AuthenticatedUser,
    WithRejection(Path((project_id, user_id)), _): WithRejection<Path<(Uuid, Uuid)>, AppError>,
) -> AppResult<StatusCode> {
    assignments::remove_assignment(&state, &user, project_id, user_id).await?;
    Ok(StatusCode::NO_CONTENT)
}

pub async fn list_files(
    State(state): State<AppState>,
    user: AuthenticatedUser,
    WithRejection(Path(project_id), _): WithRejection<Path<Uuid>, AppError>,
) -> AppResult<Json<Vec<FileResponse>>> {
    Ok(Json(files::list_files(&state, &user, project_id).await?))
}

pub async fn download_file(
    State(state): State<AppState>,
    user: AuthenticatedUser,
    WithRejection(Path((project_id, file_id)), _): WithRejection<Path<(Uuid, Uuid)>, AppError>,
) -> AppResult<Json<SignedUrlResponse>> {
    Ok(Json(
        files::signed_url(&state, &user, project_id, file_id).await?,
    ))
}
