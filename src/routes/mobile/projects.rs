use axum::{
    extract::{Path, State},
    Json,
};
use axum_extra::extract::WithRejection;
use serde::Serialize;
use serde_json::Value;
use uuid::Uuid;

use crate::{
    auth::AuthenticatedUser,
    envelope::{Envelope, MobileError, MobileResult},
    services::{
        assignments::{self, AssignUserInput, AssignmentResponse, ProjectMember},
        projects::{self, CreateProjectInput, DeletedProject, ProjectResponse},
    },
    state::AppState,
};

#[derive(Serialize)]
pub struct Removed {
    pub project_id: Uuid,
    pub user_id: Uuid,
}

pub async fn list_projects(
    State(state): State<AppState>,
    user: AuthenticatedUser,
) -> MobileResult<Vec<ProjectResponse>> {
    Ok(Envelope::ok(projects::list_projects(&state, &user).await?))
}

pub async fn list_assigned_projects(
    State(state): State<AppState>,
    user: AuthenticatedUser,
) -> MobileResult<Vec<ProjectResponse>> {
    Ok(Envelope::ok(
        projects::list_assigned_projects(&state, &user).await?,
    ))
}

pub async fn get_project(
    State(state): State<AppState>,
    user: AuthenticatedUser,
    WithRejection(Path(project_id), _): WithRejection<Path<Uuid>, MobileError>,
) -> MobileResult<ProjectResponse> {
    Ok(Envelope::ok(
        projects::get_project(&state, &user, project_id).await?,
    ))
}

pub async fn create_project(
    State(state): State<AppState>,
    user: AuthenticatedUser,
    WithRejection(Json(payload), _): WithRejection<Json<CreateProjectInput>, MobileError>,
) -> MobileResult<ProjectResponse> {
    Ok(Envelope::created(
        projects::create_project(&state, &user, payload).await?,
    ))
}

pub async fn update_project(
    State(state): State<AppState>,
    user: AuthenticatedUser,
    WithRejection(Path(project_id), _): WithRejection<Path<Uuid>, MobileError>,
    WithRejection(Json(body), _): WithRejection<Json<Value>, MobileError>,
) -> MobileResult<ProjectResponse> {
    Ok(Envelope::ok(
        projects::update_project(&state, &user, project_id, &body).await?,
    ))
}

pub async fn delete_project(
    State(state): State<AppState>,
    user: AuthenticatedUser,
    WithRejection(Path(project_id), _): WithRejection<Path<Uuid>, MobileError>,
) -> MobileResult<DeletedProject> {
    Ok(Envelope::ok(
        projects::delete_project(&state, &user, project_id).await?,
    ))
}

pub async fn list_project_users(
    State(state): State<AppState>,
    user: AuthenticatedUser,
    WithRejection(Path(project_id), _): WithRejection<Path<Uuid>, MobileError>,
) -> MobileResult<Vec<ProjectMember>> {
    Ok(Envelope::ok(
        assignments::list_project_users(&state, &user, project_id).await?,
    ))
}

pub async fn assign_user(
    State(state): State<AppState>,
    user: AuthenticatedUser,
    WithRejection(Path(project_id), _): WithRejection<Path<Uuid>, MobileError>,
    WithRejection(Json(payload), _): WithRejection<Json<AssignUserInput>, MobileError>,
) -> MobileResult<AssignmentResponse> {
    Ok(Envelope::created(
        assignments::assign_user(&state, &user, project_id, payload).await?,
    ))
}

pub async fn remove_assignment(
    State(state): State<AppState>,
    user: AuthenticatedUser,
    WithRejection(Path((project_id, user_id)), _): WithRejection<Path<(Uuid, Uuid)>, MobileError>,
) -> MobileResult<Removed> {
    assignments::remove_assignment(&state, &user, project_id, user_id).await?;
    Ok(Envelope::ok(Removed {
        project_id,
        user_id,
    }))
}
