use std::collections::HashMap;

use chrono::Utc;
use diesel::{dsl::count_star, prelude::*};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use uuid::Uuid;

use super::{files::storage_keys_for, load_project, project_context, to_iso};
use crate::{
    auth::{roles, AuthenticatedUser},
    error::{AppError, AppResult},
    models::{NewProject, Project, StoredFile},
    policy::{authorize, Action, PolicyContext},
    schema::{files, project_assignments, projects},
    state::AppState,
    utils::json::{nullable_field, Nullable},
};

const MAX_NAME_LEN: usize = 255;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ProjectLocation {
    pub latitude: f64,
    pub longitude: f64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub address: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
}

#[derive(Debug, Serialize)]
pub struct ProjectResponse {
    pub id: Uuid,
    pub name: String,
    pub description: Option<String>,
    pub location: Option<ProjectLocation>,
    pub created_by: Uuid,
    pub created_at: String,
    pub updated_at: String,
    pub file_count: i64,
}

#[derive(Debug, Deserialize)]
pub struct CreateProjectInput {
    pub name: String,
    #[serde(default)]
    pub description: Option<String>,
    #[serde(default)]
    pub location: Option<ProjectLocation>,
}

#[derive(Debug, Serialize)]
pub struct DeletedProject {
    pub id: Uuid,
    pub removed_objects: usize,
}

#[derive(AsChangeset)]
#[diesel(table_name = projects)]
struct ProjectChangeset {
    name: Option<String>,
    description: Option<Option<String>>,
    location: Option<Option<Value>>,
}

fn to_project_response(project: Project, file_count: i64) -> ProjectResponse {
    // Rows written by older clients may carry a location in another shape.
    let location = project
        .location
        .and_then(|value| serde_json::from_value(value).ok());

    ProjectResponse {
        id: project.id,
        name: project.name,
        description: project.description,
        location,
        created_by: project.created_by,
        created_at: to_iso(project.created_at),
        updated_at: to_iso(project.updated_at),
        file_count,
    }
}

fn file_counts(conn: &mut PgConnection, project_ids: &[Uuid]) -> QueryResult<HashMap<Uuid, i64>> {
    let rows: Vec<(Uuid, i64)> = files::table
        .filter(files::project_id.eq_any(project_ids))
        .group_by(files::project_id)
        .select((files::project_id, count_star()))
        .load(conn)?;
    Ok(rows.into_iter().collect())
}

fn with_file_counts(
    conn: &mut PgConnection,
    projects: Vec<Project>,
) -> AppResult<Vec<ProjectResponse>> {
    let ids: Vec<Uuid> = projects.iter().map(|project| project.id).collect();
    let counts = file_counts(conn, &ids)?;
    Ok(projects
        .into_iter()
        .map(|project| {
            let count = counts.get(&project.id).copied().unwrap_or(0);
            to_project_response(project, count)
        })
        .collect())
}

fn validate_name(name: &str) -> AppResult<String> {
    let trimmed = name.trim();
    if trimmed.is_empty() {
        return Err(AppError::bad_request("Project name is required"));
    }
    if trimmed.chars().count() > MAX_NAME_LEN {
        return Err(AppError::bad_request(format!(
            "Project name must be at most {MAX_NAME_LEN} characters"
        )));
    }
    Ok(trimmed.to_string())
}

fn normalize_description(description: Option<String>) -> Option<String> {
    description
        .map(|value| value.trim().to_string())
        .filter(|value| !value.is_empty())
}

/// Full catalog, newest first.
pub async fn list_projects(
    state: &AppState,
    user: &AuthenticatedUser,
) -> AppResult<Vec<ProjectResponse>> {
    authorize(user.role, Action::ListProjects, &PolicyContext::new(user.user_id)).into_result()?;

    let mut conn = state.db()?;
    let rows: Vec<Project> = projects::table
        .order(projects::created_at.desc())
        .load(&mut conn)?;
    with_file_counts(&mut conn, rows)
}

/// Projects the caller holds an assignment on.
pub async fn list_assigned_projects(
    state: &AppState,
    user: &AuthenticatedUser,
) -> AppResult<Vec<ProjectResponse>> {
    authorize(
        user.role,
        Action::ListAssignedProjects,
        &PolicyContext::new(user.user_id),
    )
    .into_result()?;

    let mut conn = state.db()?;
    let rows: Vec<Project> = projects::table
        .inner_join(project_assignments::table)
        .filter(project_assignments::assigned_user_id.eq(user.user_id))
        .order(projects::created_at.desc())
        .select(projects::all_columns)
        .load(&mut conn)?;
    with_file_counts(&mut conn, rows)
}

pub async fn get_project(
    state: &AppState,
    user: &AuthenticatedUser,
    project_id: Uuid,
) -> AppResult<ProjectResponse> {
    let mut conn = state.db()?;
    let project = load_project(&mut conn, project_id)?;
    let ctx = project_context(&mut conn, user, project_id)?;
    authorize(user.role, Action::ReadProject, &ctx).into_result()?;

    let count = file_counts(&mut conn, &[project_id])?
        .get(&project_id)
        .copied()
        .unwrap_or(0);
    Ok(to_project_response(project, count))
}

pub async fn create_project(
    state: &AppState,
    user: &AuthenticatedUser,
    input: CreateProjectInput,
) -> AppResult<ProjectResponse> {
    authorize(user.role, Action::CreateProject, &PolicyContext::new(user.user_id))
        .into_result()?;

    let name = validate_name(&input.name)?;
    let location = input.location.map(serde_json::to_value).transpose()?;

    let mut conn = state.db()?;
    if roles::find_profile(&mut conn, user.user_id)?.is_none() {
        return Err(AppError::forbidden("No profile exists for this account")
            .with_code("PROFILE_MISSING"));
    }

    let new_project = NewProject {
        id: Uuid::new_v4(),
        name,
        description: normalize_description(input.description),
        location,
        created_by: user.user_id,
    };
    let project: Project = diesel::insert_into(projects::table)
        .values(&new_project)
        .get_result(&mut conn)?;

    tracing::info!(project_id = %project.id, created_by = %user.user_id, "project created");
    Ok(to_project_response(project, 0))
}

/// Partial update. `description` and `location` may be cleared with `null`;
/// `name` may not.
pub async fn update_project(
    state: &AppState,
    user: &AuthenticatedUser,
    project_id: Uuid,
    body: &Value,
) -> AppResult<ProjectResponse> {
    let mut conn = state.db()?;
    let existing = load_project(&mut conn, project_id)?;
    let ctx = project_context(&mut conn, user, project_id)?;
    authorize(user.role, Action::UpdateProject, &ctx).into_result()?;

    if !body.is_object() {
        return Err(AppError::bad_request("Request body must be a JSON object"));
    }

    let name = match nullable_field::<String>(body, "name").map_err(AppError::bad_request)? {
        Nullable::Omitted => None,
        Nullable::Null => return Err(AppError::bad_request("Project name cannot be null")),
        Nullable::Value(name) => Some(validate_name(&name)?),
    };
    let description = match nullable_field::<String>(body, "description")
        .map_err(AppError::bad_request)?
    {
        Nullable::Value(value) => match normalize_description(Some(value)) {
            Some(value) => Nullable::Value(value),
            None => Nullable::Null,
        },
        other => other,
    };
    let location = match nullable_field::<ProjectLocation>(body, "location")
        .map_err(AppError::bad_request)?
    {
        Nullable::Value(location) => Nullable::Value(serde_json::to_value(location)?),
        Nullable::Null => Nullable::Null,
        Nullable::Omitted => Nullable::Omitted,
    };

    let changes = ProjectChangeset {
        name,
        description: description.into_change(),
        location: location.into_change(),
    };

    let project = if changes.name.is_none()
        && changes.description.is_none()
        && changes.location.is_none()
    {
        existing
    } else {
        diesel::update(projects::table.find(project_id))
            .set((&changes, projects::updated_at.eq(Utc::now().naive_utc())))
            .get_result::<Project>(&mut conn)?
    };

    let count = file_counts(&mut conn, &[project_id])?
        .get(&project_id)
        .copied()
        .unwrap_or(0);
    Ok(to_project_response(project, count))
}

/// Removes the project, its assignments and file rows. Stored objects are
/// removed in one batch first; a storage failure is logged and does not keep
/// the rows alive.
pub async fn delete_project(
    state: &AppState,
    user: &AuthenticatedUser,
    project_id: Uuid,
) -> AppResult<DeletedProject> {
    let mut conn = state.db()?;
    load_project(&mut conn, project_id)?;
    let ctx = project_context(&mut conn, user, project_id)?;
    authorize(user.role, Action::DeleteProject, &ctx).into_result()?;

    let stored: Vec<StoredFile> = files::table
        .filter(files::project_id.eq(project_id))
        .load(&mut conn)?;
    drop(conn);

    let keys = storage_keys_for(state, &stored);
    let mut removed_objects = 0;
    if !keys.is_empty() {
        match state.storage.delete_objects(&keys).await {
            Ok(()) => removed_objects = keys.len(),
            Err(err) => {
                tracing::warn!(
                    %project_id,
                    object_count = keys.len(),
                    error = %err,
                    "failed to remove project objects from storage; deleting rows anyway"
                );
            }
        }
    }

    let mut conn = state.db()?;
    diesel::delete(projects::table.find(project_id)).execute(&mut conn)?;

    tracing::info!(%project_id, deleted_by = %user.user_id, removed_objects, "project deleted");
    Ok(DeletedProject {
        id: project_id,
        removed_objects,
    })
}
