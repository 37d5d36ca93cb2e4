use diesel::prelude::*;
use diesel::result::{DatabaseErrorKind, Error as DieselError};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use super::{load_project, project_context, to_iso};
use crate::{
    auth::{roles, AuthenticatedUser},
    error::{AppError, AppResult},
    models::{NewProjectAssignment, Profile, ProjectAssignment},
    policy::{authorize, Action},
    schema::{profiles, project_assignments},
    state::AppState,
};

pub const DEFAULT_ASSIGNMENT_ROLE: &str = "member";
const MAX_ROLE_LEN: usize = 32;

#[derive(Debug, Serialize)]
pub struct ProjectMember {
    pub assignment_id: Uuid,
    pub user_id: Uuid,
    pub email: String,
    /// Account role of the member.
    pub role: String,
    /// Free-form label stored on the assignment. It grants nothing.
    pub assignment_role: String,
    pub assigned_by: Option<Uuid>,
    pub assigned_at: String,
}

#[derive(Debug, Deserialize)]
pub struct AssignUserInput {
    pub user_id: Uuid,
    #[serde(default)]
    pub role: Option<String>,
}

#[derive(Debug, Serialize)]
pub struct AssignmentResponse {
    pub id: Uuid,
    pub project_id: Uuid,
    pub assigned_user_id: Uuid,
    pub assigned_by: Option<Uuid>,
    pub assigned_at: String,
    pub role: String,
}

impl From<ProjectAssignment> for AssignmentResponse {
    fn from(row: ProjectAssignment) -> Self {
        Self {
            id: row.id,
            project_id: row.project_id,
            assigned_user_id: row.assigned_user_id,
            assigned_by: row.assigned_by,
            assigned_at: to_iso(row.assigned_at),
            role: row.role,
        }
    }
}

pub fn already_assigned() -> AppError {
    AppError::conflict("ALREADY_ASSIGNED", "User is already assigned to this project")
}

fn assignment_label(role: Option<String>) -> AppResult<String> {
    let Some(role) = role else {
        return Ok(DEFAULT_ASSIGNMENT_ROLE.to_string());
    };
    let trimmed = role.trim();
    if trimmed.is_empty() {
        return Ok(DEFAULT_ASSIGNMENT_ROLE.to_string());
    }
    if trimmed.chars().count() > MAX_ROLE_LEN {
        return Err(AppError::bad_request(format!(
            "Assignment role must be at most {MAX_ROLE_LEN} characters"
        )));
    }
    Ok(trimmed.to_string())
}

pub async fn list_project_users(
    state: &AppState,
    user: &AuthenticatedUser,
    project_id: Uuid,
) -> AppResult<Vec<ProjectMember>> {
    let mut conn = state.db()?;
    load_project(&mut conn, project_id)?;
    let ctx = project_context(&mut conn, user, project_id)?;
    authorize(user.role, Action::ListAssignments, &ctx).into_result()?;

    let rows: Vec<(ProjectAssignment, Profile)> = project_assignments::table
        .inner_join(profiles::table)
        .filter(project_assignments::project_id.eq(project_id))
        .order(project_assignments::assigned_at.asc())
        .select((project_assignments::all_columns, profiles::all_columns))
        .load(&mut conn)?;

    Ok(rows
        .into_iter()
        .map(|(assignment, profile)| ProjectMember {
            assignment_id: assignment.id,
            user_id: profile.id,
            email: profile.email,
            role: profile.role,
            assignment_role: assignment.role,
            assigned_by: assignment.assigned_by,
            assigned_at: to_iso(assignment.assigned_at),
        })
        .collect())
}

/// Grants `input.user_id` access to the project. A second grant for the same
/// pair fails with `ALREADY_ASSIGNED` and writes nothing.
pub async fn assign_user(
    state: &AppState,
    user: &AuthenticatedUser,
    project_id: Uuid,
    input: AssignUserInput,
) -> AppResult<AssignmentResponse> {
    let mut conn = state.db()?;
    load_project(&mut conn, project_id)?;
    let ctx = project_context(&mut conn, user, project_id)?;
    authorize(user.role, Action::AssignUser, &ctx).into_result()?;

    let label = assignment_label(input.role)?;
    if roles::find_profile(&mut conn, input.user_id)?.is_none() {
        return Err(AppError::not_found().with_message("User not found"));
    }

    if super::is_assigned(&mut conn, project_id, input.user_id)? {
        return Err(already_assigned());
    }

    let new_assignment = NewProjectAssignment {
        id: Uuid::new_v4(),
        project_id,
        assigned_user_id: input.user_id,
        assigned_by: Some(user.user_id),
        role: label,
    };

    // The unique (project, user) constraint settles concurrent grants.
    let row: ProjectAssignment = match diesel::insert_into(project_assignments::table)
        .values(&new_assignment)
        .get_result(&mut conn)
    {
        Ok(row) => row,
        Err(DieselError::DatabaseError(DatabaseErrorKind::UniqueViolation, _)) => {
            return Err(already_assigned());
        }
        Err(err) => return Err(err.into()),
    };

    tracing::info!(
        %project_id,
        assigned_user_id = %input.user_id,
        assigned_by = %user.user_id,
        "user assigned to project"
    );
    Ok(row.into())
}

pub async fn remove_assignment(
    state: &AppState,
    user: &AuthenticatedUser,
    project_id: Uuid,
    target_user_id: Uuid,
) -> AppResult<()> {
    let mut conn = state.db()?;
    load_project(&mut conn, project_id)?;
    let ctx = project_context(&mut conn, user, project_id)?.target_user(target_user_id);
    authorize(user.role, Action::RemoveAssignment, &ctx).into_result()?;

    let removed = diesel::delete(
        project_assignments::table
            .filter(project_assignments::project_id.eq(project_id))
            .filter(project_assignments::assigned_user_id.eq(target_user_id)),
    )
    .execute(&mut conn)?;

    if removed == 0 {
        return Err(AppError::not_found().with_message("Assignment not found"));
    }

    tracing::info!(
        %project_id,
        assigned_user_id = %target_user_id,
        removed_by = %user.user_id,
        "assignment removed"
    );
    Ok(())
}
