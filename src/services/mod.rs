//! Resource operations shared by the web and mobile route trees.
//!
//! Every operation loads the facts the policy needs from the store, asks
//! [`crate::policy::authorize`] and only then touches the data layer.

pub mod accounts;
pub mod assignments;
pub mod files;
pub mod projects;
pub mod users;

use chrono::{DateTime, NaiveDateTime, Utc};
use diesel::dsl::exists;
use diesel::prelude::*;
use diesel::PgConnection;
use uuid::Uuid;

use crate::{
    auth::AuthenticatedUser,
    error::{AppError, AppResult},
    models::Project,
    policy::PolicyContext,
    schema::{project_assignments, projects as projects_table},
};

pub(crate) fn to_iso(dt: NaiveDateTime) -> String {
    DateTime::<Utc>::from_naive_utc_and_offset(dt, Utc).to_rfc3339()
}

pub(crate) fn is_assigned(
    conn: &mut PgConnection,
    project_id: Uuid,
    user_id: Uuid,
) -> QueryResult<bool> {
    diesel::select(exists(
        project_assignments::table
            .filter(project_assignments::project_id.eq(project_id))
            .filter(project_assignments::assigned_user_id.eq(user_id)),
    ))
    .get_result(conn)
}

pub(crate) fn load_project(conn: &mut PgConnection, project_id: Uuid) -> AppResult<Project> {
    projects_table::table
        .find(project_id)
        .first(conn)
        .optional()?
        .ok_or_else(|| AppError::not_found().with_message("Project not found"))
}

/// Policy facts for an action on `project_id`, read fresh from the store.
pub(crate) fn project_context(
    conn: &mut PgConnection,
    user: &AuthenticatedUser,
    project_id: Uuid,
) -> AppResult<PolicyContext> {
    let assigned = is_assigned(conn, project_id, user.user_id)?;
    Ok(PolicyContext::new(user.user_id).assigned(assigned))
}
