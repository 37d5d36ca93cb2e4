//! Role-based access policy.
//!
//! [`authorize`] is a pure function of the actor's role, the requested
//! action and the facts in [`PolicyContext`]. Callers load the context from
//! the store on every request, so revoking an assignment takes effect on the
//! next call.

use std::{fmt, str::FromStr};

use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::error::AppError;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Role {
    Admin,
    Archivist,
    User,
}

impl Role {
    pub const ALL: [Role; 3] = [Role::Admin, Role::Archivist, Role::User];

    pub fn as_str(self) -> &'static str {
        match self {
            Role::Admin => "Admin",
            Role::Archivist => "Archivist",
            Role::User => "User",
        }
    }
}

impl fmt::Display for Role {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Role {
    type Err = String;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        match value.trim().to_ascii_lowercase().as_str() {
            "admin" => Ok(Role::Admin),
            "archivist" => Ok(Role::Archivist),
            "user" => Ok(Role::User),
            other => Err(format!("unknown role {other:?}")),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Action {
    CreateProject,
    ReadProject,
    UpdateProject,
    DeleteProject,
    ListProjects,
    ListAssignedProjects,
    AssignUser,
    RemoveAssignment,
    ListAssignments,
    UploadFile,
    ReadFile,
    ListFiles,
    DeleteFile,
    ManageUsers,
    DeleteUser,
    ReadProfile,
}

/// Facts about the targeted resource, relative to the acting profile.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PolicyContext {
    pub actor_id: Uuid,
    /// Whether an assignment row links the actor to the targeted project.
    pub assigned: bool,
    /// Profile targeted by user-scoped actions (assignment removal, account
    /// deletion, profile reads).
    pub target_user_id: Option<Uuid>,
    /// Uploader of the targeted file.
    pub uploaded_by: Option<Uuid>,
}

impl PolicyContext {
    pub fn new(actor_id: Uuid) -> Self {
        Self {
            actor_id,
            assigned: false,
            target_user_id: None,
            uploaded_by: None,
        }
    }

    pub fn assigned(mut self, assigned: bool) -> Self {
        self.assigned = assigned;
        self
    }

    pub fn target_user(mut self, user_id: Uuid) -> Self {
        self.target_user_id = Some(user_id);
        self
    }

    pub fn uploaded_by(mut self, user_id: Uuid) -> Self {
        self.uploaded_by = Some(user_id);
        self
    }

    fn targets_self(&self) -> bool {
        self.target_user_id == Some(self.actor_id)
    }
}

/// Row-level restriction attached to an allowed list operation.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RowFilter {
    UploadedBy(Uuid),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DenyReason {
    InsufficientRole,
    NotAssigned,
    UseAssignedProjects,
    SelfDeletion,
    NotOwnAssignment,
    NotOwnProfile,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Decision {
    Allow(Option<RowFilter>),
    Deny(DenyReason),
}

impl Decision {
    pub fn is_allowed(&self) -> bool {
        matches!(self, Decision::Allow(_))
    }

    /// Converts a denial into the error rendered to the client.
    pub fn into_result(self) -> Result<Option<RowFilter>, AppError> {
        match self {
            Decision::Allow(filter) => Ok(filter),
            Decision::Deny(reason) => Err(reason.into()),
        }
    }
}

const ALLOW: Decision = Decision::Allow(None);

pub fn authorize(role: Role, action: Action, ctx: &PolicyContext) -> Decision {
    // Self-protection holds for every role, before any role rule.
    if action == Action::DeleteUser && ctx.targets_self() {
        return Decision::Deny(DenyReason::SelfDeletion);
    }

    match role {
        Role::Admin => ALLOW,
        Role::Archivist => archivist(action, ctx),
        Role::User => user(action, ctx),
    }
}

fn when_assigned(ctx: &PolicyContext) -> Decision {
    if ctx.assigned {
        ALLOW
    } else {
        Decision::Deny(DenyReason::NotAssigned)
    }
}

fn own_profile(ctx: &PolicyContext) -> Decision {
    if ctx.targets_self() {
        ALLOW
    } else {
        Decision::Deny(DenyReason::NotOwnProfile)
    }
}

fn archivist(action: Action, ctx: &PolicyContext) -> Decision {
    match action {
        Action::ReadProject
        | Action::ListAssignedProjects
        | Action::ReadFile
        | Action::ListFiles => ALLOW,
        Action::ListProjects => Decision::Deny(DenyReason::UseAssignedProjects),
        Action::UpdateProject
        | Action::AssignUser
        | Action::RemoveAssignment
        | Action::ListAssignments
        | Action::UploadFile
        | Action::DeleteFile => when_assigned(ctx),
        Action::ReadProfile => own_profile(ctx),
        Action::CreateProject
        | Action::DeleteProject
        | Action::ManageUsers
        | Action::DeleteUser => Decision::Deny(DenyReason::InsufficientRole),
    }
}

fn user(action: Action, ctx: &PolicyContext) -> Decision {
    match action {
        Action::ReadProject | Action::ListProjects | Action::ListAssignedProjects => ALLOW,
        Action::ListAssignments => when_assigned(ctx),
        Action::ReadFile => {
            if ctx.assigned || (ctx.uploaded_by.is_some() && ctx.uploaded_by == Some(ctx.actor_id))
            {
                ALLOW
            } else {
                Decision::Deny(DenyReason::NotAssigned)
            }
        }
        Action::ListFiles => {
            if ctx.assigned {
                ALLOW
            } else {
                Decision::Allow(Some(RowFilter::UploadedBy(ctx.actor_id)))
            }
        }
        Action::RemoveAssignment => {
            if ctx.targets_self() {
                ALLOW
            } else {
                Decision::Deny(DenyReason::NotOwnAssignment)
            }
        }
        Action::ReadProfile => own_profile(ctx),
        Action::CreateProject
        | Action::UpdateProject
        | Action::DeleteProject
        | Action::AssignUser
        | Action::UploadFile
        | Action::DeleteFile
        | Action::ManageUsers
        | Action::DeleteUser => Decision::Deny(DenyReason::InsufficientRole),
    }
}

impl From<DenyReason> for AppError {
    fn from(reason: DenyReason) -> Self {
        match reason {
            DenyReason::SelfDeletion => AppError::bad_request("Cannot delete your own account")
                .with_code("SELF_DELETION"),
            DenyReason::UseAssignedProjects => AppError::forbidden(
                "Archivists browse projects through the assigned projects page",
            )
            .with_code("USE_ASSIGNED_PROJECTS"),
            DenyReason::NotAssigned => {
                AppError::forbidden("You are not assigned to this project").with_code("NOT_ASSIGNED")
            }
            DenyReason::NotOwnAssignment => {
                AppError::forbidden("You can only remove your own assignment")
                    .with_code("NOT_OWN_ASSIGNMENT")
            }
            DenyReason::NotOwnProfile => {
                AppError::forbidden("You can only view your own profile").with_code("FORBIDDEN")
            }
            DenyReason::InsufficientRole => AppError::forbidden(
                "Your role does not permit this action",
            )
            .with_code("INSUFFICIENT_ROLE"),
        }
    }
}
