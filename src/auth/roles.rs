use diesel::prelude::*;
use diesel::PgConnection;
use thiserror::Error;
use uuid::Uuid;

use crate::{error::AppError, models::Profile, policy::Role, schema::profiles};

#[derive(Debug, Error)]
pub enum RoleLookupError {
    #[error("no profile exists for identity {0}")]
    ProfileMissing(Uuid),
    #[error("profile {id} has unrecognised role {role:?}")]
    UnknownRole { id: Uuid, role: String },
    #[error("database error: {0}")]
    Database(#[from] diesel::result::Error),
}

impl From<RoleLookupError> for AppError {
    fn from(err: RoleLookupError) -> Self {
        match err {
            RoleLookupError::ProfileMissing(id) => {
                tracing::warn!(user_id = %id, "authenticated identity has no profile");
                AppError::forbidden("No profile exists for this account").with_code("PROFILE_MISSING")
            }
            RoleLookupError::UnknownRole { id, role } => {
                tracing::warn!(user_id = %id, %role, "profile carries an unknown role");
                AppError::forbidden("Account role is not recognised").with_code("PROFILE_MISSING")
            }
            RoleLookupError::Database(err) => AppError::from(err),
        }
    }
}

pub fn find_profile(conn: &mut PgConnection, id: Uuid) -> QueryResult<Option<Profile>> {
    profiles::table.find(id).first(conn).optional()
}

pub fn parse_role(profile: &Profile) -> Result<Role, RoleLookupError> {
    profile
        .role
        .parse()
        .map_err(|_| RoleLookupError::UnknownRole {
            id: profile.id,
            role: profile.role.clone(),
        })
}

/// Resolves the role of an authenticated identity. A missing profile is an
/// error; it is never defaulted to a role.
pub fn role_of(conn: &mut PgConnection, identity_id: Uuid) -> Result<(Profile, Role), RoleLookupError> {
    let profile =
        find_profile(conn, identity_id)?.ok_or(RoleLookupError::ProfileMissing(identity_id))?;
    let role = parse_role(&profile)?;
    Ok((profile, role))
}
