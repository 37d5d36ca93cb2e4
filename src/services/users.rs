use chrono::Utc;
use diesel::prelude::*;
use futures_util::future::join_all;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use super::{accounts::validate_credentials, to_iso};
use crate::{
    auth::{
        provider::{IdentityProvider, NewIdentity, ProviderError},
        roles::{self, RoleLookupError},
        AuthenticatedUser,
    },
    db::PgPool,
    error::{AppError, AppResult},
    models::Profile,
    policy::{authorize, Action, PolicyContext, Role},
    schema::profiles,
    state::AppState,
};

#[derive(Debug, Serialize)]
pub struct UserSummary {
    pub id: Uuid,
    pub email: String,
    pub role: String,
    pub created_at: String,
    pub updated_at: String,
    /// `None` when the identity provider could not be asked.
    pub email_confirmed: Option<bool>,
    pub last_sign_in_at: Option<String>,
}

#[derive(Debug, Deserialize)]
pub struct CreateUserInput {
    pub email: String,
    pub password: String,
    pub role: Role,
}

#[derive(Debug, Deserialize)]
pub struct UpdateRoleInput {
    pub role: Role,
}

#[derive(Debug, Serialize)]
pub struct DeletedUser {
    pub id: Uuid,
    /// False when the profile is gone but the identity could not be removed.
    pub identity_deleted: bool,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum OrphanOutcome {
    Deleted,
    AlreadyGone,
}

fn require_admin(user: &AuthenticatedUser) -> AppResult<()> {
    authorize(user.role, Action::ManageUsers, &PolicyContext::new(user.user_id)).into_result()?;
    Ok(())
}

fn summary(profile: Profile, confirmed: Option<bool>, last_sign_in: Option<String>) -> UserSummary {
    UserSummary {
        id: profile.id,
        email: profile.email,
        role: profile.role,
        created_at: to_iso(profile.created_at),
        updated_at: to_iso(profile.updated_at),
        email_confirmed: confirmed,
        last_sign_in_at: last_sign_in,
    }
}

/// Lists profiles and asks the identity provider, concurrently, whether each
/// email is confirmed. One failed lookup only blanks that user's status.
pub async fn list_users(state: &AppState, actor: &AuthenticatedUser) -> AppResult<Vec<UserSummary>> {
    require_admin(actor)?;

    let rows: Vec<Profile> = {
        let mut conn = state.db()?;
        profiles::table
            .order(profiles::created_at.desc())
            .load(&mut conn)?
    };

    let identity = state.identity.as_ref();
    let lookups = rows.iter().map(|profile| identity.get_user_by_id(profile.id));
    let results = join_all(lookups).await;

    Ok(rows
        .into_iter()
        .zip(results)
        .map(|(profile, result)| match result {
            Ok(found) => {
                let last_sign_in = found.last_sign_in_at.map(|at| at.to_rfc3339());
                summary(profile, Some(found.is_confirmed()), last_sign_in)
            }
            Err(err) => {
                tracing::warn!(user_id = %profile.id, error = %err, "email confirmation lookup failed");
                summary(profile, None, None)
            }
        })
        .collect())
}

/// Creates a pre-confirmed identity and its profile. A failed profile insert
/// removes the identity again.
pub async fn create_user(
    state: &AppState,
    actor: &AuthenticatedUser,
    input: CreateUserInput,
) -> AppResult<UserSummary> {
    require_admin(actor)?;
    let email = validate_credentials(&input.email, &input.password)?;

    {
        let mut conn = state.db()?;
        if super::accounts::profile_email_taken(&mut conn, &email)? {
            return Err(super::accounts::user_already_exists());
        }
    }

    let identity = state
        .identity
        .create_user(NewIdentity {
            email: email.clone(),
            password: input.password,
            email_confirm: true,
        })
        .await?;

    let profile = super::accounts::insert_profile_or_compensate(
        state,
        identity.id,
        &email,
        input.role,
    )
    .await?;

    tracing::info!(user_id = %profile.id, role = %input.role, created_by = %actor.user_id, "user created");
    Ok(summary(profile, Some(true), None))
}

pub async fn update_role(
    state: &AppState,
    actor: &AuthenticatedUser,
    user_id: Uuid,
    role: Role,
) -> AppResult<UserSummary> {
    require_admin(actor)?;

    let mut conn = state.db()?;
    let profile: Profile = diesel::update(profiles::table.find(user_id))
        .set((
            profiles::role.eq(role.as_str()),
            profiles::updated_at.eq(Utc::now().naive_utc()),
        ))
        .get_result(&mut conn)
        .optional()?
        .ok_or_else(|| AppError::not_found().with_message("User not found"))?;

    tracing::info!(%user_id, %role, changed_by = %actor.user_id, "user role changed");
    Ok(summary(profile, None, None))
}

/// Deletes the profile, then the identity. An identity that survives is an
/// orphan for [`reconcile_orphan`].
pub async fn delete_user(
    state: &AppState,
    actor: &AuthenticatedUser,
    user_id: Uuid,
) -> AppResult<DeletedUser> {
    let ctx = PolicyContext::new(actor.user_id).target_user(user_id);
    authorize(actor.role, Action::DeleteUser, &ctx).into_result()?;

    {
        let mut conn = state.db()?;
        let removed = diesel::delete(profiles::table.find(user_id)).execute(&mut conn)?;
        if removed == 0 {
            return Err(AppError::not_found().with_message("User not found"));
        }
    }

    let identity_deleted = match state.identity.delete_user(user_id).await {
        Ok(()) => true,
        Err(err) => {
            tracing::error!(%user_id, error = %err, "profile deleted but identity removal failed; identity is orphaned");
            false
        }
    };

    tracing::info!(%user_id, deleted_by = %actor.user_id, identity_deleted, "user deleted");
    Ok(DeletedUser {
        id: user_id,
        identity_deleted,
    })
}

pub async fn reconcile_orphan(
    state: &AppState,
    actor: &AuthenticatedUser,
    identity_id: Uuid,
) -> AppResult<OrphanOutcome> {
    require_admin(actor)?;
    reconcile_identity(&state.pool, state.identity.as_ref(), identity_id).await
}

/// Deletes an identity that has no profile. Refuses while a profile exists.
pub async fn reconcile_identity(
    pool: &PgPool,
    identity: &dyn IdentityProvider,
    identity_id: Uuid,
) -> AppResult<OrphanOutcome> {
    {
        let mut conn = pool
            .get()
            .map_err(|err| AppError::internal(format!("database pool error: {err}")))?;
        match roles::role_of(&mut conn, identity_id) {
            Err(RoleLookupError::ProfileMissing(_)) => {}
            Err(RoleLookupError::Database(err)) => return Err(err.into()),
            Ok(_) | Err(RoleLookupError::UnknownRole { .. }) => {
                return Err(AppError::conflict(
                    "PROFILE_EXISTS",
                    "Identity still has a profile and is not orphaned",
                ));
            }
        }
    }

    match identity.delete_user(identity_id).await {
        Ok(()) => {
            tracing::info!(%identity_id, "orphaned identity deleted");
            Ok(OrphanOutcome::Deleted)
        }
        Err(ProviderError::Rejected { status: 404, .. }) => Ok(OrphanOutcome::AlreadyGone),
        Err(err) => Err(err.into()),
    }
}
