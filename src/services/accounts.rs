use diesel::dsl::exists;
use diesel::prelude::*;
use diesel::result::{DatabaseErrorKind, Error as DieselError};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use super::to_iso;
use crate::{
    auth::{
        error_codes::AuthErrorCode,
        provider::{AuthSession, Identity, IdentityUpdate, Session},
        roles::{self, RoleLookupError},
        AuthenticatedUser,
    },
    error::{AppError, AppResult},
    models::{NewProfile, Profile},
    policy::{authorize, Action, PolicyContext, Role},
    schema::profiles,
    state::AppState,
};

const MIN_PASSWORD_LEN: usize = 6;
const MAX_EMAIL_LEN: usize = 320;

diesel::sql_function!(fn lower(value: diesel::sql_types::Text) -> diesel::sql_types::Text);

#[derive(Debug, Deserialize)]
pub struct Credentials {
    pub email: String,
    pub password: String,
}

#[derive(Debug, Clone, Serialize)]
pub struct AccountUser {
    pub id: Uuid,
    pub email: String,
    pub role: Role,
}

#[derive(Debug, Serialize)]
pub struct RegisteredAccount {
    pub user: AccountUser,
    pub email_confirmation_required: bool,
}

/// A signed-in account. The session is what the cookie jar stores; bodies
/// carry a copy for client-side state only.
#[derive(Debug, Serialize)]
pub struct SignedIn {
    pub user: AccountUser,
    pub session: Session,
}

#[derive(Debug, Serialize)]
pub struct ProfileResponse {
    pub id: Uuid,
    pub email: String,
    pub role: Role,
    pub created_at: String,
    pub updated_at: String,
}

pub fn user_already_exists() -> AppError {
    AppError::conflict(
        AuthErrorCode::UserAlreadyExists.as_str(),
        "An account with this email already exists",
    )
}

fn email_not_confirmed() -> AppError {
    AppError::bad_request("Please confirm your email before logging in")
        .with_code(AuthErrorCode::EmailNotConfirmed.as_str())
}

/// Checks the shape of an email/password pair and returns the normalised
/// (trimmed, lower-cased) email.
pub fn validate_credentials(email: &str, password: &str) -> AppResult<String> {
    let email = validate_email(email)?;
    if password.chars().count() < MIN_PASSWORD_LEN {
        return Err(AppError::bad_request(format!(
            "Password must be at least {MIN_PASSWORD_LEN} characters"
        ))
        .with_code(AuthErrorCode::WeakPassword.as_str()));
    }
    Ok(email)
}

fn validate_email(email: &str) -> AppResult<String> {
    let email = email.trim().to_lowercase();
    let well_formed = email.len() <= MAX_EMAIL_LEN
        && email
            .split_once('@')
            .map(|(local, domain)| !local.is_empty() && domain.contains('.') && !domain.starts_with('.'))
            .unwrap_or(false);
    if !well_formed {
        return Err(AppError::bad_request("Email address is invalid")
            .with_code(AuthErrorCode::InvalidEmail.as_str()));
    }
    Ok(email)
}

pub fn profile_email_taken(conn: &mut PgConnection, email: &str) -> QueryResult<bool> {
    diesel::select(exists(
        profiles::table.filter(lower(profiles::email).eq(email.to_lowercase())),
    ))
    .get_result(conn)
}

/// Inserts the profile for a freshly created identity. If the insert fails
/// and no profile exists for the identity, the identity is deleted again. A
/// profile already holding the id belongs to a concurrent registration of the
/// same identity and is left alone, as is the identity when the check itself
/// fails (the orphan reconciliation picks those up).
pub(crate) async fn insert_profile_or_compensate(
    state: &AppState,
    identity_id: Uuid,
    email: &str,
    role: Role,
) -> AppResult<Profile> {
    let new_profile = NewProfile {
        id: identity_id,
        email: email.to_string(),
        role: role.as_str().to_string(),
    };

    let inserted = state.db().and_then(|mut conn| {
        diesel::insert_into(profiles::table)
            .values(&new_profile)
            .get_result::<Profile>(&mut conn)
            .map_err(|err| match err {
                DieselError::DatabaseError(DatabaseErrorKind::UniqueViolation, _) => {
                    user_already_exists()
                }
                other => AppError::from(other),
            })
    });

    let err = match inserted {
        Ok(profile) => return Ok(profile),
        Err(err) => err,
    };

    let existing = state
        .db()
        .and_then(|mut conn| roles::find_profile(&mut conn, identity_id).map_err(AppError::from));
    match existing {
        Ok(Some(_)) => {
            tracing::warn!(user_id = %identity_id, error = %err, "profile already exists for identity; keeping it");
        }
        Ok(None) => {
            tracing::error!(user_id = %identity_id, error = %err, "profile insert failed; removing identity");
            if let Err(cleanup) = state.identity.delete_user(identity_id).await {
                tracing::error!(
                    user_id = %identity_id,
                    error = %cleanup,
                    "identity removal failed; identity is orphaned until reconciled"
                );
            }
        }
        Err(lookup) => {
            tracing::error!(
                user_id = %identity_id,
                error = %err,
                lookup_error = %lookup,
                "profile insert failed and profile check failed; identity left for reconciliation"
            );
        }
    }
    Err(err)
}

async fn sign_out_quietly(state: &AppState, access_token: &str, user_id: Uuid) {
    if let Err(err) = state.identity.sign_out(access_token).await {
        tracing::warn!(%user_id, error = %err, "failed to revoke session");
    }
}

/// Rejects an unconfirmed identity or one without a profile, revoking the
/// session the provider just issued.
async fn admit(state: &AppState, auth: AuthSession) -> AppResult<SignedIn> {
    let user_id = auth.identity.id;
    if !auth.identity.is_confirmed() {
        sign_out_quietly(state, &auth.session.access_token, user_id).await;
        return Err(email_not_confirmed());
    }

    let lookup = {
        let mut conn = state.db()?;
        roles::role_of(&mut conn, user_id)
    };
    let (profile, role) = match lookup {
        Ok(found) => found,
        Err(err) => {
            if matches!(err, RoleLookupError::ProfileMissing(_)) {
                sign_out_quietly(state, &auth.session.access_token, user_id).await;
            }
            return Err(err.into());
        }
    };

    Ok(SignedIn {
        user: AccountUser {
            id: profile.id,
            email: auth.identity.email.unwrap_or(profile.email),
            role,
        },
        session: auth.session,
    })
}

/// Creates the identity and its `User` profile. The email is refused up front
/// when a profile already holds it.
pub async fn register(state: &AppState, input: Credentials) -> AppResult<RegisteredAccount> {
    let email = validate_credentials(&input.email, &input.password)?;

    {
        let mut conn = state.db()?;
        if profile_email_taken(&mut conn, &email)? {
            return Err(user_already_exists());
        }
    }

    let redirect = state.config.email_redirect_url();
    let identity: Identity = state
        .identity
        .sign_up(&email, &input.password, Some(&redirect))
        .await?;

    // The provider answers a repeat sign-up with a user that has no linked
    // identities instead of an error.
    if identity.identities.as_ref().is_some_and(|linked| linked.is_empty()) {
        return Err(user_already_exists());
    }

    let profile = insert_profile_or_compensate(state, identity.id, &email, Role::User).await?;

    tracing::info!(user_id = %profile.id, "account registered");
    Ok(RegisteredAccount {
        user: AccountUser {
            id: profile.id,
            email: profile.email,
            role: Role::User,
        },
        email_confirmation_required: !identity.is_confirmed(),
    })
}

pub async fn login(state: &AppState, input: Credentials) -> AppResult<SignedIn> {
    let email = validate_email(&input.email)?;
    if input.password.is_empty() {
        return Err(AppError::bad_request("Password is required"));
    }

    let auth = state
        .identity
        .sign_in_with_password(&email, &input.password)
        .await?;
    let signed_in = admit(state, auth).await?;
    tracing::info!(user_id = %signed_in.user.id, "signed in");
    Ok(signed_in)
}

/// Adopts a token pair obtained elsewhere (e.g. after email confirmation on
/// the client) as the server-side session.
pub async fn establish_session(
    state: &AppState,
    access_token: &str,
    refresh_token: &str,
) -> AppResult<SignedIn> {
    if access_token.trim().is_empty() || refresh_token.trim().is_empty() {
        return Err(AppError::bad_request("access_token and refresh_token are required"));
    }
    let auth = state.identity.set_session(access_token, refresh_token).await?;
    admit(state, auth).await
}

pub async fn refresh(state: &AppState, refresh_token: &str) -> AppResult<SignedIn> {
    if refresh_token.trim().is_empty() {
        return Err(AppError::bad_request("refresh_token is required"));
    }
    let auth = state.identity.refresh_session(refresh_token).await?;
    admit(state, auth).await
}

/// Revokes the provider session behind `access_token`. Failures are logged;
/// signing out always succeeds locally.
pub async fn sign_out(state: &AppState, access_token: Option<&str>) {
    if let Some(token) = access_token.filter(|token| !token.is_empty()) {
        if let Err(err) = state.identity.sign_out(token).await {
            tracing::warn!(error = %err, "provider sign-out failed");
        }
    }
}

pub async fn current_user(state: &AppState, user: &AuthenticatedUser) -> AppResult<ProfileResponse> {
    let ctx = PolicyContext::new(user.user_id).target_user(user.user_id);
    authorize(user.role, Action::ReadProfile, &ctx).into_result()?;

    let mut conn = state.db()?;
    let profile = roles::find_profile(&mut conn, user.user_id)?
        .ok_or_else(|| AppError::forbidden("No profile exists for this account").with_code("PROFILE_MISSING"))?;

    Ok(ProfileResponse {
        id: profile.id,
        email: profile.email,
        role: user.role,
        created_at: to_iso(profile.created_at),
        updated_at: to_iso(profile.updated_at),
    })
}

/// Exchanges the token hash from a confirmation email for a session.
pub async fn confirm_email(state: &AppState, token_hash: &str, kind: &str) -> AppResult<SignedIn> {
    if token_hash.trim().is_empty() {
        return Err(AppError::bad_request("token_hash is required"));
    }
    let auth = state.identity.verify_email(token_hash, kind).await?;
    let signed_in = admit(state, auth).await?;
    tracing::info!(user_id = %signed_in.user.id, "email confirmed");
    Ok(signed_in)
}

pub async fn resend_confirmation(state: &AppState, email: &str) -> AppResult<()> {
    let email = validate_email(email)?;
    let redirect = state.config.email_redirect_url();
    state
        .identity
        .resend_confirmation(&email, Some(&redirect))
        .await?;
    Ok(())
}

pub async fn change_password(
    state: &AppState,
    user: &AuthenticatedUser,
    password: &str,
) -> AppResult<()> {
    if password.chars().count() < MIN_PASSWORD_LEN {
        return Err(AppError::bad_request(format!(
            "Password must be at least {MIN_PASSWORD_LEN} characters"
        ))
        .with_code(AuthErrorCode::WeakPassword.as_str()));
    }

    state
        .identity
        .update_user_by_id(
            user.user_id,
            IdentityUpdate {
                password: Some(password.to_string()),
                ..Default::default()
            },
        )
        .await?;
    tracing::info!(user_id = %user.user_id, "password changed");
    Ok(())
}
