//! `/api/mobile` tree: bearer tokens only, every body wrapped in an
//! [`Envelope`](crate::envelope::Envelope).

use axum::{
    middleware,
    routing::{delete, get, post},
    Router,
};

use crate::{auth::require_bearer, state::AppState};

pub mod auth;
pub mod files;
pub mod projects;

pub fn router(state: AppState) -> Router<AppState> {
    let public = Router::new()
        .route("/auth/register", post(auth::register))
        .route("/auth/login", post(auth::login))
        .route("/auth/refresh", post(auth::refresh));

    let protected = Router::new()
        .route("/auth/logout", post(auth::logout))
        .route("/auth/me", get(auth::me))
        .route(
            "/projects",
            get(projects::list_projects).post(projects::create_project),
        )
        .route("/projects/assigned", get(projects::list_assigned_projects))
        .route(
            "/projects/:id",
            get(projects::get_project)
                .put(projects::update_project)
                .delete(projects::delete_project),
        )
        .route(
            "/projects/:id/users",
            get(projects::list_project_users).post(projects::assign_user),
        )
        .route(
            "/projects/:id/users/:user_id",
            delete(projects::remove_assignment),
        )
        .route(
            "/projects/:id/files",
            get(files::list_files).post(files::upload_file),
        )
        .route("/projects/:id/files/:file_id/url", get(files::signed_url))
        .route("/projects/:id/files/:file_id/stream", get(files::stream))
        .route(
            "/projects/:id/files/:file_id",
            delete(files::delete_file),
        )
        .route_layer(middleware::from_fn_with_state(state, require_bearer));

    public.merge(protected)
}
