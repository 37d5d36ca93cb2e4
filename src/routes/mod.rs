use axum::http::HeaderValue;
use axum::{
    extract::DefaultBodyLimit,
    middleware,
    routing::{delete, get, post, put},
    Router,
};
use tower_http::cors::{AllowHeaders, AllowMethods, AllowOrigin, CorsLayer};
use tower_http::trace::TraceLayer;

use crate::{auth::require_session, state::AppState};

pub mod admin;
pub mod auth;
pub mod files;
pub mod health;
pub mod mobile;
pub mod projects;

const MAX_UPLOAD_BYTES: usize = 1024 * 1024 * 512;

pub fn create_router(state: AppState) -> Router<()> {
    let cors = if let Some(origins) = state.config.cors_allowed_origin.as_ref() {
        let headers: Vec<HeaderValue> = origins
            .split(',')
            .map(str::trim)
            .filter(|value| !value.is_empty())
            .filter_map(|value| match value.parse::<HeaderValue>() {
                Ok(header) => Some(header),
                Err(_) => {
                    tracing::warn!(origin = value, "ignoring invalid CORS allowed origin");
                    None
                }
            })
            .collect();

        CorsLayer::new()
            .allow_origin(AllowOrigin::list(headers))
            .allow_methods(AllowMethods::mirror_request())
            .allow_headers(AllowHeaders::mirror_request())
            .allow_credentials(true)
    } else {
        CorsLayer::new()
            .allow_origin(AllowOrigin::mirror_request())
            .allow_methods(AllowMethods::mirror_request())
            .allow_headers(AllowHeaders::mirror_request())
            .allow_credentials(true)
    };

    let public_auth_routes = Router::new()
        .route("/register", post(auth::register))
        .route("/login", post(auth::login))
        .route(
            "/session",
            post(auth::establish_session).delete(auth::clear_session),
        )
        .route("/confirm", get(auth::confirm))
        .route("/resend-confirmation", post(auth::resend_confirmation));

    let account_routes = Router::new()
        .route("/me", get(auth::me))
        .route("/password", put(auth::change_password));

    let admin_routes = Router::new()
        .route("/users", get(admin::list_users).post(admin::create_user))
        .route("/users/:id/role", put(admin::update_role))
        .route("/users/:id", delete(admin::delete_user))
        .route("/orphans/:id", delete(admin::reconcile_orphan));

    let projects_routes = Router::new()
        .route(
            "/",
            get(projects::list_projects).post(projects::create_project),
        )
        .route("/assigned", get(projects::list_assigned_projects))
        .route(
            "/:id",
            get(projects::get_project)
                .put(projects::update_project)
                .delete(projects::delete_project),
        )
        .route(
            "/:id/users",
            get(projects::list_project_users).post(projects::assign_user),
        )
        .route("/:id/users/:user_id", delete(projects::remove_assignment))
        .route("/:id/files", get(projects::list_files))
        .route(
            "/:id/files/:file_id/download",
            get(projects::download_file),
        );

    let protected_routes = Router::new()
        .nest("/api/auth", account_routes)
        .nest("/api/admin", admin_routes)
        .nest("/api/projects", projects_routes)
        .route("/api/upload", post(files::upload_file))
        .route("/api/delete", delete(files::delete_file))
        .route_layer(middleware::from_fn_with_state(state.clone(), require_session));

    Router::new()
        .merge(protected_routes)
        .nest("/api/auth", public_auth_routes)
        .nest("/api/mobile", mobile::router(state.clone()))
        .route("/api/health", get(health::health_check))
        .with_state(state)
        .layer(TraceLayer::new_for_http())
        .layer(cors)
        .layer(DefaultBodyLimit::max(MAX_UPLOAD_BYTES))
}
