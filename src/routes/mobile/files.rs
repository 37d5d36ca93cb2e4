use axum::{
    extract::{Multipart, Path, State},
    http::{header, HeaderValue},
    response::{IntoResponse, Response},
};
use axum_extra::extract::WithRejection;
use serde::Serialize;
use uuid::Uuid;

use crate::{
    auth::AuthenticatedUser,
    envelope::{Envelope, MobileError, MobileResult},
    error::AppError,
    routes::files::{attachment_disposition, read_upload_form},
    services::files::{self, FileResponse, SignedUrlResponse},
    state::AppState,
};

#[derive(Serialize)]
pub struct DeletedFile {
    pub id: Uuid,
}

pub async fn list_files(
    State(state): State<AppState>,
    user: AuthenticatedUser,
    WithRejection(Path(project_id), _): WithRejection<Path<Uuid>, MobileError>,
) -> MobileResult<Vec<FileResponse>> {
    Ok(Envelope::ok(
        files::list_files(&state, &user, project_id).await?,
    ))
}

pub async fn upload_file(
    State(state): State<AppState>,
    user: AuthenticatedUser,
    WithRejection(Path(project_id), _): WithRejection<Path<Uuid>, MobileError>,
    WithRejection(multipart, _): WithRejection<Multipart, MobileError>,
) -> MobileResult<FileResponse> {
    let input = read_upload_form(multipart, Some(project_id)).await?;
    Ok(Envelope::created(
        files::upload_file(&state, &user, input).await?,
    ))
}

pub async fn signed_url(
    State(state): State<AppState>,
    user: AuthenticatedUser,
    WithRejection(Path((project_id, file_id)), _): WithRejection<Path<(Uuid, Uuid)>, MobileError>,
) -> MobileResult<SignedUrlResponse> {
    Ok(Envelope::ok(
        files::signed_url(&state, &user, project_id, file_id).await?,
    ))
}

/// Proxies the stored bytes as a download.
pub async fn stream(
    State(state): State<AppState>,
    user: AuthenticatedUser,
    WithRejection(Path((project_id, file_id)), _): WithRejection<Path<(Uuid, Uuid)>, MobileError>,
) -> Result<Response, MobileError> {
    let downloaded = files::download(&state, &user, project_id, file_id).await?;

    let content_type = HeaderValue::from_str(&downloaded.content_type)
        .unwrap_or_else(|_| HeaderValue::from_static("application/octet-stream"));
    let disposition = HeaderValue::from_str(&attachment_disposition(&downloaded.file.file_name))
        .map_err(|err| AppError::internal(format!("invalid content disposition: {err}")))?;

    Ok((
        [
            (header::CONTENT_TYPE, content_type),
            (header::CONTENT_DISPOSITION, disposition),
        ],
        downloaded.bytes,
    )
        .into_response())
}

pub async fn delete_file(
    State(state): State<AppState>,
    user: AuthenticatedUser,
    WithRejection(Path((project_id, file_id)), _): WithRejection<Path<(Uuid, Uuid)>, MobileError>,
) -> MobileResult<DeletedFile> {
    files::delete_file(&state, &user, file_id, Some(project_id)).await?;
    Ok(Envelope::ok(DeletedFile { id: file_id }))
}
