use axum::{
    extract::{Multipart, Query, State},
    http::StatusCode,
    Json,
};
use axum_extra::extract::WithRejection;
use serde::Deserialize;
use tracing::error;
use uuid::Uuid;

use crate::{
    auth::AuthenticatedUser,
    error::{AppError, AppResult},
    services::files::{self, Attachment, FileResponse, Placement, UploadInput},
    state::AppState,
};

#[derive(Deserialize)]
pub struct DeleteFileQuery {
    pub file_id: Uuid,
    pub project_id: Option<Uuid>,
}

fn parse_coordinate(name: &str, value: &str) -> AppResult<Option<f64>> {
    let trimmed = value.trim();
    if trimmed.is_empty() {
        return Ok(None);
    }
    let parsed: f64 = trimmed
        .parse()
        .map_err(|_| AppError::bad_request(format!("{name} must be a number")))?;
    if !parsed.is_finite() {
        return Err(AppError::bad_request(format!("{name} must be a finite number")));
    }
    Ok(Some(parsed))
}

/// Reads an upload form. `project_id` comes from the path on the mobile tree
/// and from the form on the web tree.
pub(crate) async fn read_upload_form(
    mut multipart: Multipart,
    project_id: Option<Uuid>,
) -> AppResult<UploadInput> {
    let mut content: Option<(String, Attachment)> = None;
    let mut thumbnail: Option<Attachment> = None;
    let mut form_project_id: Option<Uuid> = None;
    let mut placement = Placement::default();

    while let Some(field) = multipart.next_field().await.map_err(|err| {
        error!(error = %err, "invalid multipart data");
        AppError::bad_request(format!("invalid multipart data: {err}"))
    })? {
        let name = field.name().map(|n| n.to_string());
        match name.as_deref() {
            Some("file") | Some("thumbnail") => {
                let file_name = field.file_name().map(|n| n.to_string()).unwrap_or_default();
                let content_type = field.content_type().map(|mime| mime.to_string());
                let data = field.bytes().await.map_err(|err| {
                    error!(error = %err, "failed to read file bytes");
                    AppError::bad_request(format!("failed to read file bytes: {err}"))
                })?;
                let attachment = Attachment {
                    bytes: data.to_vec(),
                    content_type,
                };
                if name.as_deref() == Some("file") {
                    content = Some((file_name, attachment));
                } else {
                    thumbnail = Some(attachment);
                }
            }
            Some("project_id") | Some("projectId") => {
                let value = field
                    .text()
                    .await
                    .map_err(|err| AppError::bad_request(format!("invalid project id: {err}")))?;
                let parsed = Uuid::parse_str(value.trim())
                    .map_err(|_| AppError::bad_request("project_id must be a valid UUID"))?;
                form_project_id = Some(parsed);
            }
            Some(coordinate @ ("latitude" | "longitude" | "height" | "rotation")) => {
                let coordinate = coordinate.to_string();
                let value = field.text().await.map_err(|err| {
                    AppError::bad_request(format!("invalid {coordinate}: {err}"))
                })?;
                let parsed = parse_coordinate(&coordinate, &value)?;
                match coordinate.as_str() {
                    "latitude" => placement.latitude = parsed,
                    "longitude" => placement.longitude = parsed,
                    "height" => placement.height = parsed,
                    _ => placement.rotation = parsed,
                }
            }
            _ => {}
        }
    }

    let project_id = project_id
        .or(form_project_id)
        .ok_or_else(|| AppError::bad_request("project_id is required"))?;
    let (file_name, content) = content.ok_or_else(|| {
        error!("upload rejected: missing file field");
        AppError::bad_request("file field is required")
    })?;

    Ok(UploadInput {
        project_id,
        file_name,
        content,
        thumbnail,
        placement,
    })
}

/// `Content-Disposition` that makes browsers save the body under `filename`.
pub(crate) fn attachment_disposition(filename: &str) -> String {
    let sanitized: String = filename
        .chars()
        .map(|ch| match ch {
            '"' | '\\' => '_',
            ch if ch.is_control() => '_',
            _ => ch,
        })
        .collect();
    let sanitized = if sanitized.trim().is_empty() {
        "download".to_string()
    } else {
        sanitized
    };

    let encoded =
        percent_encoding::utf8_percent_encode(&sanitized, percent_encoding::NON_ALPHANUMERIC);
    let ascii: String = sanitized
        .chars()
        .map(|ch| if ch.is_ascii() { ch } else { '_' })
        .collect();
    format!("attachment; filename=\"{ascii}\"; filename*=UTF-8''{encoded}")
}

pub async fn upload_file(
    State(state): State<AppState>,
    user: AuthenticatedUser,
    WithRejection(multipart, _): WithRejection<Multipart, AppError>,
) -> AppResult<(StatusCode, Json<FileResponse>)> {
    let input = read_upload_form(multipart, None).await?;
    let file = files::upload_file(&state, &user, input).await?;
    Ok((StatusCode::CREATED, Json(file)))
}

pub async fn delete_file(
    State(state): State<AppState>,
    user: AuthenticatedUser,
    WithRejection(Query(query), _): WithRejection<Query<DeleteFileQuery>, AppError>,
) -> AppResult<StatusCode> {
    files::delete_file(&state, &user, query.file_id, query.project_id).await?;
    Ok(StatusCode::NO_CONTENT)
}
