use std::path::Path as FsPath;
use std::sync::atomic::{AtomicI64, Ordering};
use std::time::Duration;

use chrono::Utc;
use diesel::prelude::*;
use serde::Serialize;
use uuid::Uuid;

use super::{is_assigned, load_project, project_context, to_iso};
use crate::{
    auth::AuthenticatedUser,
    error::{AppError, AppResult},
    models::{NewStoredFile, StoredFile},
    policy::{authorize, Action, PolicyContext, RowFilter},
    schema::files,
    state::AppState,
};

const FALLBACK_EXTENSION: &str = "bin";

static LAST_KEY_MILLIS: AtomicI64 = AtomicI64::new(0);

#[derive(Debug, Serialize)]
pub struct FileResponse {
    pub id: Uuid,
    pub file_name: String,
    pub file_url: String,
    pub file_size: i64,
    pub thumbnail_url: Option<String>,
    pub latitude: Option<f64>,
    pub longitude: Option<f64>,
    pub height: Option<f64>,
    pub rotation: Option<f64>,
    pub project_id: Uuid,
    pub uploaded_by: Uuid,
    pub created_at: String,
}

impl From<StoredFile> for FileResponse {
    fn from(file: StoredFile) -> Self {
        Self {
            id: file.id,
            file_name: file.file_name,
            file_url: file.file_url,
            file_size: file.file_size,
            thumbnail_url: file.thumbnail_url,
            latitude: file.latitude,
            longitude: file.longitude,
            height: file.height,
            rotation: file.rotation,
            project_id: file.project_id,
            uploaded_by: file.uploaded_by,
            created_at: to_iso(file.created_at),
        }
    }
}

#[derive(Debug, Serialize)]
pub struct SignedUrlResponse {
    pub url: String,
    pub expires_in: u64,
    pub file_name: String,
    pub file_size: i64,
}

#[derive(Debug)]
pub struct Attachment {
    pub bytes: Vec<u8>,
    pub content_type: Option<String>,
}

#[derive(Debug, Default)]
pub struct Placement {
    pub latitude: Option<f64>,
    pub longitude: Option<f64>,
    pub height: Option<f64>,
    pub rotation: Option<f64>,
}

#[derive(Debug)]
pub struct UploadInput {
    pub project_id: Uuid,
    pub file_name: String,
    pub content: Attachment,
    pub thumbnail: Option<Attachment>,
    pub placement: Placement,
}

#[derive(Debug)]
pub struct DownloadedFile {
    pub file: StoredFile,
    pub bytes: Vec<u8>,
    pub content_type: String,
}

/// Extension for a stored object: the original name's, else one implied by
/// the MIME type, else `bin`.
pub fn extension_for(file_name: &str, content_type: Option<&str>) -> String {
    let from_name = FsPath::new(file_name.trim())
        .extension()
        .and_then(|ext| ext.to_str())
        .map(|ext| ext.trim().to_ascii_lowercase())
        .filter(|ext| !ext.is_empty() && ext.chars().all(|ch| ch.is_ascii_alphanumeric()));
    if let Some(ext) = from_name {
        return ext;
    }

    content_type
        .and_then(|mime| {
            let essence = mime.split(';').next().unwrap_or(mime).trim();
            mime_guess::get_mime_extensions_str(essence).and_then(|exts| exts.first())
        })
        .map(|ext| ext.to_string())
        .unwrap_or_else(|| FALLBACK_EXTENSION.to_string())
}

/// Millisecond stamp for object keys. Strictly increasing within the process,
/// so two uploads landing in the same millisecond never share a key.
pub(crate) fn next_key_millis(now: i64) -> i64 {
    let previous = LAST_KEY_MILLIS
        .fetch_update(Ordering::AcqRel, Ordering::Acquire, |last| {
            Some(now.max(last + 1))
        })
        .unwrap_or_else(|last| last);
    now.max(previous + 1)
}

pub fn object_key(project_id: Uuid, millis: i64, extension: &str) -> String {
    format!("{project_id}/{millis}.{extension}")
}

pub fn thumbnail_key(project_id: Uuid, millis: i64, extension: &str) -> String {
    format!("{project_id}/thumbnails/{millis}.{extension}")
}

/// Storage keys owned by the given rows, including thumbnails that live in
/// the same bucket.
pub(crate) fn storage_keys_for(state: &AppState, stored: &[StoredFile]) -> Vec<String> {
    let mut keys = Vec::with_capacity(stored.len() * 2);
    for file in stored {
        keys.push(file.file_url.clone());
        if let Some(key) = thumbnail_storage_key(state, file) {
            keys.push(key);
        }
    }
    keys
}

fn thumbnail_storage_key(state: &AppState, file: &StoredFile) -> Option<String> {
    let url = file.thumbnail_url.as_deref()?;
    let base = state.storage.public_url("");
    url.strip_prefix(&base)
        .filter(|key| !key.is_empty())
        .map(str::to_string)
}

fn load_project_file(
    conn: &mut PgConnection,
    project_id: Uuid,
    file_id: Uuid,
) -> AppResult<StoredFile> {
    files::table
        .filter(files::id.eq(file_id))
        .filter(files::project_id.eq(project_id))
        .first(conn)
        .optional()?
        .ok_or_else(|| AppError::not_found().with_message("File not found"))
}

/// Loads a file of a project and checks that the caller may read it.
fn readable_file(
    state: &AppState,
    user: &AuthenticatedUser,
    project_id: Uuid,
    file_id: Uuid,
) -> AppResult<StoredFile> {
    let mut conn = state.db()?;
    let file = load_project_file(&mut conn, project_id, file_id)?;
    let ctx = project_context(&mut conn, user, project_id)?.uploaded_by(file.uploaded_by);
    authorize(user.role, Action::ReadFile, &ctx).into_result()?;
    Ok(file)
}

pub async fn list_files(
    state: &AppState,
    user: &AuthenticatedUser,
    project_id: Uuid,
) -> AppResult<Vec<FileResponse>> {
    let mut conn = state.db()?;
    load_project(&mut conn, project_id)?;
    let ctx = project_context(&mut conn, user, project_id)?;
    let filter = authorize(user.role, Action::ListFiles, &ctx).into_result()?;

    let mut query = files::table
        .filter(files::project_id.eq(project_id))
        .order(files::created_at.desc())
        .into_boxed();
    if let Some(RowFilter::UploadedBy(uploader)) = filter {
        query = query.filter(files::uploaded_by.eq(uploader));
    }

    let rows: Vec<StoredFile> = query.load(&mut conn)?;
    Ok(rows.into_iter().map(FileResponse::from).collect())
}

/// Stores the object, then records its metadata. When the metadata insert
/// fails the stored objects are removed again and the upload reports an
/// upstream failure.
pub async fn upload_file(
    state: &AppState,
    user: &AuthenticatedUser,
    input: UploadInput,
) -> AppResult<FileResponse> {
    let project_id = input.project_id;
    {
        let mut conn = state.db()?;
        load_project(&mut conn, project_id)?;
        let ctx = project_context(&mut conn, user, project_id)?;
        authorize(user.role, Action::UploadFile, &ctx).into_result()?;
    }

    let file_name = input.file_name.trim().to_string();
    if file_name.is_empty() {
        return Err(AppError::bad_request("File name is required"));
    }
    if input.content.bytes.is_empty() {
        return Err(AppError::bad_request("File must not be empty"));
    }

    let millis = next_key_millis(Utc::now().timestamp_millis());
    let extension = extension_for(&file_name, input.content.content_type.as_deref());
    let key = object_key(project_id, millis, &extension);
    let file_size = input.content.bytes.len() as i64;

    state
        .storage
        .put_object(&key, input.content.bytes, input.content.content_type)
        .await
        .map_err(|err| {
            tracing::error!(%project_id, %key, error = %err, "failed to store uploaded file");
            AppError::upstream(format!("failed to store file: {err}"))
        })?;
    let mut written = vec![key.clone()];

    let mut thumbnail_url = None;
    if let Some(thumbnail) = input.thumbnail.filter(|thumb| !thumb.bytes.is_empty()) {
        let thumb_ext = extension_for("", thumbnail.content_type.as_deref());
        let thumb_key = thumbnail_key(project_id, millis, &thumb_ext);
        match state
            .storage
            .put_object(&thumb_key, thumbnail.bytes, thumbnail.content_type)
            .await
        {
            Ok(()) => {
                thumbnail_url = Some(state.storage.public_url(&thumb_key));
                written.push(thumb_key);
            }
            Err(err) => {
                tracing::warn!(%project_id, key = %thumb_key, error = %err, "thumbnail upload failed; continuing without it");
            }
        }
    }

    let new_file = NewStoredFile {
        id: Uuid::new_v4(),
        file_name,
        file_url: key.clone(),
        file_size,
        thumbnail_url,
        latitude: input.placement.latitude,
        longitude: input.placement.longitude,
        height: input.placement.height,
        rotation: input.placement.rotation,
        project_id,
        uploaded_by: user.user_id,
    };

    let inserted = state.db().and_then(|mut conn| {
        diesel::insert_into(files::table)
            .values(&new_file)
            .get_result::<StoredFile>(&mut conn)
            .map_err(AppError::from)
    });

    match inserted {
        Ok(file) => {
            tracing::info!(
                file_id = %file.id,
                %project_id,
                uploaded_by = %user.user_id,
                size = file.file_size,
                "file uploaded"
            );
            Ok(file.into())
        }
        Err(err) => {
            tracing::error!(%project_id, %key, error = %err, "failed to record file metadata; removing stored object");
            if let Err(cleanup) = state.storage.delete_objects(&written).await {
                tracing::error!(
                    %project_id,
                    keys = ?written,
                    error = %cleanup,
                    "compensation failed; stored objects are orphaned"
                );
            }
            Err(AppError::upstream(format!("failed to record file metadata: {err}")))
        }
    }
}

/// Time-limited download URL for a file of `project_id`. A file that belongs
/// to another project is reported as missing.
pub async fn signed_url(
    state: &AppState,
    user: &AuthenticatedUser,
    project_id: Uuid,
    file_id: Uuid,
) -> AppResult<SignedUrlResponse> {
    let file = readable_file(state, user, project_id, file_id)?;
    let ttl = state.config.signed_url_ttl_seconds;

    let url = state
        .storage
        .presign_get_object(&file.file_url, Duration::from_secs(ttl))
        .await
        .map_err(|err| AppError::upstream(format!("failed to generate download URL: {err}")))?;

    Ok(SignedUrlResponse {
        url,
        expires_in: ttl,
        file_name: file.file_name,
        file_size: file.file_size,
    })
}

pub async fn download(
    state: &AppState,
    user: &AuthenticatedUser,
    project_id: Uuid,
    file_id: Uuid,
) -> AppResult<DownloadedFile> {
    let file = readable_file(state, user, project_id, file_id)?;
    let bytes = state
        .storage
        .get_object(&file.file_url)
        .await
        .map_err(|err| AppError::upstream(format!("failed to download file: {err}")))?;
    let content_type = mime_guess::from_path(&file.file_name)
        .first_or_octet_stream()
        .essence_str()
        .to_string();

    Ok(DownloadedFile {
        file,
        bytes,
        content_type,
    })
}

/// Deletes the stored object and then the row. When `project_id` is given the
/// file must belong to it.
pub async fn delete_file(
    state: &AppState,
    user: &AuthenticatedUser,
    file_id: Uuid,
    project_id: Option<Uuid>,
) -> AppResult<()> {
    let mut conn = state.db()?;
    let file: StoredFile = match project_id {
        Some(project_id) => load_project_file(&mut conn, project_id, file_id)?,
        None => files::table
            .find(file_id)
            .first(&mut conn)
            .optional()?
            .ok_or_else(|| AppError::not_found().with_message("File not found"))?,
    };
    let assigned = is_assigned(&mut conn, file.project_id, user.user_id)?;
    let ctx = PolicyContext::new(user.user_id)
        .assigned(assigned)
        .uploaded_by(file.uploaded_by);
    authorize(user.role, Action::DeleteFile, &ctx).into_result()?;
    drop(conn);

    state
        .storage
        .delete_object(&file.file_url)
        .await
        .map_err(|err| AppError::upstream(format!("failed to delete stored file: {err}")))?;
    if let Some(key) = thumbnail_storage_key(state, &file) {
        if let Err(err) = state.storage.delete_object(&key).await {
            tracing::warn!(file_id = %file.id, %key, error = %err, "failed to delete thumbnail");
        }
    }

    let mut conn = state.db()?;
    diesel::delete(files::table.find(file.id)).execute(&mut conn)?;

    tracing::info!(file_id = %file.id, project_id = %file.project_id, deleted_by = %user.user_id, "file deleted");
    Ok(())
}
