//! Handlers for listing, downloading and renaming files.

use axum::body::Body as AxumBody;
use axum::extract::{Extension, Query};
use axum::http::{HeaderMap, HeaderValue, StatusCode, header};
use axum::response::{IntoResponse, Json as JsonResponse, Response};
use httpdate::fmt_http_date;
use serde::{Deserialize, Serialize};
use std::io::ErrorKind;
use std::path::Path;
use std::sync::Arc;
use tokio::fs::File;
use tokio_util::io::ReaderStream;
use tracing::info;

use crate::archive::{ARCHIVE_CONTENT_TYPE, ARCHIVE_NAME, build_archive};
use crate::error::{ApiError, MessageBody};
use crate::matcher::{DownloadQuery, Matches, find_matches};
use crate::storage::{Storage, StorageError, base_name};

#[derive(Deserialize)]
pub(crate) struct DownloadParams {
    filename: String,
}

#[derive(Deserialize)]
pub(crate) struct RenameParams {
    source_path: String,
    destination_path: String,
}

#[derive(Serialize, Debug)]
pub struct FileList {
    pub files: Vec<String>,
}

/// Lists every file under the data root.
pub async fn list_files(
    Extension(storage): Extension<Arc<Storage>>,
) -> Result<JsonResponse<FileList>, ApiError> {
    let files = storage.list_files().await?;
    info!(count = files.len(), "list files");
    Ok(JsonResponse(FileList { files }))
}

/// Downloads one file, or a zip of every file a wildcard query matches.
pub async fn download_file(
    Query(DownloadParams { filename }): Query<DownloadParams>,
    Extension(storage): Extension<Arc<Storage>>,
) -> Result<Response, ApiError> {
    let not_found = || ApiError::NotFound(format!("File {filename} not found"));
    let query = DownloadQuery::parse(&filename);

    match find_matches(&storage, &query).await? {
        Matches::None => Err(not_found()),
        Matches::One(path) => {
            let response = single_file_response(&path).await.map_err(|err| match err {
                StorageError::NotFound => not_found(),
                other => other.into(),
            })?;
            info!(filename, "download file");
            Ok(response)
        }
        Matches::Many(paths) => {
            let count = paths.len();
            let bytes = build_archive(paths).await?;
            info!(filename, count, size = bytes.len(), "download archive");
            let mut headers = HeaderMap::new();
            headers.insert(
                header::CONTENT_TYPE,
                HeaderValue::from_static(ARCHIVE_CONTENT_TYPE),
            );
            headers.insert(
                header::CONTENT_DISPOSITION,
                header_value(&content_disposition(ARCHIVE_NAME))?,
            );
            Ok((StatusCode::OK, headers, AxumBody::from(bytes)).into_response())
        }
    }
}

/// Moves a file, refusing to overwrite.
pub async fn rename_file(
    Query(RenameParams {
        source_path,
        destination_path,
    }): Query<RenameParams>,
    Extension(storage): Extension<Arc<Storage>>,
) -> Result<JsonResponse<MessageBody>, ApiError> {
    match storage.rename_file(&source_path, &destination_path).await {
        Ok(renamed) => {
            info!(source_path, destination_path, "rename file");
            Ok(JsonResponse(MessageBody::new(format!(
                "File {} renamed to {}",
                renamed.from, renamed.to
            ))))
        }
        Err(StorageError::NotFound) => Err(ApiError::NotFound(
            "File source path does not exist".into(),
        )),
        Err(StorageError::AlreadyExists) => Err(ApiError::Conflict(
            "File in destination already exists".into(),
        )),
        Err(err) => Err(err.into()),
    }
}

async fn single_file_response(path: &Path) -> Result<Response, StorageError> {
    let file = File::open(path).await.map_err(|err| match err.kind() {
        ErrorKind::NotFound => StorageError::NotFound,
        _ => StorageError::Io(err),
    })?;
    let metadata = file.metadata().await?;

    let mut headers = HeaderMap::new();
    headers.insert(
        header::CONTENT_TYPE,
        HeaderValue::from_static("application/octet-stream"),
    );
    headers.insert(header::CONTENT_LENGTH, HeaderValue::from(metadata.len()));
    if let Ok(value) = HeaderValue::from_str(&content_disposition(&base_name(path))) {
        headers.insert(header::CONTENT_DISPOSITION, value);
    }
    if let Ok(modified) = metadata.modified()
        && let Ok(value) = HeaderValue::from_str(&fmt_http_date(modified))
    {
        headers.insert(header::LAST_MODIFIED, value);
    }

    let stream = ReaderStream::new(file);
    Ok((StatusCode::OK, headers, AxumBody::from_stream(stream)).into_response())
}

fn header_value(value: &str) -> Result<HeaderValue, ApiError> {
    HeaderValue::from_str(value).map_err(|_| ApiError::Internal("failed to build headers".into()))
}

/// `attachment` disposition; names outside plain ASCII also get an
/// RFC 5987 `filename*` parameter.
pub fn content_disposition(name: &str) -> String {
    let plain = name
        .chars()
        .all(|c| c.is_ascii_graphic() && c != '"' && c != '\\' || c == ' ');
    if plain {
        return format!("attachment; filename=\"{name}\"");
    }

    let fallback: String = name
        .chars()
        .map(|c| {
            if c.is_ascii_graphic() && c != '"' && c != '\\' {
                c
            } else {
                '_'
            }
        })
        .collect();
    let mut encoded = String::with_capacity(name.len() * 3);
    for byte in name.bytes() {
        if byte.is_ascii_alphanumeric() || b"!#$&+-.^_`|~".contains(&byte) {
            encoded.push(byte as char);
        } else {
            encoded.push_str(&format!("%{byte:02X}"));
        }
    }
    format!("attachment; filename=\"{fallback}\"; filename*=UTF-8''{encoded}")
}
