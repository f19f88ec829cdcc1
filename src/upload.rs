//! Multipart upload handler and the streaming writer behind it.

use axum::body::Bytes;
use axum::extract::{Extension, Multipart, Query};
use axum::response::Json as JsonResponse;
use futures_util::stream::{Stream, StreamExt};
use serde::Deserialize;
use std::fmt::Display;
use std::io;
use std::path::PathBuf;
use std::pin::pin;
use std::sync::Arc;
use tokio::fs::{self, File};
use tokio::io::{AsyncWriteExt, BufWriter};
use tracing::{error, info, warn};

use crate::config::UPLOAD_CHUNK_SIZE;
use crate::error::{ApiError, MessageBody};
use crate::storage::{Storage, StorageError, is_regular_file};

pub const UPLOAD_FAILURE: &str = "There was an error uploading the file";

#[derive(Deserialize)]
pub(crate) struct UploadQuery {
    #[serde(default)]
    upload_path: String,
}

#[derive(Debug)]
pub struct UploadedFile {
    pub path: PathBuf,
    pub bytes: u64,
}

/// Accepts a multipart `file` field and stores it under `upload_path`.
pub async fn upload_file(
    Query(UploadQuery { upload_path }): Query<UploadQuery>,
    Extension(storage): Extension<Arc<Storage>>,
    mut multipart: Multipart,
) -> Result<JsonResponse<MessageBody>, ApiError> {
    while let Some(field) = multipart.next_field().await.map_err(|err| {
        warn!(error = %err, "failed to read multipart field");
        ApiError::BadRequest("invalid multipart data".into())
    })? {
        if field.name() != Some("file") {
            continue;
        }
        let Some(name) = field.file_name().and_then(upload_file_name) else {
            return Err(ApiError::BadRequest("file name is required".into()));
        };

        return match store_upload(&storage, &upload_path, &name, field).await {
            Ok(uploaded) => {
                info!(
                    path = %uploaded.path.display(),
                    bytes = uploaded.bytes,
                    "upload complete"
                );
                Ok(JsonResponse(MessageBody::new(format!(
                    "Successfully uploaded {name}"
                ))))
            }
            Err(StorageError::AlreadyExists) => {
                Err(ApiError::Conflict(format!("File {upload_path} already exists")))
            }
            Err(StorageError::Io(err)) => {
                error!(upload_path, error = %err, "upload failed");
                Err(ApiError::Internal(UPLOAD_FAILURE.into()))
            }
            Err(err) => Err(err.into()),
        };
    }

    Err(ApiError::BadRequest("file is required".into()))
}

/// Last path segment of a client supplied file name.
pub fn upload_file_name(raw: &str) -> Option<String> {
    let name = raw.rsplit(['/', '\\']).next()?.trim();
    match name {
        "" | "." | ".." => None,
        name => Some(name.to_string()),
    }
}

/// Streams `content` into `<upload_path>/<file_name>`.
///
/// Refuses with [`StorageError::AlreadyExists`] when `upload_path` itself is
/// a regular file. The check is on the directory argument, so uploading the
/// same name twice into one directory overwrites. A write that fails midway
/// leaves the partial file behind.
pub async fn store_upload<S, E>(
    storage: &Storage,
    upload_path: &str,
    file_name: &str,
    content: S,
) -> Result<UploadedFile, StorageError>
where
    S: Stream<Item = Result<Bytes, E>>,
    E: Display,
{
    let directory = storage.resolve_checked(upload_path).await?;
    if is_regular_file(&directory).await {
        return Err(StorageError::AlreadyExists);
    }
    let file_name = upload_file_name(file_name).ok_or(StorageError::PathEscape)?;
    let target = directory.join(file_name);
    storage.check_resolved(&target).await?;

    let write_result: Result<u64, StorageError> = async {
        fs::create_dir_all(&directory).await?;
        let file = File::create(&target).await?;
        let mut writer = BufWriter::with_capacity(UPLOAD_CHUNK_SIZE, file);
        let mut content = pin!(content);
        let mut written: u64 = 0;
        while let Some(chunk) = content.next().await {
            let chunk = chunk.map_err(|err| io::Error::other(err.to_string()))?;
            writer.write_all(&chunk).await?;
            written += chunk.len() as u64;
        }
        writer.flush().await?;
        Ok(written)
    }
    .await;

    match write_result {
        Ok(bytes) => Ok(UploadedFile {
            path: target,
            bytes,
        }),
        Err(err) => {
            error!(path = %target.display(), error = %err, "upload write failed");
            Err(err)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::body::Body as AxumBody;
    use axum::extract::FromRequest;
    use axum::http::{Request, StatusCode, header};
    use futures_util::stream;
    use tempfile::tempdir;

    use crate::storage::PathPolicy;

    const BOUNDARY: &str = "file-drop-boundary";

    fn make_storage() -> (tempfile::TempDir, Arc<Storage>) {
        let temp = tempdir().expect("tempdir");
        let root = temp.path().join("data");
        std::fs::create_dir_all(&root).expect("create data root");
        (temp, Arc::new(Storage::new(root, PathPolicy::Confined)))
    }

    fn chunks(parts: &[&'static str]) -> impl Stream<Item = Result<Bytes, io::Error>> {
        stream::iter(
            parts
                .iter()
                .map(|part| Ok(Bytes::from_static(part.as_bytes())))
                .collect::<Vec<_>>(),
        )
    }

    async fn multipart_body(file_name: &str, content: &str) -> Multipart {
        let body = format!(
            "--{BOUNDARY}\r\n\
             Content-Disposition: form-data; name=\"file\"; filename=\"{file_name}\"\r\n\
             Content-Type: application/octet-stream\r\n\r\n\
             {content}\r\n\
             --{BOUNDARY}--\r\n"
        );
        let request = Request::builder()
            .method("POST")
            .header(
                header::CONTENT_TYPE,
                format!("multipart/form-data; boundary={BOUNDARY}"),
            )
            .body(AxumBody::from(body))
            .expect("request");
        Multipart::from_request(request, &())
            .await
            .unwrap_or_else(|_| panic!("multipart extraction failed"))
    }

    #[test]
    fn file_name_keeps_last_segment() {
        assert_eq!(upload_file_name("report.pdf").as_deref(), Some("report.pdf"));
        assert_eq!(upload_file_name("C:\\tmp\\a.txt").as_deref(), Some("a.txt"));
        assert_eq!(upload_file_name("../../etc/passwd").as_deref(), Some("passwd"));
        assert_eq!(upload_file_name("dir/"), None);
        assert_eq!(upload_file_name(".."), None);
    }

    #[tokio::test]
    async fn store_upload_creates_directories_and_lists() {
        let (_temp, storage) = make_storage();
        let uploaded = store_upload(&storage, "a/b", "c.txt", chunks(&["hello ", "world"]))
            .await
            .expect("upload");
        assert_eq!(uploaded.bytes, 11);
        assert_eq!(uploaded.path, storage.root_path().join("a/b/c.txt"));
        assert_eq!(std::fs::read(&uploaded.path).expect("read"), b"hello world");

        let files = storage.list_files().await.expect("list");
        assert_eq!(files, vec!["a/b/c.txt"]);
    }

    #[tokio::test]
    async fn upload_path_naming_a_file_already_exists() {
        let (_temp, storage) = make_storage();
        store_upload(&storage, "", "notes.txt", chunks(&["v1"]))
            .await
            .expect("first upload");

        let result = store_upload(&storage, "notes.txt", "notes.txt", chunks(&["v2"])).await;
        assert!(matches!(result, Err(StorageError::AlreadyExists)));
        assert_eq!(
            std::fs::read(storage.root_path().join("notes.txt")).expect("read"),
            b"v1"
        );
    }

    #[tokio::test]
    async fn failing_stream_is_io_error() {
        let (_temp, storage) = make_storage();
        let content = stream::iter(vec![
            Ok(Bytes::from_static(b"partial")),
            Err(io::Error::other("connection reset")),
        ]);
        let result = store_upload(&storage, "", "broken.bin", content).await;
        assert!(matches!(result, Err(StorageError::Io(_))));
    }

    #[tokio::test]
    async fn store_upload_rejects_escaping_directory() {
        let (_temp, storage) = make_storage();
        let result = store_upload(&storage, "../outside", "x.txt", chunks(&["x"])).await;
        assert!(matches!(result, Err(StorageError::PathEscape)));
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn store_upload_refuses_symlinked_target() {
        use std::os::unix::fs::symlink;

        let (temp, storage) = make_storage();
        let inbox = storage.root_path().join("inbox");
        std::fs::create_dir_all(&inbox).expect("mkdir");
        let outside = temp.path().join("outside.txt");
        std::fs::write(&outside, b"original").expect("write outside file");
        symlink(&outside, inbox.join("report.txt")).expect("symlink");

        let result = store_upload(&storage, "inbox", "report.txt", chunks(&["overwritten"])).await;
        assert!(matches!(result, Err(StorageError::PathEscape)));
        assert_eq!(std::fs::read(&outside).expect("read"), b"original");
    }

    #[tokio::test]
    async fn concurrent_uploads_to_distinct_paths() {
        let (_temp, storage) = make_storage();
        let mut tasks = Vec::new();
        for index in 0..8u8 {
            let storage = storage.clone();
            tasks.push(tokio::spawn(async move {
                let content = vec![index; 64 * 1024];
                let body = stream::iter(
                    content
                        .chunks(4096)
                        .map(|chunk| Ok::<_, io::Error>(Bytes::copy_from_slice(chunk)))
                        .collect::<Vec<_>>(),
                );
                store_upload(&storage, &format!("dir{index}"), "same.bin", body)
                    .await
                    .map(|uploaded| uploaded.path)
            }));
        }
        for (index, task) in tasks.into_iter().enumerate() {
            let path = task.await.expect("join").expect("upload");
            let content = std::fs::read(path).expect("read");
            assert_eq!(content, vec![index as u8; 64 * 1024]);
        }
    }

    #[tokio::test]
    async fn handler_reports_success_message() {
        let (_temp, storage) = make_storage();
        let multipart = multipart_body("hello.txt", "hi there").await;
        let JsonResponse(body) = upload_file(
            Query(UploadQuery {
                upload_path: "inbox".into(),
            }),
            Extension(storage.clone()),
            multipart,
        )
        .await
        .expect("upload");
        assert_eq!(body, MessageBody::new("Successfully uploaded hello.txt"));
        assert_eq!(
            std::fs::read(storage.root_path().join("inbox/hello.txt")).expect("read"),
            b"hi there"
        );
    }

    #[tokio::test]
    async fn handler_reports_conflict_on_file_upload_path() {
        let (_temp, storage) = make_storage();
        std::fs::write(storage.root_path().join("taken"), b"x").expect("write");
        let multipart = multipart_body("hello.txt", "hi").await;
        let result = upload_file(
            Query(UploadQuery {
                upload_path: "taken".into(),
            }),
            Extension(storage),
            multipart,
        )
        .await;
        let err = result.expect_err("conflict");
        assert_eq!(err.status(), StatusCode::CONFLICT);
        assert_eq!(err.message(), "File taken already exists");
    }

    #[tokio::test]
    async fn handler_hides_io_failure_behind_upload_message() {
        let (_temp, storage) = make_storage();
        std::fs::write(storage.root_path().join("plain"), b"x").expect("write");
        let multipart = multipart_body("hello.txt", "hi").await;
        let result = upload_file(
            Query(UploadQuery {
                upload_path: "plain/nested".into(),
            }),
            Extension(storage),
            multipart,
        )
        .await;
        let err = result.expect_err("io failure");
        assert_eq!(err.status(), StatusCode::INTERNAL_SERVER_ERROR);
        assert_eq!(err.message(), UPLOAD_FAILURE);
    }
}
