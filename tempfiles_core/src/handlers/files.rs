use axum::{
    body::Body,
    extract::{MatchedPath, Multipart, Path, State},
    http::{header, HeaderMap, HeaderValue, StatusCode},
    response::{IntoResponse, Response},
    Json,
};
use serde::Serialize;
use tokio_util::io::ReaderStream;
use tracing::info;

use crate::{
    error::{AppError, Result},
    files::{FileDescriptor, FileRecord, FileStatus},
    models::ApiResponse,
    utils::{format_bytes, format_duration},
    AppState,
};

#[derive(Debug, Serialize)]
pub struct FileUploadResponse {
    pub id: String,
    pub original_name: String,
    pub content_type: String,
    pub size_bytes: u64,
    pub size_human: String,
    pub created_at: String,
    pub expires_at: String,
    pub expires_in: String,
    pub download_url: String,
}

impl From<FileDescriptor> for FileUploadResponse {
    fn from(descriptor: FileDescriptor) -> Self {
        Self {
            size_human: format_bytes(descriptor.size_bytes),
            created_at: descriptor.created_at.to_rfc3339(),
            expires_at: descriptor.expires_at.to_rfc3339(),
            expires_in: format_duration(descriptor.expires_at - descriptor.created_at),
            id: descriptor.id,
            original_name: descriptor.original_name,
            content_type: descriptor.content_type,
            size_bytes: descriptor.size_bytes,
            download_url: descriptor.download_url,
        }
    }
}

#[derive(Debug, Serialize)]
pub struct FileInfoResponse {
    pub id: String,
    pub original_name: String,
    pub content_type: String,
    pub size_bytes: u64,
    pub size_human: String,
    pub status: FileStatus,
    pub expires_at: String,
    pub expires_in: String,
}

/// `POST /` with a multipart `file` field.
pub async fn upload_file(
    State(state): State<AppState>,
    mut multipart: Multipart,
) -> Result<Json<ApiResponse<FileUploadResponse>>> {
    while let Some(field) = multipart.next_field().await.map_err(|e| {
        AppError::BadRequest(format!("Failed to read multipart field: {}", e))
    })? {
        if field.name() != Some("file") {
            continue;
        }

        let filename = field
            .file_name()
            .ok_or_else(|| AppError::BadRequest("Missing filename".to_string()))?
            .to_string();
        let content_type = field.content_type().map(str::to_string);

        let descriptor = state
            .file_manager
            .accept(&filename, content_type.as_deref(), field, None)
            .await?;

        return Ok(Json(ApiResponse::success(descriptor.into())));
    }

    Err(AppError::BadRequest("No file found in request".to_string()))
}

/// `PUT /:name` with the raw file as the body.
pub async fn upload_raw(
    State(state): State<AppState>,
    Path(name): Path<String>,
    headers: HeaderMap,
    body: Body,
) -> Result<Json<ApiResponse<FileUploadResponse>>> {
    store_raw(&state, &name, &headers, body).await
}

/// `PUT` on a fixed route such as `/health`; the path is the file name.
pub async fn upload_raw_at_route(
    State(state): State<AppState>,
    path: MatchedPath,
    headers: HeaderMap,
    body: Body,
) -> Result<Json<ApiResponse<FileUploadResponse>>> {
    let name = path.as_str().trim_start_matches('/');
    store_raw(&state, name, &headers, body).await
}

async fn store_raw(
    state: &AppState,
    name: &str,
    headers: &HeaderMap,
    body: Body,
) -> Result<Json<ApiResponse<FileUploadResponse>>> {
    let declared_size = headers
        .get(header::CONTENT_LENGTH)
        .and_then(|v| v.to_str().ok())
        .and_then(|v| v.parse::<u64>().ok());
    let content_type = headers
        .get(header::CONTENT_TYPE)
        .and_then(|v| v.to_str().ok());

    let descriptor = state
        .file_manager
        .accept(name, content_type, body.into_data_stream(), declared_size)
        .await?;

    Ok(Json(ApiResponse::success(descriptor.into())))
}

/// `GET /:id/info` reports a file's metadata without downloading it.
pub async fn file_info(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> Result<Json<ApiResponse<FileInfoResponse>>> {
    let manager = &state.file_manager;

    match manager.status(&id).await? {
        FileStatus::Deleted => return Err(AppError::NotFound("File not found".to_string())),
        FileStatus::Expired => return Err(AppError::Gone("File has expired".to_string())),
        FileStatus::Active => {}
    }

    let record = manager.metadata(&id).await?;
    let remaining = record.remaining(manager.now());

    Ok(Json(ApiResponse::success(FileInfoResponse {
        size_human: format_bytes(record.size_bytes),
        status: FileStatus::Active,
        expires_at: record.expires_at.to_rfc3339(),
        expires_in: format_duration(remaining),
        id: record.id,
        original_name: record.original_name,
        content_type: record.content_type,
        size_bytes: record.size_bytes,
    })))
}

/// `GET /:id` streams the file back while it is live.
pub async fn download_file(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> Result<Response> {
    let (record, file) = state.file_manager.fetch(&id).await?;
    info!("Serving file {} ({} bytes)", record.id, record.size_bytes);

    let headers = download_headers(&record);
    let body = Body::from_stream(ReaderStream::new(file));

    Ok((StatusCode::OK, headers, body).into_response())
}

fn download_headers(record: &FileRecord) -> HeaderMap {
    let mut headers = HeaderMap::new();

    headers.insert(
        header::CONTENT_TYPE,
        HeaderValue::from_str(&record.content_type)
            .unwrap_or_else(|_| HeaderValue::from_static("application/octet-stream")),
    );
    headers.insert(header::CONTENT_LENGTH, HeaderValue::from(record.size_bytes));
    headers.insert(header::CACHE_CONTROL, HeaderValue::from_static("no-store"));

    headers.insert(
        header::CONTENT_DISPOSITION,
        HeaderValue::from_str(&content_disposition(&record.original_name))
            .unwrap_or_else(|_| HeaderValue::from_static("attachment")),
    );

    headers
}

/// ASCII `filename` for old clients plus an RFC 5987 `filename*` when the
/// name has anything else in it.
fn content_disposition(name: &str) -> String {
    let fallback: String = name
        .chars()
        .map(|c| match c {
            ' '..='~' if c != '"' && c != '\\' => c,
            _ => '_',
        })
        .collect();

    if name.is_ascii() && fallback == name {
        return format!("attachment; filename=\"{}\"", fallback);
    }

    let mut encoded = String::with_capacity(name.len() * 3);
    for byte in name.bytes() {
        if byte.is_ascii_alphanumeric() || b"!#$&+-.^_`|~".contains(&byte) {
            encoded.push(byte as char);
        } else {
            encoded.push_str(&format!("%{:02X}", byte));
        }
    }

    format!(
        "attachment; filename=\"{}\"; filename*=UTF-8''{}",
        fallback, encoded
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::DateTime;

    fn record(name: &str, content_type: &str) -> FileRecord {
        FileRecord {
            id: "AAAAAAAAAAAAAAAAAAAAAA".to_string(),
            original_name: name.to_string(),
            size_bytes: 10,
            content_type: content_type.to_string(),
            created_at: DateTime::from_timestamp(0, 0).unwrap(),
            expires_at: DateTime::from_timestamp(3600, 0).unwrap(),
        }
    }

    #[test]
    fn test_download_headers() {
        let headers = download_headers(&record("hello.txt", "text/plain"));

        assert_eq!(headers[header::CONTENT_TYPE], "text/plain");
        assert_eq!(headers[header::CONTENT_LENGTH], "10");
        assert_eq!(headers[header::CACHE_CONTROL], "no-store");
        assert_eq!(
            headers[header::CONTENT_DISPOSITION],
            "attachment; filename=\"hello.txt\""
        );
    }

    #[test]
    fn test_invalid_content_type_falls_back() {
        let headers = download_headers(&record("a.bin", "bad\ntype"));
        assert_eq!(headers[header::CONTENT_TYPE], "application/octet-stream");
    }

    #[test]
    fn test_content_disposition_encodes_non_ascii() {
        assert_eq!(
            content_disposition("naïve file.txt"),
            "attachment; filename=\"na_ve file.txt\"; filename*=UTF-8''na%C3%AFve%20file.txt"
        );
        assert_eq!(
            content_disposition("quote\".txt"),
            "attachment; filename=\"quote_.txt\"; filename*=UTF-8''quote%22.txt"
        );
    }

    #[test]
    fn test_upload_response_from_descriptor() {
        let descriptor = FileDescriptor::from_record(
            &record("hello.txt", "text/plain"),
            "https://files.example.com",
        );
        let response = FileUploadResponse::from(descriptor);

        assert_eq!(response.size_human, "10 B");
        assert_eq!(response.expires_in, "1 hour");
        assert_eq!(response.expires_at, "1970-01-01T01:00:00+00:00");
        assert_eq!(
            response.download_url,
            "https://files.example.com/AAAAAAAAAAAAAAAAAAAAAA"
        );
    }
}
