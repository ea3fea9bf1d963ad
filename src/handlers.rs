//! HTTP gateway handlers: static assets, uploads and the version probe.

use std::path::{Path, PathBuf};

use axum::{
    Json,
    body::Body,
    extract::{Multipart, Query, State, multipart::Field},
    http::{StatusCode, Uri, header},
    response::{IntoResponse, Response},
};
use serde::{Deserialize, Serialize};
use tokio::fs;
use tokio::io::AsyncWriteExt;
use tokio_util::io::ReaderStream;
use tracing::{debug, error, info, warn};
use uuid::Uuid;

use crate::AppState;
use crate::error::{CapabilityError, HttpError};

/// Health check response
#[derive(Debug, Serialize)]
pub struct HealthResponse {
    pub status: &'static str,
    pub sessions: usize,
}

/// Query parameters for `/api`
#[derive(Debug, Deserialize)]
pub struct ApiQuery {
    #[serde(rename = "fn")]
    pub function: Option<String>,
}

/// Editor version split into its numeric parts
#[derive(Debug, Serialize, PartialEq, Eq)]
pub struct VersionResponse {
    pub version: String,
    pub major: u64,
    pub minor: u64,
    pub patch: u64,
}

impl VersionResponse {
    pub fn parse(version: &str) -> Self {
        let mut parts = version
            .split('.')
            .map(|part| part.trim().parse::<u64>().unwrap_or(0));
        Self {
            version: version.to_string(),
            major: parts.next().unwrap_or(0),
            minor: parts.next().unwrap_or(0),
            patch: parts.next().unwrap_or(0),
        }
    }
}

/// Query parameters for static files
#[derive(Debug, Deserialize)]
pub struct StaticQuery {
    #[serde(default)]
    pub download: Option<String>,
}

/// An uploaded part parked in the temp directory.
struct StagedUpload {
    original_name: String,
    temp_path: PathBuf,
}

// ============================================================================
// Helper functions
// ============================================================================

/// Strip path separators and control characters from an uploaded filename.
fn sanitize_filename(filename: &str) -> Option<String> {
    let sanitized: String = filename
        .chars()
        .filter(|c| !c.is_control())
        .map(|c| match c {
            '/' | '\\' | ':' | '*' | '?' | '"' | '<' | '>' | '|' => '_',
            _ => c,
        })
        .collect();

    let sanitized = sanitized.trim_matches(|c| c == '.' || c == ' ');
    if sanitized.is_empty() {
        return None;
    }

    Some(sanitized.to_string())
}

/// `report.pdf` -> `report (old).pdf`
fn backup_path(path: &Path) -> PathBuf {
    let stem = path
        .file_stem()
        .map(|s| s.to_string_lossy().into_owned())
        .unwrap_or_default();
    let name = match path.extension() {
        Some(ext) => format!("{} (old).{}", stem, ext.to_string_lossy()),
        None => format!("{} (old)", stem),
    };
    path.with_file_name(name)
}

/// Map a request path to a path relative to the static root.
fn static_target(config: &crate::Config, request_path: &str) -> String {
    if let Some(alias) = config.alias_for(request_path) {
        return alias.to_string();
    }

    let last_segment = request_path.rsplit('/').next().unwrap_or_default();
    if last_segment.contains('.') {
        request_path.to_string()
    } else {
        format!("{}/index.html", request_path.trim_end_matches('/'))
    }
}

fn plain_text(status: StatusCode, body: &'static str) -> Response {
    (status, [(header::CONTENT_TYPE, "text/plain")], body).into_response()
}

fn not_found_page() -> Response {
    (
        StatusCode::NOT_FOUND,
        [(header::CONTENT_TYPE, "text/html")],
        "<h1>404 Not Found</h1>",
    )
        .into_response()
}

/// Move a staged upload into place, keeping one backup of what it replaces.
async fn place_upload(staged: &StagedUpload, dest_dir: &Path) -> Result<PathBuf, HttpError> {
    let file_name = sanitize_filename(&staged.original_name).ok_or_else(|| {
        HttpError::BadRequest(format!("Invalid filename: {}", staged.original_name))
    })?;
    let final_path = dest_dir.join(&file_name);

    if let Ok(metadata) = fs::symlink_metadata(&final_path).await {
        if metadata.is_dir() {
            return Err(HttpError::BadRequest(format!(
                "A directory named {file_name} already exists"
            )));
        }
        let backup = backup_path(&final_path);
        if fs::symlink_metadata(&backup).await.is_ok() {
            fs::remove_file(&backup).await?;
        }
        debug!("Backing up {} to {}", final_path.display(), backup.display());
        fs::rename(&final_path, &backup).await?;
    }

    fs::rename(&staged.temp_path, &final_path).await?;
    Ok(final_path)
}

/// Stream one multipart file part into the temp directory.
async fn stage_field(
    state: &AppState,
    mut field: Field<'_>,
) -> Result<StagedUpload, HttpError> {
    let original_name = field.file_name().unwrap_or("upload").to_string();
    let temp_path = state.temp_dir().join(format!(".upload-{}", Uuid::new_v4()));
    let mut temp_file = fs::File::create(&temp_path).await?;

    let mut total_size = 0u64;
    loop {
        let chunk = match field.chunk().await {
            Ok(Some(chunk)) => chunk,
            Ok(None) => break,
            Err(e) => {
                let _ = fs::remove_file(&temp_path).await;
                return Err(HttpError::BadRequest(e.to_string()));
            }
        };
        total_size = total_size.saturating_add(chunk.len() as u64);
        if total_size > state.config.max_upload_size {
            let _ = fs::remove_file(&temp_path).await;
            return Err(HttpError::FileTooLarge {
                size: total_size,
                limit: state.config.max_upload_size,
            });
        }
        temp_file.write_all(&chunk).await?;
    }
    temp_file.flush().await?;

    debug!("Staged {} ({} bytes)", original_name, total_size);
    Ok(StagedUpload {
        original_name,
        temp_path,
    })
}

async fn discard(staged: &[StagedUpload]) {
    for upload in staged {
        let _ = fs::remove_file(&upload.temp_path).await;
    }
}

// ============================================================================
// Handlers
// ============================================================================

/// GET /health - Health check endpoint
pub async fn health(State(state): State<AppState>) -> Json<HealthResponse> {
    Json(HealthResponse {
        status: "ok",
        sessions: state.hub.session_count(),
    })
}

/// GET /api?fn=version - Editor version probe
pub async fn api(
    State(state): State<AppState>,
    Query(query): Query<ApiQuery>,
) -> Result<Json<VersionResponse>, HttpError> {
    match query.function.as_deref() {
        Some("version") => Ok(Json(VersionResponse::parse(&state.config.editor_version))),
        other => Err(HttpError::NotFound(format!(
            "api function {}",
            other.unwrap_or("<none>")
        ))),
    }
}

/// GET /* - Static file lookup relative to the root
pub async fn serve_static(
    State(state): State<AppState>,
    uri: Uri,
    Query(query): Query<StaticQuery>,
) -> Result<Response, HttpError> {
    let request_path = urlencoding::decode(uri.path())
        .map(|p| p.into_owned())
        .unwrap_or_else(|_| uri.path().to_string());
    let target = static_target(&state.config, &request_path);

    let path = match state.workspace.resolve(&target).await {
        Ok(path) => path,
        Err(CapabilityError::PathEscape(_)) => return Err(HttpError::PathTraversal),
        Err(e) => {
            debug!("Static lookup for {:?} failed: {}", request_path, e);
            return Ok(not_found_page());
        }
    };

    let metadata = match fs::metadata(&path).await {
        Ok(metadata) if metadata.is_file() => metadata,
        _ => return Ok(not_found_page()),
    };
    let file = fs::File::open(&path).await?;

    let mime = mime_guess::from_path(&path)
        .first_or_octet_stream()
        .to_string();

    let mut response = (
        StatusCode::OK,
        [
            (header::CONTENT_TYPE, mime),
            (header::CONTENT_LENGTH, metadata.len().to_string()),
        ],
        Body::from_stream(ReaderStream::new(file)),
    )
        .into_response();

    if query.download.as_deref() == Some("true") {
        let file_name = path
            .file_name()
            .map(|n| n.to_string_lossy().replace('"', "'"))
            .unwrap_or_default();
        if let Ok(value) = format!("attachment; filename=\"{}\"", file_name).parse() {
            response
                .headers_mut()
                .insert(header::CONTENT_DISPOSITION, value);
        }
    }

    Ok(response)
}

/// POST /upload - Multipart upload into a named directory
///
/// Expects a `directory` text field and one or more `files` parts.
pub async fn upload(State(state): State<AppState>, mut multipart: Multipart) -> Response {
    let mut directory: Option<String> = None;
    let mut staged: Vec<StagedUpload> = Vec::new();

    loop {
        let field = match multipart.next_field().await {
            Ok(Some(field)) => field,
            Ok(None) => break,
            Err(e) => {
                error!("Error parsing form data: {}", e);
                discard(&staged).await;
                return plain_text(StatusCode::INTERNAL_SERVER_ERROR, "Error uploading files.");
            }
        };

        let name = field.name().map(str::to_string);
        match name.as_deref() {
            Some("directory") => match field.text().await {
                Ok(text) => directory = Some(text),
                Err(e) => {
                    error!("Error parsing form data: {}", e);
                    discard(&staged).await;
                    return plain_text(StatusCode::INTERNAL_SERVER_ERROR, "Error uploading files.");
                }
            },
            Some("files") => match stage_field(&state, field).await {
                Ok(upload) => staged.push(upload),
                Err(e) => {
                    error!("Error receiving upload: {}", e);
                    discard(&staged).await;
                    return e.into_response();
                }
            },
            other => debug!("Ignoring unexpected form field {:?}", other),
        }
    }

    let Some(directory) = directory.filter(|d| !d.trim().is_empty()) else {
        discard(&staged).await;
        return plain_text(StatusCode::BAD_REQUEST, "Directory name not provided.");
    };

    let dest_dir = match state.workspace.resolve(&directory).await {
        Ok(dir) => dir,
        Err(e) => {
            warn!("Rejected upload directory {:?}: {}", directory, e);
            discard(&staged).await;
            return HttpError::from(e).into_response();
        }
    };
    if let Err(e) = fs::create_dir_all(&dest_dir).await {
        error!("Failed to create upload directory {}: {}", dest_dir.display(), e);
        discard(&staged).await;
        return HttpError::Io(e).into_response();
    }

    for upload in &staged {
        match place_upload(upload, &dest_dir).await {
            Ok(path) => info!("Uploaded {}", path.display()),
            Err(e) => {
                error!("Error processing file {}: {}", upload.original_name, e);
                let _ = fs::remove_file(&upload.temp_path).await;
            }
        }
    }

    plain_text(StatusCode::OK, "Files uploaded.")
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::Config;
    use crate::routes::app;
    use axum::body::to_bytes;
    use axum::http::Request;
    use tempfile::TempDir;
    use tower::ServiceExt;

    const BOUNDARY: &str = "companion-test-boundary";

    async fn state() -> (TempDir, AppState) {
        let dir = TempDir::new().unwrap();
        let state = AppState::new(dir.path(), Config::default(), "127.0.0.1").unwrap();
        state.ensure_directories().await.unwrap();
        (dir, state)
    }

    async fn body_string(response: Response) -> String {
        let bytes = to_bytes(response.into_body(), usize::MAX).await.unwrap();
        String::from_utf8(bytes.to_vec()).unwrap()
    }

    fn multipart_body(directory: Option<&str>, files: &[(&str, &str)]) -> String {
        let mut body = String::new();
        if let Some(dir) = directory {
            body.push_str(&format!(
                "--{BOUNDARY}\r\nContent-Disposition: form-data; name=\"directory\"\r\n\r\n{dir}\r\n"
            ));
        }
        for (name, content) in files {
            body.push_str(&format!(
                "--{BOUNDARY}\r\nContent-Disposition: form-data; name=\"files\"; filename=\"{name}\"\r\nContent-Type: application/octet-stream\r\n\r\n{content}\r\n"
            ));
        }
        body.push_str(&format!("--{BOUNDARY}--\r\n"));
        body
    }

    fn upload_request(body: String) -> Request<Body> {
        Request::builder()
            .method("POST")
            .uri("/upload")
            .header(
                header::CONTENT_TYPE,
                format!("multipart/form-data; boundary={BOUNDARY}"),
            )
            .body(Body::from(body))
            .unwrap()
    }

    #[test]
    fn test_sanitize_filename() {
        assert_eq!(sanitize_filename("notes.txt"), Some("notes.txt".to_string()));
        assert_eq!(
            sanitize_filename("foo/bar/baz.txt"),
            Some("foo_bar_baz.txt".to_string())
        );
        assert_eq!(sanitize_filename("a\0b\x01.txt"), Some("ab.txt".to_string()));
        assert_eq!(sanitize_filename(".."), None);
        assert_eq!(sanitize_filename(""), None);
        let r = sanitize_filename("../../etc/passwd").unwrap();
        assert!(!r.contains('/'));
    }

    #[test]
    fn test_backup_path() {
        assert_eq!(
            backup_path(Path::new("/d/report.pdf")),
            PathBuf::from("/d/report (old).pdf")
        );
        assert_eq!(
            backup_path(Path::new("/d/archive.tar.gz")),
            PathBuf::from("/d/archive.tar (old).gz")
        );
        assert_eq!(
            backup_path(Path::new("/d/Makefile")),
            PathBuf::from("/d/Makefile (old)")
        );
    }

    #[test]
    fn test_static_target() {
        let config = Config::default();
        assert_eq!(static_target(&config, "/"), "/index.html");
        assert_eq!(static_target(&config, "/Home/Editor"), "/Home/Editor/index.html");
        assert_eq!(static_target(&config, "/Home/Editor/"), "/Home/Editor/index.html");
        assert_eq!(static_target(&config, "/app.js"), "/app.js");
        assert_eq!(
            static_target(&config, "/export/1.1/linux"),
            "/Home/Editor/export/1.1/linux"
        );
    }

    #[test]
    fn test_version_parse() {
        assert_eq!(
            VersionResponse::parse("1.1.2837"),
            VersionResponse {
                version: "1.1.2837".to_string(),
                major: 1,
                minor: 1,
                patch: 2837
            }
        );
        assert_eq!(VersionResponse::parse("2").minor, 0);
    }

    #[tokio::test]
    async fn test_version_endpoint() {
        let (_dir, state) = state().await;
        let response = app(state)
            .oneshot(Request::get("/api?fn=version").body(Body::empty()).unwrap())
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);
        let json: serde_json::Value = serde_json::from_str(&body_string(response).await).unwrap();
        assert_eq!(
            json,
            serde_json::json!({"version": "1.1.2837", "major": 1, "minor": 1, "patch": 2837})
        );
    }

    #[tokio::test]
    async fn test_unknown_api_function() {
        let (_dir, state) = state().await;
        let response = app(state)
            .oneshot(Request::get("/api?fn=shutdown").body(Body::empty()).unwrap())
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::NOT_FOUND);
    }

    #[tokio::test]
    async fn test_static_index_and_mime() {
        let (dir, state) = state().await;
        std::fs::create_dir_all(dir.path().join("Home/Editor")).unwrap();
        std::fs::write(dir.path().join("Home/Editor/index.html"), "<p>editor</p>").unwrap();
        std::fs::write(dir.path().join("Home/Editor/my app.js"), "let x;").unwrap();
        let router = app(state);

        let response = router
            .clone()
            .oneshot(Request::get("/Home/Editor").body(Body::empty()).unwrap())
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);
        assert_eq!(response.headers()[header::CONTENT_TYPE], "text/html");
        assert_eq!(body_string(response).await, "<p>editor</p>");

        let response = router
            .oneshot(
                Request::get("/Home/Editor/my%20app.js")
                    .body(Body::empty())
                    .unwrap(),
            )
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);
        assert!(
            response.headers()[header::CONTENT_TYPE]
                .to_str()
                .unwrap()
                .contains("javascript")
        );
        assert!(response.headers().get(header::CONTENT_DISPOSITION).is_none());
    }

    #[tokio::test]
    async fn test_static_download_flag() {
        let (dir, state) = state().await;
        std::fs::write(dir.path().join("Home/data.json"), "{}").unwrap();

        let response = app(state)
            .oneshot(
                Request::get("/Home/data.json?download=true")
                    .body(Body::empty())
                    .unwrap(),
            )
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);
        assert_eq!(
            response.headers()[header::CONTENT_DISPOSITION],
            "attachment; filename=\"data.json\""
        );
    }

    #[tokio::test]
    async fn test_static_missing_is_404_page() {
        let (_dir, state) = state().await;
        let response = app(state)
            .oneshot(Request::get("/nope.css").body(Body::empty()).unwrap())
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::NOT_FOUND);
        assert_eq!(body_string(response).await, "<h1>404 Not Found</h1>");
    }

    #[tokio::test]
    async fn test_static_traversal_is_forbidden() {
        let (_dir, state) = state().await;
        let response = app(state)
            .oneshot(
                Request::get("/..%2F..%2Fetc%2Fpasswd")
                    .body(Body::empty())
                    .unwrap(),
            )
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::FORBIDDEN);
    }

    #[tokio::test]
    async fn test_upload_creates_directory_and_backs_up_collisions() {
        let (dir, state) = state().await;
        let router = app(state);

        let response = router
            .clone()
            .oneshot(upload_request(multipart_body(
                Some("Home/Docs"),
                &[("a.txt", "first"), ("b.md", "bee")],
            )))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);
        assert_eq!(body_string(response).await, "Files uploaded.");
        let docs = dir.path().join("Home/Docs");
        assert_eq!(std::fs::read_to_string(docs.join("a.txt")).unwrap(), "first");
        assert_eq!(std::fs::read_to_string(docs.join("b.md")).unwrap(), "bee");

        for content in ["second", "third"] {
            let response = router
                .clone()
                .oneshot(upload_request(multipart_body(
                    Some("Home/Docs"),
                    &[("a.txt", content)],
                )))
                .await
                .unwrap();
            assert_eq!(response.status(), StatusCode::OK);
        }

        assert_eq!(std::fs::read_to_string(docs.join("a.txt")).unwrap(), "third");
        assert_eq!(
            std::fs::read_to_string(docs.join("a (old).txt")).unwrap(),
            "second"
        );
        let temp_left = std::fs::read_dir(dir.path().join("temp")).unwrap().count();
        assert_eq!(temp_left, 0);
    }

    #[tokio::test]
    async fn test_upload_without_directory_is_rejected() {
        let (dir, state) = state().await;
        let response = app(state)
            .oneshot(upload_request(multipart_body(None, &[("a.txt", "x")])))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::BAD_REQUEST);
        assert_eq!(body_string(response).await, "Directory name not provided.");
        assert_eq!(std::fs::read_dir(dir.path().join("temp")).unwrap().count(), 0);
    }

    #[tokio::test]
    async fn test_upload_outside_root_is_rejected() {
        let (_dir, state) = state().await;
        let response = app(state)
            .oneshot(upload_request(multipart_body(
                Some("../escape"),
                &[("a.txt", "x")],
            )))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::FORBIDDEN);
    }

    #[tokio::test]
    async fn test_health_reports_sessions() {
        let (_dir, state) = state().await;
        let (_session, _rx) = state.hub.register();
        let response = app(state)
            .oneshot(Request::get("/health").body(Body::empty()).unwrap())
            .await
            .unwrap();
        let json: serde_json::Value = serde_json::from_str(&body_string(response).await).unwrap();
        assert_eq!(json, serde_json::json!({"status": "ok", "sessions": 1}));
    }
}
