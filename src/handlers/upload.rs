//! File upload into the static tree.
//!
//! `POST /_/upload` takes a multipart form with a `file` field. The file is
//! streamed to `<static>/_/uploads/<random>/<sanitized name>` while its
//! SHA-256 is computed, so it is immediately served back by the static
//! file fallback.

use std::path::Path;

use axum::extract::multipart::{MultipartError, MultipartRejection};
use axum::extract::{Multipart, State};
use axum::http::StatusCode;
use axum::http::header::CONTENT_TYPE;
use axum::response::IntoResponse;
use sha2::{Digest, Sha256};
use tokio::fs::{self, File};
use tokio::io::AsyncWriteExt;
use tracing::{info, instrument, warn};

use crate::error::{AppError, AppResult};
use crate::state::AppState;
use crate::units::format_bytes;
use crate::utils::quick_id;

/// Form field carrying the file.
pub const FILE_FIELD: &str = "file";

/// Longest file name most filesystems accept, in bytes.
pub const MAX_FILENAME_BYTES: usize = 255;

/// Name used when nothing survives sanitization.
pub const UNNAMED_FILE: &str = "unnamed_file";

/// Random bytes in the per-upload directory name.
const UPLOAD_DIR_ID_BYTES: usize = 12;

const PARSE_FAILED: &str = "Could not parse multipart form";
const NO_FILE_FIELD: &str = "Error retrieving file from form";

#[instrument(skip_all)]
pub async fn upload(
    State(state): State<AppState>,
    multipart: Result<Multipart, MultipartRejection>,
) -> AppResult<impl IntoResponse> {
    let mut multipart = multipart.map_err(|e| {
        warn!(error = %e, "Rejected multipart request");
        AppError::BadRequest(PARSE_FAILED.to_string())
    })?;

    let mut field = loop {
        match multipart.next_field().await {
            Ok(Some(field)) if field.name() == Some(FILE_FIELD) => break field,
            Ok(Some(_)) => continue,
            Ok(None) => return Err(AppError::BadRequest(NO_FILE_FIELD.to_string())),
            Err(e) => return Err(form_error(&e)),
        }
    };

    let original = field.file_name().unwrap_or_default().to_string();
    let dir = state
        .config
        .upload_dir()
        .join(quick_id(UPLOAD_DIR_ID_BYTES).replace('=', "_"));
    let path = dir.join(sanitize_filename(&original));

    fs::create_dir_all(&dir).await.map_err(|e| {
        warn!(error = %e, dir = %dir.display(), "Error creating upload directory");
        AppError::Internal("Error creating upload directory".to_string())
    })?;

    let outcome = async {
        let mut file = File::create(&path).await.map_err(|e| {
            warn!(error = %e, path = %path.display(), "Error creating destination file");
            AppError::Internal("Error creating destination file".to_string())
        })?;

        let mut hasher = Sha256::new();
        let mut written: u64 = 0;
        while let Some(chunk) = field.chunk().await.map_err(|e| form_error(&e))? {
            hasher.update(&chunk);
            file.write_all(&chunk).await.map_err(write_error)?;
            written += chunk.len() as u64;
        }
        file.flush().await.map_err(write_error)?;

        Ok::<_, AppError>((written, format!("{:x}", hasher.finalize())))
    }
    .await;

    let (written, checksum) = match outcome {
        Ok(done) => done,
        Err(e) => {
            remove_upload_dir(&dir).await;
            return Err(e);
        }
    };

    info!(
        original = %original,
        path = %path.display(),
        bytes = written,
        sha256 = %checksum,
        "File uploaded"
    );

    Ok((
        StatusCode::OK,
        [(CONTENT_TYPE, "text/plain; charset=utf-8")],
        upload_message(&original, &path, written, &checksum),
    ))
}

fn upload_message(original: &str, path: &Path, written: u64, checksum: &str) -> String {
    format!(
        "Successfully uploaded file '{original}' as '{}' ({written} bytes / {}). SHA256 checksum: {checksum}",
        path.display(),
        format_bytes(written),
    )
}

/// Map a multipart stream error: an exceeded body limit stays 413,
/// everything else is a malformed form.
fn form_error(e: &MultipartError) -> AppError {
    if e.status() == StatusCode::PAYLOAD_TOO_LARGE {
        AppError::PayloadTooLarge(e.body_text())
    } else {
        warn!(error = %e, "Malformed multipart form");
        AppError::BadRequest(PARSE_FAILED.to_string())
    }
}

fn write_error(e: std::io::Error) -> AppError {
    warn!(error = %e, "Error writing file");
    AppError::Internal("Error writing file".to_string())
}

async fn remove_upload_dir(dir: &Path) {
    if let Err(e) = fs::remove_dir_all(dir).await {
        warn!(error = %e, dir = %dir.display(), "Could not clean up upload directory");
    }
}

fn is_reserved(c: char) -> bool {
    matches!(
        c,
        '\\' | '/'
            | ':'
            | '*'
            | '?'
            | '"'
            | '<'
            | '>'
            | '|'
            | '$'
            | '&'
            | ';'
            | '='
            | '%'
            | '\''
            | '`'
            | '~'
            | '!'
            | '@'
            | '#'
            | '^'
            | '('
            | ')'
            | '['
            | ']'
            | '{'
            | '}'
            | '+'
            | ','
    ) || c.is_control()
}

/// Make a client-supplied file name safe to store.
///
/// Whitespace runs become a single `_`, shell and path metacharacters and
/// control characters become `_`, leading/trailing `_`, spaces and dots are
/// trimmed, and the base name is shortened so the whole name fits in
/// [`MAX_FILENAME_BYTES`].
///
/// ```
/// use webprobe::handlers::sanitize_filename;
///
/// assert_eq!(sanitize_filename("my file (1).txt"), "my_file__1_.txt");
/// assert_eq!(sanitize_filename("../../etc/passwd"), "etc_passwd");
/// assert_eq!(sanitize_filename("..."), "unnamed_file");
/// ```
pub fn sanitize_filename(name: &str) -> String {
    let mut cleaned = String::with_capacity(name.len());
    let mut in_whitespace = false;
    for c in name.chars() {
        if c.is_whitespace() {
            if !in_whitespace {
                cleaned.push('_');
            }
            in_whitespace = true;
            continue;
        }
        in_whitespace = false;
        cleaned.push(if is_reserved(c) { '_' } else { c });
    }

    let trimmed = cleaned.trim_matches(is_edge_filler);
    if trimmed.is_empty() {
        return UNNAMED_FILE.to_string();
    }

    let (base, ext) = match trimmed.rfind('.') {
        Some(dot) => trimmed.split_at(dot),
        None => (trimmed, ""),
    };
    let ext = if ext.len() >= MAX_FILENAME_BYTES { "" } else { ext };

    let base = truncate_at_char_boundary(base, MAX_FILENAME_BYTES - ext.len());
    let name = if base.is_empty() {
        // Never produce a bare extension (a hidden file)
        truncate_at_char_boundary(trimmed, MAX_FILENAME_BYTES)
    } else if ext.is_empty() {
        base
    } else {
        return format!("{base}{ext}");
    };

    // A cut can expose filler that the first trim left inside the name
    name.trim_end_matches(is_edge_filler).to_string()
}

/// Characters never allowed at either end of a stored name.
fn is_edge_filler(c: char) -> bool {
    matches!(c, '_' | ' ' | '.')
}

fn truncate_at_char_boundary(s: &str, max: usize) -> &str {
    let mut cut = s.len().min(max);
    while !s.is_char_boundary(cut) {
        cut -= 1;
    }
    s.get(..cut).unwrap_or_default()
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;
    use std::path::PathBuf;
    use std::sync::Arc;

    use axum::Router;
    use axum::body::{Body, to_bytes};
    use axum::http::Request;
    use axum::routing::post;
    use tower::ServiceExt;

    use crate::config::Config;
    use crate::logging::{LogRecord, LogSink, LogTee};

    const BOUNDARY: &str = "XyZboundary";

    struct NullSink;

    impl LogSink for NullSink {
        fn write_record(&self, _record: &LogRecord) -> std::io::Result<()> {
            Ok(())
        }
    }

    fn app(static_dir: &Path) -> Router {
        let config = Config {
            static_dir: static_dir.to_path_buf(),
            ..Config::default()
        };
        let state = AppState::new(config, Arc::new(LogTee::new(NullSink)));
        Router::new()
            .route("/_/upload", post(upload))
            .with_state(state)
    }

    fn multipart_body(field: &str, filename: &str, content: &str) -> String {
        format!(
            "--{BOUNDARY}\r\n\
             Content-Disposition: form-data; name=\"{field}\"; filename=\"{filename}\"\r\n\
             Content-Type: application/octet-stream\r\n\r\n\
             {content}\r\n\
             --{BOUNDARY}--\r\n"
        )
    }

    async fn send(app: Router, content_type: &str, body: String) -> (StatusCode, String) {
        let response = app
            .oneshot(
                Request::post("/_/upload")
                    .header("content-type", content_type)
                    .body(Body::from(body))
                    .unwrap(),
            )
            .await
            .unwrap();
        let status = response.status();
        let body = to_bytes(response.into_body(), usize::MAX).await.unwrap();
        (status, String::from_utf8(body.to_vec()).unwrap())
    }

    fn multipart_type() -> String {
        format!("multipart/form-data; boundary={BOUNDARY}")
    }

    #[tokio::test]
    async fn test_upload_stores_file_and_reports_checksum() {
        let dir = tempfile::tempdir().unwrap();
        let (status, body) = send(
            app(dir.path()),
            &multipart_type(),
            multipart_body("file", "hello world.txt", "hello"),
        )
        .await;

        assert_eq!(status, StatusCode::OK);
        assert!(body.starts_with("Successfully uploaded file 'hello world.txt' as '"));
        assert!(body.contains("/_/uploads/"));
        assert!(body.contains("hello_world.txt' (5 bytes / 5 B)"));
        assert!(body.ends_with(
            "SHA256 checksum: 2cf24dba5fb0a30e26e83b2ac5b9e29e1b161e5c1fa7425e73043362938b9824"
        ));

        let stored_path = body
            .split('\'')
            .nth(3)
            .map(PathBuf::from)
            .unwrap();
        assert_eq!(std::fs::read_to_string(stored_path).unwrap(), "hello");
    }

    #[tokio::test]
    async fn test_upload_without_file_field() {
        let dir = tempfile::tempdir().unwrap();
        let (status, body) = send(
            app(dir.path()),
            &multipart_type(),
            multipart_body("other", "a.txt", "x"),
        )
        .await;

        assert_eq!(status, StatusCode::BAD_REQUEST);
        assert_eq!(body, "Error retrieving file from form\n");
    }

    #[tokio::test]
    async fn test_upload_not_multipart() {
        let dir = tempfile::tempdir().unwrap();
        let (status, body) = send(app(dir.path()), "text/plain", "hello".to_string()).await;

        assert_eq!(status, StatusCode::BAD_REQUEST);
        assert_eq!(body, "Could not parse multipart form\n");
    }

    #[test]
    fn test_sanitize_replaces_reserved_and_whitespace() {
        assert_eq!(sanitize_filename("my file (1).txt"), "my_file__1_.txt");
        assert_eq!(sanitize_filename("a\tb  c.txt"), "a_b_c.txt");
        assert_eq!(sanitize_filename("rm -rf $HOME;.sh"), "rm_-rf__HOME_.sh");
    }

    #[test]
    fn test_sanitize_path_traversal() {
        assert_eq!(sanitize_filename("../../etc/passwd"), "etc_passwd");
        assert_eq!(sanitize_filename("C:\\Windows\\x.dll"), "C__Windows_x.dll");
    }

    #[test]
    fn test_sanitize_empty_results() {
        assert_eq!(sanitize_filename(""), UNNAMED_FILE);
        assert_eq!(sanitize_filename("..."), UNNAMED_FILE);
        assert_eq!(sanitize_filename(" _ . "), UNNAMED_FILE);
    }

    #[test]
    fn test_sanitize_truncates_ascii() {
        let name = format!("{}.txt", "a".repeat(400));
        let sanitized = sanitize_filename(&name);

        assert_eq!(sanitized.len(), MAX_FILENAME_BYTES);
        assert!(sanitized.ends_with(".txt"));
    }

    #[test]
    fn test_sanitize_never_returns_bare_extension() {
        let name = format!("\u{1F600}.{}", "x".repeat(253));
        let sanitized = sanitize_filename(&name);

        assert!(sanitized.starts_with('\u{1F600}'));
        assert!(sanitized.len() <= MAX_FILENAME_BYTES);
    }

    #[test]
    fn test_sanitize_cut_never_ends_in_filler() {
        let name = format!("\u{1F600}.{}_y", "x".repeat(250));
        let sanitized = sanitize_filename(&name);
        assert!(sanitized.starts_with('\u{1F600}'));
        assert!(sanitized.len() <= MAX_FILENAME_BYTES);
        assert!(!sanitized.ends_with(['_', '.', ' ']), "{sanitized}");

        let name = format!("{}__tail", "x".repeat(254));
        let sanitized = sanitize_filename(&name);
        assert_eq!(sanitized, "x".repeat(254));
    }

    #[test]
    fn test_sanitize_truncates_on_char_boundary() {
        let name = format!("{}.bin", "é".repeat(200));
        let sanitized = sanitize_filename(&name);

        assert!(sanitized.len() <= MAX_FILENAME_BYTES);
        assert!(sanitized.ends_with(".bin"));
        assert!(sanitized.trim_end_matches(".bin").chars().all(|c| c == 'é'));
    }
}
