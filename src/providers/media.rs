use std::path::Path;
use std::time::Duration;

use reqwest::StatusCode;
use tracing::debug;

use crate::error::PipelineError;
use crate::pipeline::retry::{with_retry, RetryPolicy};
use crate::utils::http::get_http_client;

pub fn detect_mime_type(data: &[u8]) -> Option<String> {
    if data.len() > 12 {
        let ftyp = &data[4..12];
        if ftyp.starts_with(b"ftyp") {
            let brand = &ftyp[4..8];
            if brand == b"heic" || brand == b"heif" || brand == b"hevc" {
                return Some("image/heic".to_string());
            }
        }
    }

    infer::get(data).map(|kind| kind.mime_type().to_string())
}

pub fn mime_for_path(path: &Path) -> Option<&'static str> {
    let extension = path.extension()?.to_str()?.to_ascii_lowercase();
    match extension.as_str() {
        "png" => Some("image/png"),
        "jpg" | "jpeg" => Some("image/jpeg"),
        "webp" => Some("image/webp"),
        "heic" | "heif" => Some("image/heic"),
        _ => None,
    }
}

/// Prefers the sniffed type; falls back to the extension, then PNG.
pub fn resolve_image_mime(bytes: &[u8], path: Option<&Path>) -> String {
    detect_mime_type(bytes)
        .filter(|mime| mime.starts_with("image/"))
        .or_else(|| path.and_then(mime_for_path).map(str::to_string))
        .unwrap_or_else(|| "image/png".to_string())
}

const DOWNLOAD_MAX_ATTEMPTS: u32 = 3;
const DOWNLOAD_RETRY_DELAY_MS: u64 = 400;
const DOWNLOAD_TIMEOUT_SECS: u64 = 300;
const DOWNLOAD_ERROR_BODY_LIMIT: usize = 800;

pub fn truncate_for_log(value: &str, limit: usize) -> String {
    if value.chars().count() <= limit {
        return value.to_string();
    }
    let truncated: String = value.chars().take(limit).collect();
    format!("{truncated}... (truncated)")
}

fn should_retry_status(status: StatusCode) -> bool {
    status.is_server_error()
        || status == StatusCode::TOO_MANY_REQUESTS
        || status == StatusCode::REQUEST_TIMEOUT
}

fn should_retry_error(err: &reqwest::Error) -> bool {
    err.is_timeout() || err.is_connect()
}

/// One failed fetch; `retryable` decides whether `with_retry` tries again.
#[derive(Debug, thiserror::Error)]
#[error("{message}")]
struct DownloadFailure {
    message: String,
    retryable: bool,
}

impl DownloadFailure {
    fn new(message: String, retryable: bool) -> Self {
        Self { message, retryable }
    }

    fn from_status(label: &str, status: StatusCode) -> Self {
        Self::new(format!("{label}: status {status}"), should_retry_status(status))
    }
}

async fn fetch_once(
    url: &url::Url,
    label: &str,
    header: Option<(&str, &str)>,
) -> Result<Vec<u8>, DownloadFailure> {
    let mut request = get_http_client()
        .get(url.clone())
        .timeout(Duration::from_secs(DOWNLOAD_TIMEOUT_SECS));
    if let Some((name, value)) = header {
        request = request.header(name, value);
    }

    let response = request.send().await.map_err(|err| {
        let retry = should_retry_error(&err);
        debug!(
            "Fetch of {label} failed: timeout={}, connect={}: {}",
            err.is_timeout(),
            err.is_connect(),
            err.without_url()
        );
        DownloadFailure::new(format!("{label}: request failed"), retry)
    })?;

    let status = response.status();
    if !status.is_success() {
        let body = response.text().await.unwrap_or_default();
        debug!(
            "Download of {label} returned {}: {}",
            status,
            truncate_for_log(&body, DOWNLOAD_ERROR_BODY_LIMIT)
        );
        return Err(DownloadFailure::from_status(label, status));
    }

    let bytes = response.bytes().await.map_err(|err| {
        debug!("Failed to read {label} bytes: {}", err.without_url());
        DownloadFailure::new(format!("{label}: body read failed"), true)
    })?;
    if bytes.is_empty() {
        return Err(DownloadFailure::new(format!("{label}: empty body"), false));
    }
    Ok(bytes.to_vec())
}

/// Fetches a generated artifact right away; provider links expire within minutes.
///
/// `label` is what shows up in logs instead of the URL, which may carry signatures.
pub async fn download_artifact(
    url: &str,
    label: &str,
    header: Option<(&str, &str)>,
) -> Result<Vec<u8>, PipelineError> {
    let parsed = url::Url::parse(url)
        .map_err(|err| PipelineError::Download(format!("invalid {label} URL: {err}")))?;
    let policy = RetryPolicy::new(
        DOWNLOAD_MAX_ATTEMPTS,
        Duration::from_millis(DOWNLOAD_RETRY_DELAY_MS),
    );

    with_retry(
        &format!("download {label}"),
        policy,
        || fetch_once(&parsed, label, header),
        |failure: &DownloadFailure| failure.retryable,
    )
    .await
    .map_err(|failure| PipelineError::Download(failure.message))
}
