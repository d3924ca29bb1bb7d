//! HTTP retry helpers for engine calls.
//!
//! Control-plane calls to the engine (start, resume, pause, list) go
//! through [`send_json`] so that a briefly unavailable engine does not
//! fail an import outright. Progress polls use [`send_once`] instead:
//! the poll loop already retries on its next tick.

use std::time::Duration;

use serde::de::DeserializeOwned;

use crate::ArchiveError;

/// Default number of retry attempts for transient errors.
///
/// With exponential backoff (1s, 2s, 4s) the total wait before giving up
/// is 7 seconds.
pub const DEFAULT_MAX_RETRIES: u32 = 3;

/// Maximum length of a response body included in error messages.
const BODY_PREVIEW_LEN: usize = 300;

/// Sends a request, retrying transient failures, and parses the JSON
/// body into `T`.
///
/// The `build_request` closure is called on each attempt since request
/// builders are consumed by `.send()`.
///
/// Retries connection errors, timeouts, HTTP 429 and HTTP 5xx with
/// exponential backoff. HTTP 404 maps to [`ArchiveError::NotFound`]; any
/// other 4xx is returned immediately.
///
/// # Errors
///
/// Returns [`ArchiveError`] once retries are exhausted or on a permanent
/// failure.
pub async fn send_json<T, F>(build_request: F, max_retries: u32) -> Result<T, ArchiveError>
where
    T: DeserializeOwned,
    F: Fn() -> reqwest::RequestBuilder + Send + Sync,
{
    let response = send_inner(&build_request, max_retries).await?;
    let text = response.text().await?;
    Ok(serde_json::from_str(&text)?)
}

/// Sends a request once, without retry, and parses the JSON body.
///
/// # Errors
///
/// Returns [`ArchiveError`] on any failure.
pub async fn send_once<T, F>(build_request: F) -> Result<T, ArchiveError>
where
    T: DeserializeOwned,
    F: Fn() -> reqwest::RequestBuilder + Send + Sync,
{
    send_json(build_request, 0).await
}

/// Core retry loop. Returns the first 2xx/3xx response.
async fn send_inner<F>(
    build_request: &F,
    max_retries: u32,
) -> Result<reqwest::Response, ArchiveError>
where
    F: Fn() -> reqwest::RequestBuilder + Send + Sync,
{
    let mut attempt = 0;

    loop {
        if attempt > 0 {
            let delay = Duration::from_secs(1u64 << (attempt - 1));
            log::warn!("engine request retry {attempt}/{max_retries} in {delay:?}...");
            tokio::time::sleep(delay).await;
        }

        match build_request().send().await {
            Err(e) => {
                if is_transient(&e) && attempt < max_retries {
                    log::warn!("transient engine error: {e}");
                    attempt += 1;
                    continue;
                }
                return Err(ArchiveError::Http(e));
            }
            Ok(response) => {
                let status = response.status();

                if status == reqwest::StatusCode::NOT_FOUND {
                    return Err(ArchiveError::NotFound {
                        resource: response.url().path().to_string(),
                    });
                }

                if status == reqwest::StatusCode::TOO_MANY_REQUESTS || status.is_server_error() {
                    if attempt < max_retries {
                        log::warn!("engine returned HTTP {status}");
                        attempt += 1;
                        continue;
                    }
                    return Err(status_error(response).await);
                }

                if status.is_client_error() {
                    return Err(status_error(response).await);
                }

                return Ok(response);
            }
        }
    }
}

/// Builds an [`ArchiveError::Status`] from a failed response, keeping a
/// short preview of the body.
async fn status_error(response: reqwest::Response) -> ArchiveError {
    let status = response.status().as_u16();
    let body = response.text().await.unwrap_or_default();
    let message = extract_detail(&body).unwrap_or_else(|| preview(&body));
    ArchiveError::Status { status, message }
}

/// Pulls the `detail` field out of a JSON error body, if present.
fn extract_detail(body: &str) -> Option<String> {
    let value: serde_json::Value = serde_json::from_str(body).ok()?;
    value
        .get("detail")
        .and_then(serde_json::Value::as_str)
        .map(String::from)
}

fn preview(body: &str) -> String {
    if body.len() > BODY_PREVIEW_LEN {
        let mut end = BODY_PREVIEW_LEN;
        while !body.is_char_boundary(end) {
            end -= 1;
        }
        format!("{}...", &body[..end])
    } else {
        body.to_string()
    }
}

/// Returns `true` if the error is likely transient and worth retrying.
fn is_transient(e: &reqwest::Error) -> bool {
    e.is_timeout() || e.is_connect() || e.is_body() || e.is_request()
}
