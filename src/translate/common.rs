use reqwest::{Client, RequestBuilder, Response};
use serde::de::DeserializeOwned;
use std::future::Future;
use std::time::Duration;
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

use crate::error::{FanyiError, Result, TranslateError};
use super::BackendId;

/// Shared HTTP client for every backend
pub fn build_http_client(timeout_secs: u64) -> Result<Client> {
    Client::builder()
        .timeout(Duration::from_secs(timeout_secs))
        .build()
        .map_err(FanyiError::Http)
}

/// Run `future` unless `cancel` fires first
pub async fn cancellable<T, F>(
    cancel: &CancellationToken,
    future: F,
) -> std::result::Result<T, TranslateError>
where
    F: Future<Output = std::result::Result<T, TranslateError>>,
{
    tokio::select! {
        biased;
        _ = cancel.cancelled() => Err(TranslateError::Aborted),
        result = future => result,
    }
}

/// Send one request, mapping transport failures and non-2xx statuses
pub async fn send_request(
    backend: BackendId,
    request: RequestBuilder,
    cancel: &CancellationToken,
) -> std::result::Result<Response, TranslateError> {
    cancellable(cancel, async {
        let response = request
            .send()
            .await
            .map_err(|e| TranslateError::network(backend, &e))?;

        let status = response.status();
        debug!("{} API response status: {}", backend, status);

        if !status.is_success() {
            let error_text = response.text().await.unwrap_or_default();
            warn!("{} API error response ({}): {}", backend, status, error_text);
            return Err(TranslateError::BackendRequest {
                backend,
                status: status.as_u16(),
            });
        }

        Ok(response)
    })
    .await
}

/// Read the response body as JSON of type `T`
pub async fn read_json<T: DeserializeOwned>(
    backend: BackendId,
    response: Response,
    cancel: &CancellationToken,
) -> std::result::Result<T, TranslateError> {
    cancellable(cancel, async {
        let body = response
            .text()
            .await
            .map_err(|e| TranslateError::network(backend, &e))?;

        debug!("{} API returned: {}", backend, body);

        serde_json::from_str(&body).map_err(|e| {
            warn!("Failed to parse {} response: {}", backend, e);
            TranslateError::BackendResponseFormat { backend }
        })
    })
    .await
}
