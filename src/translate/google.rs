use async_trait::async_trait;
use reqwest::Client;
use serde_json::{json, Value};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info};

use crate::config::GoogleConfig;
use crate::direction::TargetLanguage;
use crate::error::TranslateError;
use super::{Backend, BackendId, common};

/// Google translateHtml backend (protobuf-over-JSON body)
pub struct GoogleBackend {
    client: Client,
    config: GoogleConfig,
}

impl GoogleBackend {
    pub fn new(config: GoogleConfig, client: Client) -> Self {
        Self { client, config }
    }

    fn language_code(target: TargetLanguage) -> &'static str {
        match target {
            TargetLanguage::Zh => "zh-CN",
            TargetLanguage::En => "en",
        }
    }
}

/// Pull the translation out of a translateHtml payload.
///
/// A leading number is an error code embedded in an otherwise successful
/// response, followed by its message.
fn parse_response(data: &Value) -> Result<String, TranslateError> {
    let backend = BackendId::Google;
    let first = data
        .as_array()
        .and_then(|items| items.first())
        .ok_or(TranslateError::BackendResponseFormat { backend })?;

    if let Some(code) = first.as_i64().or_else(|| first.as_f64().map(|c| c as i64)) {
        let message = data
            .get(1)
            .and_then(Value::as_str)
            .filter(|m| !m.is_empty())
            .unwrap_or("unknown error")
            .to_string();
        return Err(TranslateError::BackendApi { backend, code, message });
    }

    if let Some(text) = first.get(0).and_then(Value::as_str) {
        return Ok(text.to_string());
    }

    if let Some(text) = first.as_str() {
        return Ok(text.to_string());
    }

    Err(TranslateError::BackendResponseFormat { backend })
}

#[async_trait]
impl Backend for GoogleBackend {
    fn id(&self) -> BackendId {
        BackendId::Google
    }

    async fn translate(
        &self,
        text: &str,
        target: TargetLanguage,
        cancel: &CancellationToken,
    ) -> Result<String, TranslateError> {
        let api_key = self
            .config
            .resolve_api_key()
            .ok_or_else(|| TranslateError::MissingCredentials {
                backend: BackendId::Google,
                detail: "API key not configured (FANYI_GOOGLE_API_KEY)".to_string(),
            })?;

        debug!("Requesting Google translation: {}", self.config.endpoint);

        let body = json!([[[text], "auto", Self::language_code(target)], "wt_lib"]);
        let request = self
            .client
            .post(&self.config.endpoint)
            .header("Content-Type", "application/json+protobuf")
            .header("X-Goog-API-Key", api_key)
            .header("Accept", "*/*")
            .body(body.to_string());

        let response = common::send_request(BackendId::Google, request, cancel).await?;
        let data: Value = common::read_json(BackendId::Google, response, cancel).await?;

        let translation = parse_response(&data)?;
        info!("Google translation succeeded ({} chars)", translation.chars().count());
        Ok(translation)
    }
}
