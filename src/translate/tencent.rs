use async_trait::async_trait;
use reqwest::Client;
use serde::Deserialize;
use serde_json::json;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info};

use crate::config::TencentConfig;
use crate::direction::TargetLanguage;
use crate::error::TranslateError;
use super::{Backend, BackendId, common};

/// Tencent TranSmart backend
pub struct TencentBackend {
    client: Client,
    config: TencentConfig,
}

#[derive(Debug, Deserialize)]
struct TencentResponse {
    #[serde(default)]
    auto_translation: Vec<serde_json::Value>,
}

impl TencentBackend {
    pub fn new(config: TencentConfig, client: Client) -> Self {
        Self { client, config }
    }

    fn build_body(&self, text: &str, target: TargetLanguage) -> serde_json::Value {
        json!({
            "header": {
                "fn": "auto_translation",
                "client_key": self.config.client_key,
            },
            "type": "plain",
            "model_category": "normal",
            "source": {
                "text_list": [text],
                "lang": "auto",
            },
            "target": {
                "lang": target.as_str(),
            },
        })
    }
}

#[async_trait]
impl Backend for TencentBackend {
    fn id(&self) -> BackendId {
        BackendId::Tencent
    }

    async fn translate(
        &self,
        text: &str,
        target: TargetLanguage,
        cancel: &CancellationToken,
    ) -> Result<String, TranslateError> {
        debug!("Requesting Tencent translation: {}", self.config.endpoint);

        let request = self
            .client
            .post(&self.config.endpoint)
            .header("Referer", &self.config.referer)
            .json(&self.build_body(text, target));

        let response = common::send_request(BackendId::Tencent, request, cancel).await?;
        let data: TencentResponse = common::read_json(BackendId::Tencent, response, cancel).await?;

        let translation = data
            .auto_translation
            .first()
            .and_then(|t| t.as_str())
            .map(str::to_string)
            .ok_or(TranslateError::BackendResponseFormat {
                backend: BackendId::Tencent,
            })?;

        info!("Tencent translation succeeded ({} chars)", translation.chars().count());
        Ok(translation)
    }
}
