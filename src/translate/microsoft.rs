use async_trait::async_trait;
use reqwest::Client;
use serde::Deserialize;
use serde_json::json;
use std::sync::Arc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info};

use crate::config::MicrosoftConfig;
use crate::direction::TargetLanguage;
use crate::error::TranslateError;
use crate::token::TokenCache;
use super::{Backend, BackendId, common};

/// Microsoft Translator v3 backend authenticated with the Edge bearer token
pub struct MicrosoftBackend {
    client: Client,
    config: MicrosoftConfig,
    tokens: Arc<TokenCache>,
}

#[derive(Debug, Deserialize)]
struct MicrosoftItem {
    translations: Vec<MicrosoftTranslation>,
}

#[derive(Debug, Deserialize)]
struct MicrosoftTranslation {
    text: String,
}

impl MicrosoftBackend {
    pub fn new(config: MicrosoftConfig, client: Client, tokens: Arc<TokenCache>) -> Self {
        Self { client, config, tokens }
    }

    pub fn token_cache(&self) -> Arc<TokenCache> {
        Arc::clone(&self.tokens)
    }

    fn language_code(target: TargetLanguage) -> &'static str {
        match target {
            TargetLanguage::Zh => "zh-Hans",
            TargetLanguage::En => "en",
        }
    }
}

#[async_trait]
impl Backend for MicrosoftBackend {
    fn id(&self) -> BackendId {
        BackendId::Microsoft
    }

    async fn translate(
        &self,
        text: &str,
        target: TargetLanguage,
        cancel: &CancellationToken,
    ) -> Result<String, TranslateError> {
        let to = Self::language_code(target);
        debug!("Requesting Microsoft translation: {} (to={})", self.config.endpoint, to);

        let token = common::cancellable(cancel, self.tokens.get_token()).await?;

        let request = self
            .client
            .post(&self.config.endpoint)
            .query(&[("api-version", "3.0"), ("from", ""), ("to", to)])
            .bearer_auth(token)
            .header("Cache-Control", "no-cache")
            .header("Pragma", "no-cache")
            .json(&json!([{ "Text": text }]));

        let response = common::send_request(BackendId::Microsoft, request, cancel).await?;
        let items: Vec<MicrosoftItem> =
            common::read_json(BackendId::Microsoft, response, cancel).await?;

        let translation = items
            .into_iter()
            .next()
            .and_then(|item| item.translations.into_iter().next())
            .map(|t| t.text)
            .ok_or(TranslateError::BackendResponseFormat {
                backend: BackendId::Microsoft,
            })?;

        info!("Microsoft translation succeeded ({} chars)", translation.chars().count());
        Ok(translation)
    }
}
