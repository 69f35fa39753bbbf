// Modular translation backend architecture
//
// Every provider sits behind the same Backend trait and is picked from a
// closed set of backend ids:
// - Google: translateHtml (protobuf-over-JSON)
// - Microsoft: Translator v3 behind a short-lived bearer token
// - Tencent: TranSmart auto_translation
// - OpenRouter: chat completion model constrained to translation

pub mod common;
pub mod google;
pub mod microsoft;
pub mod openrouter;
pub mod tencent;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fmt;
use std::str::FromStr;
use std::sync::Arc;
use tokio_util::sync::CancellationToken;

pub use common::*;
use crate::config::Config;
use crate::direction::TargetLanguage;
use crate::error::{Result, TranslateError};
use crate::storage::Settings;
use crate::token::TokenCache;

/// Identifier of a translation provider
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum BackendId {
    Google,
    Microsoft,
    Tencent,
    OpenRouter,
}

impl BackendId {
    pub const ALL: [BackendId; 4] = [
        BackendId::Google,
        BackendId::Microsoft,
        BackendId::Tencent,
        BackendId::OpenRouter,
    ];

    /// Id used in settings and dispatch messages
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Google => "google",
            Self::Microsoft => "microsoft",
            Self::Tencent => "tencent",
            Self::OpenRouter => "openrouter",
        }
    }

    pub fn display_name(&self) -> &'static str {
        match self {
            Self::Google => "Google",
            Self::Microsoft => "Microsoft",
            Self::Tencent => "Tencent",
            Self::OpenRouter => "OpenRouter",
        }
    }
}

impl fmt::Display for BackendId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.display_name())
    }
}

impl FromStr for BackendId {
    type Err = String;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        let wanted = s.trim().to_lowercase();
        Self::ALL
            .into_iter()
            .find(|id| id.as_str() == wanted)
            .ok_or_else(|| format!("unknown translation service '{}'", s.trim()))
    }
}

/// One translation provider
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait Backend: Send + Sync {
    fn id(&self) -> BackendId;

    /// Translate `text` into `target`.
    ///
    /// Makes a single attempt. Must settle with `TranslateError::Aborted`
    /// promptly once `cancel` fires.
    async fn translate(
        &self,
        text: &str,
        target: TargetLanguage,
        cancel: &CancellationToken,
    ) -> std::result::Result<String, TranslateError>;
}

/// Factory for creating backend instances
pub struct BackendFactory;

impl BackendFactory {
    /// Create the backend for `id`, sharing one HTTP client across providers
    pub fn create_backend(
        id: BackendId,
        config: &Config,
        client: reqwest::Client,
        settings: Settings,
    ) -> Arc<dyn Backend> {
        match id {
            BackendId::Google => {
                Arc::new(google::GoogleBackend::new(config.google.clone(), client))
            }
            BackendId::Microsoft => {
                let tokens = Arc::new(TokenCache::new(
                    client.clone(),
                    config.microsoft.auth_endpoint.clone(),
                    settings.store(),
                ));
                Arc::new(microsoft::MicrosoftBackend::new(config.microsoft.clone(), client, tokens))
            }
            BackendId::Tencent => {
                Arc::new(tencent::TencentBackend::new(config.tencent.clone(), client))
            }
            BackendId::OpenRouter => {
                Arc::new(openrouter::OpenRouterBackend::new(
                    config.openrouter.clone(),
                    client,
                    settings,
                ))
            }
        }
    }
}

/// Fixed lookup table from backend id to its implementation
#[derive(Clone, Default)]
pub struct BackendSet {
    backends: HashMap<BackendId, Arc<dyn Backend>>,
}

impl BackendSet {
    pub fn new() -> Self {
        Self::default()
    }

    /// Build every provider from configuration
    pub fn from_config(config: &Config, settings: Settings) -> Result<Self> {
        let client = build_http_client(config.translate.request_timeout_secs)?;

        let mut set = Self::new();
        for id in BackendId::ALL {
            set.insert(BackendFactory::create_backend(
                id,
                config,
                client.clone(),
                settings.clone(),
            ));
        }
        Ok(set)
    }

    pub fn insert(&mut self, backend: Arc<dyn Backend>) {
        self.backends.insert(backend.id(), backend);
    }

    pub fn with_backend(mut self, backend: Arc<dyn Backend>) -> Self {
        self.insert(backend);
        self
    }

    pub fn get(&self, id: BackendId) -> Option<Arc<dyn Backend>> {
        self.backends.get(&id).cloned()
    }
}
