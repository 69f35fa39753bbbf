use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use crate::error::{FanyiError, Result};
use crate::translate::BackendId;

fn default_request_timeout_secs() -> u64 {
    30
}

fn default_openrouter_temperature() -> f32 {
    0.1
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    pub translate: TranslateConfig,
    pub storage: StorageConfig,
    pub google: GoogleConfig,
    pub microsoft: MicrosoftConfig,
    pub tencent: TencentConfig,
    pub openrouter: OpenRouterConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TranslateConfig {
    /// Backend used when neither the request nor the persisted settings choose one
    pub default_backend: BackendId,
    /// Transport timeout applied to every outbound request
    #[serde(default = "default_request_timeout_secs")]
    pub request_timeout_secs: u64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StorageConfig {
    /// JSON file holding persisted settings and the cached Microsoft token
    pub path: PathBuf,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GoogleConfig {
    /// translateHtml endpoint
    pub endpoint: String,
    /// API key; falls back to FANYI_GOOGLE_API_KEY when unset
    #[serde(default)]
    pub api_key: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MicrosoftConfig {
    /// Unauthenticated endpoint handing out short-lived bearer tokens
    pub auth_endpoint: String,
    /// Translator v3 endpoint
    pub endpoint: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TencentConfig {
    pub endpoint: String,
    pub referer: String,
    pub client_key: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OpenRouterConfig {
    /// Chat completions endpoint
    pub endpoint: String,
    /// Key used when the user has not stored one; falls back to the build-time
    /// FANYI_OPENROUTER_API_KEY when unset
    #[serde(default)]
    pub default_api_key: Option<String>,
    /// Model used when the user has not stored one
    pub default_model: String,
    #[serde(default = "default_openrouter_temperature")]
    pub temperature: f32,
    /// Sent as HTTP-Referer
    pub referer: String,
    /// Sent as X-Title
    pub title: String,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            translate: TranslateConfig {
                default_backend: BackendId::Google,
                request_timeout_secs: default_request_timeout_secs(),
            },
            storage: StorageConfig {
                path: PathBuf::from(".fanyi/storage.json"),
            },
            google: GoogleConfig {
                endpoint: "https://translate-pa.googleapis.com/v1/translateHtml".to_string(),
                api_key: None,
            },
            microsoft: MicrosoftConfig {
                auth_endpoint: "https://edge.microsoft.com/translate/auth".to_string(),
                endpoint: "https://api-edge.cognitive.microsofttranslator.com/translate".to_string(),
            },
            tencent: TencentConfig {
                endpoint: "https://transmart.qq.com/api/imt".to_string(),
                referer: "https://transmart.qq.com/zh-CN/index".to_string(),
                client_key: "browser-chrome-110.0.0-Mac OS-df4bd4c5-a65d-44b2-a40f-42f34f3535f2-1677486696487".to_string(),
            },
            openrouter: OpenRouterConfig {
                endpoint: "https://openrouter.ai/api/v1/chat/completions".to_string(),
                default_api_key: None,
                default_model: "xiaomi/mimo-v2-flash:free".to_string(),
                temperature: default_openrouter_temperature(),
                referer: "https://github.com/wxt-dev/wxt".to_string(),
                title: "Translation Extension".to_string(),
            },
        }
    }
}

impl Config {
    pub fn from_file<P: AsRef<Path>>(path: P) -> Result<Self> {
        let content = std::fs::read_to_string(path)
            .map_err(|e| FanyiError::Config(format!("Failed to read config file: {}", e)))?;

        toml::from_str(&content)
            .map_err(|e| FanyiError::Config(format!("Failed to parse config file: {}", e)))
    }

    pub fn save_to_file<P: AsRef<Path>>(&self, path: P) -> Result<()> {
        let content = toml::to_string_pretty(self)
            .map_err(|e| FanyiError::Config(format!("Failed to serialize config: {}", e)))?;

        std::fs::write(path, content)
            .map_err(|e| FanyiError::Config(format!("Failed to write config file: {}", e)))?;

        Ok(())
    }
}

impl GoogleConfig {
    /// Configured key, then the runtime environment, then the key baked in at build time
    pub fn resolve_api_key(&self) -> Option<String> {
        self.api_key
            .clone()
            .filter(|k| !k.trim().is_empty())
            .or_else(|| std::env::var("FANYI_GOOGLE_API_KEY").ok().filter(|k| !k.trim().is_empty()))
            .or_else(|| option_env!("FANYI_GOOGLE_API_KEY").map(str::to_string))
    }
}

impl OpenRouterConfig {
    pub fn fallback_api_key(&self) -> Option<String> {
        self.default_api_key
            .clone()
            .filter(|k| !k.trim().is_empty())
            .or_else(|| option_env!("FANYI_OPENROUTER_API_KEY").map(str::to_string))
    }
}
