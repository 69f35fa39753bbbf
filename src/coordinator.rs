//! Translation request coordinator.
//!
//! Owns the one "current" cancellation token for the process: starting a
//! translation cancels whatever was running before, so only the most
//! recently requested result can ever reach the display. The selection
//! path additionally shares one in-flight call between identical texts.

use futures::future::{BoxFuture, FutureExt, Shared};
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::sync::Arc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::config::Config;
use crate::direction::{detect_direction, TargetLanguage};
use crate::error::{Result, TranslateError};
use crate::storage::{KeyValueStore, Settings};
use crate::translate::{BackendId, BackendSet};

/// Immutable description of one translation call
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TranslationRequest {
    pub text: String,
    pub backend: Option<BackendId>,
    pub target_language: Option<TargetLanguage>,
}

impl TranslationRequest {
    pub fn new(text: impl Into<String>) -> Self {
        Self {
            text: text.into(),
            backend: None,
            target_language: None,
        }
    }

    pub fn with_backend(mut self, backend: BackendId) -> Self {
        self.backend = Some(backend);
        self
    }

    pub fn with_target(mut self, target: TargetLanguage) -> Self {
        self.target_language = Some(target);
        self
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TranslationResult {
    pub translated_text: String,
    pub target_language: TargetLanguage,
    pub backend: BackendId,
}

type TranslationOutcome = std::result::Result<TranslationResult, TranslateError>;
type PendingTranslation = Shared<BoxFuture<'static, TranslationOutcome>>;

/// The running translation's token, tagged so cleanup can tell whether it
/// still owns the slot.
struct Flight {
    id: Uuid,
    token: CancellationToken,
}

/// Clears the current-flight slot when its translation settles or is dropped,
/// unless a newer flight has already taken the slot.
struct FlightGuard<'a> {
    slot: &'a Mutex<Option<Flight>>,
    id: Uuid,
}

impl Drop for FlightGuard<'_> {
    fn drop(&mut self) {
        let mut current = self.slot.lock();
        if current.as_ref().is_some_and(|f| f.id == self.id) {
            *current = None;
        }
    }
}

pub struct Coordinator {
    backends: BackendSet,
    settings: Settings,
    default_backend: BackendId,
    current: Mutex<Option<Flight>>,
    pending: Mutex<HashMap<String, PendingTranslation>>,
}

impl Coordinator {
    pub fn new(backends: BackendSet, settings: Settings, default_backend: BackendId) -> Self {
        Self {
            backends,
            settings,
            default_backend,
            current: Mutex::new(None),
            pending: Mutex::new(HashMap::new()),
        }
    }

    /// Build the coordinator with every configured backend over `store`
    pub fn from_config(config: &Config, store: Arc<dyn KeyValueStore>) -> Result<Self> {
        let settings = Settings::new(store);
        let backends = BackendSet::from_config(config, settings.clone())?;
        Ok(Self::new(backends, settings, config.translate.default_backend))
    }

    pub fn settings(&self) -> &Settings {
        &self.settings
    }

    pub fn backends(&self) -> &BackendSet {
        &self.backends
    }

    /// Whether a translation currently owns the cancellation slot
    pub fn is_running(&self) -> bool {
        self.current.lock().is_some()
    }

    /// Cancel the running translation, if any
    pub fn abort_current(&self) -> bool {
        match self.current.lock().take() {
            Some(flight) => {
                info!("Aborting current translation {}", flight.id);
                flight.token.cancel();
                true
            }
            None => false,
        }
    }

    /// Supersede any running translation and install a fresh token
    fn begin_flight(&self) -> (FlightGuard<'_>, CancellationToken) {
        let id = Uuid::new_v4();
        let token = CancellationToken::new();

        let mut current = self.current.lock();
        if let Some(previous) = current.replace(Flight {
            id,
            token: token.clone(),
        }) {
            debug!("Translation {} superseded by {}", previous.id, id);
            previous.token.cancel();
        }

        (FlightGuard { slot: &self.current, id }, token)
    }

    async fn resolve_backend(&self, requested: Option<BackendId>) -> BackendId {
        match requested {
            Some(id) => id,
            None => self
                .settings
                .selected_backend()
                .await
                .unwrap_or(self.default_backend),
        }
    }

    /// Translate `text`, superseding any translation already in flight.
    ///
    /// The backend defaults to the stored preference and the target language
    /// to the detected direction. A superseded or aborted call settles with
    /// `TranslateError::Aborted`.
    pub async fn translate(
        &self,
        text: &str,
        backend: Option<BackendId>,
        target: Option<TargetLanguage>,
    ) -> TranslationOutcome {
        let (_guard, token) = self.begin_flight();

        let target = target.unwrap_or_else(|| detect_direction(text));
        let backend_id = self.resolve_backend(backend).await;

        let backend = self.backends.get(backend_id).ok_or_else(|| {
            TranslateError::Internal(format!("{} backend is not registered", backend_id))
        })?;

        info!("Translating {} chars to {} with {}", text.chars().count(), target, backend_id);

        let outcome = tokio::select! {
            biased;
            _ = token.cancelled() => Err(TranslateError::Aborted),
            result = backend.translate(text, target, &token) => result,
        };

        match outcome {
            Ok(_) if token.is_cancelled() => Err(TranslateError::Aborted),
            Ok(translated_text) => Ok(TranslationResult {
                translated_text,
                target_language: target,
                backend: backend_id,
            }),
            Err(e) if e.is_abort() => {
                debug!("Translation with {} aborted", backend_id);
                Err(TranslateError::Aborted)
            }
            Err(e) => {
                warn!("Translation with {} failed: {}", backend_id, e);
                Err(e)
            }
        }
    }

    /// Run a described request through `translate`
    pub async fn execute(&self, request: &TranslationRequest) -> TranslationOutcome {
        self.translate(&request.text, request.backend, request.target_language)
            .await
    }

    /// Translate a fresh selection, sharing the call with any identical text
    /// already in flight.
    ///
    /// The work runs as its own task so the registry entry is removed when it
    /// settles even if every waiting caller has gone away.
    pub async fn translate_selection(self: &Arc<Self>, text: &str) -> TranslationOutcome {
        let pending = {
            let mut registry = self.pending.lock();
            match registry.get(text) {
                Some(existing) => {
                    debug!("Joining in-flight translation for identical selection");
                    existing.clone()
                }
                None => {
                    let shared = self.spawn_selection(text.to_string());
                    registry.insert(text.to_string(), shared.clone());
                    shared
                }
            }
        };

        pending.await
    }

    fn spawn_selection(self: &Arc<Self>, text: String) -> PendingTranslation {
        let coordinator = Arc::clone(self);
        let handle = tokio::spawn(async move {
            let outcome = coordinator.translate(&text, None, None).await;
            coordinator.pending.lock().remove(&text);
            outcome
        });

        async move {
            match handle.await {
                Ok(outcome) => outcome,
                Err(e) if e.is_cancelled() => Err(TranslateError::Aborted),
                Err(e) => Err(TranslateError::Internal(format!("translation task failed: {}", e))),
            }
        }
        .boxed()
        .shared()
    }

    /// Number of selection translations currently shared in the registry
    pub fn pending_selections(&self) -> usize {
        self.pending.lock().len()
    }
}
