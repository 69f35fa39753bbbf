//! Message endpoint the front-end surfaces talk to.
//!
//! Requests are JSON objects tagged by `action`. [`serve`] speaks the same
//! messages as newline-delimited JSON so a native-messaging host or a test
//! harness can drive the translation core over a pipe.

use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::HashMap;
use std::sync::Arc;
use tokio::io::{AsyncBufRead, AsyncBufReadExt, AsyncWrite, AsyncWriteExt};
use tokio::sync::mpsc;
use tokio::task::JoinSet;
use tracing::{debug, info, warn};

use crate::coordinator::{Coordinator, TranslationResult};
use crate::direction::TargetLanguage;
use crate::error::{FanyiError, Result, TranslateError};
use crate::translate::BackendId;

/// Selections at or above this many characters are not prefetched
pub const MAX_SELECTION_CHARS: usize = 200;

/// Shown when a context-menu click has neither a selection nor stored text
pub const NO_SELECTION_MESSAGE: &str = "请先选中文本";

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "action", rename_all = "camelCase")]
pub enum DispatchRequest {
    Translate {
        text: String,
        #[serde(default)]
        service: Option<BackendId>,
        #[serde(default)]
        direction: Option<TargetLanguage>,
        #[serde(default, rename = "tabId")]
        tab_id: Option<u32>,
    },
    AbortTranslation,
    GetLatestTranslation {
        #[serde(default, rename = "tabId")]
        tab_id: Option<u32>,
    },
    TranslateSelection {
        text: String,
        #[serde(default, rename = "tabId")]
        tab_id: Option<u32>,
    },
    /// Context-menu click; falls back to the tab's stored text
    ContextMenuTranslate {
        #[serde(rename = "tabId")]
        tab_id: u32,
        #[serde(default, rename = "selectionText")]
        selection_text: Option<String>,
    },
    TabClosed {
        #[serde(rename = "tabId")]
        tab_id: u32,
    },
    /// The tab started loading a new page
    TabNavigated {
        #[serde(rename = "tabId")]
        tab_id: u32,
    },
}

/// Latest translation seen for one tab
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TabSelection {
    pub text: String,
    pub translation: String,
    /// Epoch milliseconds
    pub timestamp: i64,
    pub success: bool,
    pub direction: TargetLanguage,
}

impl TabSelection {
    fn from_outcome(
        text: &str,
        outcome: &std::result::Result<TranslationResult, TranslateError>,
    ) -> Self {
        let timestamp = chrono::Utc::now().timestamp_millis();
        match outcome {
            Ok(result) => Self {
                text: text.to_string(),
                translation: result.translated_text.clone(),
                timestamp,
                success: true,
                direction: result.target_language,
            },
            Err(_) => Self {
                text: text.to_string(),
                translation: String::new(),
                timestamp,
                success: false,
                direction: TargetLanguage::Zh,
            },
        }
    }
}

/// Reply to a translate-style or control message
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Reply {
    pub success: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub translation: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub direction: Option<TargetLanguage>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub is_abort: Option<bool>,
}

impl Reply {
    pub fn ack() -> Self {
        Self {
            success: true,
            ..Default::default()
        }
    }

    pub fn translated(translation: String, direction: TargetLanguage) -> Self {
        Self {
            success: true,
            translation: Some(translation),
            direction: Some(direction),
            ..Default::default()
        }
    }

    pub fn failed(message: impl Into<String>) -> Self {
        Self {
            success: false,
            error: Some(message.into()),
            ..Default::default()
        }
    }

    /// Aborts are flagged so the caller can stay silent
    pub fn from_error(error: &TranslateError) -> Self {
        if error.is_abort() {
            Self {
                success: false,
                error: Some("Aborted".to_string()),
                is_abort: Some(true),
                ..Default::default()
            }
        } else {
            Self::failed(error.to_string())
        }
    }

    pub fn from_outcome(outcome: std::result::Result<TranslationResult, TranslateError>) -> Self {
        match outcome {
            Ok(result) => Self::translated(result.translated_text, result.target_language),
            Err(e) => Self::from_error(&e),
        }
    }
}

/// `getLatestTranslation` answers with the bare tab entry (or `null`)
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(untagged)]
pub enum DispatchResponse {
    Reply(Reply),
    Latest(Option<TabSelection>),
}

impl From<Reply> for DispatchResponse {
    fn from(reply: Reply) -> Self {
        Self::Reply(reply)
    }
}

pub struct Dispatcher {
    coordinator: Arc<Coordinator>,
    selections: Mutex<HashMap<u32, TabSelection>>,
}

impl Dispatcher {
    pub fn new(coordinator: Arc<Coordinator>) -> Self {
        Self {
            coordinator,
            selections: Mutex::new(HashMap::new()),
        }
    }

    pub fn coordinator(&self) -> &Arc<Coordinator> {
        &self.coordinator
    }

    pub async fn handle(&self, request: DispatchRequest) -> DispatchResponse {
        match request {
            DispatchRequest::Translate {
                text,
                service,
                direction,
                tab_id,
            } => {
                if let Some(direction) = direction {
                    self.coordinator
                        .settings()
                        .set_translation_direction(direction)
                        .await;
                }

                let outcome = self.coordinator.translate(&text, service, direction).await;
                self.record(tab_id, &text, &outcome);
                Reply::from_outcome(outcome).into()
            }
            DispatchRequest::AbortTranslation => {
                self.coordinator.abort_current();
                Reply::ack().into()
            }
            DispatchRequest::GetLatestTranslation { tab_id } => {
                DispatchResponse::Latest(self.latest(tab_id))
            }
            DispatchRequest::TranslateSelection { text, tab_id } => {
                self.translate_selection(&text, tab_id).await.into()
            }
            DispatchRequest::ContextMenuTranslate {
                tab_id,
                selection_text,
            } => self
                .translate_context_menu(tab_id, selection_text.as_deref())
                .await
                .into(),
            DispatchRequest::TabClosed { tab_id } | DispatchRequest::TabNavigated { tab_id } => {
                self.forget(tab_id);
                Reply::ack().into()
            }
        }
    }

    fn forget(&self, tab_id: u32) {
        if self.selections.lock().remove(&tab_id).is_some() {
            debug!("Forgot selection state for tab {}", tab_id);
        }
    }

    async fn translate_context_menu(&self, tab_id: u32, selection_text: Option<&str>) -> Reply {
        let selected = selection_text.map(str::trim).filter(|t| !t.is_empty());
        let text = match selected {
            Some(text) => text.to_string(),
            None => self
                .selections
                .lock()
                .get(&tab_id)
                .map(|s| s.text.clone())
                .unwrap_or_default(),
        };

        if text.is_empty() {
            return Reply::failed(NO_SELECTION_MESSAGE);
        }

        let outcome = self.coordinator.translate(&text, None, None).await;
        self.record(Some(tab_id), &text, &outcome);
        Reply::from_outcome(outcome)
    }

    /// Latest entry for `tab_id`, or the newest entry across all tabs
    pub fn latest(&self, tab_id: Option<u32>) -> Option<TabSelection> {
        let selections = self.selections.lock();
        match tab_id {
            Some(id) => selections.get(&id).cloned(),
            None => selections.values().max_by_key(|s| s.timestamp).cloned(),
        }
    }

    async fn translate_selection(&self, text: &str, tab_id: Option<u32>) -> Reply {
        let text = text.trim();
        let length = text.chars().count();
        if length == 0 || length >= MAX_SELECTION_CHARS {
            return Reply::failed(format!(
                "Selection must be between 1 and {} characters",
                MAX_SELECTION_CHARS - 1
            ));
        }

        if let Some(id) = tab_id {
            let reusable = self
                .selections
                .lock()
                .get(&id)
                .filter(|s| s.text == text && s.success && !s.translation.is_empty())
                .cloned();
            if let Some(selection) = reusable {
                debug!("Reusing translation already held for tab {}", id);
                return Reply::translated(selection.translation, selection.direction);
            }
        }

        let outcome = self.coordinator.translate_selection(text).await;
        self.record(tab_id, text, &outcome);
        Reply::from_outcome(outcome)
    }

    fn record(
        &self,
        tab_id: Option<u32>,
        text: &str,
        outcome: &std::result::Result<TranslationResult, TranslateError>,
    ) {
        let Some(id) = tab_id else { return };
        if matches!(outcome, Err(e) if e.is_abort()) {
            return;
        }
        self.selections
            .lock()
            .insert(id, TabSelection::from_outcome(text, outcome));
    }
}

#[derive(Serialize)]
struct ResponseLine {
    #[serde(skip_serializing_if = "Option::is_none")]
    id: Option<Value>,
    response: DispatchResponse,
}

/// Decode one `{"id": .., "message": {..}}` line, keeping the id even when the
/// message itself is malformed.
fn parse_line(line: &str) -> (Option<Value>, std::result::Result<DispatchRequest, String>) {
    let mut value: Value = match serde_json::from_str(line) {
        Ok(value) => value,
        Err(e) => return (None, Err(format!("Invalid JSON: {}", e))),
    };

    let id = value.get_mut("id").map(Value::take);
    let message = value.get_mut("message").map(Value::take).unwrap_or(Value::Null);
    let request = serde_json::from_value(message).map_err(|e| format!("Invalid message: {}", e));
    (id, request)
}

/// Spawn `work` after joining every task that has already finished, so a
/// long-running endpoint only holds tasks that are still in flight.
fn spawn_reaped<F>(tasks: &mut JoinSet<()>, work: F)
where
    F: std::future::Future<Output = ()> + Send + 'static,
{
    while let Some(joined) = tasks.try_join_next() {
        if let Err(e) = joined {
            warn!("Dispatch task failed: {}", e);
        }
    }
    tasks.spawn(work);
}

fn send_line(tx: &mpsc::UnboundedSender<String>, id: Option<Value>, response: DispatchResponse) {
    match serde_json::to_string(&ResponseLine { id, response }) {
        Ok(line) => {
            if tx.send(line).is_err() {
                warn!("Response writer closed, dropping reply");
            }
        }
        Err(e) => warn!("Failed to encode reply: {}", e),
    }
}

/// Run the JSON-lines endpoint until `reader` reaches end of input.
///
/// Every message is handled on its own task so an abort can arrive while a
/// translation is still running. Replies carry the request's `id` and may be
/// written out of order.
pub async fn serve<R, W>(dispatcher: Arc<Dispatcher>, reader: R, writer: W) -> Result<()>
where
    R: AsyncBufRead + Unpin,
    W: AsyncWrite + Unpin + Send + 'static,
{
    let (tx, mut rx) = mpsc::unbounded_channel::<String>();

    let writer_task = tokio::spawn(async move {
        let mut writer = writer;
        while let Some(line) = rx.recv().await {
            writer.write_all(line.as_bytes()).await?;
            writer.write_all(b"\n").await?;
            writer.flush().await?;
        }
        Ok::<_, std::io::Error>(())
    });

    info!("Dispatch endpoint ready");
    let mut tasks = JoinSet::new();
    let mut lines = reader.lines();

    while let Some(line) = lines.next_line().await? {
        let line = line.trim();
        if line.is_empty() {
            continue;
        }

        match parse_line(line) {
            (id, Ok(request)) => {
                debug!("Dispatching {:?}", request);
                let dispatcher = Arc::clone(&dispatcher);
                let tx = tx.clone();
                spawn_reaped(&mut tasks, async move {
                    let response = dispatcher.handle(request).await;
                    send_line(&tx, id, response);
                });
            }
            (id, Err(message)) => {
                warn!("Rejected message: {}", message);
                send_line(&tx, id, Reply::failed(message).into());
            }
        }
    }

    while let Some(joined) = tasks.join_next().await {
        if let Err(e) = joined {
            warn!("Dispatch task failed: {}", e);
        }
    }

    drop(tx);
    writer_task
        .await
        .map_err(|e| FanyiError::Io(std::io::Error::other(e.to_string())))??;

    info!("Dispatch endpoint closed");
    Ok(())
}
