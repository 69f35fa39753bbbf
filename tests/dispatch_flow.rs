use async_trait::async_trait;
use base64::engine::general_purpose::URL_SAFE_NO_PAD;
use base64::Engine as _;
use mockito::Matcher;
use serde_json::json;
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;
use tokio_test::{assert_err, assert_ok};
use tokio_util::sync::CancellationToken;

use fanyi::config::Config;
use fanyi::coordinator::Coordinator;
use fanyi::direction::TargetLanguage;
use fanyi::dispatch::{DispatchRequest, DispatchResponse, Dispatcher, Reply};
use fanyi::error::TranslateError;
use fanyi::storage::{FileStore, KeyValueStore, MemoryStore, Settings, keys};
use fanyi::translate::{Backend, BackendId, BackendSet};

fn config_for(server: &mockito::ServerGuard) -> Config {
    let mut config = Config::default();
    config.translate.request_timeout_secs = 5;
    config.google.endpoint = format!("{}/v1/translateHtml", server.url());
    config.google.api_key = Some("test-key".to_string());
    config.microsoft.auth_endpoint = format!("{}/translate/auth", server.url());
    config.microsoft.endpoint = format!("{}/translate", server.url());
    config.tencent.endpoint = format!("{}/api/imt", server.url());
    config.openrouter.endpoint = format!("{}/api/v1/chat/completions", server.url());
    config
}

fn dispatcher_for(config: &Config, store: Arc<dyn KeyValueStore>) -> Dispatcher {
    let coordinator = Coordinator::from_config(config, store).unwrap();
    Dispatcher::new(Arc::new(coordinator))
}

fn make_token(exp: i64) -> String {
    let header = URL_SAFE_NO_PAD.encode(br#"{"alg":"none","typ":"JWT"}"#);
    let payload = URL_SAFE_NO_PAD.encode(format!(r#"{{"exp":{}}}"#, exp));
    format!("{}.{}.sig", header, payload)
}

fn translate(text: &str, service: Option<BackendId>) -> DispatchRequest {
    DispatchRequest::Translate {
        text: text.to_string(),
        service,
        direction: None,
        tab_id: None,
    }
}

fn reply(response: DispatchResponse) -> Reply {
    match response {
        DispatchResponse::Reply(reply) => reply,
        other => panic!("expected a reply, got {:?}", other),
    }
}

#[tokio::test]
async fn test_default_service_is_google() {
    let mut server = mockito::Server::new_async().await;
    let google = server
        .mock("POST", "/v1/translateHtml")
        .match_header("x-goog-api-key", "test-key")
        .match_header("content-type", "application/json+protobuf")
        .match_body(Matcher::Json(json!([[["Hello World"], "auto", "zh-CN"], "wt_lib"])))
        .with_body(r#"[["你好世界"],["en"]]"#)
        .create_async()
        .await;

    let dispatcher = dispatcher_for(&config_for(&server), Arc::new(MemoryStore::new()));
    let response = reply(dispatcher.handle(translate("Hello World", None)).await);

    assert_eq!(response, Reply::translated("你好世界".to_string(), TargetLanguage::Zh));
    google.assert_async().await;
}

#[tokio::test]
async fn test_selected_service_comes_from_settings() {
    let mut server = mockito::Server::new_async().await;
    let google = server.mock("POST", "/v1/translateHtml").expect(0).create_async().await;
    let tencent = server
        .mock("POST", "/api/imt")
        .match_body(Matcher::PartialJson(json!({ "target": { "lang": "en" } })))
        .with_body(r#"{"auto_translation":["Good morning"]}"#)
        .create_async()
        .await;

    let store: Arc<dyn KeyValueStore> = Arc::new(MemoryStore::new());
    Settings::new(store.clone())
        .set_selected_backend(BackendId::Tencent)
        .await
        .unwrap();

    let dispatcher = dispatcher_for(&config_for(&server), store);
    let response = reply(dispatcher.handle(translate("早上好", None)).await);

    assert_eq!(response, Reply::translated("Good morning".to_string(), TargetLanguage::En));
    tencent.assert_async().await;
    google.assert_async().await;
}

#[tokio::test]
async fn test_microsoft_token_persists_across_restart() {
    let mut server = mockito::Server::new_async().await;
    let token = make_token(chrono::Utc::now().timestamp() + 600);
    let auth = server
        .mock("GET", "/translate/auth")
        .with_body(&token)
        .expect(1)
        .create_async()
        .await;
    let translate_mock = server
        .mock("POST", "/translate")
        .match_query(Matcher::UrlEncoded("to".into(), "en".into()))
        .match_header("authorization", format!("Bearer {}", token).as_str())
        .with_body(r#"[{"translations":[{"text":"Thank you","to":"en"}]}]"#)
        .expect(3)
        .create_async()
        .await;

    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("storage.json");
    let config = config_for(&server);

    {
        let store = Arc::new(FileStore::open(&path).await.unwrap());
        let dispatcher = dispatcher_for(&config, store);
        for _ in 0..2 {
            let request = translate("谢谢", Some(BackendId::Microsoft));
            let response = reply(dispatcher.handle(request).await);
            assert_eq!(response.translation.as_deref(), Some("Thank you"));
        }
    }

    // fresh process: memory tier empty, persisted tier still valid
    let store = Arc::new(FileStore::open(&path).await.unwrap());
    assert_eq!(assert_ok!(store.get(keys::MS_AUTH_TOKEN).await), Some(token.clone()));
    let dispatcher = dispatcher_for(&config, store);
    let response = reply(dispatcher.handle(translate("谢谢", Some(BackendId::Microsoft))).await);
    assert!(response.success);

    auth.assert_async().await;
    translate_mock.assert_async().await;
}

#[tokio::test]
async fn test_backend_status_reaches_caller() {
    let mut server = mockito::Server::new_async().await;
    let _tencent = server
        .mock("POST", "/api/imt")
        .with_status(502)
        .with_body("bad gateway")
        .create_async()
        .await;

    let dispatcher = dispatcher_for(&config_for(&server), Arc::new(MemoryStore::new()));
    let response = reply(
        dispatcher
            .handle(DispatchRequest::Translate {
                text: "Hello".to_string(),
                service: Some(BackendId::Tencent),
                direction: None,
                tab_id: Some(3),
            })
            .await,
    );

    assert!(!response.success);
    assert_eq!(response.is_abort, None);
    assert!(response.error.unwrap().contains("502"));

    let latest = dispatcher.latest(Some(3)).unwrap();
    assert!(!latest.success);
    assert!(latest.translation.is_empty());
}

#[tokio::test]
async fn test_google_soft_error_message() {
    let mut server = mockito::Server::new_async().await;
    let _google = server
        .mock("POST", "/v1/translateHtml")
        .with_body(r#"[3,"API key not valid"]"#)
        .create_async()
        .await;

    let config = config_for(&server);
    let coordinator = Coordinator::from_config(&config, Arc::new(MemoryStore::new())).unwrap();
    let result = coordinator.translate("Hello", Some(BackendId::Google), None).await;

    assert_eq!(
        assert_err!(result),
        TranslateError::BackendApi {
            backend: BackendId::Google,
            code: 3,
            message: "API key not valid".to_string(),
        }
    );
}

/// Waits for cancellation or a long timeout, counting calls
struct HangingBackend {
    calls: AtomicUsize,
}

#[async_trait]
impl Backend for HangingBackend {
    fn id(&self) -> BackendId {
        BackendId::Google
    }

    async fn translate(
        &self,
        text: &str,
        _target: TargetLanguage,
        cancel: &CancellationToken,
    ) -> Result<String, TranslateError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        tokio::select! {
            _ = cancel.cancelled() => Err(TranslateError::Aborted),
            _ = tokio::time::sleep(Duration::from_secs(60)) => Ok(text.to_uppercase()),
        }
    }
}

#[tokio::test(start_paused = true)]
async fn test_abort_message_silences_running_translation() {
    let backend = Arc::new(HangingBackend { calls: AtomicUsize::new(0) });
    let coordinator = Coordinator::new(
        BackendSet::new().with_backend(backend.clone()),
        Settings::new(Arc::new(MemoryStore::new())),
        BackendId::Google,
    );
    let dispatcher = Arc::new(Dispatcher::new(Arc::new(coordinator)));

    let d = Arc::clone(&dispatcher);
    let running = tokio::spawn(async move {
        d.handle(DispatchRequest::Translate {
            text: "hello".to_string(),
            service: None,
            direction: None,
            tab_id: Some(5),
        })
        .await
    });
    while !dispatcher.coordinator().is_running() {
        tokio::task::yield_now().await;
    }

    let ack = dispatcher.handle(DispatchRequest::AbortTranslation).await;
    assert_eq!(ack, DispatchResponse::Reply(Reply::ack()));

    let response = reply(running.await.unwrap());
    assert_eq!(response.error.as_deref(), Some("Aborted"));
    assert_eq!(response.is_abort, Some(true));
    // aborts leave no trace for the tab
    assert_eq!(dispatcher.latest(Some(5)), None);
    assert_eq!(backend.calls.load(Ordering::SeqCst), 1);
}

#[tokio::test(start_paused = true)]
async fn test_concurrent_selections_share_one_call() {
    struct CountingBackend {
        calls: AtomicUsize,
    }

    #[async_trait]
    impl Backend for CountingBackend {
        fn id(&self) -> BackendId {
            BackendId::Google
        }

        async fn translate(
            &self,
            _text: &str,
            _target: TargetLanguage,
            _cancel: &CancellationToken,
        ) -> Result<String, TranslateError> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            tokio::time::sleep(Duration::from_millis(200)).await;
            Ok("你好".to_string())
        }
    }

    let backend = Arc::new(CountingBackend { calls: AtomicUsize::new(0) });
    let coordinator = Coordinator::new(
        BackendSet::new().with_backend(backend.clone()),
        Settings::new(Arc::new(MemoryStore::new())),
        BackendId::Google,
    );
    let dispatcher = Dispatcher::new(Arc::new(coordinator));

    let selection = |tab_id| DispatchRequest::TranslateSelection {
        text: "hello".to_string(),
        tab_id: Some(tab_id),
    };
    let (a, b) = tokio::join!(dispatcher.handle(selection(1)), dispatcher.handle(selection(2)));

    assert_eq!(a, b);
    assert_eq!(reply(a).translation.as_deref(), Some("你好"));
    assert_eq!(backend.calls.load(Ordering::SeqCst), 1);
    assert_eq!(dispatcher.coordinator().pending_selections(), 0);
    assert!(dispatcher.latest(Some(1)).is_some());
    assert!(dispatcher.latest(Some(2)).is_some());
}
