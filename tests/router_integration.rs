//! End-to-end tests for the request routing pipeline.
//!
//! Each test wires a real router over a real store with a scripted LLM
//! and stub capabilities (no network calls to third parties).

use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use secrecy::SecretString;
use serde_json::Value;
use tempfile::TempDir;
use tokio::net::TcpListener;
use tokio::time::timeout;

use assist_router::api::api_routes;
use assist_router::capabilities::{
    Capability, CapabilityOutput, CapabilityRegistry, ConversationResponder, Dispatcher,
    WeatherCapability,
};
use assist_router::classifier::{IntentClassifier, TaskTaxonomy};
use assist_router::context::RoutingContext;
use assist_router::error::{CapabilityError, LlmError, StoreError};
use assist_router::llm::{CompletionRequest, CompletionResponse, LlmProvider};
use assist_router::memory::ConversationMemory;
use assist_router::router::{RequestRouter, RouterConfig, RouterDeps};
use assist_router::store::{ConversationRecord, ConversationStore, FileStore, Metadata};

/// Maximum time any test is allowed to run before we consider it hung.
const TEST_TIMEOUT: Duration = Duration::from_secs(10);

type EventLog = Arc<Mutex<Vec<String>>>;

/// Classifies by keyword and answers conversation turns by echoing the
/// history it was given.
struct ScriptedLlm {
    events: EventLog,
    responder_prompts: Mutex<Vec<String>>,
    /// Fail every conversation turn with a transport-level error.
    fail_responses: bool,
}

#[async_trait]
impl LlmProvider for ScriptedLlm {
    fn model_name(&self) -> &str {
        "scripted"
    }

    async fn complete(&self, request: CompletionRequest) -> Result<CompletionResponse, LlmError> {
        let system = request.messages[0].content.clone();
        let query = request.messages[1].content.to_lowercase();

        let content = if system.contains("task classifier") {
            self.events.lock().unwrap().push("llm.classify".into());
            if query.contains("weather") {
                r#"```json
{"task": "agent_task:weather", "params": {"location": "Paris"}}
```"#
                    .to_string()
            } else {
                r#"{"task": "conversation", "params": {}}"#.to_string()
            }
        } else {
            self.events.lock().unwrap().push("llm.respond".into());
            self.responder_prompts.lock().unwrap().push(system.clone());
            if self.fail_responses {
                return Err(LlmError::RequestFailed {
                    provider: "scripted".into(),
                    reason: "POST https://llm.internal/v1/chat?api_key=sk-LEAKED failed".into(),
                });
            }
            if system.contains("my name is X") {
                "Your name is X.".to_string()
            } else {
                "Hello X, nice to meet you!".to_string()
            }
        };

        Ok(CompletionResponse {
            content,
            ..Default::default()
        })
    }
}

/// Records every store read in the shared event log.
struct SpyStore {
    inner: FileStore,
    events: EventLog,
}

#[async_trait]
impl ConversationStore for SpyStore {
    async fn put(&self, id: &str, record: &ConversationRecord) -> Result<(), StoreError> {
        self.inner.put(id, record).await
    }

    async fn get(&self, id: &str) -> Result<Option<ConversationRecord>, StoreError> {
        self.events.lock().unwrap().push("store.get".into());
        self.inner.get(id).await
    }

    async fn list_by_owner(&self, user_id: &str) -> Result<Vec<ConversationRecord>, StoreError> {
        self.inner.list_by_owner(user_id).await
    }
}

/// Stub weather capability that records the parameters it received.
struct StubWeather {
    seen: Mutex<Vec<Metadata>>,
}

#[async_trait]
impl Capability for StubWeather {
    fn name(&self) -> &str {
        "weather"
    }

    fn description(&self) -> &str {
        "stub weather"
    }

    async fn process(
        &self,
        _query: &str,
        params: &Metadata,
        _ctx: &RoutingContext,
    ) -> Result<CapabilityOutput, CapabilityError> {
        self.seen.lock().unwrap().push(params.clone());
        let location = params["location"].as_str().unwrap_or_default();
        Ok(CapabilityOutput::success(format!("It is sunny in {location}."))
            .with_data(serde_json::json!({"temp_c": 21})))
    }
}

struct Harness {
    router: Arc<RequestRouter>,
    llm: Arc<ScriptedLlm>,
    weather: Arc<StubWeather>,
    events: EventLog,
    _dir: TempDir,
}

async fn harness() -> Harness {
    let weather = Arc::new(StubWeather {
        seen: Mutex::new(Vec::new()),
    });
    let (router, llm, events, dir) = build_router(weather.clone(), false).await;

    Harness {
        router,
        llm,
        weather,
        events,
        _dir: dir,
    }
}

async fn build_router(
    weather: Arc<dyn Capability>,
    fail_responses: bool,
) -> (Arc<RequestRouter>, Arc<ScriptedLlm>, EventLog, TempDir) {
    let dir = TempDir::new().unwrap();
    let events: EventLog = Arc::new(Mutex::new(Vec::new()));

    let store = Arc::new(SpyStore {
        inner: FileStore::new(dir.path()).await.unwrap(),
        events: Arc::clone(&events),
    });
    let llm = Arc::new(ScriptedLlm {
        events: Arc::clone(&events),
        responder_prompts: Mutex::new(Vec::new()),
        fail_responses,
    });

    let registry = Arc::new(CapabilityRegistry::new());
    registry.register_agent(weather).await;

    let router = RequestRouter::new(
        RouterConfig::default(),
        RouterDeps {
            memory: Arc::new(ConversationMemory::new(store)),
            classifier: Arc::new(IntentClassifier::new(llm.clone(), TaskTaxonomy::default())),
            dispatcher: Arc::new(Dispatcher::new(registry)),
            responder: Arc::new(ConversationResponder::new(llm.clone())),
        },
    );

    (Arc::new(router), llm, events, dir)
}

// ── Scenarios ────────────────────────────────────────────────────────

#[tokio::test]
async fn scenario_a_new_conversation_greeting() {
    let h = harness().await;

    let response = h
        .router
        .process_request("Hello, my name is X", "u1", None, None)
        .await
        .unwrap();

    assert!(response.success);
    assert_eq!(response.task_type, "conversation");
    assert_eq!(response.content, "Hello X, nice to meet you!");
    assert!(!response.conversation_id.is_empty());

    let record = h
        .router
        .memory()
        .get_conversation(&response.conversation_id)
        .await
        .unwrap();
    assert_eq!(record.user_id, "u1");
    assert_eq!(record.interactions.len(), 1);
    assert_eq!(record.interactions[0].user_query, "Hello, my name is X");
    assert_eq!(record.interactions[0].assistant_response, response.content);
}

#[tokio::test]
async fn scenario_b_follow_up_sees_history() {
    let h = harness().await;

    let first = h
        .router
        .process_request("Hello, my name is X", "u1", None, None)
        .await
        .unwrap();
    h.events.lock().unwrap().clear();

    let second = h
        .router
        .process_request("What's my name?", "u1", Some(&first.conversation_id), None)
        .await
        .unwrap();

    assert_eq!(second.conversation_id, first.conversation_id);
    assert!(second.components_used.contains(&"conversation".to_string()));
    assert_eq!(second.content, "Your name is X.");

    // History was read before the classifier ran.
    let events = h.events.lock().unwrap().clone();
    let loaded = events.iter().position(|e| e == "store.get").unwrap();
    let classified = events.iter().position(|e| e == "llm.classify").unwrap();
    assert!(loaded < classified, "events: {events:?}");

    let prompts = h.llm.responder_prompts.lock().unwrap();
    assert!(prompts.last().unwrap().contains("User: Hello, my name is X"));

    let history = h
        .router
        .memory()
        .get_history(&first.conversation_id, None)
        .await
        .unwrap();
    assert_eq!(history.len(), 2);
}

#[tokio::test]
async fn scenario_c_weather_dispatch() {
    let h = harness().await;

    let response = h
        .router
        .process_request("What's the weather in Paris?", "u1", None, None)
        .await
        .unwrap();

    assert!(response.success);
    assert_eq!(response.task_type, "agent_task");
    assert_eq!(response.content, "It is sunny in Paris.");
    assert!(response.components_used.contains(&"agent:weather".to_string()));
    assert_eq!(response.data.as_ref().unwrap()["agent_type"], "weather");

    let seen = h.weather.seen.lock().unwrap().clone();
    let mut expected = Metadata::new();
    expected.insert("location".into(), "Paris".into());
    assert_eq!(seen, vec![expected]);

    let history = h
        .router
        .memory()
        .get_history(&response.conversation_id, None)
        .await
        .unwrap();
    assert_eq!(history[0].metadata["task_type"], "agent_task");
    let components = history[0].metadata["components_used"].as_array().unwrap();
    assert!(components.contains(&Value::from("agent:weather")));
}

#[tokio::test]
async fn conversations_are_isolated_per_user() {
    let h = harness().await;

    h.router
        .process_request("Hello, my name is X", "alice", None, None)
        .await
        .unwrap();
    h.router
        .process_request("Hello, my name is X", "bob", None, None)
        .await
        .unwrap();

    let memory = h.router.memory();
    assert_eq!(memory.list_conversations("alice").await.unwrap().len(), 1);
    let hits = memory.search("alice", "my name").await.unwrap();
    assert_eq!(hits.len(), 1);
}

// ── Provider failures ────────────────────────────────────────────────

/// A weather API that answers every request with 404.
async fn start_missing_weather_api() -> String {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    tokio::spawn(async move {
        axum::serve(listener, axum::Router::new()).await.unwrap();
    });
    format!("http://{addr}/v1/current.json")
}

#[tokio::test]
async fn failing_weather_api_keeps_credentials_out_of_the_reply() {
    timeout(TEST_TIMEOUT, async {
        let weather = WeatherCapability::new(
            SecretString::from("SUPER-SECRET-KEY".to_string()),
            start_missing_weather_api().await,
        )
        .unwrap();
        let (router, _llm, _events, _dir) = build_router(Arc::new(weather), false).await;

        let response = router
            .process_request("What's the weather in Paris?", "u1", None, None)
            .await
            .unwrap();

        assert!(!response.success);
        assert_eq!(response.task_type, "agent_task");
        let error = response.error.clone().unwrap();
        assert!(!error.is_empty());
        for text in [&response.content, &error] {
            assert!(!text.contains("SUPER-SECRET-KEY"), "leaked: {text}");
            assert!(!text.contains("http://"), "leaked: {text}");
        }

        let history = router
            .memory()
            .get_history(&response.conversation_id, None)
            .await
            .unwrap();
        let stored = serde_json::to_string(&history).unwrap();
        assert!(!stored.contains("SUPER-SECRET-KEY"));
    })
    .await
    .expect("test timed out");
}

#[tokio::test]
async fn failing_oracle_reply_is_an_apology_without_internals() {
    let weather = Arc::new(StubWeather {
        seen: Mutex::new(Vec::new()),
    });
    let (router, _llm, _events, _dir) = build_router(weather, true).await;

    let response = router
        .process_request("Hello, my name is X", "u1", None, None)
        .await
        .unwrap();

    assert!(!response.success);
    assert_eq!(response.task_type, "conversation");
    assert!(!response.error.as_deref().unwrap_or_default().is_empty());
    assert!(response.content.starts_with("I'm sorry"));
    assert!(!response.content.contains("sk-LEAKED"));
    assert!(!response.content.contains("https://"));
}

// ── HTTP round trip ──────────────────────────────────────────────────

/// Start an Axum server on a random port, return the port.
async fn start_server(router: Arc<RequestRouter>) -> u16 {
    let app = api_routes(router);
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let port = listener.local_addr().unwrap().port();

    tokio::spawn(async move {
        axum::serve(listener, app).await.unwrap();
    });

    // Give the server a moment to start accepting connections.
    tokio::time::sleep(Duration::from_millis(50)).await;
    port
}

#[tokio::test]
async fn http_chat_round_trip() {
    timeout(TEST_TIMEOUT, async {
        let h = harness().await;
        let port = start_server(Arc::clone(&h.router)).await;
        let client = reqwest::Client::new();
        let base = format!("http://127.0.0.1:{port}");

        let first: Value = client
            .post(format!("{base}/api/chat"))
            .json(&serde_json::json!({"query": "Hello, my name is X", "user_id": "u1"}))
            .send()
            .await
            .unwrap()
            .json()
            .await
            .unwrap();
        let id = first["conversation_id"].as_str().unwrap().to_string();

        let second: Value = client
            .post(format!("{base}/api/chat"))
            .json(&serde_json::json!({
                "query": "weather please",
                "user_id": "u1",
                "conversation_id": id,
            }))
            .send()
            .await
            .unwrap()
            .json()
            .await
            .unwrap();
        assert_eq!(second["task_type"], "agent_task");
        assert_eq!(second["components_used"][1], "agent:weather");

        let history: Value = client
            .get(format!("{base}/api/conversations/{id}/history?limit=1"))
            .send()
            .await
            .unwrap()
            .json()
            .await
            .unwrap();
        let items = history["history"].as_array().unwrap();
        assert_eq!(items.len(), 1);
        assert_eq!(items[0]["user_query"], "weather please");
    })
    .await
    .expect("test timed out");
}
