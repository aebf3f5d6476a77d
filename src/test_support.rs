// Scripted stand-ins for the completion API (keyed by bearer token) and the
// conversation store.

use axum::extract::State;
use axum::http::{HeaderMap, StatusCode};
use axum::response::{IntoResponse, Response};
use axum::routing::post;
use axum::{Json, Router};
use serde_json::{Value, json};
use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::net::TcpListener;

#[derive(Debug, Clone, Copy)]
pub enum Behavior {
    Reply,
    Empty,
    Status(u16),
    Hang,
}

#[derive(Default)]
struct Script {
    behaviors: HashMap<String, Behavior>,
    calls: Vec<String>,
    last_body: Option<Value>,
}

#[derive(Clone)]
pub struct MockUpstream {
    addr: String,
    script: Arc<Mutex<Script>>,
}

impl MockUpstream {
    pub async fn spawn(behaviors: &[(&str, Behavior)]) -> Self {
        let script = Arc::new(Mutex::new(Script {
            behaviors: behaviors
                .iter()
                .map(|(k, b)| (k.to_string(), *b))
                .collect(),
            ..Script::default()
        }));

        let app = Router::new()
            .route("/v1/chat/completions", post(completions))
            .with_state(script.clone());
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        tokio::spawn(async move {
            axum::serve(listener, app).await.unwrap();
        });

        Self {
            addr: format!("http://{addr}"),
            script,
        }
    }

    pub fn url(&self) -> String {
        format!("{}/v1/chat/completions", self.addr)
    }

    pub fn set(&self, key: &str, behavior: Behavior) {
        self.script
            .lock()
            .unwrap()
            .behaviors
            .insert(key.to_string(), behavior);
    }

    pub fn calls(&self) -> Vec<String> {
        self.script.lock().unwrap().calls.clone()
    }

    pub fn last_body(&self) -> Option<Value> {
        self.script.lock().unwrap().last_body.clone()
    }
}

async fn completions(
    State(script): State<Arc<Mutex<Script>>>,
    headers: HeaderMap,
    Json(body): Json<Value>,
) -> Response {
    let key = headers
        .get("authorization")
        .and_then(|v| v.to_str().ok())
        .and_then(|v| v.strip_prefix("Bearer "))
        .unwrap_or_default()
        .to_string();

    let behavior = {
        let mut script = script.lock().unwrap();
        script.calls.push(key.clone());
        script.last_body = Some(body);
        script
            .behaviors
            .get(&key)
            .copied()
            .unwrap_or(Behavior::Status(401))
    };

    match behavior {
        Behavior::Reply => Json(json!({
            "choices": [{ "message": { "role": "assistant", "content": format!("reply from {key}") } }]
        }))
        .into_response(),
        Behavior::Empty => Json(json!({ "choices": [] })).into_response(),
        Behavior::Status(code) => (
            StatusCode::from_u16(code).unwrap(),
            format!("scripted failure {code}"),
        )
            .into_response(),
        Behavior::Hang => {
            tokio::time::sleep(Duration::from_secs(10)).await;
            Json(json!({ "choices": [{ "message": { "content": "too late" } }] })).into_response()
        }
    }
}

type Saved = Arc<Mutex<Vec<(Option<String>, Value)>>>;

#[derive(Clone)]
pub struct MockStore {
    base_url: String,
    saved: Saved,
}

impl MockStore {
    /// Accepts conversation rows and answers every write with `status`.
    pub async fn spawn(status: StatusCode) -> Self {
        let saved: Saved = Arc::default();
        let app = Router::new()
            .route(
                "/rest/v1/conversations",
                post(
                    move |State(saved): State<Saved>, headers: HeaderMap, Json(body): Json<Value>| async move {
                        let key = headers
                            .get("apikey")
                            .and_then(|v| v.to_str().ok())
                            .map(str::to_string);
                        saved.lock().unwrap().push((key, body));
                        status
                    },
                ),
            )
            .with_state(saved.clone());
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        tokio::spawn(async move {
            axum::serve(listener, app).await.unwrap();
        });

        Self {
            base_url: format!("http://{addr}/"),
            saved,
        }
    }

    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    pub fn api_keys(&self) -> Vec<Option<String>> {
        self.saved.lock().unwrap().iter().map(|(k, _)| k.clone()).collect()
    }

    pub fn records(&self) -> Vec<Value> {
        self.saved.lock().unwrap().iter().map(|(_, r)| r.clone()).collect()
    }

    // Writes land from a spawned task, so poll for them
    pub async fn wait_for(&self, count: usize) -> Vec<Value> {
        for _ in 0..200 {
            let records = self.records();
            if records.len() >= count {
                return records;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
        panic!("expected {count} stored records, got {:?}", self.records());
    }
}
