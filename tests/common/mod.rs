#![allow(dead_code)]

use axum::body::Bytes;
use axum::extract::State;
use axum::http::{header, HeaderMap, Method, StatusCode, Uri};
use axum::response::IntoResponse;
use axum::Router;
use serde_json::{json, Value};
use sltax::api::TaxApiClient;
use sltax::credentials::MemoryCredentialStore;
use sltax::functions::TaxFunctions;
use std::collections::HashMap;
use std::sync::{Arc, Mutex};

pub const TEST_API_KEY: &str = "test-key-123";

/// What the stub saw for one request
#[derive(Debug, Clone)]
pub struct RecordedRequest {
    pub method: String,
    pub path: String,
    pub query: Option<String>,
    pub api_key: Option<String>,
    pub body: Option<Value>,
}

#[derive(Clone, Default)]
struct StubState {
    routes: Arc<Mutex<HashMap<String, (u16, String)>>>,
    requests: Arc<Mutex<Vec<RecordedRequest>>>,
}

/// In-process stand-in for the tax service, served under `/v1`
pub struct StubServer {
    pub base_url: String,
    state: StubState,
}

impl StubServer {
    pub async fn start() -> Self {
        let state = StubState::default();
        let app = Router::new().fallback(handle).with_state(state.clone());

        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        tokio::spawn(async move {
            axum::serve(listener, app).await.unwrap();
        });

        Self {
            base_url: format!("http://{}/v1", addr),
            state,
        }
    }

    /// Answer `path` (e.g. "/rates") with a JSON body
    pub fn respond(&self, path: &str, status: u16, body: Value) {
        self.respond_raw(path, status, &body.to_string());
    }

    pub fn respond_raw(&self, path: &str, status: u16, body: &str) {
        self.state
            .routes
            .lock()
            .unwrap()
            .insert(path.to_string(), (status, body.to_string()));
    }

    pub fn requests(&self) -> Vec<RecordedRequest> {
        self.state.requests.lock().unwrap().clone()
    }

    pub fn request_count(&self) -> usize {
        self.state.requests.lock().unwrap().len()
    }

    pub fn functions(&self) -> TaxFunctions {
        self.functions_with_key(Some(TEST_API_KEY))
    }

    pub fn functions_with_key(&self, api_key: Option<&str>) -> TaxFunctions {
        let store = match api_key {
            Some(key) => MemoryCredentialStore::with_api_key(key),
            None => MemoryCredentialStore::new(),
        };
        TaxFunctions::new(TaxApiClient::new(&self.base_url), Arc::new(store))
    }
}

async fn handle(
    State(state): State<StubState>,
    method: Method,
    uri: Uri,
    headers: HeaderMap,
    body: Bytes,
) -> impl IntoResponse {
    let path = uri.path().strip_prefix("/v1").unwrap_or(uri.path()).to_string();

    state.requests.lock().unwrap().push(RecordedRequest {
        method: method.to_string(),
        path: path.clone(),
        query: uri.query().map(str::to_string),
        api_key: headers
            .get("x-api-key")
            .and_then(|v| v.to_str().ok())
            .map(str::to_string),
        body: serde_json::from_slice(&body).ok(),
    });

    let route = state.routes.lock().unwrap().get(&path).cloned();
    let (status, body) = route.unwrap_or_else(|| {
        (
            404,
            json!({"success": false, "message": format!("no stub for {}", path)}).to_string(),
        )
    });

    (
        StatusCode::from_u16(status).unwrap(),
        [(header::CONTENT_TYPE, "application/json")],
        body,
    )
}
