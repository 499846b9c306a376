// src/test_utils/mock_model_server.rs
use axum::{extract::State, http::StatusCode, routing::post, Json, Router};
use serde_json::Value;
use std::collections::VecDeque;
use std::net::SocketAddr;
use std::sync::{Arc, Mutex};
use tokio::net::TcpListener;

/// A canned reply: a completion body, or a status code to fail with.
pub type MockReply = Result<Value, StatusCode>;

#[derive(Clone)]
struct MockServerState {
    responses: Arc<Mutex<VecDeque<MockReply>>>,
    requests: Arc<Mutex<Vec<Value>>>,
}

impl MockServerState {
    fn new(responses: Vec<MockReply>) -> Self {
        Self {
            responses: Arc::new(Mutex::new(VecDeque::from(responses))),
            requests: Arc::new(Mutex::new(Vec::new())),
        }
    }
}

async fn chat_completions_handler(
    State(state): State<MockServerState>,
    Json(payload): Json<Value>,
) -> Result<Json<Value>, StatusCode> {
    log::debug!("Mock model server received request: {}", payload);
    state.requests.lock().unwrap().push(payload);

    match state.responses.lock().unwrap().pop_front() {
        Some(Ok(completion)) => Ok(Json(completion)),
        Some(Err(status)) => {
            log::error!("Mock model server simulating status {}", status);
            Err(status)
        }
        None => {
            log::error!("Mock model server ran out of responses!");
            Err(StatusCode::SERVICE_UNAVAILABLE)
        }
    }
}

/// Serves `/v1/chat/completions` on a random local port, replying with the
/// scripted completions in order.
pub struct MockModelServer {
    addr: SocketAddr,
    shutdown_tx: tokio::sync::oneshot::Sender<()>,
    recorded_requests: Arc<Mutex<Vec<Value>>>,
}

impl MockModelServer {
    pub async fn start(responses: Vec<MockReply>) -> Self {
        let state = MockServerState::new(responses);
        let recorded_requests = state.requests.clone();

        let app = Router::new()
            .route("/v1/chat/completions", post(chat_completions_handler))
            .with_state(state);

        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap_or_else(|e| {
            panic!("Failed to bind mock server to 127.0.0.1:0. Error: {}", e);
        });
        let addr = listener.local_addr().unwrap();
        log::info!("Mock model server listening on {}", addr);

        let (shutdown_tx, shutdown_rx) = tokio::sync::oneshot::channel::<()>();

        tokio::spawn(async move {
            axum::serve(listener, app)
                .with_graceful_shutdown(async {
                    shutdown_rx.await.ok();
                })
                .await
                .unwrap_or_else(|e| log::error!("Mock model server error: {}", e));
        });

        MockModelServer {
            addr,
            shutdown_tx,
            recorded_requests,
        }
    }

    pub fn address(&self) -> String {
        format!("http://{}", self.addr)
    }

    pub async fn shutdown(self) {
        if self.shutdown_tx.send(()).is_err() {
            log::warn!("Mock model server shutdown signal already sent or receiver dropped.");
        }
        tokio::time::sleep(tokio::time::Duration::from_millis(50)).await;
    }

    pub fn get_requests(&self) -> Vec<Value> {
        self.recorded_requests.lock().unwrap().clone()
    }
}
