//! Test utilities for the sql-exporter crates.
//! Provides a mock query agent and re-exports the model's proptest strategies.

use axum::Router;
use axum::extract::State;
use axum::response::IntoResponse;
use axum::routing::post;
use model::record::RecordSet;
use poller::fetch::Url;
use std::collections::VecDeque;
use std::net::SocketAddr;
use std::sync::{Arc, Mutex};
use tokio::net::TcpListener;
use tokio::task::JoinHandle;
use tracing::debug;

// Re-export proptest and the model strategies for convenience
pub use axum::http::StatusCode;
pub use model::testing::*;
pub use proptest;

const LOCK_POISONED: &str = "No one should panic while holding this lock";

#[derive(Debug, Clone)]
struct MockReply {
    status: StatusCode,
    body: String,
}

impl MockReply {
    fn rows(records: &RecordSet) -> Self {
        MockReply {
            status: StatusCode::OK,
            body: serde_json::to_string(records).expect("Record sets always encode"),
        }
    }
}

#[derive(Default)]
struct MockState {
    script: Mutex<VecDeque<MockReply>>,
    otherwise: Mutex<Option<MockReply>>,
    requests: Mutex<Vec<serde_json::Value>>,
}

/// An HTTP query agent answering `POST /` with scripted replies.
///
/// Scripted replies are served once each, in order. After that the default
/// reply is repeated; without one the agent answers `503`.
pub struct MockAgent {
    addr: SocketAddr,
    state: Arc<MockState>,
    handle: JoinHandle<()>,
}

impl MockAgent {
    pub async fn start() -> Self {
        let listener = TcpListener::bind("127.0.0.1:0")
            .await
            .expect("Mock agent should bind");
        let addr = listener.local_addr().expect("Listener has an address");
        let state = Arc::new(MockState::default());

        let router = Router::new()
            .route("/", post(execute))
            .with_state(state.clone());
        let handle = tokio::spawn(async move {
            axum::serve(listener, router)
                .await
                .expect("Mock agent should serve");
        });

        MockAgent { addr, state, handle }
    }

    pub fn url(&self) -> Url {
        Url::parse(&format!("http://{}/", self.addr)).expect("Mock agent address is a valid URL")
    }

    pub fn then_rows(&self, records: &RecordSet) -> &Self {
        self.push(MockReply::rows(records))
    }

    pub fn then_status(&self, status: StatusCode, body: &str) -> &Self {
        self.push(MockReply {
            status,
            body: body.to_string(),
        })
    }

    pub fn always_rows(&self, records: &RecordSet) {
        *self.state.otherwise.lock().expect(LOCK_POISONED) = Some(MockReply::rows(records));
    }

    pub fn always_status(&self, status: StatusCode) {
        *self.state.otherwise.lock().expect(LOCK_POISONED) = Some(MockReply {
            status,
            body: String::new(),
        });
    }

    /// Request bodies received so far.
    pub fn requests(&self) -> Vec<serde_json::Value> {
        self.state.requests.lock().expect(LOCK_POISONED).clone()
    }

    fn push(&self, reply: MockReply) -> &Self {
        self.state.script.lock().expect(LOCK_POISONED).push_back(reply);
        self
    }
}

impl Drop for MockAgent {
    fn drop(&mut self) {
        self.handle.abort();
    }
}

async fn execute(State(state): State<Arc<MockState>>, body: String) -> impl IntoResponse {
    let request = serde_json::from_str(&body).unwrap_or(serde_json::Value::String(body));
    state.requests.lock().expect(LOCK_POISONED).push(request);

    let scripted = state.script.lock().expect(LOCK_POISONED).pop_front();
    let reply = scripted
        .or_else(|| state.otherwise.lock().expect(LOCK_POISONED).clone())
        .unwrap_or(MockReply {
            status: StatusCode::SERVICE_UNAVAILABLE,
            body: "no reply scripted".to_string(),
        });
    debug!(status = %reply.status, "Mock agent replying");
    (reply.status, reply.body)
}
