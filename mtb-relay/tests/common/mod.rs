#![allow(dead_code)]

use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use axum::body::Body;
use axum::http::{Request, Response};
use axum::Router;
use health::HealthRegistry;
use http_body_util::BodyExt;
use tower::ServiceExt;

use mtb_relay::api::IngestError;
use mtb_relay::pseudonym::Pseudonymizer;
use mtb_relay::record::RoutingKey;
use mtb_relay::router::router;
use mtb_relay::sinks::Publisher;

pub const MAX_BODY_SIZE: usize = 10 * 1024 * 1024;

#[derive(Clone, Copy)]
pub enum Outcome {
    Acknowledged,
    Unacknowledged,
    Interrupted,
    Failed,
}

/// Publisher keeping every message in memory.
pub struct MemorySink {
    outcome: Outcome,
    pub sent: Mutex<Vec<(String, String)>>,
}

impl MemorySink {
    pub fn new(outcome: Outcome) -> Arc<Self> {
        Arc::new(Self {
            outcome,
            sent: Mutex::new(Vec::new()),
        })
    }

    pub fn sent(&self) -> Vec<(String, String)> {
        self.sent.lock().unwrap().clone()
    }
}

#[async_trait]
impl Publisher for MemorySink {
    async fn send(&self, key: &RoutingKey, payload: String) -> Result<bool, IngestError> {
        self.sent
            .lock()
            .unwrap()
            .push((key.as_str().to_owned(), payload));
        match self.outcome {
            Outcome::Acknowledged => Ok(true),
            Outcome::Unacknowledged => Ok(false),
            Outcome::Interrupted => Err(IngestError::PublishInterrupted),
            Outcome::Failed => Err(IngestError::PublishExecutionFailed(
                "Broker: Unknown topic or partition".to_owned(),
            )),
        }
    }
}

pub fn app(sink: Arc<MemorySink>, pseudonymizer: Arc<dyn Pseudonymizer + Send + Sync>) -> Router {
    router(
        HealthRegistry::new("liveness"),
        sink,
        pseudonymizer,
        MAX_BODY_SIZE,
        None,
    )
}

pub async fn post_mtb_file(app: Router, body: impl Into<Body>) -> Response<Body> {
    app.oneshot(
        Request::builder()
            .method("POST")
            .uri("/mtbfile")
            .header("content-type", "application/json")
            .body(body.into())
            .unwrap(),
    )
    .await
    .unwrap()
}

pub async fn body_text(response: Response<Body>) -> String {
    let bytes = response.into_body().collect().await.unwrap().to_bytes();
    String::from_utf8(bytes.to_vec()).unwrap()
}
