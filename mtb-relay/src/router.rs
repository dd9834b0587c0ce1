use std::future::ready;
use std::sync::Arc;

use axum::extract::DefaultBodyLimit;
use axum::routing::{get, post};
use axum::Router;
use health::HealthRegistry;
use metrics_exporter_prometheus::PrometheusHandle;
use tower_http::trace::TraceLayer;

use crate::mtbfile;
use crate::prometheus::track_metrics;
use crate::pseudonym::Pseudonymizer;
use crate::sinks::Publisher;

#[derive(Clone)]
pub struct State {
    pub sink: Arc<dyn Publisher + Send + Sync>,
    pub pseudonymizer: Arc<dyn Pseudonymizer + Send + Sync>,
}

async fn index() -> &'static str {
    "mtb-relay"
}

pub fn router(
    liveness: HealthRegistry,
    sink: Arc<dyn Publisher + Send + Sync>,
    pseudonymizer: Arc<dyn Pseudonymizer + Send + Sync>,
    max_body_size: usize,
    metrics: Option<PrometheusHandle>,
) -> Router {
    let state = State {
        sink,
        pseudonymizer,
    };

    let router = Router::new()
        .route("/", get(index))
        .route("/_readiness", get(index))
        .route("/_liveness", get(move || ready(liveness.get_status())))
        .route(
            "/mtbfile",
            post(mtbfile::post_mtb_file).delete(mtbfile::delete_mtb_file),
        )
        .layer(DefaultBodyLimit::max(max_body_size))
        .layer(TraceLayer::new_for_http())
        .layer(axum::middleware::from_fn(track_metrics))
        .with_state(state);

    // The recorder is global, so the caller decides whether to install it
    match metrics {
        Some(recorder_handle) => {
            router.route("/metrics", get(move || ready(recorder_handle.render())))
        }
        None => router,
    }
}
