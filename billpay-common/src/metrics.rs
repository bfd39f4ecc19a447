use std::time::Instant;

use axum::{
    body::Body, extract::MatchedPath, http::Request, middleware::Next, response::IntoResponse,
};
use metrics_exporter_prometheus::{BuildError, PrometheusBuilder, PrometheusHandle};

/// Bind a `TcpListener` on `bind` and serve `router` on it until the process exits.
pub async fn serve(router: axum::Router, bind: &str) -> Result<(), std::io::Error> {
    let listener = tokio::net::TcpListener::bind(bind).await?;

    axum::serve(listener, router).await?;

    Ok(())
}

/// Install the global Prometheus recorder. Pipeline stages take seconds to minutes, so
/// the buckets reach further than the usual request latencies.
pub fn setup_metrics_recorder() -> Result<PrometheusHandle, BuildError> {
    const STAGE_SECONDS: &[f64] = &[
        0.01, 0.05, 0.1, 0.25, 0.5, 1.0, 2.5, 5.0, 10.0, 30.0, 60.0, 120.0, 300.0,
    ];

    PrometheusBuilder::new()
        .set_buckets(STAGE_SECONDS)?
        .install_recorder()
}

/// Time a pipeline stage and record it under `pipeline_stage_duration_seconds`.
pub struct StageTimer {
    stage: &'static str,
    start: Instant,
}

impl StageTimer {
    pub fn start(stage: &'static str) -> Self {
        Self {
            stage,
            start: Instant::now(),
        }
    }

    pub fn finish(self, outcome: &'static str) {
        let labels = [("stage", self.stage), ("outcome", outcome)];
        metrics::histogram!("pipeline_stage_duration_seconds", &labels)
            .record(self.start.elapsed().as_secs_f64());
    }
}

/// Middleware to record some common HTTP metrics
pub async fn track_metrics(req: Request<Body>, next: Next) -> impl IntoResponse {
    let start = Instant::now();

    let path = if let Some(matched_path) = req.extensions().get::<MatchedPath>() {
        matched_path.as_str().to_owned()
    } else {
        req.uri().path().to_owned()
    };

    let method = req.method().clone();

    let response = next.run(req).await;

    let latency = start.elapsed().as_secs_f64();
    let status = response.status().as_u16().to_string();

    let labels = [
        ("method", method.to_string()),
        ("path", path),
        ("status", status),
    ];

    metrics::counter!("http_requests_total", &labels).increment(1);
    metrics::histogram!("http_requests_duration_seconds", &labels).record(latency);

    response
}
