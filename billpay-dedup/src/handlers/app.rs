use std::sync::Arc;

use axum::{routing, Router};
use billpay_common::metrics;
use metrics_exporter_prometheus::PrometheusHandle;

use crate::pipeline::Pipeline;

use super::event;

pub fn app(pipeline: Arc<Pipeline>, metrics: Option<PrometheusHandle>) -> Router {
    Router::new()
        .route("/", routing::get(index))
        .route("/_readiness", routing::get(index))
        .route("/_liveness", routing::get(|| async { "ok" }))
        .route(
            "/metrics",
            routing::get(move || match metrics {
                Some(ref recorder_handle) => std::future::ready(recorder_handle.render()),
                None => std::future::ready("no metrics recorder installed".to_owned()),
            }),
        )
        .route("/events", routing::post(event::post).with_state(pipeline))
        .layer(axum::middleware::from_fn(metrics::track_metrics))
}

pub async fn index() -> &'static str {
    "billpay dedup"
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::{
        body::Body,
        http::{Request, StatusCode},
    };
    use http_body_util::BodyExt; // for `collect`
    use tower::ServiceExt; // for `call`, `oneshot`, and `ready`

    use crate::test_utils::{staged, HarnessBuilder};

    fn test_app() -> Router {
        let harness = HarnessBuilder::new(staged(&[])).build();
        app(Arc::new(Pipeline::new(harness.context)), None)
    }

    #[tokio::test]
    async fn index() {
        let response = test_app()
            .oneshot(Request::builder().uri("/").body(Body::empty()).unwrap())
            .await
            .unwrap();

        assert_eq!(response.status(), StatusCode::OK);

        let body = response.into_body().collect().await.unwrap().to_bytes();
        assert_eq!(&body[..], b"billpay dedup");
    }

    #[tokio::test]
    async fn liveness() {
        let response = test_app()
            .oneshot(
                Request::builder()
                    .uri("/_liveness")
                    .body(Body::empty())
                    .unwrap(),
            )
            .await
            .unwrap();

        assert_eq!(response.status(), StatusCode::OK);
    }

    #[tokio::test]
    async fn metrics_without_recorder() {
        let response = test_app()
            .oneshot(Request::builder().uri("/metrics").body(Body::empty()).unwrap())
            .await
            .unwrap();

        let body = response.into_body().collect().await.unwrap().to_bytes();
        assert_eq!(&body[..], b"no metrics recorder installed");
    }
}
