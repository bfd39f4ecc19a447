use std::sync::Arc;

use axum::{extract::State, http::StatusCode, Json};
use billpay_common::audit::AuditRecord;
use serde::Serialize;
use tracing::debug;

use crate::event::ObjectCreatedEvent;
use crate::pipeline::{Pipeline, RunOutcome};

#[derive(Serialize, Debug)]
pub struct EventPostResponse {
    status: &'static str,
    #[serde(skip_serializing_if = "Option::is_none")]
    audit: Option<AuditRecord>,
    #[serde(skip_serializing_if = "Option::is_none")]
    audit_written: Option<bool>,
    #[serde(skip_serializing_if = "Option::is_none")]
    error: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    stage: Option<&'static str>,
}

impl EventPostResponse {
    fn status(status: &'static str) -> Self {
        Self {
            status,
            audit: None,
            audit_written: None,
            error: None,
            stage: None,
        }
    }
}

/// Run the pipeline for an object created notification. The response is sent once the
/// run has finished.
pub async fn post(
    State(pipeline): State<Arc<Pipeline>>,
    Json(event): Json<ObjectCreatedEvent>,
) -> Result<Json<EventPostResponse>, (StatusCode, Json<EventPostResponse>)> {
    debug!(records = event.records.len(), "received event");

    match pipeline.run(&event).await {
        Ok(RunOutcome::Skipped) => Ok(Json(EventPostResponse::status("skipped"))),
        Ok(RunOutcome::Completed {
            audit,
            audit_written,
        }) => Ok(Json(EventPostResponse {
            audit: Some(audit),
            audit_written: Some(audit_written),
            ..EventPostResponse::status("completed")
        })),
        Err(e) => Err((
            StatusCode::INTERNAL_SERVER_ERROR,
            Json(EventPostResponse {
                error: Some(e.to_string()),
                stage: Some(e.stage.as_str()),
                ..EventPostResponse::status("failed")
            }),
        )),
    }
}
