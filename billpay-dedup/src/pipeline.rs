//! Pipeline controller. A run walks the stages in order:
//!
//! `Idle -> Validating -> ListingInputs -> Decrypting -> Auditing -> Encrypting ->
//! Finalizing -> RecordingAudit -> Done`
//!
//! An event without records goes straight from `Validating` to `Done`. Any stage can
//! fail instead, which ends the run with a [`PipelineError`] naming that stage; nothing
//! is retried and nothing after the failing stage runs.

use std::fmt;
use std::sync::Arc;

use billpay_common::audit::{AuditRecord, FILES_PER_RUN};
use billpay_common::metrics::StageTimer;
use chrono::Utc;
use tokio::sync::Mutex;
use tracing::{error, info, warn};

use crate::audit::compute_total;
use crate::classify::ClassifiedCollections;
use crate::context::AppContext;
use crate::decrypt::decrypt_inputs;
use crate::encrypt::encrypt_and_upload;
use crate::error::{DedupError, PipelineError};
use crate::event::{FileValidation, ObjectCreatedEvent};
use crate::finalize::archive_inputs;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Stage {
    Idle,
    Validating,
    ListingInputs,
    Decrypting,
    Auditing,
    Encrypting,
    Finalizing,
    RecordingAudit,
    Done,
}

impl Stage {
    pub fn as_str(&self) -> &'static str {
        match self {
            Stage::Idle => "idle",
            Stage::Validating => "validating",
            Stage::ListingInputs => "listing_inputs",
            Stage::Decrypting => "decrypting",
            Stage::Auditing => "auditing",
            Stage::Encrypting => "encrypting",
            Stage::Finalizing => "finalizing",
            Stage::RecordingAudit => "recording_audit",
            Stage::Done => "done",
        }
    }
}

impl fmt::Display for Stage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RunOutcome {
    /// The event carried no records.
    Skipped,
    Completed {
        audit: AuditRecord,
        /// False when the audit sink declined the row. The run still counts as done.
        audit_written: bool,
    },
}

/// Tracks the current stage, logging and timing every transition.
struct Transitions {
    stage: Stage,
    timer: Option<StageTimer>,
}

impl Transitions {
    fn new() -> Self {
        Self {
            stage: Stage::Idle,
            timer: None,
        }
    }

    fn enter(&mut self, next: Stage) {
        if let Some(timer) = self.timer.take() {
            timer.finish("success");
        }
        info!(from = %self.stage, to = %next, "stage transition");
        self.stage = next;
        if next != Stage::Done {
            self.timer = Some(StageTimer::start(next.as_str()));
        }
    }

    fn fail(&mut self, source: DedupError) -> PipelineError {
        if let Some(timer) = self.timer.take() {
            timer.finish("failure");
        }
        error!(stage = %self.stage, error = %source, "pipeline failed");
        metrics::counter!("pipeline_runs_total", "outcome" => "failure").increment(1);
        PipelineError::new(self.stage, source)
    }
}

/// List the staging area, ignoring folder placeholders. Exactly two files must be
/// waiting; anything else is a precondition failure.
pub async fn list_inputs(context: &AppContext) -> Result<Vec<String>, DedupError> {
    let storage = &context.config.storage;
    let inputs: Vec<String> = context
        .store
        .list(&storage.input_bucket, &storage.input_path)
        .await?
        .into_iter()
        .filter(|key| !key.ends_with('/'))
        .collect();

    if inputs.len() != FILES_PER_RUN {
        return Err(DedupError::Precondition(inputs.len()));
    }
    info!(inputs = ?inputs, "staging area holds exactly two files");
    Ok(inputs)
}

/// Runs the pipeline for one event at a time.
pub struct Pipeline {
    context: Arc<AppContext>,
    running: Mutex<()>,
}

impl Pipeline {
    pub fn new(context: Arc<AppContext>) -> Self {
        Self {
            context,
            running: Mutex::new(()),
        }
    }

    /// Process one notification. Concurrent callers queue up behind the run in progress,
    /// since two runs would race for the same staged files.
    pub async fn run(&self, event: &ObjectCreatedEvent) -> Result<RunOutcome, PipelineError> {
        let _running = self.running.lock().await;
        let context = self.context.as_ref();
        let mut transitions = Transitions::new();

        transitions.enter(Stage::Validating);
        if event.records.is_empty() {
            warn!("event carries no files to process");
            transitions.enter(Stage::Done);
            metrics::counter!("pipeline_runs_total", "outcome" => "skipped").increment(1);
            return Ok(RunOutcome::Skipped);
        }
        FileValidation::new(
            &context.config.storage.input_bucket,
            &context.config.storage.input_path,
            &context.config.crypto.pgp_extension,
        )
        .report_invalid(event);

        transitions.enter(Stage::ListingInputs);
        let inputs = list_inputs(context)
            .await
            .map_err(|e| transitions.fail(e))?;

        let mut audit = AuditRecord {
            started_at: Some(Utc::now()),
            ..Default::default()
        };
        let mut collections = ClassifiedCollections::new();

        transitions.enter(Stage::Decrypting);
        decrypt_inputs(context, &inputs, &mut collections, &mut audit)
            .await
            .map_err(|e| transitions.fail(e))?;

        transitions.enter(Stage::Auditing);
        compute_total(&mut collections, &mut audit);
        audit.duplicate_count = collections.collisions.len();

        transitions.enter(Stage::Encrypting);
        encrypt_and_upload(context, Arc::new(collections))
            .await
            .map_err(|e| transitions.fail(e))?;
        audit.finished_at = Some(Utc::now());

        transitions.enter(Stage::Finalizing);
        archive_inputs(context, &inputs)
            .await
            .map_err(|e| transitions.fail(e))?;

        transitions.enter(Stage::RecordingAudit);
        let audit_written = context
            .audit
            .record(&audit)
            .await
            .map_err(|e| transitions.fail(e.into()))?;
        if !audit_written {
            warn!("audit row was not written");
        }

        transitions.enter(Stage::Done);
        metrics::counter!("pipeline_runs_total", "outcome" => "success").increment(1);
        info!(
            merged = audit.merged_count,
            duplicates = audit.duplicate_count,
            "pipeline completed"
        );
        Ok(RunOutcome::Completed {
            audit,
            audit_written,
        })
    }
}
