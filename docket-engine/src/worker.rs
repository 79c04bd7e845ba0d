//! Background worker.
//!
//! Owns one job from Queued to a terminal state: gathers inputs, invokes
//! the inference provider, validates the structured output, and persists
//! the result. The worker is the only code that transitions job/version
//! status after scheduling, and it releases the per-key lock on every exit
//! path - success, failure, or panic-free early return alike.

use std::time::Instant;

use docket_core::{
    AnalysisJob, AnalysisVersion, DocketError, DocumentId, ParsedAnalysis, ProviderError,
    ValidationError,
};
use docket_storage::LockLease;
use tokio::time::timeout;
use tracing::{debug, info, warn};

use crate::coordinator::AnalysisEngine;
use crate::prompt::{self, GatheredDocument, EXTRACTION_PLACEHOLDER};

/// Progress checkpoints reported between stages.
const PROGRESS_GATHERED: i32 = 25;
const PROGRESS_INVOKED: i32 = 50;
const PROGRESS_VALIDATED: i32 = 75;

/// Worker stages, for log context.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Stage {
    Gather,
    Invoke,
    Validate,
    Persist,
}

impl Stage {
    fn as_str(&self) -> &'static str {
        match self {
            Stage::Gather => "gather",
            Stage::Invoke => "invoke",
            Stage::Validate => "validate",
            Stage::Persist => "persist",
        }
    }
}

/// Run a scheduled job to completion or failure.
///
/// Never returns an error: every failure is absorbed into the Failed
/// transition so nothing escapes the spawned task, and the lock is released
/// in all cases rather than waiting out its TTL.
pub(crate) async fn run(
    engine: AnalysisEngine,
    mut job: AnalysisJob,
    mut version: AnalysisVersion,
    lease: LockLease,
) {
    let outcome = execute(&engine, &mut job, &mut version).await;

    if let Err((stage, err)) = outcome {
        warn!(
            case_id = %job.case_id,
            key = %job.key,
            job_id = %job.job_id,
            stage = stage.as_str(),
            error = %err,
            "analysis job failed"
        );
        engine.stats.record_job_failed();

        let summary = error_summary(stage, &err);
        job.fail(summary.clone());
        version.fail(summary);

        // Best effort: the records may be unreachable if storage itself is
        // what failed. The watchdog sweep covers that gap.
        if let Err(update_err) = engine.store.job_update(&job).await {
            warn!(job_id = %job.job_id, error = %update_err, "failed to persist job failure");
        }
        if let Err(update_err) = engine.store.version_update(&version).await {
            warn!(version_id = %version.version_id, error = %update_err, "failed to persist version failure");
        }
    }

    if let Err(release_err) = engine.locks.release(lease).await {
        warn!(
            key = %job.key,
            error = %release_err,
            "failed to release analysis lock; TTL will reclaim it"
        );
    }
}

async fn execute(
    engine: &AnalysisEngine,
    job: &mut AnalysisJob,
    version: &mut AnalysisVersion,
) -> Result<(), (Stage, DocketError)> {
    let started = Instant::now();

    job.start();
    version.mark_running();
    engine
        .store
        .job_update(job)
        .await
        .map_err(|e| (Stage::Gather, e))?;
    engine
        .store
        .version_update(version)
        .await
        .map_err(|e| (Stage::Gather, e))?;

    // Stage 1: gather case metadata and document text.
    let meta = engine
        .metadata
        .case_metadata(job.case_id)
        .await
        .map_err(|e| (Stage::Gather, e))?;

    let document_ids: Vec<DocumentId> =
        job.documents.iter().map(|d| d.document_id).collect();
    let contents = engine
        .documents
        .fetch_documents(job.case_id, &document_ids)
        .await
        .map_err(|e| (Stage::Gather, e))?;

    let gathered: Vec<GatheredDocument> = job
        .documents
        .iter()
        .map(|snapshot| {
            let text = contents
                .iter()
                .find(|c| c.document_id == snapshot.document_id)
                .and_then(|c| c.text.clone())
                .unwrap_or_else(|| EXTRACTION_PLACEHOLDER.to_string());
            GatheredDocument {
                snapshot: snapshot.clone(),
                text,
            }
        })
        .collect();

    report_progress(engine, job, PROGRESS_GATHERED, "Case inputs gathered").await;

    // Stages 2-3: build the structured request and invoke the provider
    // under a timeout. A hung provider must fail the job, not sit on the
    // lock for its full TTL.
    let request = prompt::build_request(&meta, &gathered, job.tier, &engine.config);
    debug!(job_id = %job.job_id, documents = gathered.len(), "invoking inference provider");

    let raw = match timeout(
        engine.config.provider_timeout,
        engine.inference.complete_structured(&request),
    )
    .await
    {
        Ok(result) => result.map_err(|e| (Stage::Invoke, e))?,
        Err(_) => {
            return Err((
                Stage::Invoke,
                ProviderError::Timeout {
                    provider: engine.inference.model_id().to_string(),
                    elapsed_ms: engine.config.provider_timeout.as_millis() as i64,
                }
                .into(),
            ));
        }
    };

    report_progress(engine, job, PROGRESS_INVOKED, "Model response received").await;

    // Stage 4: validate the raw response before trusting any field.
    let analysis = ParsedAnalysis::from_value(&raw)
        .into_result()
        .map_err(|e| (Stage::Validate, e.into()))?;
    let confidence = analysis.confidence_or_default();

    report_progress(engine, job, PROGRESS_VALIDATED, "Response validated").await;

    // Stage 5: persist the completed version, then the job, then the cache
    // entry. The cache write happens-after the result is durable, so no
    // reader can observe a partially written analysis.
    let payload = serde_json::to_value(&analysis).map_err(|e| {
        (
            Stage::Persist,
            ValidationError::InvalidValue {
                field: "result".to_string(),
                reason: e.to_string(),
            }
            .into(),
        )
    })?;

    let processing_ms = started.elapsed().as_millis() as i64;
    version.complete(payload, confidence, processing_ms);
    engine
        .store
        .version_update(version)
        .await
        .map_err(|e| (Stage::Persist, e))?;

    job.complete();
    engine
        .store
        .job_update(job)
        .await
        .map_err(|e| (Stage::Persist, e))?;

    engine
        .cache
        .write(
            job.key.clone(),
            version.version_id,
            job.case_id,
            job.workspace_id,
            engine.config.cache_ttl,
            meta.latest_movement_at,
        )
        .await
        .map_err(|e| (Stage::Persist, e))?;

    info!(
        case_id = %job.case_id,
        job_id = %job.job_id,
        version_id = %version.version_id,
        processing_ms,
        confidence,
        "analysis job completed"
    );
    Ok(())
}

/// Persist a progress checkpoint. Progress write failures are logged, not
/// fatal.
async fn report_progress(engine: &AnalysisEngine, job: &mut AnalysisJob, progress: i32, message: &str) {
    job.report_progress(progress, Some(message));
    if let Err(err) = engine.store.job_update(job).await {
        warn!(job_id = %job.job_id, error = %err, "failed to persist progress update");
    }
}

/// Opaque, user-safe error summary. Full details stay in the logs; no
/// internal identifiers or stack traces reach the job record.
fn error_summary(stage: Stage, err: &DocketError) -> String {
    match err {
        DocketError::Validation(_) => {
            "analysis response failed validation".to_string()
        }
        DocketError::Provider(ProviderError::Timeout { .. }) => {
            "analysis provider timed out".to_string()
        }
        DocketError::Provider(_) => "analysis provider request failed".to_string(),
        _ => format!("analysis failed during {}", stage.as_str()),
    }
}
