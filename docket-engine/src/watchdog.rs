//! Abandoned-job reconciliation.
//!
//! A worker that crashes after scheduling leaves its job stuck in
//! Queued/Running with no one to finish it; the lock TTL frees the key, but
//! the records would stay non-terminal forever. This sweep marks such jobs
//! Failed. The host application drives it on a schedule (the engine does
//! not own a timer).

use chrono::Utc;
use docket_core::DocketResult;
use tracing::{info, warn};

use crate::coordinator::AnalysisEngine;

impl AnalysisEngine {
    /// Mark abandoned jobs and their versions as Failed.
    ///
    /// A job is abandoned when it is non-terminal, has not been updated for
    /// at least the lock TTL, and no lock is currently held for its key. A
    /// job whose lock is still held is left alone: its worker may be alive,
    /// and if not, the TTL will expire before the next sweep.
    ///
    /// Returns the number of jobs reaped.
    pub async fn reap_abandoned_jobs(&self) -> DocketResult<u64> {
        let ttl = chrono::Duration::from_std(self.locks.ttl())
            .unwrap_or_else(|_| chrono::Duration::minutes(10));
        let cutoff = Utc::now() - ttl;

        let stale = self.store.job_list_stale(cutoff).await?;
        let mut reaped = 0u64;

        for mut job in stale {
            if self.locks.is_held(&job.key).await? {
                continue;
            }

            warn!(
                job_id = %job.job_id,
                case_id = %job.case_id,
                key = %job.key,
                status = %job.status,
                "reaping abandoned analysis job"
            );

            job.fail("analysis abandoned: worker did not finish");
            self.store.job_update(&job).await?;

            if let Some(mut version) = self.store.version_get(job.version_id).await? {
                if !version.status.is_terminal() {
                    version.fail("analysis abandoned: worker did not finish");
                    self.store.version_update(&version).await?;
                }
            }

            reaped += 1;
        }

        if reaped > 0 {
            info!(reaped, "abandoned job sweep finished");
        }
        Ok(reaped)
    }
}
