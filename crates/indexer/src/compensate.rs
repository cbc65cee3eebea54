//! Recovery for query-driven scripted updates.
//!
//! An update-by-query aborts on version conflicts and reports the losing
//! documents. [`FailureCompensator`] resubmits exactly those ids as one batch
//! of per-id scripted updates, with server-side conflict retries, through
//! the bulk pipeline. Failures other than conflicts are reported and never
//! retried. Matches the aborted request never reached are not resubmitted;
//! they make the compensation fail.

use std::sync::Arc;

use serde_json::Value;
use tracing::{error, info, warn};

use crate::bulk::BulkPipeline;
use crate::core::{RefreshPolicy, UpdateByQueryFailure, UpdateByQueryResponse};
use crate::error::IndexerResult;
use crate::types::{BatchOutcome, DEFAULT_RETRY_ON_CONFLICT, MutationRecord, Script};

/// What a compensated update-by-query did.
#[derive(Debug, Clone)]
pub struct CompensationReport {
    /// Response of the update-by-query.
    pub update: UpdateByQueryResponse,
    /// Ids that lost a version race and were resubmitted.
    pub conflict_ids: Vec<String>,
    /// Failures that were not conflicts.
    pub other_failures: Vec<UpdateByQueryFailure>,
    /// Outcome of the resubmission, if one was needed.
    pub resubmission: Option<BatchOutcome>,
}

impl CompensationReport {
    /// Returns true if every matched document was updated in the end.
    pub fn succeeded(&self) -> bool {
        self.other_failures.is_empty()
            && self.update.unprocessed() == 0
            && self
                .resubmission
                .as_ref()
                .is_none_or(|outcome| !outcome.has_failures())
    }
}

/// Runs update-by-query and resubmits conflicting documents.
#[derive(Debug, Clone)]
pub struct FailureCompensator {
    pipeline: Arc<BulkPipeline>,
}

impl FailureCompensator {
    /// Creates a compensator that resubmits through `pipeline`.
    pub fn new(pipeline: Arc<BulkPipeline>) -> Self {
        Self { pipeline }
    }

    /// Applies `script` to every document of `index` matching `query`.
    ///
    /// Fails only when the update-by-query itself cannot reach the cluster;
    /// document-level failures are in the report.
    pub async fn compensate(
        &self,
        index: &str,
        script: &Script,
        query: &Value,
    ) -> IndexerResult<CompensationReport> {
        let update = self
            .pipeline
            .client()
            .update_by_query(index, query, script, true)
            .await?;

        let (conflicts, other_failures): (Vec<_>, Vec<_>) = update
            .failures
            .iter()
            .cloned()
            .partition(UpdateByQueryFailure::is_conflict);

        for failure in &other_failures {
            warn!(
                index = %failure.index,
                id = failure.id.as_deref().unwrap_or(""),
                status = failure.status,
                reason = %failure.reason,
                "Update by query failed for document"
            );
        }

        let unprocessed = update.unprocessed();
        if unprocessed > 0 {
            warn!(
                index = index,
                total = update.total,
                unprocessed = unprocessed,
                "Update by query aborted before reaching every match"
            );
        }

        let conflict_ids: Vec<String> = conflicts.into_iter().filter_map(|f| f.id).collect();

        let resubmission = if conflict_ids.is_empty() {
            None
        } else {
            info!(
                index = index,
                conflicts = conflict_ids.len(),
                "Update by query hit version conflicts, resubmitting"
            );

            let batch = conflict_ids
                .iter()
                .map(|id| {
                    MutationRecord::update_script(index, id.as_str(), script.clone())
                        .with_retry_on_conflict(DEFAULT_RETRY_ON_CONFLICT)
                })
                .collect();
            let outcome = self
                .pipeline
                .execute(batch, RefreshPolicy::Immediate)
                .await?;

            if outcome.has_failures() {
                error!(
                    index = index,
                    execution_id = outcome.execution_id,
                    failure = %outcome.failure_message(),
                    "Resubmission of conflicting documents failed"
                );
            }
            Some(outcome)
        };

        Ok(CompensationReport {
            update,
            conflict_ids,
            other_failures,
            resubmission,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backends::memory::InMemoryCluster;
    use crate::config::BulkConfig;
    use serde_json::json;

    async fn seeded(n: usize) -> Arc<InMemoryCluster> {
        let cluster = Arc::new(InMemoryCluster::new());
        for i in 0..n {
            cluster.insert("idx", &i.to_string(), json!({"n": i, "touched": false}));
        }
        cluster
    }

    #[tokio::test(start_paused = true)]
    async fn test_no_conflicts_needs_no_resubmission() {
        let cluster = seeded(4).await;
        let pipeline = Arc::new(BulkPipeline::new(cluster.clone(), &BulkConfig::default()));
        let compensator = FailureCompensator::new(pipeline);

        let script = Script::painless("ctx._source.touched = params.touched").with_param("touched", true);
        let report = compensator
            .compensate("idx", &script, &json!({"match_all": {}}))
            .await
            .unwrap();

        assert!(report.succeeded());
        assert!(report.resubmission.is_none());
        assert_eq!(report.update.updated, 4);
        assert_eq!(cluster.bulk_call_count(), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_non_conflict_failure_is_not_retried() {
        let cluster = seeded(2).await;
        cluster.fail_update_by_query_doc("idx", "1", 500, "script error");
        let pipeline = Arc::new(BulkPipeline::new(cluster.clone(), &BulkConfig::default()));
        let compensator = FailureCompensator::new(pipeline);

        let report = compensator
            .compensate("idx", &Script::new("ctx._source.n++"), &json!({"match_all": {}}))
            .await
            .unwrap();

        assert!(!report.succeeded());
        assert_eq!(report.other_failures.len(), 1);
        assert!(report.conflict_ids.is_empty());
        assert_eq!(cluster.bulk_call_count(), 0);
    }
}
