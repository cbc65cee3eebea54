//! The cluster client capability.
//!
//! Everything above this trait (pipeline, compensator, scroll manager,
//! template) talks to the cluster only through [`ClusterClient`]. Backends
//! implement it over HTTP ([`ElasticsearchClient`]) or in memory
//! ([`InMemoryCluster`]).
//!
//! [`ElasticsearchClient`]: crate::backends::elasticsearch::ElasticsearchClient
//! [`InMemoryCluster`]: crate::backends::memory::InMemoryCluster

use std::fmt::Debug;
use std::time::Duration;

use async_trait::async_trait;
use serde_json::Value;

use crate::error::TransportError;
use crate::types::{Hit, MutationRecord, Script, SearchRequest, SearchResponse};

/// When written documents become visible to search.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum RefreshPolicy {
    /// Visible after the next periodic refresh.
    #[default]
    None,
    /// Refresh the affected shards before responding.
    Immediate,
    /// Respond once a periodic refresh made the writes visible.
    WaitFor,
}

/// One item of a bulk response, in request order.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BulkItem {
    pub index: String,
    /// Id of the document; cluster-assigned for auto-id index actions.
    pub id: Option<String>,
    /// Item status code.
    pub status: u16,
    /// Result keyword (`created`, `updated`, `deleted`, `noop`, `not_found`).
    pub result: Option<String>,
    /// Error reason when the item failed.
    pub error: Option<String>,
}

/// Response to a bulk request.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct BulkResponse {
    pub took: Duration,
    /// True if any item failed.
    pub errors: bool,
    pub items: Vec<BulkItem>,
}

/// A document the update-by-query could not update.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UpdateByQueryFailure {
    pub index: String,
    pub id: Option<String>,
    pub status: u16,
    pub reason: String,
}

impl UpdateByQueryFailure {
    /// Returns true for a version conflict.
    pub fn is_conflict(&self) -> bool {
        self.status == 409
    }
}

/// Response to an update-by-query.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct UpdateByQueryResponse {
    pub took: Duration,
    /// Documents matched.
    pub total: u64,
    /// Documents updated.
    pub updated: u64,
    /// Documents the script left unchanged.
    pub noops: u64,
    /// Documents the script deleted.
    pub deleted: u64,
    /// Documents that hit a version conflict.
    pub version_conflicts: u64,
    /// Per-document failures.
    pub failures: Vec<UpdateByQueryFailure>,
}

impl UpdateByQueryResponse {
    /// Matched documents the request never reached because it aborted.
    pub fn unprocessed(&self) -> u64 {
        let reached = self.updated + self.noops + self.deleted + self.failures.len() as u64;
        self.total.saturating_sub(reached)
    }
}

/// Remote operations the indexer needs from a cluster.
///
/// Implementations map whole-request failures to [`TransportError`]; item
/// failures inside a successful bulk response are reported in
/// [`BulkResponse::items`].
#[async_trait]
pub trait ClusterClient: Send + Sync + Debug {
    /// Returns a human-readable backend name for logs and errors.
    fn name(&self) -> &'static str;

    /// Executes a batch of mutations in one request.
    async fn bulk(
        &self,
        records: &[MutationRecord],
        refresh: RefreshPolicy,
    ) -> Result<BulkResponse, TransportError>;

    /// Runs a search; opens a scroll context when `request.scroll` is set.
    async fn search(&self, request: &SearchRequest) -> Result<SearchResponse, TransportError>;

    /// Fetches the next page of a scroll context and extends its keep-alive.
    ///
    /// Returns [`TransportError::ScrollContextMissing`] when the context is
    /// gone.
    async fn scroll(
        &self,
        scroll_id: &str,
        keep_alive: Duration,
    ) -> Result<SearchResponse, TransportError>;

    /// Releases a scroll context.
    async fn clear_scroll(&self, scroll_id: &str) -> Result<(), TransportError>;

    /// Runs a script against every document matching a query.
    ///
    /// Aborts after the first scroll batch containing a failure; conflicts in
    /// that batch are reported with status 409 and later matches are left
    /// untouched (see [`UpdateByQueryResponse::unprocessed`]).
    async fn update_by_query(
        &self,
        index: &str,
        query: &Value,
        script: &Script,
        refresh: bool,
    ) -> Result<UpdateByQueryResponse, TransportError>;

    /// Makes recent writes to the indices visible to search.
    async fn refresh(&self, indices: &[String]) -> Result<(), TransportError>;

    /// Fetches one document, `None` if it does not exist.
    async fn get(
        &self,
        index: &str,
        id: &str,
        source_includes: &[String],
    ) -> Result<Option<Hit>, TransportError>;

    /// Fetches several documents; missing ids are skipped.
    async fn mget(
        &self,
        index: &str,
        ids: &[String],
        source_includes: &[String],
    ) -> Result<Vec<Hit>, TransportError>;

    /// Returns true if all indices exist.
    async fn indices_exist(&self, indices: &[String]) -> Result<bool, TransportError>;

    /// Releases client resources. Later calls fail with
    /// [`TransportError::Closed`].
    async fn close(&self) -> Result<(), TransportError>;
}
