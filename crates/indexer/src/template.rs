//! The index template: one entry point over the whole write and read path.
//!
//! [`IndexTemplate`] owns the cluster client and everything built on it:
//!
//! - synchronous writes go straight through the [`BulkPipeline`] with an
//!   immediate refresh and report whether every document succeeded;
//! - asynchronous writes are buffered by the [`BulkProcessor`];
//! - `update_by_query` runs through the [`FailureCompensator`];
//! - scans go through the [`ScrollManager`].
//!
//! Reads take a [`DocumentMapper`] that turns each [`Hit`] into the caller's
//! type.
//!
//! # Example
//!
//! ```
//! use std::sync::Arc;
//! use helios_indexer::backends::memory::InMemoryCluster;
//! use helios_indexer::{IndexTemplate, IndexerConfig, SearchRequest, SourceMapper};
//! use serde_json::{Value, json};
//!
//! # #[tokio::main(flavor = "current_thread")]
//! # async fn main() -> Result<(), Box<dyn std::error::Error>> {
//! let cluster = Arc::new(InMemoryCluster::new());
//! let template = IndexTemplate::new(cluster, IndexerConfig::default())?;
//!
//! let docs = vec![(Some("1".to_string()), json!({"name": "a"}))];
//! assert!(template.add_docs("people", false, &docs).await?);
//!
//! let page = template
//!     .search(SearchRequest::new("people"), &SourceMapper::<Value>::new())
//!     .await?;
//! assert_eq!(page.data.len(), 1);
//! # Ok(())
//! # }
//! ```

use std::sync::Arc;
use std::time::Duration;

use serde::Serialize;
use serde_json::{Value, json};
use tracing::{info, warn};

use crate::bulk::{BulkListener, BulkPipeline, BulkProcessor, ShutdownStatus};
use crate::compensate::FailureCompensator;
use crate::config::IndexerConfig;
use crate::core::{ClusterClient, DocumentMapper, RefreshPolicy, map_rows};
use crate::error::{IndexerError, IndexerResult, MappingError};
use crate::scroll::{ScrollManager, ScrollSession};
use crate::types::{
    BatchOutcome, DocumentBody, Hit, MutationRecord, PageResult, Script, SearchRequest,
    SearchResponse,
};

/// Read and write operations against one cluster.
#[derive(Debug)]
pub struct IndexTemplate {
    client: Arc<dyn ClusterClient>,
    pipeline: Arc<BulkPipeline>,
    processor: BulkProcessor,
    compensator: FailureCompensator,
    scroll: ScrollManager,
    config: IndexerConfig,
}

impl IndexTemplate {
    /// Creates a template and starts its background processor.
    ///
    /// Must be called from within a tokio runtime.
    pub fn new(client: Arc<dyn ClusterClient>, config: IndexerConfig) -> IndexerResult<Self> {
        config.validate()?;
        let pipeline = Arc::new(BulkPipeline::new(Arc::clone(&client), &config.bulk));
        Self::assemble(client, pipeline, config)
    }

    /// Creates a template whose batches report to `listener`.
    pub fn with_listener(
        client: Arc<dyn ClusterClient>,
        config: IndexerConfig,
        listener: Arc<dyn BulkListener>,
    ) -> IndexerResult<Self> {
        config.validate()?;
        let pipeline = Arc::new(BulkPipeline::with_listener(
            Arc::clone(&client),
            &config.bulk,
            listener,
        ));
        Self::assemble(client, pipeline, config)
    }

    fn assemble(
        client: Arc<dyn ClusterClient>,
        pipeline: Arc<BulkPipeline>,
        config: IndexerConfig,
    ) -> IndexerResult<Self> {
        let processor = BulkProcessor::start(Arc::clone(&pipeline), &config.bulk)?;
        let compensator = FailureCompensator::new(Arc::clone(&pipeline));
        let scroll = ScrollManager::new(Arc::clone(&client), config.scroll.clone());

        Ok(Self {
            client,
            pipeline,
            processor,
            compensator,
            scroll,
            config,
        })
    }

    /// Returns the cluster client.
    pub fn client(&self) -> &Arc<dyn ClusterClient> {
        &self.client
    }

    /// Returns the configuration.
    pub fn config(&self) -> &IndexerConfig {
        &self.config
    }

    /// Returns the background processor.
    pub fn processor(&self) -> &BulkProcessor {
        &self.processor
    }

    // ========================================================================
    // Synchronous writes
    // ========================================================================

    /// Executes `records` now, refreshing the touched indices.
    pub async fn bulk(&self, records: Vec<MutationRecord>) -> IndexerResult<BatchOutcome> {
        for record in &records {
            record.validate()?;
        }
        Ok(self
            .pipeline
            .execute(records, RefreshPolicy::Immediate)
            .await?)
    }

    /// Indexes documents given as `(id, document)` pairs.
    ///
    /// With `create_only`, existing ids are left untouched and reported as
    /// rejected. Returns true if every document was written.
    pub async fn add_docs<T: Serialize>(
        &self,
        index: &str,
        create_only: bool,
        docs: &[(Option<String>, T)],
    ) -> IndexerResult<bool> {
        let records = docs
            .iter()
            .map(|(id, doc)| {
                let body = DocumentBody::from_serializable(doc)?;
                Ok(if create_only {
                    MutationRecord::create_doc(index, id.clone(), body)
                } else {
                    MutationRecord::index_doc(index, id.clone(), body)
                })
            })
            .collect::<Result<Vec<_>, MappingError>>()?;

        self.execute_all("add_docs", records).await
    }

    /// Merges partial documents given as `(id, document)` pairs.
    ///
    /// With `upsert`, missing documents are created from the partial one.
    pub async fn update_docs<T: Serialize>(
        &self,
        index: &str,
        upsert: bool,
        docs: &[(String, T)],
    ) -> IndexerResult<bool> {
        let records = docs
            .iter()
            .map(|(id, doc)| {
                let body = DocumentBody::from_serializable(doc)?;
                Ok(MutationRecord::update_doc(index, id.as_str(), body, upsert))
            })
            .collect::<Result<Vec<_>, MappingError>>()?;

        self.execute_all("update_docs", records).await
    }

    /// Runs `script` against each of `ids`.
    pub async fn update_docs_by_script(
        &self,
        index: &str,
        script: &Script,
        ids: &[String],
    ) -> IndexerResult<bool> {
        let records = ids
            .iter()
            .map(|id| MutationRecord::update_script(index, id.as_str(), script.clone()))
            .collect();

        self.execute_all("update_docs_by_script", records).await
    }

    /// Deletes each of `ids`.
    pub async fn delete_docs(&self, index: &str, ids: &[String]) -> IndexerResult<bool> {
        let records = ids
            .iter()
            .map(|id| MutationRecord::delete(index, id.as_str()))
            .collect();

        self.execute_all("delete_docs", records).await
    }

    /// Applies `script` to every document of `index` matching `query`,
    /// resubmitting documents that lost a version race.
    pub async fn update_by_query(
        &self,
        index: &str,
        query: &Value,
        script: &Script,
    ) -> IndexerResult<bool> {
        let report = self.compensator.compensate(index, script, query).await?;
        Ok(report.succeeded())
    }

    async fn execute_all(
        &self,
        operation: &'static str,
        records: Vec<MutationRecord>,
    ) -> IndexerResult<bool> {
        if records.is_empty() {
            return Ok(true);
        }

        let outcome = self.bulk(records).await?;
        if outcome.has_failures() {
            warn!(
                operation = operation,
                execution_id = outcome.execution_id,
                failures = outcome.failures().count(),
                reason = %outcome.failure_message(),
                "Synchronous write had failures"
            );
            return Ok(false);
        }
        Ok(true)
    }

    // ========================================================================
    // Reads
    // ========================================================================

    /// Fetches one document.
    pub async fn get<T, M>(
        &self,
        index: &str,
        id: &str,
        source_includes: &[String],
        mapper: &M,
    ) -> IndexerResult<Option<T>>
    where
        M: DocumentMapper<Hit, T>,
    {
        match self.client.get(index, id, source_includes).await? {
            Some(hit) => Ok(Some(mapper.map(&hit, 0)?)),
            None => Ok(None),
        }
    }

    /// Fetches several documents by id, skipping missing ones.
    pub async fn mget<T, M>(
        &self,
        index: &str,
        ids: &[String],
        source_includes: &[String],
        mapper: &M,
    ) -> IndexerResult<Vec<T>>
    where
        M: DocumentMapper<Hit, T>,
    {
        let hits = self.client.mget(index, ids, source_includes).await?;
        Ok(map_rows(&hits, mapper)?)
    }

    /// Looks documents up by id with an ids query.
    pub async fn ids<T, M>(
        &self,
        index: &str,
        ids: &[String],
        source_includes: &[String],
        mapper: &M,
    ) -> IndexerResult<Vec<T>>
    where
        M: DocumentMapper<Hit, T>,
    {
        if ids.is_empty() {
            return Ok(Vec::new());
        }

        let request = SearchRequest::new(index)
            .with_query(json!({ "ids": { "values": ids } }))
            .with_size(ids.len())
            .with_source_includes(source_includes.to_vec());
        let response = self.client.search(&request).await?;
        Ok(map_rows(&response.hits, mapper)?)
    }

    /// Runs a search and maps its hits.
    pub async fn search<T, M>(&self, request: SearchRequest, mapper: &M) -> IndexerResult<PageResult<T>>
    where
        M: DocumentMapper<Hit, T>,
    {
        info!(indices = ?request.indices, "Searching");
        let response = self.client.search(&request).await?;
        let data = map_rows(&response.hits, mapper)?;
        Ok(PageResult::from_response(&response, data))
    }

    /// Returns up to `size` documents of `indices` with an exact total.
    pub async fn search_all<T, M>(
        &self,
        indices: &[String],
        size: usize,
        mapper: &M,
    ) -> IndexerResult<PageResult<T>>
    where
        M: DocumentMapper<Hit, T>,
    {
        let request = SearchRequest::for_indices(indices.iter().cloned())
            .with_size(size)
            .with_track_total_hits(true);
        self.search(request, mapper).await
    }

    /// Returns page `page_no` (1-based) of `page_size` documents.
    ///
    /// Query, sort and source filtering come from `request`.
    pub async fn search_docs<T, M>(
        &self,
        request: SearchRequest,
        page_no: usize,
        page_size: usize,
        mapper: &M,
    ) -> IndexerResult<PageResult<T>>
    where
        M: DocumentMapper<Hit, T>,
    {
        if page_no < 1 || page_size < 1 {
            return Err(IndexerError::InvalidRequest {
                message: format!(
                    "page_no and page_size must be at least 1 (got {} and {})",
                    page_no, page_size
                ),
            });
        }

        let request = request
            .with_page((page_no - 1) * page_size, page_size)
            .with_track_total_hits(true);
        self.search(request, mapper).await
    }

    /// Runs a search and maps the whole response, aggregations included.
    pub async fn search_response<T, F>(&self, request: SearchRequest, mapper: F) -> IndexerResult<T>
    where
        F: FnOnce(&SearchResponse) -> Result<T, MappingError>,
    {
        let response = self.client.search(&request).await?;
        Ok(mapper(&response)?)
    }

    // ========================================================================
    // Scans
    // ========================================================================

    /// Opens a scan and maps its first page.
    ///
    /// `page_size` and `ttl` fall back to the scroll configuration.
    pub async fn open_scan<T, M>(
        &self,
        request: SearchRequest,
        page_size: Option<usize>,
        ttl: Option<Duration>,
        mapper: &M,
    ) -> IndexerResult<(ScrollSession, PageResult<T>)>
    where
        M: DocumentMapper<Hit, T>,
    {
        let (session, response) = self
            .scroll
            .open_with(
                request,
                page_size.unwrap_or(self.config.scroll.page_size),
                ttl.unwrap_or(self.config.scroll.ttl),
            )
            .await?;
        let data = map_rows(&response.hits, mapper)?;
        Ok((session, PageResult::from_response(&response, data)))
    }

    /// Maps the next page of a scan.
    pub async fn continue_scan<T, M>(
        &self,
        session: &mut ScrollSession,
        mapper: &M,
    ) -> IndexerResult<PageResult<T>>
    where
        M: DocumentMapper<Hit, T>,
    {
        let response = self.scroll.continue_scan(session).await?;
        let data = map_rows(&response.hits, mapper)?;
        Ok(PageResult::from_response(&response, data))
    }

    /// Maps every document matching `request`.
    pub async fn scan_all<T, M>(&self, request: SearchRequest, mapper: &M) -> IndexerResult<Vec<T>>
    where
        M: DocumentMapper<Hit, T>,
    {
        let hits = self.scroll.scan_all(request).await?;
        Ok(map_rows(&hits, mapper)?)
    }

    /// Closes a scan.
    pub async fn close_scan(&self, session: &mut ScrollSession) {
        self.scroll.close(session).await;
    }

    // ========================================================================
    // Admin
    // ========================================================================

    /// Returns true if every index exists.
    pub async fn indices_exist(&self, indices: &[String]) -> IndexerResult<bool> {
        Ok(self.client.indices_exist(indices).await?)
    }

    /// Makes recent writes to `indices` searchable.
    pub async fn refresh(&self, indices: &[String]) -> IndexerResult<()> {
        Ok(self.client.refresh(indices).await?)
    }

    // ========================================================================
    // Asynchronous writes
    // ========================================================================

    /// Buffers an index of `doc`.
    pub fn add_doc_async<T: Serialize>(
        &self,
        index: &str,
        id: Option<String>,
        doc: &T,
    ) -> IndexerResult<()> {
        let body = DocumentBody::from_serializable(doc)?;
        self.processor
            .enqueue(MutationRecord::index_doc(index, id, body))
    }

    /// Buffers a partial update of `id`, creating the document if missing.
    pub fn update_doc_async<T: Serialize>(
        &self,
        index: &str,
        id: &str,
        doc: &T,
    ) -> IndexerResult<()> {
        let body = DocumentBody::from_serializable(doc)?;
        self.processor
            .enqueue(MutationRecord::update_doc(index, id, body, true))
    }

    /// Buffers a delete of `id`.
    pub fn delete_doc_async(&self, index: &str, id: &str) -> IndexerResult<()> {
        self.processor.enqueue(MutationRecord::delete(index, id))
    }

    /// Hands everything buffered to the pipeline.
    pub async fn flush(&self) -> IndexerResult<()> {
        self.processor.flush().await
    }

    /// Shuts the processor down, waiting up to `timeout`, then closes the
    /// client.
    pub async fn close(&self, timeout: Duration) -> IndexerResult<ShutdownStatus> {
        let status = self.processor.shutdown(timeout).await;
        self.client.close().await?;
        info!(status = ?status, "Index template closed");
        Ok(status)
    }
}
