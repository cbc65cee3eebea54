//! In-memory cluster client.
//!
//! Holds documents in process and understands a small subset of the query
//! language: `match_all`, `term`, `terms`, `ids` and `bool` with `must`,
//! `filter`, `should` and `must_not`. Scripts are not interpreted; a scripted
//! update merges the script's `params` into the stored source.
//!
//! Faults can be injected for testing: failing whole bulk calls, rejecting
//! individual items with 429, version conflicts on chosen documents and
//! per-document update-by-query failures. Update-by-query aborts after the
//! first batch of matches that produced a failure. Every bulk call is logged with its
//! start instant, so retry schedules can be checked under paused time.

use std::cmp::Ordering as CmpOrdering;
use std::collections::{BTreeMap, HashMap};
use std::sync::atomic::{AtomicBool, AtomicU64, AtomicUsize, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use base64::{Engine, engine::general_purpose::URL_SAFE_NO_PAD};
use parking_lot::Mutex;
use serde_json::{Map, Value, json};
use tokio::time::{Instant, sleep};

use crate::core::{
    BulkItem, BulkResponse, ClusterClient, RefreshPolicy, UpdateByQueryFailure,
    UpdateByQueryResponse,
};
use crate::error::TransportError;
use crate::types::{
    DOC_ORDER_FIELD, Hit, Mutation, MutationRecord, OperationKind, Script, SearchRequest,
    SearchResponse, SortField, SortOrder, TotalHits, TotalRelation, UpdateBody,
};

const BACKEND_NAME: &str = "memory";

/// Hits counted exactly when `track_total_hits` is off.
const DEFAULT_TRACK_TOTAL_HITS_UP_TO: u64 = 10_000;

/// Page size when a search does not set one.
const DEFAULT_SEARCH_SIZE: usize = 10;

/// Matches update-by-query handles per scroll batch, as Elasticsearch does.
pub const UPDATE_BY_QUERY_BATCH_SIZE: usize = 1000;

/// A logged bulk call.
#[derive(Debug, Clone)]
pub struct BulkCall {
    /// When the call started.
    pub at: Instant,
    /// Document ids in request order.
    pub ids: Vec<Option<String>>,
    /// Operations in request order.
    pub operations: Vec<OperationKind>,
    /// Requested refresh policy.
    pub refresh: RefreshPolicy,
}

#[derive(Debug, Clone)]
struct StoredDoc {
    seq: u64,
    version: u64,
    source: Value,
}

#[derive(Debug)]
struct ScrollContext {
    hits: Vec<Hit>,
    total: TotalHits,
    offset: usize,
    page_size: usize,
    expires_at: Instant,
}

type DocKey = (String, String);

#[derive(Debug, Default)]
struct FaultPlan {
    bulk_failures: Option<(usize, TransportError)>,
    item_rejections: HashMap<DocKey, u32>,
    conflicts: HashMap<DocKey, u32>,
    update_by_query_failures: HashMap<DocKey, (u16, String)>,
}

impl FaultPlan {
    fn take_bulk_failure(&mut self) -> Option<TransportError> {
        let (remaining, error) = self.bulk_failures.as_mut()?;
        let error = error.clone();
        *remaining -= 1;
        if *remaining == 0 {
            self.bulk_failures = None;
        }
        Some(error)
    }

    fn take(map: &mut HashMap<DocKey, u32>, index: &str, id: &str) -> bool {
        let key = (index.to_string(), id.to_string());
        match map.get_mut(&key) {
            Some(remaining) if *remaining > 0 => {
                *remaining -= 1;
                true
            }
            _ => false,
        }
    }
}

#[derive(Debug, Default)]
struct Inner {
    indices: BTreeMap<String, HashMap<String, StoredDoc>>,
    scrolls: HashMap<String, ScrollContext>,
    faults: FaultPlan,
    bulk_calls: Vec<BulkCall>,
    bulk_latency: Duration,
    refreshes: usize,
    update_by_query_calls: usize,
    update_by_query_batch_size: Option<usize>,
}

/// A [`ClusterClient`] backed by process memory.
#[derive(Debug, Default)]
pub struct InMemoryCluster {
    inner: Mutex<Inner>,
    next_seq: AtomicU64,
    next_scroll: AtomicU64,
    active_bulk: AtomicUsize,
    max_active_bulk: AtomicUsize,
    closed: AtomicBool,
}

impl InMemoryCluster {
    /// Creates an empty cluster.
    pub fn new() -> Self {
        Self::default()
    }

    // ========================================================================
    // Seeding and inspection
    // ========================================================================

    /// Creates an empty index if it does not exist.
    pub fn create_index(&self, index: &str) {
        self.inner.lock().indices.entry(index.to_string()).or_default();
    }

    /// Stores a document directly, bypassing the call log and faults.
    pub fn insert(&self, index: &str, id: &str, source: Value) {
        let seq = self.next_seq();
        let mut inner = self.inner.lock();
        let docs = inner.indices.entry(index.to_string()).or_default();
        let version = docs.get(id).map_or(1, |d| d.version + 1);
        docs.insert(
            id.to_string(),
            StoredDoc {
                seq,
                version,
                source,
            },
        );
    }

    /// Returns a stored document's source.
    pub fn document(&self, index: &str, id: &str) -> Option<Value> {
        let inner = self.inner.lock();
        inner
            .indices
            .get(index)
            .and_then(|docs| docs.get(id))
            .map(|d| d.source.clone())
    }

    /// Returns a stored document's version.
    pub fn version(&self, index: &str, id: &str) -> Option<u64> {
        let inner = self.inner.lock();
        inner
            .indices
            .get(index)
            .and_then(|docs| docs.get(id))
            .map(|d| d.version)
    }

    /// Number of documents in an index.
    pub fn document_count(&self, index: &str) -> usize {
        self.inner.lock().indices.get(index).map_or(0, HashMap::len)
    }

    /// Logged bulk calls, oldest first.
    pub fn bulk_calls(&self) -> Vec<BulkCall> {
        self.inner.lock().bulk_calls.clone()
    }

    /// Number of bulk calls so far.
    pub fn bulk_call_count(&self) -> usize {
        self.inner.lock().bulk_calls.len()
    }

    /// Highest number of bulk calls observed running at once.
    pub fn max_concurrent_bulk(&self) -> usize {
        self.max_active_bulk.load(Ordering::SeqCst)
    }

    /// Number of scroll contexts still held.
    pub fn open_scroll_count(&self) -> usize {
        self.inner.lock().scrolls.len()
    }

    /// Number of refresh calls.
    pub fn refresh_count(&self) -> usize {
        self.inner.lock().refreshes
    }

    /// Number of update-by-query calls.
    pub fn update_by_query_count(&self) -> usize {
        self.inner.lock().update_by_query_calls
    }

    /// Returns true once [`ClusterClient::close`] was called.
    pub fn is_closed(&self) -> bool {
        self.closed.load(Ordering::SeqCst)
    }

    // ========================================================================
    // Fault injection
    // ========================================================================

    /// Fails the next `times` bulk calls with `error`.
    pub fn fail_next_bulk(&self, times: usize, error: TransportError) {
        let mut inner = self.inner.lock();
        inner.faults.bulk_failures = (times > 0).then_some((times, error));
    }

    /// Rejects the next `times` bulk items for a document with status 429.
    pub fn reject_items(&self, index: &str, id: &str, times: u32) {
        let mut inner = self.inner.lock();
        inner
            .faults
            .item_rejections
            .insert((index.to_string(), id.to_string()), times);
    }

    /// Makes the next `times` write attempts on a document lose a version
    /// race. Each server-side retry of an update counts as an attempt.
    pub fn conflict_on(&self, index: &str, id: &str, times: u32) {
        let mut inner = self.inner.lock();
        inner
            .faults
            .conflicts
            .insert((index.to_string(), id.to_string()), times);
    }

    /// Makes update-by-query report a failure for a document.
    pub fn fail_update_by_query_doc(&self, index: &str, id: &str, status: u16, reason: &str) {
        let mut inner = self.inner.lock();
        inner
            .faults
            .update_by_query_failures
            .insert((index.to_string(), id.to_string()), (status, reason.to_string()));
    }

    /// Sets how many matches update-by-query processes per scroll batch
    /// before checking for failures. Defaults to
    /// [`UPDATE_BY_QUERY_BATCH_SIZE`].
    pub fn set_update_by_query_batch_size(&self, size: usize) {
        self.inner.lock().update_by_query_batch_size = Some(size.max(1));
    }

    /// Delays every bulk call.
    pub fn set_bulk_latency(&self, latency: Duration) {
        self.inner.lock().bulk_latency = latency;
    }

    /// Forgets every scroll context, as a cluster restart would.
    pub fn drop_scroll_contexts(&self) {
        self.inner.lock().scrolls.clear();
    }

    // ========================================================================
    // Internals
    // ========================================================================

    fn next_seq(&self) -> u64 {
        self.next_seq.fetch_add(1, Ordering::SeqCst)
    }

    fn ensure_open(&self) -> Result<(), TransportError> {
        if self.closed.load(Ordering::SeqCst) {
            Err(TransportError::Closed {
                backend_name: BACKEND_NAME.to_string(),
            })
        } else {
            Ok(())
        }
    }

    fn apply_bulk(&self, records: &[MutationRecord]) -> Vec<BulkItem> {
        let mut inner = self.inner.lock();
        records
            .iter()
            .map(|record| self.apply_record(&mut inner, record))
            .collect()
    }

    fn apply_record(&self, inner: &mut Inner, record: &MutationRecord) -> BulkItem {
        let id = record
            .id
            .clone()
            .unwrap_or_else(|| uuid::Uuid::new_v4().simple().to_string());
        let item = |status: u16, result: Option<&str>, error: Option<String>| BulkItem {
            index: record.index.clone(),
            id: Some(id.clone()),
            status,
            result: result.map(str::to_string),
            error,
        };

        if FaultPlan::take(&mut inner.faults.item_rejections, &record.index, &id) {
            return item(
                429,
                None,
                Some("es_rejected_execution_exception: rejected execution".to_string()),
            );
        }

        let exists = inner
            .indices
            .get(&record.index)
            .is_some_and(|docs| docs.contains_key(&id));

        match &record.mutation {
            Mutation::Index {
                body,
                creation_only,
            } => {
                if *creation_only && exists {
                    return item(
                        409,
                        None,
                        Some(format!(
                            "version_conflict_engine_exception: [{}]: document already exists",
                            id
                        )),
                    );
                }
                if FaultPlan::take(&mut inner.faults.conflicts, &record.index, &id) {
                    return item(409, None, Some(conflict_reason(&id)));
                }
                let source = match body.to_value() {
                    Ok(source) => source,
                    Err(e) => return item(400, None, Some(format!("mapper_parsing_exception: {}", e))),
                };
                self.store(inner, &record.index, &id, source);
                if exists {
                    item(200, Some("updated"), None)
                } else {
                    item(201, Some("created"), None)
                }
            }

            Mutation::Update {
                body,
                upsert_on_missing,
                retry_on_conflict,
            } => {
                if !exists {
                    return match body {
                        UpdateBody::Doc(doc) if *upsert_on_missing => match doc.to_value() {
                            Ok(source) => {
                                self.store(inner, &record.index, &id, source);
                                item(201, Some("created"), None)
                            }
                            Err(e) => item(400, None, Some(format!("mapper_parsing_exception: {}", e))),
                        },
                        _ => item(
                            404,
                            None,
                            Some(format!("document_missing_exception: [{}]: document missing", id)),
                        ),
                    };
                }

                for _ in 0..=*retry_on_conflict {
                    if FaultPlan::take(&mut inner.faults.conflicts, &record.index, &id) {
                        continue;
                    }
                    let patch = match body {
                        UpdateBody::Doc(doc) => match doc.to_value() {
                            Ok(patch) => patch,
                            Err(e) => {
                                return item(400, None, Some(format!("mapper_parsing_exception: {}", e)));
                            }
                        },
                        UpdateBody::Script(script) => Value::Object(script.params.clone()),
                    };
                    self.merge(inner, &record.index, &id, &patch);
                    return item(200, Some("updated"), None);
                }
                item(409, None, Some(conflict_reason(&id)))
            }

            Mutation::Delete => {
                if !exists {
                    return item(404, Some("not_found"), None);
                }
                if FaultPlan::take(&mut inner.faults.conflicts, &record.index, &id) {
                    return item(409, None, Some(conflict_reason(&id)));
                }
                if let Some(docs) = inner.indices.get_mut(&record.index) {
                    docs.remove(&id);
                }
                item(200, Some("deleted"), None)
            }
        }
    }

    fn store(&self, inner: &mut Inner, index: &str, id: &str, source: Value) {
        let seq = self.next_seq();
        let docs = inner.indices.entry(index.to_string()).or_default();
        match docs.get_mut(id) {
            Some(doc) => {
                doc.version += 1;
                doc.source = source;
            }
            None => {
                docs.insert(
                    id.to_string(),
                    StoredDoc {
                        seq,
                        version: 1,
                        source,
                    },
                );
            }
        }
    }

    fn merge(&self, inner: &mut Inner, index: &str, id: &str, patch: &Value) {
        let Some(doc) = inner.indices.get_mut(index).and_then(|docs| docs.get_mut(id)) else {
            return;
        };
        if let (Value::Object(target), Value::Object(patch)) = (&mut doc.source, patch) {
            for (key, value) in patch {
                target.insert(key.clone(), value.clone());
            }
        }
        doc.version += 1;
    }

    fn index_not_found(index: &str) -> TransportError {
        TransportError::Status {
            backend_name: BACKEND_NAME.to_string(),
            status: 404,
            message: format!("index_not_found_exception: no such index [{}]", index),
        }
    }

    /// Matching hits of a request in request sort order, without paging.
    fn matching_hits(
        &self,
        inner: &Inner,
        request: &SearchRequest,
    ) -> Result<Vec<Hit>, TransportError> {
        let query = request.query_or_match_all();
        let mut matched: Vec<(&String, &String, &StoredDoc)> = Vec::new();

        for index in &request.indices {
            let docs = inner
                .indices
                .get(index)
                .ok_or_else(|| Self::index_not_found(index))?;
            for (id, doc) in docs {
                if matches_query(&query, id, &doc.source) {
                    matched.push((index, id, doc));
                }
            }
        }

        matched.sort_by(|a, b| compare_docs(&request.sort, a.2, b.2));

        Ok(matched
            .into_iter()
            .map(|(index, id, doc)| Hit {
                index: index.clone(),
                id: id.clone(),
                score: request.sort.is_empty().then_some(1.0),
                source: Some(filter_source(
                    &doc.source,
                    &request.source_includes,
                    &request.source_excludes,
                )),
                sort: request
                    .sort
                    .iter()
                    .map(|s| sort_value(&s.field, doc))
                    .collect(),
            })
            .collect())
    }
}

fn conflict_reason(id: &str) -> String {
    format!(
        "version_conflict_engine_exception: [{}]: version conflict, current version is different",
        id
    )
}

// ============================================================================
// Query evaluation
// ============================================================================

fn field_value(id: &str, source: &Value, field: &str) -> Option<Value> {
    if field == "_id" {
        return Some(Value::String(id.to_string()));
    }
    let mut current = source;
    for part in field.split('.') {
        current = current.get(part)?;
    }
    Some(current.clone())
}

fn clauses(value: Option<&Value>) -> Vec<&Value> {
    match value {
        Some(Value::Array(items)) => items.iter().collect(),
        Some(other) => vec![other],
        None => Vec::new(),
    }
}

fn matches_query(query: &Value, id: &str, source: &Value) -> bool {
    let Some((kind, body)) = query.as_object().and_then(|q| q.iter().next()) else {
        return true;
    };

    match kind.as_str() {
        "match_all" => true,
        "match_none" => false,
        "ids" => body
            .get("values")
            .and_then(Value::as_array)
            .is_some_and(|values| values.iter().any(|v| v.as_str() == Some(id))),
        "term" => body.as_object().and_then(|b| b.iter().next()).is_some_and(
            |(field, expected)| {
                let expected = expected.get("value").unwrap_or(expected);
                field_value(id, source, field).as_ref() == Some(expected)
            },
        ),
        "terms" => body.as_object().and_then(|b| b.iter().next()).is_some_and(
            |(field, expected)| {
                let actual = field_value(id, source, field);
                expected
                    .as_array()
                    .is_some_and(|values| values.iter().any(|v| actual.as_ref() == Some(v)))
            },
        ),
        "bool" => {
            let must = clauses(body.get("must"));
            let filter = clauses(body.get("filter"));
            let should = clauses(body.get("should"));
            let must_not = clauses(body.get("must_not"));

            let required = must
                .iter()
                .chain(filter.iter())
                .all(|q| matches_query(q, id, source));
            let excluded = must_not.iter().any(|q| matches_query(q, id, source));
            let optional = should.is_empty()
                || !must.is_empty()
                || !filter.is_empty()
                || should.iter().any(|q| matches_query(q, id, source));

            required && !excluded && optional
        }
        _ => false,
    }
}

fn sort_value(field: &str, doc: &StoredDoc) -> Value {
    if field == DOC_ORDER_FIELD {
        return json!(doc.seq);
    }
    field_value("", &doc.source, field).unwrap_or(Value::Null)
}

fn compare_values(a: &Value, b: &Value) -> CmpOrdering {
    match (a, b) {
        (Value::Null, Value::Null) => CmpOrdering::Equal,
        // Missing values sort last.
        (Value::Null, _) => CmpOrdering::Greater,
        (_, Value::Null) => CmpOrdering::Less,
        (Value::Number(x), Value::Number(y)) => {
            let x = x.as_f64().unwrap_or(0.0);
            let y = y.as_f64().unwrap_or(0.0);
            x.partial_cmp(&y).unwrap_or(CmpOrdering::Equal)
        }
        (Value::String(x), Value::String(y)) => x.cmp(y),
        (Value::Bool(x), Value::Bool(y)) => x.cmp(y),
        _ => a.to_string().cmp(&b.to_string()),
    }
}

fn compare_docs(sort: &[SortField], a: &StoredDoc, b: &StoredDoc) -> CmpOrdering {
    for key in sort {
        let ordering = compare_values(&sort_value(&key.field, a), &sort_value(&key.field, b));
        let ordering = match key.order {
            SortOrder::Asc => ordering,
            SortOrder::Desc => ordering.reverse(),
        };
        if ordering != CmpOrdering::Equal {
            return ordering;
        }
    }
    a.seq.cmp(&b.seq)
}

fn filter_source(source: &Value, includes: &[String], excludes: &[String]) -> Value {
    let Value::Object(fields) = source else {
        return source.clone();
    };
    let filtered: Map<String, Value> = fields
        .iter()
        .filter(|(key, _)| includes.is_empty() || includes.iter().any(|f| f == *key))
        .filter(|(key, _)| !excludes.iter().any(|f| f == *key))
        .map(|(key, value)| (key.clone(), value.clone()))
        .collect();
    Value::Object(filtered)
}

/// Evaluates `terms` aggregations; other kinds are ignored.
fn aggregate(aggregations: &Value, hits: &[Hit]) -> Value {
    let mut results = Map::new();
    let Some(requested) = aggregations.as_object() else {
        return Value::Object(results);
    };

    for (name, spec) in requested {
        let Some(field) = spec
            .get("terms")
            .and_then(|t| t.get("field"))
            .and_then(Value::as_str)
        else {
            continue;
        };

        let mut counts: Vec<(Value, u64)> = Vec::new();
        for hit in hits {
            let Some(value) = hit
                .source
                .as_ref()
                .and_then(|s| field_value(&hit.id, s, field))
            else {
                continue;
            };
            match counts.iter_mut().find(|(key, _)| *key == value) {
                Some((_, count)) => *count += 1,
                None => counts.push((value, 1)),
            }
        }
        counts.sort_by(|a, b| b.1.cmp(&a.1).then_with(|| compare_values(&a.0, &b.0)));

        let buckets: Vec<Value> = counts
            .into_iter()
            .map(|(key, count)| json!({ "key": key, "doc_count": count }))
            .collect();
        results.insert(name.clone(), json!({ "buckets": buckets }));
    }

    Value::Object(results)
}

fn apply_total(total: u64, track_total_hits: bool) -> TotalHits {
    if !track_total_hits && total > DEFAULT_TRACK_TOTAL_HITS_UP_TO {
        TotalHits {
            value: DEFAULT_TRACK_TOTAL_HITS_UP_TO,
            relation: TotalRelation::Gte,
        }
    } else {
        TotalHits::exact(total)
    }
}

#[async_trait]
impl ClusterClient for InMemoryCluster {
    fn name(&self) -> &'static str {
        BACKEND_NAME
    }

    async fn bulk(
        &self,
        records: &[MutationRecord],
        refresh: RefreshPolicy,
    ) -> Result<BulkResponse, TransportError> {
        self.ensure_open()?;
        let started = Instant::now();

        let (latency, injected) = {
            let mut inner = self.inner.lock();
            inner.bulk_calls.push(BulkCall {
                at: started,
                ids: records.iter().map(|r| r.id.clone()).collect(),
                operations: records.iter().map(MutationRecord::operation).collect(),
                refresh,
            });
            (inner.bulk_latency, inner.faults.take_bulk_failure())
        };

        let active = self.active_bulk.fetch_add(1, Ordering::SeqCst) + 1;
        self.max_active_bulk.fetch_max(active, Ordering::SeqCst);

        if !latency.is_zero() {
            sleep(latency).await;
        }

        let result = match injected {
            Some(error) => Err(error),
            None => {
                let items = self.apply_bulk(records);
                Ok(BulkResponse {
                    took: started.elapsed(),
                    errors: items.iter().any(|i| !(200..300).contains(&i.status)),
                    items,
                })
            }
        };

        self.active_bulk.fetch_sub(1, Ordering::SeqCst);
        result
    }

    async fn search(&self, request: &SearchRequest) -> Result<SearchResponse, TransportError> {
        self.ensure_open()?;
        let started = Instant::now();
        let mut inner = self.inner.lock();

        let hits = self.matching_hits(&inner, request)?;
        let total = apply_total(hits.len() as u64, request.track_total_hits);
        let aggregations = request
            .aggregations
            .as_ref()
            .map(|aggs| aggregate(aggs, &hits));
        let size = request.size.unwrap_or(DEFAULT_SEARCH_SIZE);

        let (page, scroll_id) = match request.scroll {
            Some(keep_alive) => {
                let page: Vec<Hit> = hits.iter().take(size).cloned().collect();
                let token = URL_SAFE_NO_PAD.encode(format!(
                    "scroll:{}",
                    self.next_scroll.fetch_add(1, Ordering::SeqCst)
                ));
                inner.scrolls.insert(
                    token.clone(),
                    ScrollContext {
                        hits,
                        total,
                        offset: page.len(),
                        page_size: size,
                        expires_at: Instant::now() + keep_alive,
                    },
                );
                (page, Some(token))
            }
            None => {
                let from = request.from.unwrap_or(0);
                (hits.into_iter().skip(from).take(size).collect(), None)
            }
        };

        Ok(SearchResponse {
            hits: page,
            total: Some(total),
            scroll_id,
            took: started.elapsed(),
            aggregations,
        })
    }

    async fn scroll(
        &self,
        scroll_id: &str,
        keep_alive: Duration,
    ) -> Result<SearchResponse, TransportError> {
        self.ensure_open()?;
        let started = Instant::now();
        let mut inner = self.inner.lock();

        let missing = || TransportError::ScrollContextMissing {
            backend_name: BACKEND_NAME.to_string(),
            message: format!("No search context found for id [{}]", scroll_id),
        };

        let expired = inner
            .scrolls
            .get(scroll_id)
            .is_none_or(|context| Instant::now() >= context.expires_at);
        if expired {
            inner.scrolls.remove(scroll_id);
            return Err(missing());
        }

        let context = inner.scrolls.get_mut(scroll_id).ok_or_else(missing)?;
        let end = (context.offset + context.page_size).min(context.hits.len());
        let page = context.hits[context.offset..end].to_vec();
        context.offset = end;
        context.expires_at = Instant::now() + keep_alive;

        Ok(SearchResponse {
            hits: page,
            total: Some(context.total),
            scroll_id: Some(scroll_id.to_string()),
            took: started.elapsed(),
            aggregations: None,
        })
    }

    async fn clear_scroll(&self, scroll_id: &str) -> Result<(), TransportError> {
        self.ensure_open()?;
        self.inner.lock().scrolls.remove(scroll_id);
        Ok(())
    }

    async fn update_by_query(
        &self,
        index: &str,
        query: &Value,
        script: &Script,
        _refresh: bool,
    ) -> Result<UpdateByQueryResponse, TransportError> {
        self.ensure_open()?;
        let started = Instant::now();
        let mut inner = self.inner.lock();
        inner.update_by_query_calls += 1;

        let request = SearchRequest::new(index)
            .with_query(query.clone())
            .with_sort(SortField::doc_order());
        let hits = self.matching_hits(&inner, &request)?;

        let patch = Value::Object(script.params.clone());
        let mut response = UpdateByQueryResponse {
            total: hits.len() as u64,
            ..Default::default()
        };

        let batch_size = inner
            .update_by_query_batch_size
            .unwrap_or(UPDATE_BY_QUERY_BATCH_SIZE);

        for batch in hits.chunks(batch_size) {
            for hit in batch {
                let key = (hit.index.clone(), hit.id.clone());
                if let Some((status, reason)) = inner.faults.update_by_query_failures.get(&key) {
                    response.failures.push(UpdateByQueryFailure {
                        index: hit.index.clone(),
                        id: Some(hit.id.clone()),
                        status: *status,
                        reason: reason.clone(),
                    });
                    continue;
                }
                if FaultPlan::take(&mut inner.faults.conflicts, &hit.index, &hit.id) {
                    response.version_conflicts += 1;
                    response.failures.push(UpdateByQueryFailure {
                        index: hit.index.clone(),
                        id: Some(hit.id.clone()),
                        status: 409,
                        reason: conflict_reason(&hit.id),
                    });
                    continue;
                }
                self.merge(&mut inner, &hit.index, &hit.id, &patch);
                response.updated += 1;
            }

            // conflicts=abort: later batches are never reached.
            if !response.failures.is_empty() {
                break;
            }
        }

        response.took = started.elapsed();
        Ok(response)
    }

    async fn refresh(&self, indices: &[String]) -> Result<(), TransportError> {
        self.ensure_open()?;
        let mut inner = self.inner.lock();
        if let Some(missing) = indices.iter().find(|i| !inner.indices.contains_key(*i)) {
            return Err(Self::index_not_found(missing));
        }
        inner.refreshes += 1;
        Ok(())
    }

    async fn get(
        &self,
        index: &str,
        id: &str,
        source_includes: &[String],
    ) -> Result<Option<Hit>, TransportError> {
        self.ensure_open()?;
        let inner = self.inner.lock();
        let docs = inner
            .indices
            .get(index)
            .ok_or_else(|| Self::index_not_found(index))?;

        Ok(docs.get(id).map(|doc| Hit {
            index: index.to_string(),
            id: id.to_string(),
            score: None,
            source: Some(filter_source(&doc.source, source_includes, &[])),
            sort: Vec::new(),
        }))
    }

    async fn mget(
        &self,
        index: &str,
        ids: &[String],
        source_includes: &[String],
    ) -> Result<Vec<Hit>, TransportError> {
        let mut hits = Vec::with_capacity(ids.len());
        for id in ids {
            if let Some(hit) = self.get(index, id, source_includes).await? {
                hits.push(hit);
            }
        }
        Ok(hits)
    }

    async fn indices_exist(&self, indices: &[String]) -> Result<bool, TransportError> {
        self.ensure_open()?;
        let inner = self.inner.lock();
        Ok(indices.iter().all(|i| inner.indices.contains_key(i)))
    }

    async fn close(&self) -> Result<(), TransportError> {
        self.closed.store(true, Ordering::SeqCst);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::DocumentBody;

    fn seeded() -> InMemoryCluster {
        let cluster = InMemoryCluster::new();
        cluster.insert("idx", "a", json!({"status": "active", "rank": 3, "tag": "x"}));
        cluster.insert("idx", "b", json!({"status": "inactive", "rank": 1, "tag": "y"}));
        cluster.insert("idx", "c", json!({"status": "active", "rank": 2, "tag": "x"}));
        cluster
    }

    #[test]
    fn test_query_subset() {
        let source = json!({"status": "active", "meta": {"kind": "p"}});
        assert!(matches_query(&json!({"match_all": {}}), "1", &source));
        assert!(matches_query(&json!({"term": {"status": "active"}}), "1", &source));
        assert!(matches_query(&json!({"term": {"meta.kind": {"value": "p"}}}), "1", &source));
        assert!(!matches_query(&json!({"term": {"status": "gone"}}), "1", &source));
        assert!(matches_query(&json!({"ids": {"values": ["1", "2"]}}), "1", &source));
        assert!(matches_query(
            &json!({"bool": {
                "filter": [{"term": {"status": "active"}}],
                "must_not": {"ids": {"values": ["9"]}}
            }}),
            "1",
            &source
        ));
        assert!(!matches_query(
            &json!({"bool": {"should": [{"term": {"status": "x"}}, {"term": {"status": "y"}}]}}),
            "1",
            &source
        ));
        assert!(!matches_query(&json!({"range": {"n": {"gte": 1}}}), "1", &source));
    }

    #[tokio::test]
    async fn test_search_sort_and_paging() {
        let cluster = seeded();
        let response = cluster
            .search(
                &SearchRequest::new("idx")
                    .with_query(json!({"term": {"status": "active"}}))
                    .with_sort(SortField::desc("rank")),
            )
            .await
            .unwrap();

        let ids: Vec<_> = response.hits.iter().map(|h| h.id.as_str()).collect();
        assert_eq!(ids, vec!["a", "c"]);
        assert_eq!(response.total, Some(TotalHits::exact(2)));

        let page = cluster
            .search(
                &SearchRequest::new("idx")
                    .with_sort(SortField::doc_order())
                    .with_page(1, 1),
            )
            .await
            .unwrap();
        assert_eq!(page.hits[0].id, "b");
    }

    #[tokio::test]
    async fn test_search_missing_index_fails() {
        let cluster = seeded();
        let err = cluster.search(&SearchRequest::new("nope")).await.unwrap_err();
        assert_eq!(err.status(), Some(404));
    }

    #[tokio::test]
    async fn test_terms_aggregation() {
        let cluster = seeded();
        let response = cluster
            .search(
                &SearchRequest::new("idx")
                    .with_size(0)
                    .with_aggregations(json!({"by_tag": {"terms": {"field": "tag"}}})),
            )
            .await
            .unwrap();

        assert_eq!(
            response.aggregations.unwrap()["by_tag"]["buckets"],
            json!([{"key": "x", "doc_count": 2}, {"key": "y", "doc_count": 1}])
        );
    }

    #[tokio::test]
    async fn test_bulk_item_statuses() {
        let cluster = seeded();
        let records = vec![
            MutationRecord::create_doc("idx", Some("a".into()), DocumentBody::from_value(&json!({}))),
            MutationRecord::update_doc("idx", "zz", json!({"n": 1}).into(), false),
            MutationRecord::update_doc("idx", "zz", json!({"n": 1}).into(), true),
            MutationRecord::delete("idx", "missing"),
            MutationRecord::index_doc("idx", None, json!({"auto": true}).into()),
        ];

        let response = cluster.bulk(&records, RefreshPolicy::None).await.unwrap();
        let statuses: Vec<u16> = response.items.iter().map(|i| i.status).collect();
        assert_eq!(statuses, vec![409, 404, 201, 404, 201]);
        assert!(response.errors);
        assert!(response.items[4].id.is_some());
        assert_eq!(cluster.document("idx", "zz"), Some(json!({"n": 1})));
    }

    #[tokio::test]
    async fn test_update_retries_consume_conflicts() {
        let cluster = seeded();
        cluster.conflict_on("idx", "a", 2);

        let record = MutationRecord::update_doc("idx", "a", json!({"rank": 9}).into(), false)
            .with_retry_on_conflict(1);
        let response = cluster.bulk(&[record.clone()], RefreshPolicy::None).await.unwrap();
        assert_eq!(response.items[0].status, 409);

        let response = cluster.bulk(&[record], RefreshPolicy::None).await.unwrap();
        assert_eq!(response.items[0].status, 200);
        assert_eq!(cluster.document("idx", "a").unwrap()["rank"], 9);
    }

    #[tokio::test(start_paused = true)]
    async fn test_scroll_context_expires() {
        let cluster = seeded();
        let response = cluster
            .search(
                &SearchRequest::new("idx")
                    .with_size(1)
                    .with_scroll(Duration::from_secs(5)),
            )
            .await
            .unwrap();
        let token = response.scroll_id.unwrap();

        let next = cluster.scroll(&token, Duration::from_secs(5)).await.unwrap();
        assert_eq!(next.hits.len(), 1);

        tokio::time::advance(Duration::from_secs(6)).await;
        let err = cluster.scroll(&token, Duration::from_secs(5)).await.unwrap_err();
        assert!(matches!(err, TransportError::ScrollContextMissing { .. }));
        assert_eq!(cluster.open_scroll_count(), 0);
    }

    #[tokio::test]
    async fn test_closed_cluster_refuses_calls() {
        let cluster = seeded();
        cluster.close().await.unwrap();
        let err = cluster.refresh(&["idx".to_string()]).await.unwrap_err();
        assert!(matches!(err, TransportError::Closed { .. }));
    }
}
