//! Search requests, responses and paged results.
//!
//! Queries and aggregations are opaque JSON; [`SearchRequest`] only carries
//! the envelope around them (indices, sort, paging, source filtering, scroll
//! keep-alive).

use std::fmt;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value, json};

/// Sort field used when a scan has no explicit sort: physical order.
pub const DOC_ORDER_FIELD: &str = "_doc";

/// Sort direction.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SortOrder {
    /// Ascending.
    #[default]
    Asc,
    /// Descending.
    Desc,
}

impl SortOrder {
    /// Returns the cluster keyword for the order.
    pub fn as_str(&self) -> &'static str {
        match self {
            SortOrder::Asc => "asc",
            SortOrder::Desc => "desc",
        }
    }
}

/// One sort key.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SortField {
    /// Field name.
    pub field: String,
    /// Direction.
    pub order: SortOrder,
}

impl SortField {
    /// Ascending sort on a field.
    pub fn asc(field: impl Into<String>) -> Self {
        Self {
            field: field.into(),
            order: SortOrder::Asc,
        }
    }

    /// Descending sort on a field.
    pub fn desc(field: impl Into<String>) -> Self {
        Self {
            field: field.into(),
            order: SortOrder::Desc,
        }
    }

    /// Physical document order, the cheapest order for exhaustive scans.
    pub fn doc_order() -> Self {
        Self::asc(DOC_ORDER_FIELD)
    }

    /// Parses `field` or `-field` (descending).
    pub fn parse(spec: &str) -> Self {
        match spec.strip_prefix('-') {
            Some(field) => Self::desc(field),
            None => Self::asc(spec),
        }
    }

    fn to_value(&self) -> Value {
        let mut clause = Map::new();
        clause.insert(
            self.field.clone(),
            json!({ "order": self.order.as_str() }),
        );
        Value::Object(clause)
    }
}

/// A search against one or more indices.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct SearchRequest {
    /// Indices to search.
    pub indices: Vec<String>,

    /// Query clause; `match_all` when absent.
    pub query: Option<Value>,

    /// Sort keys, in priority order.
    pub sort: Vec<SortField>,

    /// Offset of the first hit.
    pub from: Option<usize>,

    /// Maximum number of hits.
    pub size: Option<usize>,

    /// Source fields to return.
    pub source_includes: Vec<String>,

    /// Source fields to omit.
    pub source_excludes: Vec<String>,

    /// Count all matches instead of stopping at the cluster's default bound.
    pub track_total_hits: bool,

    /// Aggregations clause.
    pub aggregations: Option<Value>,

    /// Keep a scroll context alive for this long.
    pub scroll: Option<Duration>,
}

impl SearchRequest {
    /// Creates a request against a single index.
    pub fn new(index: impl Into<String>) -> Self {
        Self {
            indices: vec![index.into()],
            ..Default::default()
        }
    }

    /// Creates a request against several indices.
    pub fn for_indices<I, S>(indices: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            indices: indices.into_iter().map(Into::into).collect(),
            ..Default::default()
        }
    }

    /// Sets the query clause.
    pub fn with_query(mut self, query: Value) -> Self {
        self.query = Some(query);
        self
    }

    /// Appends a sort key.
    pub fn with_sort(mut self, sort: SortField) -> Self {
        self.sort.push(sort);
        self
    }

    /// Replaces all sort keys.
    pub fn with_sorts(mut self, sort: Vec<SortField>) -> Self {
        self.sort = sort;
        self
    }

    /// Sets the offset and page size.
    pub fn with_page(mut self, from: usize, size: usize) -> Self {
        self.from = Some(from);
        self.size = Some(size);
        self
    }

    /// Sets the page size.
    pub fn with_size(mut self, size: usize) -> Self {
        self.size = Some(size);
        self
    }

    /// Restricts returned source fields.
    pub fn with_source_includes(mut self, fields: Vec<String>) -> Self {
        self.source_includes = fields;
        self
    }

    /// Omits source fields.
    pub fn with_source_excludes(mut self, fields: Vec<String>) -> Self {
        self.source_excludes = fields;
        self
    }

    /// Requests an exact total hit count.
    pub fn with_track_total_hits(mut self, track: bool) -> Self {
        self.track_total_hits = track;
        self
    }

    /// Sets the aggregations clause.
    pub fn with_aggregations(mut self, aggregations: Value) -> Self {
        self.aggregations = Some(aggregations);
        self
    }

    /// Opens a scroll context with the given keep-alive.
    pub fn with_scroll(mut self, keep_alive: Duration) -> Self {
        self.scroll = Some(keep_alive);
        self
    }

    /// Returns the query clause, defaulting to `match_all`.
    pub fn query_or_match_all(&self) -> Value {
        self.query.clone().unwrap_or_else(|| json!({ "match_all": {} }))
    }

    /// Builds the JSON search body.
    pub fn to_body(&self) -> Value {
        let mut body = Map::new();
        body.insert("query".to_string(), self.query_or_match_all());

        if !self.sort.is_empty() {
            body.insert(
                "sort".to_string(),
                Value::Array(self.sort.iter().map(SortField::to_value).collect()),
            );
        }
        if let Some(from) = self.from {
            body.insert("from".to_string(), json!(from));
        }
        if let Some(size) = self.size {
            body.insert("size".to_string(), json!(size));
        }
        if !self.source_includes.is_empty() || !self.source_excludes.is_empty() {
            body.insert(
                "_source".to_string(),
                json!({
                    "includes": self.source_includes,
                    "excludes": self.source_excludes,
                }),
            );
        }
        if self.track_total_hits {
            body.insert("track_total_hits".to_string(), Value::Bool(true));
        }
        if let Some(aggregations) = &self.aggregations {
            body.insert("aggs".to_string(), aggregations.clone());
        }

        Value::Object(body)
    }
}

/// Whether a total hit count is exact or a lower bound.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TotalRelation {
    /// Exact count.
    #[default]
    Eq,
    /// Lower bound.
    Gte,
}

impl TotalRelation {
    /// Parses the cluster's relation keyword.
    pub fn parse(value: &str) -> Self {
        match value {
            "gte" => TotalRelation::Gte,
            _ => TotalRelation::Eq,
        }
    }
}

impl fmt::Display for TotalRelation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            TotalRelation::Eq => write!(f, "eq"),
            TotalRelation::Gte => write!(f, "gte"),
        }
    }
}

/// Total number of matches.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct TotalHits {
    /// Count.
    pub value: u64,
    /// Exact or lower bound.
    pub relation: TotalRelation,
}

impl TotalHits {
    /// An exact total.
    pub fn exact(value: u64) -> Self {
        Self {
            value,
            relation: TotalRelation::Eq,
        }
    }
}

/// A single search hit.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Hit {
    /// Index the document lives in.
    pub index: String,
    /// Document id.
    pub id: String,
    /// Relevance score, absent for sorted searches.
    pub score: Option<f64>,
    /// Document source, absent when source was filtered out.
    pub source: Option<Value>,
    /// Sort values of the hit.
    #[serde(default)]
    pub sort: Vec<Value>,
}

/// A page of search results.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct SearchResponse {
    /// Hits of this page.
    pub hits: Vec<Hit>,
    /// Total matches, when the cluster reported them.
    pub total: Option<TotalHits>,
    /// Scroll id for the next page, when a scroll was requested.
    pub scroll_id: Option<String>,
    /// Server-side execution time.
    pub took: Duration,
    /// Aggregation results.
    pub aggregations: Option<Value>,
}

/// Typed page of results, with the total and an optional scroll id.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PageResult<T> {
    /// Total matches.
    pub total_count: u64,
    /// Whether `total_count` is exact.
    pub relation: TotalRelation,
    /// Scroll id for the next page, when scrolling.
    pub scroll_id: Option<String>,
    /// Mapped documents.
    pub data: Vec<T>,
}

impl<T> PageResult<T> {
    /// Builds a page from a response and its mapped hits.
    pub fn from_response(response: &SearchResponse, data: Vec<T>) -> Self {
        let total = response
            .total
            .unwrap_or_else(|| TotalHits::exact(data.len() as u64));
        Self {
            total_count: total.value,
            relation: total.relation,
            scroll_id: response.scroll_id.clone(),
            data,
        }
    }

    /// An empty page.
    pub fn empty() -> Self {
        Self {
            total_count: 0,
            relation: TotalRelation::Eq,
            scroll_id: None,
            data: Vec::new(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_body_is_match_all() {
        let body = SearchRequest::new("docs").to_body();
        assert_eq!(body, json!({"query": {"match_all": {}}}));
    }

    #[test]
    fn test_full_body() {
        let request = SearchRequest::new("docs")
            .with_query(json!({"term": {"status": "active"}}))
            .with_sort(SortField::desc("created"))
            .with_page(20, 10)
            .with_source_includes(vec!["name".to_string()])
            .with_track_total_hits(true)
            .with_aggregations(json!({"by_status": {"terms": {"field": "status"}}}));

        assert_eq!(
            request.to_body(),
            json!({
                "query": {"term": {"status": "active"}},
                "sort": [{"created": {"order": "desc"}}],
                "from": 20,
                "size": 10,
                "_source": {"includes": ["name"], "excludes": []},
                "track_total_hits": true,
                "aggs": {"by_status": {"terms": {"field": "status"}}}
            })
        );
    }

    #[test]
    fn test_sort_parse() {
        assert_eq!(SortField::parse("-created"), SortField::desc("created"));
        assert_eq!(SortField::parse("name"), SortField::asc("name"));
        assert_eq!(SortField::doc_order().field, DOC_ORDER_FIELD);
    }

    #[test]
    fn test_page_result_falls_back_to_hit_count() {
        let response = SearchResponse::default();
        let page = PageResult::from_response(&response, vec![1, 2, 3]);
        assert_eq!(page.total_count, 3);
        assert_eq!(page.relation, TotalRelation::Eq);
    }
}
