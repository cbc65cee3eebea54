//! Request bodies and response parsing for the Elasticsearch REST API.

use std::time::Duration;

use serde_json::{Value, json};

use crate::core::{BulkItem, BulkResponse, UpdateByQueryFailure, UpdateByQueryResponse};
use crate::error::TransportError;
use crate::types::{
    Hit, Mutation, MutationRecord, SearchResponse, TotalHits, TotalRelation, UpdateBody,
};

pub(crate) const BACKEND_NAME: &str = "elasticsearch";

const SCROLL_CONTEXT_MISSING: &str = "search_context_missing_exception";

// ============================================================================
// Requests
// ============================================================================

/// Renders mutations as NDJSON lines: one action line, then a source line
/// for everything but deletes.
pub(crate) fn bulk_lines(records: &[MutationRecord]) -> Vec<String> {
    let mut lines = Vec::with_capacity(records.len() * 2);

    for record in records {
        let mut meta = json!({ "_index": record.index });
        if let Some(id) = &record.id {
            meta["_id"] = json!(id);
        }

        match &record.mutation {
            Mutation::Index {
                body,
                creation_only,
            } => {
                if *creation_only {
                    lines.push(json!({ "create": meta }).to_string());
                } else {
                    lines.push(json!({ "index": meta }).to_string());
                }
                lines.push(body.as_str().to_string());
            }
            Mutation::Update {
                body,
                upsert_on_missing,
                retry_on_conflict,
            } => {
                meta["retry_on_conflict"] = json!(retry_on_conflict);
                lines.push(json!({ "update": meta }).to_string());
                lines.push(match body {
                    UpdateBody::Doc(doc) => format!(
                        r#"{{"doc":{},"doc_as_upsert":{}}}"#,
                        doc.as_str(),
                        upsert_on_missing
                    ),
                    UpdateBody::Script(script) => {
                        json!({ "script": script.to_value() }).to_string()
                    }
                });
            }
            Mutation::Delete => {
                lines.push(json!({ "delete": meta }).to_string());
            }
        }
    }

    lines
}

/// Formats a keep-alive in the cluster's time unit syntax.
pub(crate) fn keep_alive(duration: Duration) -> String {
    let millis = duration.as_millis();
    if millis % 1000 == 0 {
        format!("{}s", millis / 1000)
    } else {
        format!("{}ms", millis)
    }
}

// ============================================================================
// Errors
// ============================================================================

fn decode_error(message: impl Into<String>) -> TransportError {
    TransportError::Decode {
        backend_name: BACKEND_NAME.to_string(),
        message: message.into(),
    }
}

/// Maps a non-success status and its body to a transport error.
pub(crate) fn status_error(status: u16, body: &str) -> TransportError {
    let message = serde_json::from_str::<Value>(body)
        .ok()
        .and_then(|v| v.get("error").map(error_reason))
        .unwrap_or_else(|| body.to_string());

    if body.contains(SCROLL_CONTEXT_MISSING) {
        TransportError::ScrollContextMissing {
            backend_name: BACKEND_NAME.to_string(),
            message,
        }
    } else if TransportError::is_retryable_status(status) {
        TransportError::Rejected {
            backend_name: BACKEND_NAME.to_string(),
            status,
            message,
        }
    } else {
        TransportError::Status {
            backend_name: BACKEND_NAME.to_string(),
            status,
            message,
        }
    }
}

/// Renders an `error` object as `type: reason`.
pub(crate) fn error_reason(error: &Value) -> String {
    match error {
        Value::String(reason) => reason.clone(),
        Value::Object(_) => {
            let kind = error.get("type").and_then(Value::as_str).unwrap_or("error");
            let reason = error.get("reason").and_then(Value::as_str).unwrap_or("");
            format!("{}: {}", kind, reason)
        }
        other => other.to_string(),
    }
}

// ============================================================================
// Responses
// ============================================================================

fn took(body: &Value) -> Duration {
    Duration::from_millis(body.get("took").and_then(Value::as_u64).unwrap_or(0))
}

fn string_field(value: &Value, field: &str) -> Option<String> {
    value.get(field).and_then(Value::as_str).map(str::to_string)
}

/// Parses a bulk response; items keep request order.
pub(crate) fn parse_bulk_response(body: &Value) -> Result<BulkResponse, TransportError> {
    let items = body
        .get("items")
        .and_then(Value::as_array)
        .ok_or_else(|| decode_error("bulk response has no items"))?;

    let items = items
        .iter()
        .map(|item| {
            // Each item is keyed by its action name.
            let result = item
                .as_object()
                .and_then(|o| o.values().next())
                .ok_or_else(|| decode_error("bulk item has no action"))?;
            let status = result
                .get("status")
                .and_then(Value::as_u64)
                .ok_or_else(|| decode_error("bulk item has no status"))?;

            Ok(BulkItem {
                index: string_field(result, "_index").unwrap_or_default(),
                id: string_field(result, "_id"),
                status: status as u16,
                result: string_field(result, "result"),
                error: result.get("error").map(error_reason),
            })
        })
        .collect::<Result<Vec<_>, TransportError>>()?;

    Ok(BulkResponse {
        took: took(body),
        errors: body.get("errors").and_then(Value::as_bool).unwrap_or(false),
        items,
    })
}

fn parse_hit(hit: &Value) -> Result<Hit, TransportError> {
    Ok(Hit {
        index: string_field(hit, "_index").unwrap_or_default(),
        id: string_field(hit, "_id").ok_or_else(|| decode_error("hit has no _id"))?,
        score: hit.get("_score").and_then(Value::as_f64),
        source: hit.get("_source").cloned(),
        sort: hit
            .get("sort")
            .and_then(Value::as_array)
            .cloned()
            .unwrap_or_default(),
    })
}

fn parse_total(total: &Value) -> Option<TotalHits> {
    match total {
        Value::Number(n) => n.as_u64().map(TotalHits::exact),
        Value::Object(_) => Some(TotalHits {
            value: total.get("value").and_then(Value::as_u64)?,
            relation: total
                .get("relation")
                .and_then(Value::as_str)
                .map_or(TotalRelation::Eq, TotalRelation::parse),
        }),
        _ => None,
    }
}

/// Parses a search or scroll response.
pub(crate) fn parse_search_response(body: &Value) -> Result<SearchResponse, TransportError> {
    let hits = body
        .get("hits")
        .ok_or_else(|| decode_error("search response has no hits"))?;

    let page = hits
        .get("hits")
        .and_then(Value::as_array)
        .map(|hits| hits.iter().map(parse_hit).collect::<Result<Vec<_>, _>>())
        .transpose()?
        .unwrap_or_default();

    Ok(SearchResponse {
        hits: page,
        total: hits.get("total").and_then(parse_total),
        scroll_id: string_field(body, "_scroll_id"),
        took: took(body),
        aggregations: body.get("aggregations").cloned(),
    })
}

/// Parses an update-by-query response.
pub(crate) fn parse_update_by_query_response(
    body: &Value,
) -> Result<UpdateByQueryResponse, TransportError> {
    if body.get("total").is_none() {
        return Err(decode_error("update by query response has no total"));
    }

    let count = |field: &str| body.get(field).and_then(Value::as_u64).unwrap_or(0);

    let failures = body
        .get("failures")
        .and_then(Value::as_array)
        .map(|failures| {
            failures
                .iter()
                .map(|failure| UpdateByQueryFailure {
                    index: string_field(failure, "index").unwrap_or_default(),
                    id: string_field(failure, "id"),
                    status: failure.get("status").and_then(Value::as_u64).unwrap_or(500) as u16,
                    reason: failure
                        .get("cause")
                        .map(error_reason)
                        .unwrap_or_default(),
                })
                .collect()
        })
        .unwrap_or_default();

    Ok(UpdateByQueryResponse {
        took: took(body),
        total: count("total"),
        updated: count("updated"),
        noops: count("noops"),
        deleted: count("deleted"),
        version_conflicts: count("version_conflicts"),
        failures,
    })
}

/// Parses a get response; `None` when the document was not found.
pub(crate) fn parse_get_response(body: &Value) -> Result<Option<Hit>, TransportError> {
    if !body.get("found").and_then(Value::as_bool).unwrap_or(false) {
        return Ok(None);
    }
    parse_hit(body).map(Some)
}

/// Parses a multi-get response, skipping missing documents.
pub(crate) fn parse_mget_response(body: &Value) -> Result<Vec<Hit>, TransportError> {
    let docs = body
        .get("docs")
        .and_then(Value::as_array)
        .ok_or_else(|| decode_error("mget response has no docs"))?;

    let mut hits = Vec::with_capacity(docs.len());
    for doc in docs {
        if let Some(hit) = parse_get_response(doc)? {
            hits.push(hit);
        }
    }
    Ok(hits)
}
