//! Subcommand implementations over an [`IndexTemplate`].

use std::fs::File;
use std::io::{BufRead, BufReader, Write};
use std::path::Path;
use std::time::Duration;

use anyhow::{Context, bail};
use helios_indexer::bulk::ShutdownStatus;
use helios_indexer::template::IndexTemplate;
use helios_indexer::scroll::ScrollSession;
use helios_indexer::types::{Hit, MutationRecord, PageResult, Script, SearchRequest};
use helios_indexer::{DocumentBody, MappingError};
use serde_json::{Map, Value};
use tracing::{info, warn};

/// What a load did.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LoadSummary {
    /// Documents handed to the processor.
    pub enqueued: usize,
    /// Blank lines skipped.
    pub skipped: usize,
    /// How the processor shut down.
    pub shutdown: ShutdownStatus,
}

/// Enqueues every line of `file`, then closes the template.
pub async fn load(
    template: &IndexTemplate,
    index: &str,
    file: &Path,
    id_field: &str,
    create_only: bool,
    shutdown_timeout: Duration,
) -> anyhow::Result<LoadSummary> {
    let reader = BufReader::new(
        File::open(file).with_context(|| format!("cannot open {}", file.display()))?,
    );

    let mut enqueued = 0;
    let mut skipped = 0;
    for (line_no, line) in reader.lines().enumerate() {
        let line = line.with_context(|| format!("cannot read {}", file.display()))?;
        if line.trim().is_empty() {
            skipped += 1;
            continue;
        }

        let document: Value = serde_json::from_str(&line)
            .with_context(|| format!("{}:{}: invalid JSON", file.display(), line_no + 1))?;
        let id = document_id(&document, id_field);
        let body = DocumentBody::from_value(&document);

        let record = if create_only {
            MutationRecord::create_doc(index, id, body)
        } else {
            MutationRecord::index_doc(index, id, body)
        };
        template.processor().enqueue(record)?;
        enqueued += 1;
    }

    info!(index = index, enqueued = enqueued, "Load enqueued, waiting for batches");
    let shutdown = template.close(shutdown_timeout).await?;
    if let ShutdownStatus::Incomplete { in_flight } = shutdown {
        warn!(in_flight = in_flight, "Load finished with batches still in flight");
    }

    Ok(LoadSummary {
        enqueued,
        skipped,
        shutdown,
    })
}

/// String or numeric id at `field`.
fn document_id(document: &Value, field: &str) -> Option<String> {
    match document.get(field)? {
        Value::String(id) => Some(id.clone()),
        Value::Number(id) => Some(id.to_string()),
        _ => None,
    }
}

/// Writes every document matching `query` to `out` as NDJSON.
///
/// Pages are written and flushed as they arrive, so memory use is bounded by
/// the scroll page size. Returns the number of documents written.
pub async fn export(
    template: &IndexTemplate,
    index: &str,
    query: Option<&str>,
    out: &mut dyn Write,
) -> anyhow::Result<usize> {
    let mut request = SearchRequest::new(index);
    if let Some(query) = query {
        let query: Value = serde_json::from_str(query).context("--query is not valid JSON")?;
        request = request.with_query(query);
    }

    let (mut session, first) = template.open_scan(request, None, None, &source).await?;
    let written = match write_pages(template, &mut session, first, out).await {
        Ok(written) => written,
        Err(e) => {
            template.close_scan(&mut session).await;
            return Err(e);
        }
    };

    info!(index = index, documents = written, pages = session.pages(), "Export finished");
    Ok(written)
}

fn source(hit: &Hit, row: usize) -> Result<Value, MappingError> {
    hit.source
        .clone()
        .ok_or_else(|| MappingError::row(row, format!("hit {} has no _source", hit.id)))
}

async fn write_pages(
    template: &IndexTemplate,
    session: &mut ScrollSession,
    first: PageResult<Value>,
    out: &mut dyn Write,
) -> anyhow::Result<usize> {
    let mut page = first;
    let mut written = 0;
    loop {
        for document in &page.data {
            writeln!(out, "{}", document)?;
        }
        out.flush()?;
        written += page.data.len();

        if session.is_exhausted() {
            return Ok(written);
        }
        page = template.continue_scan(session, &source).await?;
    }
}

/// Applies a painless script to every document matching `query`.
///
/// Returns true if every matching document was updated.
pub async fn update_by_query(
    template: &IndexTemplate,
    index: &str,
    query: &str,
    script_source: &str,
    params: Option<&str>,
) -> anyhow::Result<bool> {
    let query: Value = serde_json::from_str(query).context("--query is not valid JSON")?;
    let params: Map<String, Value> = match params {
        Some(params) => match serde_json::from_str(params).context("--params is not valid JSON")? {
            Value::Object(params) => params,
            _ => bail!("--params must be a JSON object"),
        },
        None => Map::new(),
    };

    let script = Script::painless(script_source).with_params(params);
    let succeeded = template.update_by_query(index, &query, &script).await?;
    if !succeeded {
        warn!(index = index, "Update by query left documents unchanged");
    }
    Ok(succeeded)
}

/// Refreshes `indices`.
pub async fn refresh(template: &IndexTemplate, indices: &[String]) -> anyhow::Result<()> {
    template.refresh(indices).await?;
    info!(indices = ?indices, "Refreshed");
    Ok(())
}
