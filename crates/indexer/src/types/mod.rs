//! Core types for the indexer.
//!
//! - [`MutationRecord`], [`Mutation`] - Document writes
//! - [`DocumentStatus`], [`BatchOutcome`] - Bulk execution results
//! - [`SearchRequest`], [`SearchResponse`], [`PageResult`] - Reads
//!
//! # Example
//!
//! ```
//! use helios_indexer::types::{MutationRecord, Script};
//! use serde_json::json;
//!
//! let create = MutationRecord::create_doc("patients", Some("p1".into()), json!({"name": "Ann"}).into());
//! assert!(create.is_creation_only());
//!
//! let bump = MutationRecord::update_script(
//!     "patients",
//!     "p1",
//!     Script::painless("ctx._source.visits += params.n").with_param("n", 1),
//! );
//! assert!(bump.validate().is_ok());
//! ```

mod mutation;
mod outcome;
mod search;

pub use mutation::{
    ACTION_OVERHEAD_BYTES, DEFAULT_RETRY_ON_CONFLICT, DocumentBody, Mutation, MutationRecord,
    OperationKind, Script, UpdateBody,
};
pub use outcome::{BatchOutcome, DocumentOutcome, DocumentStatus};
pub use search::{
    DOC_ORDER_FIELD, Hit, PageResult, SearchRequest, SearchResponse, SortField, SortOrder,
    TotalHits, TotalRelation,
};
