//! Helios Indexer
//!
//! This crate provides a resilient write and scan layer over a search cluster.
//! Producers enqueue document mutations without waiting on the network; the
//! crate batches them, executes them with bounded concurrency and retries
//! transient failures, and reports every document's outcome.
//!
//! # Features
//!
//! - **Buffered bulk writes**: count, byte and time triggers with explicit flush
//! - **Retry**: exponential backoff for transport failures and rejected items
//! - **Compensation**: update-by-query conflicts are resubmitted per id
//! - **Scroll scans**: exhaustive reads with a cursor state machine
//! - **Template**: synchronous and asynchronous operations behind one handle
//!
//! # Backend Features
//!
//! ```toml
//! [dependencies]
//! helios-indexer = { version = "0.1", features = ["elasticsearch"] }
//! ```
//!
//! - `elasticsearch` - Elasticsearch over its REST API
//!
//! The in-memory cluster in [`backends::memory`] is always available.
//!
//! # Architecture
//!
//! - [`types`] - Mutations, outcomes and search types
//! - [`error`] - Error types for all operations
//! - [`config`] - Bulk and scroll settings
//! - [`core`] - The cluster client trait and document mappers
//! - [`bulk`] - Buffer, pipeline and background processor
//! - [`compensate`] - Update-by-query with conflict resubmission
//! - [`scroll`] - Scroll sessions
//! - [`template`] - The combined entry point
//! - [`backends`] - Cluster client implementations
//!
//! # Quick Start
//!
//! ```
//! use std::sync::Arc;
//! use std::time::Duration;
//! use helios_indexer::backends::memory::InMemoryCluster;
//! use helios_indexer::{IndexTemplate, IndexerConfig};
//! use serde_json::json;
//!
//! # #[tokio::main(flavor = "current_thread")]
//! # async fn main() -> Result<(), helios_indexer::IndexerError> {
//! let cluster = Arc::new(InMemoryCluster::new());
//! let template = IndexTemplate::new(cluster.clone(), IndexerConfig::default())?;
//!
//! template.add_doc_async("patients", Some("p1".to_string()), &json!({"name": "Ann"}))?;
//!
//! let status = template.close(Duration::from_secs(5)).await?;
//! assert!(status.is_complete());
//! assert_eq!(cluster.document_count("patients"), 1);
//! # Ok(())
//! # }
//! ```

#![warn(missing_docs)]
#![warn(rustdoc::missing_crate_level_docs)]

pub mod backends;
pub mod bulk;
pub mod compensate;
pub mod config;
pub mod core;
pub mod error;
pub mod scroll;
pub mod template;
pub mod types;

// Re-export commonly used types at crate root
pub use error::{
    ConfigurationError, CursorError, CursorState, IndexerError, IndexerResult, MappingError,
    ProcessorError, TransportError,
};
pub use types::{
    BatchOutcome, DocumentBody, DocumentOutcome, DocumentStatus, Hit, MutationRecord, PageResult,
    Script, SearchRequest, SearchResponse, SortField,
};

// Re-export core traits
pub use core::{ClusterClient, DocumentMapper, RefreshPolicy, SourceMapper};

pub use bulk::{BulkListener, BulkPipeline, BulkProcessor, ShutdownStatus};
pub use compensate::{CompensationReport, FailureCompensator};
pub use config::{BulkConfig, IndexerConfig, ScrollConfig};
pub use scroll::{ScrollManager, ScrollSession, SessionState};
pub use template::IndexTemplate;

/// Crate version.
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

/// Crate name.
pub const NAME: &str = env!("CARGO_PKG_NAME");
