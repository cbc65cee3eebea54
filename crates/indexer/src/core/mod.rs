//! Core abstractions: the cluster client capability and document mappers.
//!
//! - [`ClusterClient`] - Remote calls against the indexing cluster
//! - [`DocumentMapper`] - Raw hit or response to typed value

pub mod client;
pub mod mapper;

pub use client::{
    BulkItem, BulkResponse, ClusterClient, RefreshPolicy, UpdateByQueryFailure,
    UpdateByQueryResponse,
};
pub use mapper::{DocumentMapper, SourceMapper, map_rows};
