//! Cluster client implementations.
//!
//! | Backend | Feature | Use |
//! |---------|---------|-----|
//! | [`memory::InMemoryCluster`] | always | tests, local runs |
//! | `elasticsearch::ElasticsearchClient` | `elasticsearch` | production |

#[cfg(feature = "elasticsearch")]
pub mod elasticsearch;

pub mod memory;
