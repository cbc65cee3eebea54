//! Test infrastructure for the indexer.
//!
//! Fixtures build clusters, records and configurations; assertions check
//! batch outcomes and cursor errors; the harness waits on background work
//! under paused time.

#![allow(dead_code)]

pub mod assertions;
pub mod fixtures;
pub mod harness;

// Re-export commonly used items
pub use assertions::*;
pub use fixtures::*;
pub use harness::*;
