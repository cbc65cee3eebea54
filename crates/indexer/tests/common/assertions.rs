//! Assertion helpers for outcomes and cursor errors.

use std::collections::HashSet;

use helios_indexer::error::{CursorError, CursorState, IndexerError};
use helios_indexer::types::{BatchOutcome, DocumentStatus};

/// Asserts that every document of a batch has `status`.
pub fn assert_all_status(outcome: &BatchOutcome, status: DocumentStatus) {
    for (position, document) in outcome.outcomes.iter().enumerate() {
        assert_eq!(
            document.status, status,
            "Document {} ({:?}) has status {}, expected {}",
            position, document.id, document.status, status
        );
    }
}

/// Asserts that a result failed with `InvalidCursor` in `expected` state.
pub fn assert_invalid_cursor<T: std::fmt::Debug>(
    result: Result<T, IndexerError>,
    expected: CursorState,
) {
    match result {
        Err(IndexerError::Cursor(CursorError::InvalidCursor { state })) => assert_eq!(
            state, expected,
            "Cursor state mismatch: expected {}, got {}",
            expected, state
        ),
        other => panic!("Expected InvalidCursor({}), got {:?}", expected, other),
    }
}

/// Asserts that no id appears twice.
pub fn assert_unique(ids: &[String]) {
    let mut seen = HashSet::new();
    for id in ids {
        assert!(seen.insert(id), "Id '{}' was returned more than once", id);
    }
}
