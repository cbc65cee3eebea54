//! Mapping raw hits and responses into typed values.
//!
//! A mapper is any `Fn(&R, usize) -> Result<T, MappingError>`, where the
//! `usize` is the position of the row in its page. [`SourceMapper`]
//! deserializes a hit's `_source`, which covers the common case.

use std::marker::PhantomData;

use serde::de::DeserializeOwned;

use crate::error::MappingError;
use crate::types::Hit;

/// Transforms one raw row into a typed value.
pub trait DocumentMapper<R, T>: Send + Sync {
    /// Maps the row at position `row`.
    fn map(&self, raw: &R, row: usize) -> Result<T, MappingError>;
}

impl<R, T, F> DocumentMapper<R, T> for F
where
    F: Fn(&R, usize) -> Result<T, MappingError> + Send + Sync,
{
    fn map(&self, raw: &R, row: usize) -> Result<T, MappingError> {
        self(raw, row)
    }
}

/// Deserializes the `_source` of a hit.
pub struct SourceMapper<T>(PhantomData<fn() -> T>);

impl<T> SourceMapper<T> {
    /// Creates a source mapper.
    pub fn new() -> Self {
        Self(PhantomData)
    }
}

impl<T> Default for SourceMapper<T> {
    fn default() -> Self {
        Self::new()
    }
}

impl<T: DeserializeOwned> DocumentMapper<Hit, T> for SourceMapper<T> {
    fn map(&self, raw: &Hit, row: usize) -> Result<T, MappingError> {
        let source = raw.source.as_ref().ok_or_else(|| {
            MappingError::row(row, format!("hit {}/{} has no _source", raw.index, raw.id))
        })?;
        serde_json::from_value(source.clone())
            .map_err(|e| MappingError::row(row, format!("hit {}/{}: {}", raw.index, raw.id, e)))
    }
}

/// Maps every row, stopping at the first failure.
pub fn map_rows<R, T, M>(rows: &[R], mapper: &M) -> Result<Vec<T>, MappingError>
where
    M: DocumentMapper<R, T> + ?Sized,
{
    rows.iter()
        .enumerate()
        .map(|(row, raw)| mapper.map(raw, row))
        .collect()
}
