//! Per-document and per-batch outcomes of bulk execution.

use std::fmt;
use std::time::Duration;

use serde::{Deserialize, Serialize};

/// What happened to a single mutation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DocumentStatus {
    /// Applied.
    Success,
    /// Lost a version race with a concurrent write.
    Conflict,
    /// The target document or index does not exist.
    NotFound,
    /// Refused by the cluster: malformed, mapping error, or a creation-only
    /// write to an existing id.
    Rejected,
    /// Never confirmed because the whole request failed.
    TransportError,
}

impl DocumentStatus {
    /// Classifies a bulk item response.
    ///
    /// Item-level back-pressure (429) is retried by the pipeline before this
    /// classification applies.
    pub fn classify(status_code: u16, creation_only: bool) -> Self {
        match status_code {
            200..=299 => DocumentStatus::Success,
            404 => DocumentStatus::NotFound,
            409 if creation_only => DocumentStatus::Rejected,
            409 => DocumentStatus::Conflict,
            _ => DocumentStatus::Rejected,
        }
    }

    /// Returns true for [`DocumentStatus::Success`].
    pub fn is_success(&self) -> bool {
        matches!(self, DocumentStatus::Success)
    }
}

impl fmt::Display for DocumentStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            DocumentStatus::Success => write!(f, "success"),
            DocumentStatus::Conflict => write!(f, "conflict"),
            DocumentStatus::NotFound => write!(f, "not_found"),
            DocumentStatus::Rejected => write!(f, "rejected"),
            DocumentStatus::TransportError => write!(f, "transport_error"),
        }
    }
}

/// The outcome of one mutation, correlated by index and id.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DocumentOutcome {
    /// Target index.
    pub index: String,

    /// Document id; the cluster-assigned id for auto-id index records when
    /// the response carried one.
    pub id: Option<String>,

    /// Classified result.
    pub status: DocumentStatus,

    /// Item status code, absent when the request never completed.
    pub status_code: Option<u16>,

    /// Failure reason reported by the cluster or the transport.
    pub reason: Option<String>,
}

impl DocumentOutcome {
    /// Creates a successful outcome.
    pub fn success(index: impl Into<String>, id: Option<String>, status_code: u16) -> Self {
        Self {
            index: index.into(),
            id,
            status: DocumentStatus::Success,
            status_code: Some(status_code),
            reason: None,
        }
    }

    /// Creates an outcome for a mutation whose request failed as a whole.
    pub fn transport_error(
        index: impl Into<String>,
        id: Option<String>,
        reason: impl Into<String>,
    ) -> Self {
        Self {
            index: index.into(),
            id,
            status: DocumentStatus::TransportError,
            status_code: None,
            reason: Some(reason.into()),
        }
    }
}

/// Aggregated outcome of one batch, in submission order.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BatchOutcome {
    /// Pipeline-assigned batch number.
    pub execution_id: u64,
    /// One entry per submitted mutation.
    pub outcomes: Vec<DocumentOutcome>,
    /// Wall time from first attempt to final classification.
    pub took: Duration,
}

impl BatchOutcome {
    /// Returns true unless some mutation was never confirmed.
    ///
    /// Per-document failures such as conflicts do not fail the batch.
    pub fn batch_succeeded(&self) -> bool {
        !self
            .outcomes
            .iter()
            .any(|o| o.status == DocumentStatus::TransportError)
    }

    /// Returns true if any mutation did not succeed.
    pub fn has_failures(&self) -> bool {
        self.outcomes.iter().any(|o| !o.status.is_success())
    }

    /// Counts outcomes with the given status.
    pub fn count(&self, status: DocumentStatus) -> usize {
        self.outcomes.iter().filter(|o| o.status == status).count()
    }

    /// Returns the ids of conflicting documents.
    pub fn conflict_ids(&self) -> Vec<&str> {
        self.outcomes
            .iter()
            .filter(|o| o.status == DocumentStatus::Conflict)
            .filter_map(|o| o.id.as_deref())
            .collect()
    }

    /// Iterates over the failed outcomes.
    pub fn failures(&self) -> impl Iterator<Item = (usize, &DocumentOutcome)> {
        self.outcomes
            .iter()
            .enumerate()
            .filter(|(_, o)| !o.status.is_success())
    }

    /// Builds a human-readable summary of every failure.
    pub fn failure_message(&self) -> String {
        let mut message = String::from("failure in bulk execution:");
        for (position, outcome) in self.failures() {
            message.push_str(&format!(
                "\n[{}]: index [{}], id [{}], status [{}], message [{}]",
                position,
                outcome.index,
                outcome.id.as_deref().unwrap_or("<auto>"),
                outcome.status,
                outcome.reason.as_deref().unwrap_or("")
            ));
        }
        message
    }

    /// Number of mutations in the batch.
    pub fn len(&self) -> usize {
        self.outcomes.len()
    }

    /// Returns true for an empty batch.
    pub fn is_empty(&self) -> bool {
        self.outcomes.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn outcome(id: &str, status: DocumentStatus) -> DocumentOutcome {
        DocumentOutcome {
            index: "idx".to_string(),
            id: Some(id.to_string()),
            status,
            status_code: None,
            reason: Some("boom".to_string()),
        }
    }

    #[test]
    fn test_classify_item_status() {
        assert_eq!(DocumentStatus::classify(200, false), DocumentStatus::Success);
        assert_eq!(DocumentStatus::classify(201, true), DocumentStatus::Success);
        assert_eq!(DocumentStatus::classify(404, false), DocumentStatus::NotFound);
        assert_eq!(DocumentStatus::classify(409, false), DocumentStatus::Conflict);
        assert_eq!(DocumentStatus::classify(409, true), DocumentStatus::Rejected);
        assert_eq!(DocumentStatus::classify(400, false), DocumentStatus::Rejected);
        assert_eq!(DocumentStatus::classify(500, false), DocumentStatus::Rejected);
    }

    #[test]
    fn test_batch_succeeded_ignores_document_failures() {
        let batch = BatchOutcome {
            execution_id: 1,
            outcomes: vec![
                outcome("1", DocumentStatus::Success),
                outcome("2", DocumentStatus::Conflict),
                outcome("3", DocumentStatus::NotFound),
            ],
            took: Duration::ZERO,
        };

        assert!(batch.batch_succeeded());
        assert!(batch.has_failures());
        assert_eq!(batch.conflict_ids(), vec!["2"]);
        assert_eq!(batch.count(DocumentStatus::NotFound), 1);
    }

    #[test]
    fn test_batch_with_transport_error_fails() {
        let batch = BatchOutcome {
            execution_id: 2,
            outcomes: vec![outcome("1", DocumentStatus::TransportError)],
            took: Duration::ZERO,
        };
        assert!(!batch.batch_succeeded());
    }

    #[test]
    fn test_failure_message_lists_failures_only() {
        let batch = BatchOutcome {
            execution_id: 3,
            outcomes: vec![
                outcome("1", DocumentStatus::Success),
                outcome("2", DocumentStatus::Rejected),
            ],
            took: Duration::ZERO,
        };

        let message = batch.failure_message();
        assert!(message.contains("[1]: index [idx], id [2], status [rejected], message [boom]"));
        assert!(!message.contains("id [1]"));
    }
}
