//! # Engine Errors
//!
//! Unified error type for model construction and inference.
//!
//! Every failure in this crate is a construction-order or query error: it is
//! reported once, as a value, and the operation that produced it is not
//! retried. The variants are coarse kinds; the message names the failing
//! operation and the offending node or variable.

use thiserror::Error;

/// Errors produced while building forests, composing joints, or answering
/// queries.
#[non_exhaustive]
#[derive(Debug, Error)]
pub enum ModelError {
    /// Invalid model shape: wrong role for an operation, duplicate variable
    /// names, a second parent edge, a cycle, or mismatched tables.
    #[error("structural error: {0}")]
    Structural(String),

    /// Out-of-range or unknown index: node ids, variable names, states,
    /// local child indices, observation indices.
    #[error("index error: {0}")]
    Index(String),

    /// Required data is absent: missing child distributions, missing leaf
    /// backing, evidence without a required variable.
    #[error("missing data: {0}")]
    MissingData(String),

    /// The query cannot be answered by this joint: uncovered, duplicated, or
    /// empty query variables.
    #[error("unsupported query: {0}")]
    UnsupportedQuery(String),

    /// Invalid numerics: non-finite or negative probabilities, rows that do
    /// not normalize, zero-probability conditioning evidence.
    #[error("numerical error: {0}")]
    Numerical(String),
}
