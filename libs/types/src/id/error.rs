//! Identifier Error Types
//!
//! `IdError` describes what is structurally wrong with an encoded compound
//! identifier. `InvalidIdError` names the identifier type that was being
//! built and carries the codec failure as its source.

use thiserror::Error;

use super::compound::Field;

/// Structural failure of the compound identifier codec
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum IdError {
    /// Input does not follow the canonical string or binary layout
    #[error("malformed identifier: {reason}")]
    Malformed { reason: String },

    /// A field outside the permitted set is present
    #[error("unexpected field {field:?}")]
    UnexpectedField { field: Field },

    /// A required field is absent
    #[error("missing field {field:?}")]
    MissingField { field: Field },
}

impl IdError {
    /// Create a malformed-input error
    pub fn malformed(reason: impl Into<String>) -> Self {
        Self::Malformed {
            reason: reason.into(),
        }
    }
}

/// Failure to obtain a typed identifier
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum InvalidIdError {
    #[error("invalid instance id")]
    Instance(#[source] IdError),

    #[error("invalid application id")]
    Application(#[source] IdError),

    #[error("invalid node id")]
    Node(#[source] IdError),

    #[error("invalid resource id")]
    Resource(#[source] IdError),

    #[error("invalid task id")]
    Task(#[source] IdError),
}

impl InvalidIdError {
    /// The underlying codec failure
    pub fn cause(&self) -> &IdError {
        match self {
            Self::Instance(e)
            | Self::Application(e)
            | Self::Node(e)
            | Self::Resource(e)
            | Self::Task(e) => e,
        }
    }
}
