//! Error taxonomy
//!
//! Validation failures (cycles, duplicate attaches, out-of-range shifts)
//! are not errors: the mutation primitives report them as `Ok(false)`.
//! Everything here is a genuine failure that reaches the caller.
//!
//! Author: Moroya Sakamoto

use thiserror::Error;

pub type Result<T> = std::result::Result<T, TreeError>;

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum TreeError {
    /// An operation key was registered twice on the same scheduler.
    #[error("operation key already registered: {key}")]
    DuplicateKey { key: String },

    /// A scope was opened for a key that was never registered.
    #[error("operation key not registered: {key}")]
    KeyNotFound { key: String },

    /// The low-level collection operation does not fit the child storage.
    #[error("unsupported mutation: {operation} on {storage} child storage")]
    UnsupportedMutation {
        operation: &'static str,
        storage: &'static str,
    },

    /// A low-level collection operation was handed an invalid position.
    #[error("index {index} out of range for length {len}")]
    IndexOutOfRange { index: usize, len: usize },

    /// A disposed node or mirror was asked to do work.
    #[error("{object} used after dispose")]
    UseAfterDispose { object: &'static str },
}

impl TreeError {
    #[must_use]
    pub fn unsupported(operation: &'static str, storage: &'static str) -> Self {
        Self::UnsupportedMutation { operation, storage }
    }

    #[must_use]
    pub fn out_of_range(index: usize, len: usize) -> Self {
        Self::IndexOutOfRange { index, len }
    }

    /// True for failures raised by a low-level collection operation,
    /// i.e. the ones that trigger a repair pass before propagating.
    pub fn is_mutation_failure(&self) -> bool {
        matches!(
            self,
            Self::UnsupportedMutation { .. } | Self::IndexOutOfRange { .. }
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_display_messages() {
        let e = TreeError::DuplicateKey {
            key: String::from("structure"),
        };
        assert_eq!(e.to_string(), "operation key already registered: structure");

        let e = TreeError::out_of_range(4, 2);
        assert_eq!(e.to_string(), "index 4 out of range for length 2");

        let e = TreeError::unsupported("insert", "fixed");
        assert_eq!(e.to_string(), "unsupported mutation: insert on fixed child storage");
    }

    #[test]
    fn test_mutation_failure_classification() {
        assert!(TreeError::out_of_range(1, 0).is_mutation_failure());
        assert!(TreeError::unsupported("set", "list").is_mutation_failure());
        assert!(!TreeError::UseAfterDispose { object: "node" }.is_mutation_failure());
        assert!(!TreeError::KeyNotFound {
            key: String::from("k")
        }
        .is_mutation_failure());
    }
}
