//! Error types for snake segmentation.

use thiserror::Error;

/// Errors raised by the segmentation engine.
#[derive(Debug, Error)]
pub enum SnakeError {
    /// Parameter combination is not valid for the selected snake type or solver.
    #[error("Invalid configuration: {0}")]
    Configuration(String),

    /// Bubbles and prior label voxels produced an empty initial region.
    #[error("Initialization is empty: no bubbles and no voxels with label {label}")]
    InitializationEmpty {
        /// The active drawing label.
        label: u8,
    },

    /// The level set stopped being numerically stable.
    #[error("Numeric divergence at iteration {iteration}: {reason}; restart required")]
    NumericDivergence {
        /// Iteration count when the problem was detected.
        iteration: usize,
        /// Human-readable cause.
        reason: String,
    },

    /// An operation was invoked in a state that does not allow it.
    #[error("Operation '{operation}' is not allowed in state {state}")]
    StateMisuse {
        /// The rejected operation.
        operation: &'static str,
        /// Name of the driver state at the time.
        state: String,
    },

    /// Two volumes that must share a grid do not.
    #[error("Dimension mismatch: expected {expected:?}, got {actual:?}")]
    DimensionMismatch {
        /// Expected dimensions.
        expected: [usize; 3],
        /// Dimensions supplied.
        actual: [usize; 3],
    },

    /// A registry entry could not be parsed.
    #[error("Registry key '{key}': {reason}")]
    Registry {
        /// The offending key.
        key: String,
        /// What was wrong with its value.
        reason: String,
    },
}

impl SnakeError {
    /// Create a configuration error.
    #[must_use]
    pub fn configuration(msg: impl Into<String>) -> Self {
        Self::Configuration(msg.into())
    }

    /// Create a state misuse error.
    #[must_use]
    pub fn state_misuse(operation: &'static str, state: impl std::fmt::Display) -> Self {
        Self::StateMisuse {
            operation,
            state: state.to_string(),
        }
    }

    /// Create a registry error.
    #[must_use]
    pub fn registry(key: impl Into<String>, reason: impl Into<String>) -> Self {
        Self::Registry {
            key: key.into(),
            reason: reason.into(),
        }
    }
}

/// Result type for segmentation operations.
pub type Result<T> = std::result::Result<T, SnakeError>;
