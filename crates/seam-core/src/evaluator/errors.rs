use thiserror::Error;

use super::value::Value;

/// Evaluator-specific error types.
///
/// `Thrown` is the only variant `try`/`catch` can intercept; everything else
/// aborts the evaluation.
#[derive(Error, Debug, Clone)]
pub enum EvaluatorError {
    #[error("{class}: {message}")]
    Thrown {
        class: String,
        message: String,
        exception: Value,
    },

    #[error("Type error: {operation} requires {expected}, got {actual}")]
    TypeError {
        operation: String,
        expected: String,
        actual: String,
    },

    #[error("Type error: cannot {operation} {left_type} and {right_type}")]
    BinaryTypeError {
        operation: String,
        left_type: String,
        right_type: String,
    },

    #[error("Class '{name}' not found")]
    ClassNotFound { name: String },

    #[error("No method '{method}' on {class} accepts {arity} argument(s) of these types")]
    MethodNotFound {
        class: String,
        method: String,
        arity: usize,
    },

    #[error("Field '{field}' not found on {class}")]
    FieldNotFound { class: String, field: String },

    #[error("Variable '{name}' not found")]
    VariableNotFound { name: String },

    #[error("Maximum evaluation depth of {0} exceeded")]
    DepthExceeded(usize),

    #[error("Invalid operation: {message}")]
    InvalidOperation { message: String },
}

impl EvaluatorError {
    pub fn type_error(operation: &str, expected: &str, actual: &str) -> Self {
        Self::TypeError {
            operation: operation.to_string(),
            expected: expected.to_string(),
            actual: actual.to_string(),
        }
    }

    pub fn binary_type_error(operation: &str, left_type: &str, right_type: &str) -> Self {
        Self::BinaryTypeError {
            operation: operation.to_string(),
            left_type: left_type.to_string(),
            right_type: right_type.to_string(),
        }
    }

    pub fn method_not_found(class: &str, method: &str, arity: usize) -> Self {
        Self::MethodNotFound {
            class: class.to_string(),
            method: method.to_string(),
            arity,
        }
    }

    pub fn invalid(message: impl Into<String>) -> Self {
        Self::InvalidOperation {
            message: message.into(),
        }
    }
}
