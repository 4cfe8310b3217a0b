//! Error types for registration, selection and execution.

use std::path::PathBuf;

use thiserror::Error;

/// Errors reported by the registry, the selector and the executor.
#[derive(Debug, Error)]
pub enum GumathError {
    #[error("{name}: maximum number of kernels ({max}) reached")]
    Capacity { name: String, max: usize },

    #[error("{name}: conflicting kernel signature `{signature}`")]
    Conflict { name: String, signature: String },

    #[error("unknown function '{0}'")]
    UnknownFunction(String),

    #[error(
        "could not find kernel for '{name}' with arguments ({call}): \
         examined {examined} candidate(s)"
    )]
    NoApplicableKernel {
        name: String,
        call: String,
        examined: usize,
        candidates: Vec<String>,
    },

    #[error("shape mismatch at index path {path:?}: expected {expected}, found {found}")]
    ShapeMismatch {
        path: Vec<i64>,
        /// Row of the enclosing dimension; `None` at the outermost level.
        row: Option<i64>,
        expected: i64,
        found: i64,
    },

    #[error("kernel failed at index path {path:?}: {source}")]
    LeafExecution {
        path: Vec<i64>,
        #[source]
        source: KernelError,
    },

    #[error(transparent)]
    Parse(#[from] ParseError),

    #[error("invalid argument: {0}")]
    InvalidArgument(String),

    #[error("array access failed: {0}")]
    Data(#[from] KernelError),

    #[error("configuration error in {path}: {message}")]
    Config { path: PathBuf, message: String },

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

impl GumathError {
    /// Wrap a failure reported by a kernel body at the given leaf.
    pub(crate) fn from_leaf(path: &[i64], err: KernelError) -> Self {
        match err {
            KernelError::ShapeMismatch { expected, found } => GumathError::ShapeMismatch {
                path: path.to_vec(),
                row: path.last().copied(),
                expected,
                found,
            },
            source => GumathError::LeafExecution {
                path: path.to_vec(),
                source,
            },
        }
    }
}

/// Errors raised while navigating typed views or inside kernel bodies.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum KernelError {
    #[error("expected {expected} arguments, got {found}")]
    Arity { expected: usize, found: usize },

    #[error("expected {expected}, found `{found}`")]
    TypeMismatch { expected: String, found: String },

    #[error("index {index} out of bounds for dimension of length {len}")]
    IndexOutOfBounds { index: i64, len: i64 },

    #[error("access of {size} bytes at offset {offset} exceeds buffer of {len} bytes")]
    BufferOverrun { offset: i64, size: usize, len: usize },

    #[error("argument is read-only")]
    ReadOnly,

    #[error("shape mismatch: expected {expected}, found {found}")]
    ShapeMismatch { expected: i64, found: i64 },

    #[error("{0}")]
    Value(String),
}

/// Error in signature or type text.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("invalid type `{text}`: {message}")]
pub struct ParseError {
    pub text: String,
    pub message: String,
}

impl ParseError {
    pub(crate) fn new(text: &str, message: impl Into<String>) -> Self {
        Self {
            text: text.to_string(),
            message: message.into(),
        }
    }
}

/// Result type used throughout the crate.
pub type Result<T> = std::result::Result<T, GumathError>;

/// Result type returned by kernel bodies.
pub type KernelResult = std::result::Result<(), KernelError>;
