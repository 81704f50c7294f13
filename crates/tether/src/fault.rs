//! Failures raised while resolving references or invoking host functions.

use std::fmt;
use std::panic::{self, AssertUnwindSafe};
use thiserror::Error;

/// Captured error descriptor: what a host function raised, and the call
/// frames it travelled through.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Fault {
    pub kind: String,
    pub message: String,
    /// Innermost frame first.
    pub trace: Vec<String>,
}

impl Fault {
    pub fn new(kind: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            kind: kind.into(),
            message: message.into(),
            trace: Vec::new(),
        }
    }

    pub fn type_error(message: impl Into<String>) -> Self {
        Self::new("TypeError", message)
    }

    pub fn value_error(message: impl Into<String>) -> Self {
        Self::new("ValueError", message)
    }

    pub fn with_frame(mut self, frame: impl Into<String>) -> Self {
        self.trace.push(frame.into());
        self
    }

    /// Formatted failure: outermost frame first, then `Kind: message`.
    pub fn format(&self) -> Vec<String> {
        self.trace
            .iter()
            .rev()
            .map(|frame| format!("at {frame}"))
            .chain(std::iter::once(self.to_string()))
            .collect()
    }
}

impl fmt::Display for Fault {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}: {}", self.kind, self.message)
    }
}

impl std::error::Error for Fault {}

/// Run host code, turning a panic into a `Panic` fault.
pub fn contain<T>(body: impl FnOnce() -> T) -> Result<T, Fault> {
    panic::catch_unwind(AssertUnwindSafe(body)).map_err(|payload| {
        let message = payload
            .downcast_ref::<&str>()
            .map(|s| s.to_string())
            .or_else(|| payload.downcast_ref::<String>().cloned())
            .unwrap_or_else(|| "host code panicked".to_string());
        Fault::new("Panic", message)
    })
}

#[derive(Debug, Clone, Error)]
pub enum Error {
    #[error("`{0}` is not a valid reference")]
    MalformedReference(String),

    #[error("no module named `{0}`")]
    ModuleNotFound(String),

    #[error("`{owner}` has no attribute `{name}`")]
    AttributeNotFound { owner: String, name: String },

    #[error("`{0}` is not callable")]
    NotCallable(String),

    #[error("could not infer a name from `{0}` as its value is not a named object")]
    Unnamed(String),

    #[error("{0}")]
    Argument(String),

    /// A callable raised.
    #[error("{0}")]
    Raised(Fault),
}

impl Error {
    pub fn kind(&self) -> &str {
        match self {
            Error::MalformedReference(_)
            | Error::ModuleNotFound(_)
            | Error::AttributeNotFound { .. } => "ResolutionError",
            Error::NotCallable(_) => "TypeError",
            Error::Unnamed(_) => "NamingError",
            Error::Argument(_) => "ArgumentError",
            Error::Raised(fault) => &fault.kind,
        }
    }

    pub fn to_fault(&self) -> Fault {
        match self {
            Error::Raised(fault) => fault.clone(),
            other => Fault::new(other.kind(), other.to_string()),
        }
    }

    /// Lines carried by an error reply.
    pub fn format(&self) -> Vec<String> {
        self.to_fault().format()
    }
}
