//! # Errors
//!
//! Structured errors for everything a bean hands back to the runtime.
//! They travel inside `anyhow::Error` (bean handlers return `BeanResult`)
//! and can be recovered with [`BeanError::from_anyhow`].

use std::fmt;

use anyhow::Error as AnyError;

/// A convenience result type for bean-facing APIs.
pub type BeanResult<T> = std::result::Result<T, AnyError>;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ErrorKind {
    /// No bean is registered under the requested type
    NotFound,
    /// A bean method failed or panicked
    GeneralError,
}

impl ErrorKind {
    pub fn name(&self) -> &'static str {
        match self {
            ErrorKind::NotFound => "NotFound",
            ErrorKind::GeneralError => "GeneralError",
        }
    }
}

/// A structured runtime error that can live inside `anyhow::Error`.
#[derive(Debug)]
pub struct BeanError {
    pub kind: ErrorKind,
    pub message: String,
    pub source: Option<AnyError>,
}

impl BeanError {
    pub fn new(kind: ErrorKind, message: impl Into<String>) -> Self {
        Self {
            kind,
            message: message.into(),
            source: None,
        }
    }

    pub fn with_source(mut self, source: AnyError) -> Self {
        self.source = Some(source);
        self
    }

    pub fn not_found(msg: impl Into<String>) -> Self {
        Self::new(ErrorKind::NotFound, msg)
    }

    pub fn general_error(msg: impl Into<String>) -> Self {
        Self::new(ErrorKind::GeneralError, msg)
    }

    /// Convert into `anyhow::Error` so it can be returned from a bean handler.
    pub fn into_anyhow(self) -> AnyError {
        AnyError::new(self)
    }

    /// Downcast an `anyhow::Error` to a `BeanError` if possible.
    pub fn from_anyhow(err: &AnyError) -> Option<&BeanError> {
        err.downcast_ref::<BeanError>()
    }
}

impl fmt::Display for BeanError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}: {}", self.kind.name(), self.message)
    }
}

impl std::error::Error for BeanError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        self.source
            .as_ref()
            .map(|e| e.as_ref() as &(dyn std::error::Error + 'static))
    }
}
