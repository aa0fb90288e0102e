//! Error types for jimo-core

use crate::StatusCode;
use std::collections::BTreeMap;
use std::fmt;
use thiserror::Error;

/// Result type alias for jimo operations
pub type Result<T> = std::result::Result<T, Error>;

type BoxError = Box<dyn std::error::Error + Send + Sync>;

/// Error types for the jimo framework
#[derive(Debug, Error)]
pub enum Error {
    /// Typed HTTP failure, translated into a JSON response with its status
    #[error(transparent)]
    Http(#[from] HttpError),

    /// Route tree rejected a pattern
    #[error(transparent)]
    Route(#[from] jimo_router::InsertError),

    /// Route name already bound to another pattern
    #[error("duplicate route name `{name}`: bound to `{existing}`, cannot rebind to `{pattern}`")]
    DuplicateRouteName {
        name: String,
        existing: String,
        pattern: String,
    },

    /// Reverse routing for a name that was never registered
    #[error("unknown route name: {0}")]
    UnknownRoute(String),

    /// Reverse routing parameters do not match the pattern's captures
    #[error("route `{name}`: {detail}")]
    UrlParameter { name: String, detail: String },

    /// Invalid HTTP method
    #[error("Invalid HTTP method: {0}")]
    InvalidMethod(String),

    /// Configuration error
    #[error("Configuration error: {0}")]
    Config(String),

    /// JSON encoding/decoding error
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// IO error (native only)
    #[cfg(feature = "native")]
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// Hyper error (native only)
    #[cfg(feature = "native")]
    #[error("HTTP error: {0}")]
    Hyper(String),

    /// Password hashing was given a blank password
    #[error("empty password")]
    EmptyPassword,

    /// Service container already has a provider for this type
    #[error("container: provider already bound for {0}")]
    DuplicateBinding(&'static str),

    /// Service container has no provider for this type
    #[error("container: no provider bound for {0}")]
    UnboundService(&'static str),

    /// Any other failure raised by application code
    #[error(transparent)]
    Other(BoxError),
}

impl Error {
    /// Wrap an arbitrary error as an untyped failure
    pub fn other(err: impl std::error::Error + Send + Sync + 'static) -> Self {
        Error::Other(Box::new(err))
    }
}

/// Field-level error map exposed by a failure cause
///
/// When the cause attached to an [`HttpError`] implements this, the map is
/// rendered under `fields` in the error body.
pub trait FieldErrors {
    fn field_errors(&self) -> BTreeMap<String, String>;
}

/// Typed HTTP failure: explicit status, client-facing message and an
/// optional wrapped cause.
#[derive(Debug)]
pub struct HttpError {
    status: StatusCode,
    message: String,
    source: Option<BoxError>,
    fields: Option<BTreeMap<String, String>>,
}

impl HttpError {
    pub fn new(status: impl Into<StatusCode>, message: impl Into<String>) -> Self {
        Self {
            status: status.into(),
            message: message.into(),
            source: None,
            fields: None,
        }
    }

    pub fn bad_request(message: impl Into<String>) -> Self {
        Self::new(StatusCode::BAD_REQUEST, message)
    }

    pub fn unauthorized(message: impl Into<String>) -> Self {
        Self::new(StatusCode::UNAUTHORIZED, message)
    }

    pub fn forbidden(message: impl Into<String>) -> Self {
        Self::new(StatusCode::FORBIDDEN, message)
    }

    pub fn not_found(message: impl Into<String>) -> Self {
        Self::new(StatusCode::NOT_FOUND, message)
    }

    pub fn unprocessable(message: impl Into<String>) -> Self {
        Self::new(StatusCode::UNPROCESSABLE_ENTITY, message)
    }

    pub fn internal(message: impl Into<String>) -> Self {
        Self::new(StatusCode::INTERNAL_SERVER_ERROR, message)
    }

    /// Attach a cause. It is never shown to the client.
    pub fn with_source(mut self, source: impl std::error::Error + Send + Sync + 'static) -> Self {
        self.source = Some(Box::new(source));
        self
    }

    /// Attach a cause whose field errors are rendered in the response body
    pub fn with_field_errors<E>(mut self, source: E) -> Self
    where
        E: FieldErrors + std::error::Error + Send + Sync + 'static,
    {
        self.fields = Some(source.field_errors());
        self.source = Some(Box::new(source));
        self
    }

    pub fn status(&self) -> StatusCode {
        self.status
    }

    pub fn message(&self) -> &str {
        &self.message
    }

    /// Field errors taken from the cause, if it exposed any
    ///
    /// A cause attached with [`with_source`](Self::with_source) is searched
    /// along its `source()` chain for [`ValidationErrors`] or a nested
    /// `HttpError` carrying fields.
    pub fn fields(&self) -> Option<&BTreeMap<String, String>> {
        if let Some(fields) = &self.fields {
            return Some(fields);
        }

        let mut cause = self.source.as_deref().map(|e| e as &(dyn std::error::Error + 'static));
        while let Some(err) = cause {
            if let Some(errors) = err.downcast_ref::<ValidationErrors>() {
                return Some(&errors.fields);
            }
            if let Some(fields) = err.downcast_ref::<HttpError>().and_then(HttpError::fields) {
                return Some(fields);
            }
            cause = err.source();
        }
        None
    }
}

impl fmt::Display for HttpError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.source {
            Some(source) => write!(f, "{}: {}", self.message, source),
            None => f.write_str(&self.message),
        }
    }
}

impl std::error::Error for HttpError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        self.source.as_deref().map(|e| e as &(dyn std::error::Error + 'static))
    }
}

/// Collected validation failures, field name -> message
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ValidationErrors {
    fields: BTreeMap<String, String>,
}

impl ValidationErrors {
    pub fn new() -> Self {
        Self::default()
    }

    /// Record a failure; the first message for a field wins
    pub fn add(&mut self, field: impl Into<String>, message: impl Into<String>) {
        self.fields.entry(field.into()).or_insert_with(|| message.into());
    }

    pub fn is_empty(&self) -> bool {
        self.fields.is_empty()
    }

    pub fn get(&self, field: &str) -> Option<&str> {
        self.fields.get(field).map(String::as_str)
    }

    /// `Ok` when nothing failed, otherwise a 422 typed failure
    pub fn into_result(self) -> Result<()> {
        if self.is_empty() {
            Ok(())
        } else {
            Err(HttpError::from(self).into())
        }
    }
}

impl fmt::Display for ValidationErrors {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("validation failed")
    }
}

impl std::error::Error for ValidationErrors {}

impl FieldErrors for ValidationErrors {
    fn field_errors(&self) -> BTreeMap<String, String> {
        self.fields.clone()
    }
}

impl From<ValidationErrors> for HttpError {
    fn from(errors: ValidationErrors) -> Self {
        HttpError::unprocessable("Validation failed").with_field_errors(errors)
    }
}
