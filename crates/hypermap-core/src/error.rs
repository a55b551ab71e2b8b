//! Error handling for the hypermap dispatch and description engine.
//!
//! This module defines the main error type `Error` used throughout the library,
//! along with a convenient `Result` type alias. Construction-time validation
//! failures, request-time routing and binding failures, security gate failures
//! and domain failures raised by controllers all share this one enum so that
//! the request pipeline can map any of them onto a protocol status.
//!
//! # Examples
//!
//! ```
//! use hypermap_core::error::{Error, Result};
//!
//! fn compose(path: &str) -> Result<()> {
//!     if path.contains("://") {
//!         return Err(Error::construction(format!("'{path}' is not relative")));
//!     }
//!     Ok(())
//! }
//!
//! assert!(compose("/api/person").is_ok());
//! assert_eq!(compose("http://x/api").unwrap_err().status_code(), 500);
//! ```

use thiserror::Error;

use crate::http::Verb;

/// Result type for hypermap operations
pub type Result<T> = std::result::Result<T, Error>;

/// Main error type for hypermap operations
#[derive(Debug, Error)]
pub enum Error {
    /// I/O error
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// YAML parsing error
    #[error("YAML parsing error: {0}")]
    Yaml(#[from] serde_yaml::Error),

    /// JSON parsing error
    #[error("JSON parsing error: {0}")]
    Json(#[from] serde_json::Error),

    /// TOML parsing error
    #[error("TOML parsing error: {0}")]
    TomlDe(#[from] toml::de::Error),

    /// TOML serialization error
    #[error("TOML serialization error: {0}")]
    TomlSer(#[from] toml::ser::Error),

    /// Invalid compiled matcher
    #[error("Pattern error: {0}")]
    Pattern(#[from] regex::Error),

    /// Invalid URL
    #[error("URL error: {0}")]
    Url(#[from] url::ParseError),

    /// Composition-time validation failure (templates, base paths, ownership)
    #[error("Construction error: {0}")]
    Construction(String),

    /// No registered operation matches the request path
    #[error("No route matches {method} {path}")]
    NoMatchingRoute { method: Verb, path: String },

    /// The path is known but the verb is not supported there
    #[error("Method {method} is not allowed on {path}")]
    MethodNotAllowed {
        method: Verb,
        path: String,
        allowed: Vec<Verb>,
    },

    /// The identity is authenticated but lacks the required claims
    #[error("Access denied: {0}")]
    AccessDenied(String),

    /// The identity is anonymous and the resource requires claims
    #[error("Unauthenticated access: {0}")]
    UnauthenticatedAccess(String),

    /// Domain-level conflict raised by a controller operation
    #[error("Already exists: {0}")]
    AlreadyExists(String),

    /// Domain-level missing entity raised by a controller operation
    #[error("Not found: {0}")]
    NotFound(String),

    /// An argument could not be bound from the request
    #[error("Cannot bind argument '{argument}': {reason}")]
    Binding { argument: String, reason: String },

    /// A converter failed to read or write a value
    #[error("Conversion error: {0}")]
    Conversion(String),

    /// No converter can produce any of the accepted media types
    #[error("Not acceptable: {0}")]
    NotAcceptable(String),

    /// Configuration error
    #[error("Configuration error: {0}")]
    Config(String),

    /// Manifest loading or composition error
    #[error("Manifest error: {0}")]
    Manifest(String),
}

impl Error {
    /// Create a new construction error
    pub fn construction<S: Into<String>>(msg: S) -> Self {
        Self::Construction(msg.into())
    }

    /// Create a new configuration error
    pub fn config<S: Into<String>>(msg: S) -> Self {
        Self::Config(msg.into())
    }

    /// Create a new manifest error
    pub fn manifest<S: Into<String>>(msg: S) -> Self {
        Self::Manifest(msg.into())
    }

    /// Create a new conversion error
    pub fn conversion<S: Into<String>>(msg: S) -> Self {
        Self::Conversion(msg.into())
    }

    /// Create a new binding error for the named argument
    pub fn binding<A: Into<String>, S: Into<String>>(argument: A, reason: S) -> Self {
        Self::Binding {
            argument: argument.into(),
            reason: reason.into(),
        }
    }

    /// Protocol status this error is surfaced as.
    pub fn status_code(&self) -> u16 {
        match self {
            Self::NoMatchingRoute { .. } | Self::NotFound(_) => 404,
            Self::MethodNotAllowed { .. } => 405,
            Self::AccessDenied(_) => 403,
            Self::UnauthenticatedAccess(_) => 401,
            Self::AlreadyExists(_) => 409,
            Self::Binding { .. } | Self::Conversion(_) => 400,
            Self::NotAcceptable(_) => 406,
            Self::Io(_)
            | Self::Yaml(_)
            | Self::Json(_)
            | Self::TomlDe(_)
            | Self::TomlSer(_)
            | Self::Pattern(_)
            | Self::Url(_)
            | Self::Construction(_)
            | Self::Config(_)
            | Self::Manifest(_) => 500,
        }
    }

    /// Whether the failure was caused by the request rather than the server.
    pub fn is_client_error(&self) -> bool {
        (400..500).contains(&self.status_code())
    }
}
