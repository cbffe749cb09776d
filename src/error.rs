//! Error types for the advisory-mirror crate.
//!
//! [`MirrorError`] covers every failure mode of the ingestion, matching and
//! publishing pipeline. Record-level normalization problems use the narrower
//! [`NormalizeError`] so callers can skip a single bad record without failing
//! a whole batch.

use std::io;
use std::time::Duration;

/// The main error type for all operations in this crate.
#[derive(Debug, thiserror::Error)]
pub enum MirrorError {
    /// Relational store operation failed.
    #[error("Database error: {0}")]
    Database(#[from] sea_orm::DbErr),

    /// Failed to fetch data from the upstream feed or a repository.
    #[error("Source '{source_name}' fetch failed: {message}")]
    SourceFetch {
        /// Name of the source that failed (e.g., "CSAF", "repomd").
        source_name: String,
        /// Description of what went wrong.
        message: String,
    },

    /// Configuration error (missing or invalid values).
    #[error("Configuration error: {0}")]
    Config(String),

    /// JSON serialization/deserialization failed.
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// YAML deserialization failed (module metadata).
    #[error("YAML error: {0}")]
    Yaml(#[from] serde_yaml::Error),

    /// XML parsing or writing failed.
    #[error("XML error: {0}")]
    Xml(String),

    /// Compression or decompression failed.
    #[error("Compression error: {0}")]
    Compression(String),

    /// HTTP request failed.
    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    /// HTTP request via middleware failed.
    #[error("HTTP middleware error: {0}")]
    HttpMiddleware(#[from] reqwest_middleware::Error),

    /// I/O error (artifact writes, decompression streams).
    #[error("I/O error: {0}")]
    Io(#[from] io::Error),

    /// A package identifier could not be parsed.
    #[error("Invalid NEVRA '{nevra}': {message}")]
    InvalidNevra {
        /// The offending identifier.
        nevra: String,
        /// Why parsing failed.
        message: String,
    },

    /// A row referenced by a mirror or advisory does not exist or is incomplete.
    #[error("Unresolved reference: {0}")]
    UnresolvedReference(String),

    /// A workflow activity exceeded its allotted window.
    #[error("Timed out after {0:?}")]
    Timeout(Duration),

    /// A workflow queue is closed or its worker dropped the reply.
    #[error("Workflow queue error: {0}")]
    Queue(String),
}

/// A specialized Result type for mirror operations.
pub type Result<T> = std::result::Result<T, MirrorError>;

impl MirrorError {
    /// Create a new source fetch error.
    pub fn source_fetch(source: impl Into<String>, message: impl Into<String>) -> Self {
        Self::SourceFetch {
            source_name: source.into(),
            message: message.into(),
        }
    }

    /// Create a new configuration error.
    pub fn config(message: impl Into<String>) -> Self {
        Self::Config(message.into())
    }

    /// Create a new XML error from any displayable parser/writer error.
    pub fn xml(err: impl std::fmt::Display) -> Self {
        Self::Xml(err.to_string())
    }

    /// Create a new compression error.
    pub fn compression(message: impl Into<String>) -> Self {
        Self::Compression(message.into())
    }

    /// Create a new NEVRA parse error.
    pub fn invalid_nevra(nevra: impl Into<String>, message: impl Into<String>) -> Self {
        Self::InvalidNevra {
            nevra: nevra.into(),
            message: message.into(),
        }
    }

    /// Create a new unresolved reference error.
    pub fn unresolved(message: impl Into<String>) -> Self {
        Self::UnresolvedReference(message.into())
    }

    /// Check if this error is retryable.
    ///
    /// Transient fetch failures, store failures and timeouts are retried as a
    /// whole by the workflow runtime; everything else is reported as-is.
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            Self::Http(_)
                | Self::HttpMiddleware(_)
                | Self::SourceFetch { .. }
                | Self::Database(_)
                | Self::Timeout(_)
        )
    }
}

/// Reasons a single upstream document cannot become an advisory.
#[derive(Debug, thiserror::Error)]
pub enum NormalizeError {
    /// The payload does not have the expected document shape.
    #[error("malformed document: {0}")]
    Malformed(#[from] serde_json::Error),

    /// A required field is empty.
    #[error("missing field '{0}'")]
    MissingField(&'static str),

    /// The document carries no vulnerabilities section.
    #[error("document has no vulnerabilities")]
    NoVulnerabilities,

    /// None of the fixed products is an RPM.
    #[error("document has no fixed packages")]
    NoFixedPackages,

    /// The advisory name prefix does not map to a known kind.
    #[error("unknown advisory kind for '{0}'")]
    UnknownKind(String),

    /// A timestamp matched none of the accepted formats.
    #[error("unparseable timestamp '{0}'")]
    InvalidTimestamp(String),
}
