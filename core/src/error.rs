use serde::{Deserialize, Serialize};
use std::time::Duration;
use thiserror::Error;

pub type BoxError = Box<dyn std::error::Error + Send + Sync + 'static>;

pub type KgResult<T> = Result<T, KgError>;

/// Coarse classification used by retry and reporting sites.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ErrorKind {
    Database,
    GenerativeText,
    Graph,
    Config,
}

impl std::fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            ErrorKind::Database => "DATABASE",
            ErrorKind::GenerativeText => "GENERATIVE_TEXT",
            ErrorKind::Graph => "GRAPH",
            ErrorKind::Config => "CONFIG",
        };
        write!(f, "{}", s)
    }
}

#[derive(Debug, Error)]
pub enum KgError {
    #[error("[DATABASE] {message}")]
    Database {
        message: String,
        #[source]
        source: Option<BoxError>,
        retryable: bool,
    },
    #[error("[GENERATIVE_TEXT] {message}")]
    GenerativeText {
        message: String,
        #[source]
        source: Option<BoxError>,
        retryable: bool,
    },
    #[error("[GRAPH] {message}")]
    Graph {
        message: String,
        #[source]
        source: Option<BoxError>,
        retryable: bool,
    },
    #[error("[CONFIG] {message}")]
    Config {
        message: String,
        #[source]
        source: Option<BoxError>,
        retryable: bool,
    },
    #[error("[GRAPH] invalid input: {0}")]
    InvalidInput(String),
    #[error("[GRAPH] timeout exceeded after {elapsed:?}")]
    Timeout { elapsed: Duration },
    #[error("failed after {attempts} attempts: {last}")]
    RetriesExhausted {
        attempts: u32,
        #[source]
        last: Box<KgError>,
    },
    #[error("{failed} of {total} operations failed; first error: {first}")]
    Aggregate {
        failed: usize,
        total: usize,
        first: String,
        errors: Vec<KgError>,
    },
}

impl KgError {
    pub fn database(message: impl Into<String>) -> Self {
        Self::Database {
            message: message.into(),
            source: None,
            retryable: true,
        }
    }

    pub fn generative_text(message: impl Into<String>) -> Self {
        Self::GenerativeText {
            message: message.into(),
            source: None,
            retryable: true,
        }
    }

    pub fn graph(message: impl Into<String>) -> Self {
        Self::Graph {
            message: message.into(),
            source: None,
            retryable: false,
        }
    }

    pub fn config(message: impl Into<String>) -> Self {
        Self::Config {
            message: message.into(),
            source: None,
            retryable: false,
        }
    }

    pub fn invalid_input(message: impl Into<String>) -> Self {
        Self::InvalidInput(message.into())
    }

    /// Collapse per-item failures into one error. Returns `None` when nothing failed.
    pub fn aggregate(total: usize, errors: Vec<KgError>) -> Option<Self> {
        let first = errors.first()?.to_string();
        Some(Self::Aggregate {
            failed: errors.len(),
            total,
            first,
            errors,
        })
    }

    /// Attach an underlying cause. No-op for variants that carry no cause slot.
    pub fn with_source(mut self, cause: impl Into<BoxError>) -> Self {
        match &mut self {
            Self::Database { source, .. }
            | Self::GenerativeText { source, .. }
            | Self::Graph { source, .. }
            | Self::Config { source, .. } => *source = Some(cause.into()),
            Self::InvalidInput(_)
            | Self::Timeout { .. }
            | Self::RetriesExhausted { .. }
            | Self::Aggregate { .. } => {}
        }
        self
    }

    /// Override the default retry classification of a kind-tagged error.
    pub fn with_retryable(mut self, value: bool) -> Self {
        match &mut self {
            Self::Database { retryable, .. }
            | Self::GenerativeText { retryable, .. }
            | Self::Graph { retryable, .. }
            | Self::Config { retryable, .. } => *retryable = value,
            Self::InvalidInput(_)
            | Self::Timeout { .. }
            | Self::RetriesExhausted { .. }
            | Self::Aggregate { .. } => {}
        }
        self
    }

    pub fn is_retryable(&self) -> bool {
        match self {
            Self::Database { retryable, .. }
            | Self::GenerativeText { retryable, .. }
            | Self::Graph { retryable, .. }
            | Self::Config { retryable, .. } => *retryable,
            Self::InvalidInput(_)
            | Self::Timeout { .. }
            | Self::RetriesExhausted { .. }
            | Self::Aggregate { .. } => false,
        }
    }

    pub fn kind(&self) -> ErrorKind {
        match self {
            Self::Database { .. } => ErrorKind::Database,
            Self::GenerativeText { .. } => ErrorKind::GenerativeText,
            Self::Graph { .. } | Self::InvalidInput(_) | Self::Timeout { .. } => ErrorKind::Graph,
            Self::Config { .. } => ErrorKind::Config,
            Self::RetriesExhausted { last, .. } => last.kind(),
            Self::Aggregate { errors, .. } => errors
                .first()
                .map(KgError::kind)
                .unwrap_or(ErrorKind::Graph),
        }
    }

    pub fn is_invalid_input(&self) -> bool {
        matches!(self, Self::InvalidInput(_))
    }

    pub fn is_timeout(&self) -> bool {
        matches!(self, Self::Timeout { .. })
    }
}

impl From<config::ConfigError> for KgError {
    fn from(err: config::ConfigError) -> Self {
        KgError::config("failed to load configuration").with_source(err)
    }
}
