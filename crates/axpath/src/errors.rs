use serde::Serialize;
use thiserror::Error;

/// Malformed path text. Raised before any tree access.
///
/// `offset` is the zero-based character offset into the original path string
/// at which parsing stopped.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
#[error("Syntax error at offset {offset}: {message}")]
pub struct SyntaxError {
    pub offset: usize,
    pub message: String,
}

impl SyntaxError {
    pub fn new(offset: usize, message: impl Into<String>) -> Self {
        Self {
            offset,
            message: message.into(),
        }
    }
}

/// Failure reported by the external accessibility provider.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ProviderError {
    #[error("Permission denied: {0}")]
    PermissionDenied(String),

    #[error("Provider call timed out: {0}")]
    Timeout(String),

    #[error("Element handle is stale: {0}")]
    StaleHandle(String),

    #[error("Provider error: {0}")]
    Unknown(String),
}

/// Coarse classification of a [`ProviderError`], used in traces.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ProviderErrorKind {
    PermissionDenied,
    Timeout,
    StaleHandle,
    Unknown,
}

impl ProviderError {
    pub fn kind(&self) -> ProviderErrorKind {
        match self {
            ProviderError::PermissionDenied(_) => ProviderErrorKind::PermissionDenied,
            ProviderError::Timeout(_) => ProviderErrorKind::Timeout,
            ProviderError::StaleHandle(_) => ProviderErrorKind::StaleHandle,
            ProviderError::Unknown(_) => ProviderErrorKind::Unknown,
        }
    }
}

/// Outcome of a single guarded provider call on the worker lane.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum CallError {
    #[error(transparent)]
    Provider(#[from] ProviderError),

    #[error("Operation cancelled")]
    Cancelled,
}

impl CallError {
    /// Attach the segment at which the call was made.
    pub(crate) fn at(self, segment_index: usize) -> ResolutionError {
        match self {
            CallError::Provider(source) => ResolutionError::Provider {
                segment_index,
                source,
            },
            CallError::Cancelled => ResolutionError::Cancelled { segment_index },
        }
    }
}

/// Failure to resolve a parsed path against the live tree.
///
/// `segment_index` is zero-based.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ResolutionError {
    #[error("No element matched segment {segment_index} ({segment})")]
    NotFound {
        segment_index: usize,
        segment: String,
    },

    #[error("Segment {segment_index} ({segment}) requested index {requested} but only {available} element(s) matched")]
    IndexOutOfRange {
        segment_index: usize,
        segment: String,
        requested: usize,
        available: usize,
    },

    #[error("Segment {segment_index} ({segment}) is ambiguous: {count} elements matched and no index was given")]
    Ambiguous {
        segment_index: usize,
        segment: String,
        count: usize,
    },

    #[error("Provider failure at segment {segment_index}: {source}")]
    Provider {
        segment_index: usize,
        #[source]
        source: ProviderError,
    },

    #[error("Resolution cancelled at segment {segment_index}")]
    Cancelled { segment_index: usize },
}

impl ResolutionError {
    pub fn segment_index(&self) -> usize {
        match self {
            ResolutionError::NotFound { segment_index, .. }
            | ResolutionError::IndexOutOfRange { segment_index, .. }
            | ResolutionError::Ambiguous { segment_index, .. }
            | ResolutionError::Provider { segment_index, .. }
            | ResolutionError::Cancelled { segment_index } => *segment_index,
        }
    }
}

/// Failure to generate a path for a live element.
///
/// `level` is the zero-based position in the ancestor chain.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum SerializeError {
    #[error("Element at level {level} has no role")]
    MissingRole { level: usize },

    #[error("Element at level {level} has role {role:?}, which cannot appear in a path")]
    InvalidRole { level: usize, role: String },

    #[error("Element at level {level} is not a child of the element above it")]
    NotAChild { level: usize },

    #[error("Provider failure at level {level}: {source}")]
    Provider {
        level: usize,
        #[source]
        source: ProviderError,
    },

    #[error("Serialization cancelled at level {level}")]
    Cancelled { level: usize },
}

impl SerializeError {
    pub(crate) fn from_call(error: CallError, level: usize) -> Self {
        match error {
            CallError::Provider(source) => SerializeError::Provider { level, source },
            CallError::Cancelled => SerializeError::Cancelled { level },
        }
    }
}

#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("Failed to read configuration: {0}")]
    Io(#[from] std::io::Error),

    #[error("Invalid configuration: {0}")]
    Json(#[from] serde_json::Error),

    #[error("Invalid configuration value: {0}")]
    InvalidValue(String),
}

/// Umbrella error for the string-accepting convenience entry points.
#[derive(Error, Debug)]
pub enum PathError {
    #[error(transparent)]
    Syntax(#[from] SyntaxError),

    #[error(transparent)]
    Resolution(#[from] ResolutionError),

    #[error(transparent)]
    Serialize(#[from] SerializeError),

    #[error(transparent)]
    Config(#[from] ConfigError),
}
