use serde::{Deserialize, Serialize};
use thiserror::Error;

#[derive(Error, Debug)]
pub enum ScanError {
    #[error("connection error: {0}")]
    Connection(String),

    #[error("connection {0} not found")]
    ConnectionNotFound(String),

    #[error("failed to initiate {category} client: {reason}")]
    ClientInit { category: String, reason: String },

    #[error("failed to read {category} page: {reason}")]
    PageFetch { category: String, reason: String },

    #[error("{category} fetch cancelled")]
    Cancelled { category: String },

    #[error("HTTP request failed: {0}")]
    HttpError(#[from] reqwest::Error),

    #[error("Invalid URL: {0}")]
    InvalidUrl(String),

    #[error("Parse error: {0}")]
    ParseError(String),

    #[error("Other error: {0}")]
    Other(String),
}

pub type Result<T> = std::result::Result<T, ScanError>;

impl ScanError {
    pub fn client_init(category: &str, reason: impl std::fmt::Display) -> Self {
        ScanError::ClientInit {
            category: category.to_string(),
            reason: reason.to_string(),
        }
    }

    pub fn page_fetch(category: &str, reason: impl std::fmt::Display) -> Self {
        ScanError::PageFetch {
            category: category.to_string(),
            reason: reason.to_string(),
        }
    }

    pub fn kind(&self) -> ErrorKind {
        match self {
            ScanError::Connection(_) | ScanError::ConnectionNotFound(_) => ErrorKind::Connection,
            ScanError::Cancelled { .. } => ErrorKind::Cancelled,
            _ => ErrorKind::CategoryFetch,
        }
    }

    fn category(&self) -> Option<String> {
        match self {
            ScanError::ClientInit { category, .. }
            | ScanError::PageFetch { category, .. }
            | ScanError::Cancelled { category } => Some(category.clone()),
            _ => None,
        }
    }
}

/// Where in a scrape an error was raised.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorKind {
    Connection,
    CategoryFetch,
    Cancelled,
}

impl ErrorKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            ErrorKind::Connection => "connection",
            ErrorKind::CategoryFetch => "category_fetch",
            ErrorKind::Cancelled => "cancelled",
        }
    }
}

/// The stored items an error leaves unverified for the run.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ErrorScope {
    /// Provider type prefix, e.g. `Azure::`.
    pub type_prefix: String,
    /// Config class of the failed category; `None` covers every item of the provider.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub config_class: Option<String>,
}

impl ErrorScope {
    pub fn provider(type_prefix: &str) -> Self {
        Self {
            type_prefix: type_prefix.to_string(),
            config_class: None,
        }
    }

    pub fn category(type_prefix: &str, config_class: &str) -> Self {
        Self {
            type_prefix: type_prefix.to_string(),
            config_class: Some(config_class.to_string()),
        }
    }
}

/// An error carried inside the result stream instead of aborting the scrape.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ResultError {
    pub kind: ErrorKind,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub category: Option<String>,
    pub message: String,
    /// Unknown scope means the whole run is unverified.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub scope: Option<ErrorScope>,
}

impl ResultError {
    pub fn with_scope(mut self, scope: ErrorScope) -> Self {
        self.scope = Some(scope);
        self
    }
}

impl From<&ScanError> for ResultError {
    fn from(err: &ScanError) -> Self {
        ResultError {
            kind: err.kind(),
            category: err.category(),
            message: err.to_string(),
            scope: None,
        }
    }
}

impl From<ScanError> for ResultError {
    fn from(err: ScanError) -> Self {
        ResultError::from(&err)
    }
}

impl std::fmt::Display for ResultError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "[{}] {}", self.kind.as_str(), self.message)
    }
}
