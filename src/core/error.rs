use reqwest::StatusCode;
use std::fmt;

pub type BoxError = Box<dyn std::error::Error + Send + Sync + 'static>;

pub type Result<T, E = Error> = std::result::Result<T, E>;

/// Why an asset name could not be turned into a package.
#[derive(thiserror::Error, Debug)]
pub enum ParseError {
    #[error("empty package name")]
    MissingName,

    #[error("package {0} has no download url")]
    MissingUrl(String),

    #[error("incorrect package name: {0}")]
    Name(String),

    #[error("incorrect package extension: {0}")]
    Extension(String),

    #[error("incorrect package name segments: want 4, got {count} in {name}")]
    Segments { name: String, count: usize },

    #[error("bad number of arguments: want 3, got {0}")]
    Arguments(usize),

    #[error("unknown platform: {0}")]
    Platform(String),

    #[error("unknown android version: {0}")]
    Android(String),

    #[error("unknown variant: {0}")]
    Variant(String),

    #[error("unable to parse date {value:?} with format {format:?}")]
    Date {
        value: String,
        format: String,
        #[source]
        source: chrono::ParseError,
    },

    #[error("malformed checksum sidecar: {0:?}")]
    Checksum(String),
}

/// A failed download attempt. All of these are retried by the queue.
#[derive(thiserror::Error, Debug)]
pub enum TransferError {
    #[error("checksum mismatch: expected {expected}, got {actual}")]
    ChecksumMismatch { expected: String, actual: String },

    #[error("short read: expected {expected} bytes, got {actual}")]
    ShortRead { expected: u64, actual: u64 },

    #[error("http status error: {0}")]
    Status(StatusCode),

    #[error("{0:#}")]
    Transport(anyhow::Error),

    #[error("temp file i/o: {0}")]
    Io(#[from] std::io::Error),
}

impl From<anyhow::Error> for TransferError {
    fn from(err: anyhow::Error) -> Self {
        match err.downcast::<TransferError>() {
            Ok(e) => e,
            Err(err) => TransferError::Transport(err),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    Parse,
    Transfer,
    Cancelled,
    Local,
    Remote,
    Config,
}

impl fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            ErrorKind::Parse => "parse",
            ErrorKind::Transfer => "transfer",
            ErrorKind::Cancelled => "cancelled",
            ErrorKind::Local => "local storage",
            ErrorKind::Remote => "remote mirror",
            ErrorKind::Config => "config",
        };
        f.write_str(s)
    }
}

/// Error crossing a component boundary: a kind, the step that failed, and
/// the underlying cause.
#[derive(Debug)]
pub struct Error {
    kind: ErrorKind,
    context: String,
    source: Option<BoxError>,
}

impl Error {
    pub fn new(kind: ErrorKind, context: impl Into<String>) -> Self {
        Self { kind, context: context.into(), source: None }
    }

    pub fn with_source(kind: ErrorKind, context: impl Into<String>, source: impl Into<BoxError>) -> Self {
        Self { kind, context: context.into(), source: Some(source.into()) }
    }

    pub(crate) fn cancelled() -> Self {
        Self::new(ErrorKind::Cancelled, "download cancelled")
    }

    /// Adds a step description on top of this error, keeping its kind.
    pub fn wrap(self, context: impl Into<String>) -> Self {
        let kind = self.kind;
        let source: BoxError = Box::new(self);
        Self { kind, context: context.into(), source: Some(source) }
    }

    pub fn kind(&self) -> ErrorKind {
        self.kind
    }

    pub fn context(&self) -> &str {
        &self.context
    }
}

impl fmt::Display for Error {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.context)
    }
}

impl std::error::Error for Error {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        self.source.as_deref().map(|e| e as &(dyn std::error::Error + 'static))
    }
}

impl From<ParseError> for Error {
    fn from(err: ParseError) -> Self {
        Error::with_source(ErrorKind::Parse, "parsing error", err)
    }
}

pub(crate) trait ResultExt<T> {
    fn context_kind(self, kind: ErrorKind, context: &str) -> Result<T>;
}

impl<T, E> ResultExt<T> for std::result::Result<T, E>
where
    E: Into<BoxError>,
{
    fn context_kind(self, kind: ErrorKind, context: &str) -> Result<T> {
        self.map_err(|e| Error::with_source(kind, context, e))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::error::Error as _;

    #[test]
    fn wrap_keeps_kind_and_chain() {
        let inner = Error::with_source(
            ErrorKind::Transfer,
            "download failed",
            TransferError::ShortRead { expected: 10, actual: 4 },
        );
        let outer = inner.wrap("unable to read file body");

        assert_eq!(outer.kind(), ErrorKind::Transfer);
        assert_eq!(outer.to_string(), "unable to read file body");

        let chain: Vec<String> = anyhow::Error::from(outer).chain().map(|e| e.to_string()).collect();
        assert_eq!(
            chain,
            vec![
                "unable to read file body".to_string(),
                "download failed".to_string(),
                "short read: expected 10 bytes, got 4".to_string(),
            ]
        );
    }

    #[test]
    fn anyhow_wrapped_transfer_error_is_recovered() {
        let err: anyhow::Error = TransferError::Status(StatusCode::BAD_GATEWAY).into();
        assert!(matches!(TransferError::from(err), TransferError::Status(StatusCode::BAD_GATEWAY)));

        let err = TransferError::from(anyhow::anyhow!("connection reset"));
        assert_eq!(err.to_string(), "connection reset");
    }

    #[test]
    fn parse_error_converts_with_source() {
        let err = Error::from(ParseError::Variant("huge".into()));
        assert_eq!(err.kind(), ErrorKind::Parse);
        assert_eq!(err.source().map(|s| s.to_string()).as_deref(), Some("unknown variant: huge"));
    }
}
