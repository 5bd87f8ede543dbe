use serde::Serialize;
use std::fmt;

/// Error raised by any stage of acquiring a single request.
///
/// Per-request errors end up in that request's [`crate::request::TransferResult`];
/// only `Config` is fatal to a whole batch.
#[derive(Debug, Clone, thiserror::Error)]
pub enum FetchError {
    #[error("unsupported or malformed URL: {0}")]
    Classification(String),

    #[error("cannot resolve request: {0}")]
    Resolution(String),

    #[error("not found: {0}")]
    NotFound(String),

    #[error("requires early access: {link}")]
    RestrictedAccess { link: String },

    #[error("network failure: {0}")]
    Network(String),

    #[error("{program} exited with status {code:?}: {message}")]
    Process {
        program: String,
        code: Option<i32>,
        message: String,
    },

    #[error("archive extraction failed: {0}")]
    Archive(String),

    /// Local filesystem failure outside a tool run or an extraction.
    #[error("I/O error: {0}")]
    Io(String),

    #[error("integrity check failed: {0}")]
    Integrity(String),

    #[error("cancelled")]
    Cancelled,

    #[error("configuration error: {0}")]
    Config(String),
}

impl From<reqwest::Error> for FetchError {
    fn from(err: reqwest::Error) -> Self {
        FetchError::Network(err.to_string())
    }
}

impl From<std::io::Error> for FetchError {
    fn from(err: std::io::Error) -> Self {
        FetchError::Io(err.to_string())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorCode {
    Classification,
    Resolution,
    RestrictedAccess,
    Network,
    Process,
    Archive,
    Io,
    Integrity,
    Cancelled,
    Config,
}

impl fmt::Display for ErrorCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            ErrorCode::Classification => "classification",
            ErrorCode::Resolution => "resolution",
            ErrorCode::RestrictedAccess => "restricted_access",
            ErrorCode::Network => "network",
            ErrorCode::Process => "process",
            ErrorCode::Archive => "archive",
            ErrorCode::Io => "io",
            ErrorCode::Integrity => "integrity",
            ErrorCode::Cancelled => "cancelled",
            ErrorCode::Config => "config",
        };
        f.write_str(name)
    }
}

/// Serializable error attached to a failed transfer.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ErrorInfo {
    pub code: ErrorCode,
    pub message: String,
}

impl From<&FetchError> for ErrorInfo {
    fn from(err: &FetchError) -> Self {
        let code = match err {
            FetchError::Classification(_) => ErrorCode::Classification,
            // A missing version is a semantic failure, reported like any other
            // unresolvable request.
            FetchError::Resolution(_) | FetchError::NotFound(_) => ErrorCode::Resolution,
            FetchError::RestrictedAccess { .. } => ErrorCode::RestrictedAccess,
            FetchError::Network(_) => ErrorCode::Network,
            FetchError::Process { .. } => ErrorCode::Process,
            FetchError::Archive(_) => ErrorCode::Archive,
            FetchError::Io(_) => ErrorCode::Io,
            FetchError::Integrity(_) => ErrorCode::Integrity,
            FetchError::Cancelled => ErrorCode::Cancelled,
            FetchError::Config(_) => ErrorCode::Config,
        };
        ErrorInfo {
            code,
            message: err.to_string(),
        }
    }
}

impl From<FetchError> for ErrorInfo {
    fn from(err: FetchError) -> Self {
        ErrorInfo::from(&err)
    }
}

impl fmt::Display for ErrorInfo {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "[{}] {}", self.code, self.message)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn not_found_is_reported_as_resolution() {
        let info = ErrorInfo::from(FetchError::NotFound("version 42".into()));
        assert_eq!(info.code, ErrorCode::Resolution);
        assert!(info.message.contains("version 42"));
    }

    #[test]
    fn restricted_access_keeps_link_in_message() {
        let info = ErrorInfo::from(FetchError::RestrictedAccess {
            link: "https://civitai.com/models/1?modelVersionId=2".into(),
        });
        assert_eq!(info.code, ErrorCode::RestrictedAccess);
        assert!(info.message.contains("modelVersionId=2"));
        assert_eq!(info.to_string().split(']').next(), Some("[restricted_access"));
    }

    #[test]
    fn filesystem_errors_are_not_tool_failures() {
        let err = FetchError::from(std::io::Error::new(std::io::ErrorKind::PermissionDenied, "read-only"));
        assert!(matches!(err, FetchError::Io(_)));
        let info = ErrorInfo::from(&err);
        assert_eq!(info.code, ErrorCode::Io);
        assert_eq!(info.to_string(), "[io] I/O error: read-only");
    }
}
