use thiserror::Error;

/// Unified error type for Tapline.
#[derive(Error, Debug)]
pub enum TaplineError {
    #[error("Config error: {0}")]
    Config(String),

    #[error("Pipeline already shut down")]
    Closed,

    #[error("Transport error: {0}")]
    Transport(String),

    #[error("Store error: {0}")]
    Store(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Serialization error: {0}")]
    Serde(#[from] serde_json::Error),
}

impl TaplineError {
    /// True for errors that prevent a component from ever reaching the
    /// running state (constructor failures).
    pub fn is_fatal(&self) -> bool {
        matches!(self, TaplineError::Config(_))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn config_errors_are_fatal() {
        assert!(TaplineError::Config("bad directory".into()).is_fatal());
        assert!(!TaplineError::Closed.is_fatal());
        assert!(!TaplineError::Store("insert failed".into()).is_fatal());
    }

    #[test]
    fn io_error_converts() {
        let io = std::io::Error::new(std::io::ErrorKind::PermissionDenied, "denied");
        let err: TaplineError = io.into();
        assert!(matches!(err, TaplineError::Io(_)));
    }

    #[test]
    fn closed_error_message_is_clear() {
        assert_eq!(TaplineError::Closed.to_string(), "Pipeline already shut down");
    }
}
