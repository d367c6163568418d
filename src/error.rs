use thiserror::Error;

/// Stable machine-readable codes for errors surfaced by the SDK.
///
/// Evaluation-path failures are never reported through these codes; they
/// become evaluation reasons instead. These codes cover configuration and
/// lifecycle operations only.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ErrorCode {
    // Configuration errors
    ConfigMissingSdkKey,
    ConfigInvalidSdkKey,
    ConfigInvalidPollingInterval,

    // Lifecycle errors
    ClientAlreadyClosed,
    StoreCloseFailed,
    EventShutdownFailed,
    DataSourceCloseFailed,
}

impl ErrorCode {
    pub fn as_str(&self) -> &'static str {
        match self {
            ErrorCode::ConfigMissingSdkKey => "CONFIG_MISSING_SDK_KEY",
            ErrorCode::ConfigInvalidSdkKey => "CONFIG_INVALID_SDK_KEY",
            ErrorCode::ConfigInvalidPollingInterval => "CONFIG_INVALID_POLLING_INTERVAL",
            ErrorCode::ClientAlreadyClosed => "CLIENT_ALREADY_CLOSED",
            ErrorCode::StoreCloseFailed => "STORE_CLOSE_FAILED",
            ErrorCode::EventShutdownFailed => "EVENT_SHUTDOWN_FAILED",
            ErrorCode::DataSourceCloseFailed => "DATA_SOURCE_CLOSE_FAILED",
        }
    }

    pub fn is_config_error(&self) -> bool {
        matches!(
            self,
            ErrorCode::ConfigMissingSdkKey
                | ErrorCode::ConfigInvalidSdkKey
                | ErrorCode::ConfigInvalidPollingInterval
        )
    }
}

impl std::fmt::Display for ErrorCode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

#[derive(Error, Debug)]
#[error("[{code}] {message}")]
pub struct FlagKitError {
    pub code: ErrorCode,
    pub message: String,
    #[source]
    pub source: Option<Box<dyn std::error::Error + Send + Sync>>,
}

impl FlagKitError {
    pub fn new(code: ErrorCode, message: impl Into<String>) -> Self {
        Self {
            code,
            message: message.into(),
            source: None,
        }
    }

    pub fn with_source(
        code: ErrorCode,
        message: impl Into<String>,
        source: impl std::error::Error + Send + Sync + 'static,
    ) -> Self {
        Self {
            code,
            message: message.into(),
            source: Some(Box::new(source)),
        }
    }

    pub fn config_error(code: ErrorCode, message: impl Into<String>) -> Self {
        Self::new(code, message)
    }

    pub fn is_config_error(&self) -> bool {
        self.code.is_config_error()
    }
}

pub type Result<T> = std::result::Result<T, FlagKitError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_display_includes_code() {
        let error = FlagKitError::new(ErrorCode::ConfigMissingSdkKey, "SDK key is required");
        let displayed = format!("{}", error);
        assert!(displayed.contains("[CONFIG_MISSING_SDK_KEY]"));
        assert!(displayed.contains("SDK key is required"));
    }

    #[test]
    fn test_config_error_classification() {
        assert!(FlagKitError::new(ErrorCode::ConfigInvalidSdkKey, "bad key").is_config_error());
        assert!(!FlagKitError::new(ErrorCode::StoreCloseFailed, "boom").is_config_error());
    }

    #[test]
    fn test_with_source_preserves_chain() {
        let io = std::io::Error::new(std::io::ErrorKind::Other, "inner");
        let error = FlagKitError::with_source(ErrorCode::StoreCloseFailed, "close failed", io);
        assert!(error.source.is_some());
    }
}
