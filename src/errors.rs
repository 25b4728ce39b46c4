use thiserror::Error;

#[derive(Error, Debug)]
pub enum AgentError {
    #[error("Authentication failed: {0}")]
    AuthenticationFailed(String),

    #[error("Submission failed: {0}")]
    SubmissionFailed(String),

    #[error("Response timeout while waiting for {stage} ({timeout_ms} ms)")]
    ResponseTimeout { stage: String, timeout_ms: u64 },

    #[error("Network did not stabilize within {elapsed_ms} ms")]
    TimedOut { elapsed_ms: u64 },

    #[error("No input of file or message")]
    NoInputProvided,

    #[error("Interaction cancelled")]
    Cancelled,

    #[error("Browser launch failed: {0}")]
    LaunchFailed(String),

    #[error("Browser not launched")]
    BrowserNotLaunched,

    #[error("Tab creation failed: {0}")]
    TabCreationFailed(String),

    #[error("No active tab")]
    NoActiveTab,

    #[error("Navigation failed: {0}")]
    NavigationFailed(String),

    #[error("Element not found: {0}")]
    ElementNotFound(String),

    #[error("JavaScript execution failed: {0}")]
    JavaScriptFailed(String),

    #[error("Screenshot failed: {0}")]
    ScreenshotFailed(String),

    #[error("Timeout error: {0}")]
    TimeoutError(String),

    #[error("Chrome error: {0}")]
    ChromeError(String),

    #[error("Invalid request: {0}")]
    InvalidRequest(String),

    #[error("Configuration error: {0}")]
    ConfigurationError(String),

    #[error("Serialization error: {0}")]
    SerializationError(#[from] serde_json::Error),

    #[error("IO error: {0}")]
    IoError(#[from] std::io::Error),

    #[error("Anyhow error: {0}")]
    AnyhowError(String),
}

pub type Result<T> = std::result::Result<T, AgentError>;

// Convert anyhow::Error to AgentError
impl From<anyhow::Error> for AgentError {
    fn from(err: anyhow::Error) -> Self {
        AgentError::AnyhowError(err.to_string())
    }
}

impl From<url::ParseError> for AgentError {
    fn from(err: url::ParseError) -> Self {
        AgentError::InvalidRequest(err.to_string())
    }
}

impl AgentError {
    /// Failures raised by the automation engine itself rather than by the
    /// interaction logic layered on top of it.
    pub fn is_engine_error(&self) -> bool {
        matches!(
            self,
            AgentError::LaunchFailed(_)
                | AgentError::BrowserNotLaunched
                | AgentError::TabCreationFailed(_)
                | AgentError::NoActiveTab
                | AgentError::NavigationFailed(_)
                | AgentError::ElementNotFound(_)
                | AgentError::JavaScriptFailed(_)
                | AgentError::ScreenshotFailed(_)
                | AgentError::TimeoutError(_)
                | AgentError::ChromeError(_)
        )
    }

    pub fn is_timeout(&self) -> bool {
        matches!(
            self,
            AgentError::TimeoutError(_)
                | AgentError::TimedOut { .. }
                | AgentError::ResponseTimeout { .. }
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn engine_errors_are_classified() {
        assert!(AgentError::ElementNotFound("#x".into()).is_engine_error());
        assert!(AgentError::TimeoutError("wait".into()).is_engine_error());
        assert!(!AgentError::NoInputProvided.is_engine_error());
        assert!(!AgentError::SubmissionFailed("none".into()).is_engine_error());
    }

    #[test]
    fn response_timeout_names_the_stage() {
        let err = AgentError::ResponseTimeout {
            stage: "response container".into(),
            timeout_ms: 1500,
        };
        assert_eq!(
            err.to_string(),
            "Response timeout while waiting for response container (1500 ms)"
        );
        assert!(err.is_timeout());
    }

    #[test]
    fn url_errors_become_invalid_requests() {
        let err: AgentError = url::Url::parse("not a url").unwrap_err().into();
        assert!(matches!(err, AgentError::InvalidRequest(_)));
    }
}
