use crate::browser::SessionOrigin;
use crate::core::config::{PhaseTimeouts, DEFAULT_MODEL_LABEL};
use crate::errors::{AgentError, Result};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::path::{Path, PathBuf};
use thiserror::Error;

/// Per-chat settings applied before submitting.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ChatOptions {
    /// Desired state of the ephemeral-chat switch; `None` leaves it untouched.
    pub ephemeral: Option<bool>,
    /// Visible label of the model menu entry; `None` keeps the current model.
    pub model_label: Option<String>,
}

impl Default for ChatOptions {
    fn default() -> Self {
        Self {
            ephemeral: Some(true),
            model_label: Some(DEFAULT_MODEL_LABEL.to_string()),
        }
    }
}

impl ChatOptions {
    /// Leave the chat exactly as the site opens it.
    pub fn untouched() -> Self {
        Self {
            ephemeral: None,
            model_label: None,
        }
    }
}

/// One message-and-reply exchange.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct InteractionRequest {
    pub url: String,
    pub message: Option<String>,
    pub file_path: Option<PathBuf>,
    pub artifact_path: PathBuf,
    #[serde(default)]
    pub options: ChatOptions,
    #[serde(default)]
    pub timeouts: PhaseTimeouts,
}

impl InteractionRequest {
    pub fn new(url: impl Into<String>, artifact_path: impl Into<PathBuf>) -> Self {
        Self {
            url: url.into(),
            message: None,
            file_path: None,
            artifact_path: artifact_path.into(),
            options: ChatOptions::default(),
            timeouts: PhaseTimeouts::default(),
        }
    }

    pub fn with_message(mut self, message: impl Into<String>) -> Self {
        self.message = Some(message.into());
        self
    }

    pub fn with_file(mut self, path: impl Into<PathBuf>) -> Self {
        self.file_path = Some(path.into());
        self
    }

    pub fn with_options(mut self, options: ChatOptions) -> Self {
        self.options = options;
        self
    }

    pub fn with_timeouts(mut self, timeouts: PhaseTimeouts) -> Self {
        self.timeouts = timeouts;
        self
    }

    /// Message text, treating an empty string as absent.
    pub fn message(&self) -> Option<&str> {
        self.message.as_deref().filter(|message| !message.is_empty())
    }

    pub fn file_path(&self) -> Option<&Path> {
        self.file_path.as_deref()
    }

    pub fn has_input(&self) -> bool {
        self.message().is_some() || self.file_path.is_some()
    }

    /// Checks that need no browser: some input is present and the URL parses.
    pub fn validate(&self) -> Result<()> {
        if !self.has_input() {
            return Err(AgentError::NoInputProvided);
        }
        url::Url::parse(&self.url)?;
        Ok(())
    }
}

/// Ordered steps of an interaction.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Phase {
    Validate,
    EstablishSession,
    Configure,
    AwaitReady,
    SubmitInput,
    AwaitCompletion,
    Extract,
    Capture,
    Teardown,
}

impl Phase {
    pub fn as_str(&self) -> &'static str {
        match self {
            Phase::Validate => "validate",
            Phase::EstablishSession => "establish_session",
            Phase::Configure => "configure",
            Phase::AwaitReady => "await_ready",
            Phase::SubmitInput => "submit_input",
            Phase::AwaitCompletion => "await_completion",
            Phase::Extract => "extract",
            Phase::Capture => "capture",
            Phase::Teardown => "teardown",
        }
    }
}

impl fmt::Display for Phase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// The phase an interaction stopped in, and why.
#[derive(Debug, Error)]
#[error("phase {phase} failed: {error}")]
pub struct PhaseFailure {
    pub phase: Phase,
    #[source]
    pub error: AgentError,
}

impl PhaseFailure {
    pub fn new(phase: Phase, error: AgentError) -> Self {
        Self { phase, error }
    }
}

#[derive(Debug)]
pub struct InteractionReply {
    pub session_id: String,
    pub origin: SessionOrigin,
    pub text: String,
    /// Screenshot outcome; a failed capture does not discard the text.
    pub artifact: std::result::Result<PathBuf, PhaseFailure>,
    pub completed_at: DateTime<Utc>,
}

#[derive(Debug)]
pub enum InteractionResult {
    Completed(InteractionReply),
    Failed(PhaseFailure),
}

impl InteractionResult {
    pub fn is_success(&self) -> bool {
        matches!(self, InteractionResult::Completed(_))
    }

    pub fn reply(&self) -> Option<&InteractionReply> {
        match self {
            InteractionResult::Completed(reply) => Some(reply),
            InteractionResult::Failed(_) => None,
        }
    }

    pub fn text(&self) -> Option<&str> {
        self.reply().map(|reply| reply.text.as_str())
    }

    pub fn artifact_path(&self) -> Option<&Path> {
        self.reply()
            .and_then(|reply| reply.artifact.as_ref().ok())
            .map(PathBuf::as_path)
    }

    pub fn failure(&self) -> Option<&PhaseFailure> {
        match self {
            InteractionResult::Completed(_) => None,
            InteractionResult::Failed(failure) => Some(failure),
        }
    }

    pub fn into_result(self) -> std::result::Result<InteractionReply, PhaseFailure> {
        match self {
            InteractionResult::Completed(reply) => Ok(reply),
            InteractionResult::Failed(failure) => Err(failure),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn empty_message_counts_as_missing_input() {
        let request = InteractionRequest::new("https://chat.example", "out.png").with_message("");
        assert!(!request.has_input());
        assert!(matches!(request.validate(), Err(AgentError::NoInputProvided)));
    }

    #[test]
    fn file_alone_is_enough() {
        let request = InteractionRequest::new("https://chat.example", "out.png").with_file("a.pdf");
        tokio_test::assert_ok!(request.validate());
    }

    #[test]
    fn malformed_url_is_rejected() {
        let request = InteractionRequest::new("chat example", "out.png").with_message("hi");
        let err = tokio_test::assert_err!(request.validate());
        assert!(matches!(err, AgentError::InvalidRequest(_)));
    }

    #[test]
    fn failure_names_the_phase() {
        let failure = PhaseFailure::new(
            Phase::SubmitInput,
            AgentError::SubmissionFailed("no control enabled".into()),
        );
        assert_eq!(
            failure.to_string(),
            "phase submit_input failed: Submission failed: no control enabled"
        );
    }

    #[test]
    fn default_options_pick_ephemeral_and_newest_model() {
        let options = ChatOptions::default();
        assert_eq!(options.ephemeral, Some(true));
        assert_eq!(options.model_label.as_deref(), Some(DEFAULT_MODEL_LABEL));
        assert_eq!(ChatOptions::untouched().ephemeral, None);
    }
}
