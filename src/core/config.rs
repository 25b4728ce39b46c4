use crate::errors::{AgentError, Result};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::path::{Path, PathBuf};
use std::time::Duration;

/// Label of the model menu entry picked when a request does not name one.
pub const DEFAULT_MODEL_LABEL: &str = "Newest and most advanced model";

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    pub browser: BrowserConfig,
    pub session: SessionConfig,
    pub selectors: SelectorConfig,
    pub timing: TimingConfig,
    pub timeouts: PhaseTimeouts,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct BrowserConfig {
    pub headless: bool,
    pub viewport: Viewport,
    pub user_agent: Option<String>,
    pub disable_images: bool,
    pub args: Vec<String>,
    /// Upper bound for a single engine action (one click, one wait).
    pub timeout_ms: u64,
    /// How often element waits re-check the page.
    pub poll_interval_ms: u64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct SessionConfig {
    /// Where the authenticated cookies/storage blob is kept between runs.
    pub state_path: PathBuf,
    pub resume_timeout_ms: u64,
    pub login_step_timeout_ms: u64,
    pub retry_attempts: u32,
    /// When false the chat is driven without logging in and nothing is persisted.
    pub require_login: bool,
}

/// Every CSS selector the workflow relies on. Selectors may end with
/// `:has-text("...")` to additionally filter on text content.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct SelectorConfig {
    pub input: String,
    pub prompt_area: String,
    pub login_button: String,
    pub email_input: String,
    pub email_continue: String,
    pub password_input: String,
    pub password_continue: String,
    pub menu_trigger: String,
    pub ephemeral_switch: String,
    pub model_option: String,
    pub attach_button: String,
    pub upload_menu_item: String,
    pub stop_generating: String,
    pub response: String,
    pub disabled: String,
    pub page_body: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct TimingConfig {
    pub quiescence_tick_ms: u64,
    pub quiescence_idle_ms: u64,
    pub quiescence_max_wait_ms: u64,
    pub settle_after_input_ms: u64,
    pub settle_before_capture_ms: u64,
}

/// Hard upper bound for each workflow phase.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct PhaseTimeouts {
    pub establish_session_ms: u64,
    pub configure_ms: u64,
    pub await_ready_ms: u64,
    pub submit_input_ms: u64,
    pub await_completion_ms: u64,
    /// Bound for each of the three completion sub-waits.
    pub response_stage_ms: u64,
    pub extract_ms: u64,
    pub capture_ms: u64,
    pub teardown_ms: u64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Viewport {
    pub width: u32,
    pub height: u32,
    pub device_scale_factor: f64,
}

/// Login identity handed to the session manager at call time.
#[derive(Clone, Serialize, Deserialize)]
pub struct Credentials {
    pub email: String,
    pub password: String,
}

impl Credentials {
    pub fn new(email: impl Into<String>, password: impl Into<String>) -> Self {
        Self {
            email: email.into(),
            password: password.into(),
        }
    }
}

impl fmt::Debug for Credentials {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Credentials")
            .field("email", &self.email)
            .field("password", &"<redacted>")
            .finish()
    }
}

impl Config {
    /// Load a JSON config file; missing fields fall back to defaults.
    pub fn from_file(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let raw = std::fs::read_to_string(path).map_err(|e| {
            AgentError::ConfigurationError(format!("cannot read {}: {}", path.display(), e))
        })?;
        let config: Config = serde_json::from_str(&raw)?;
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<()> {
        if self.timing.quiescence_tick_ms == 0 {
            return Err(AgentError::ConfigurationError(
                "timing.quiescence_tick_ms must be positive".to_string(),
            ));
        }
        if self.browser.poll_interval_ms == 0 {
            return Err(AgentError::ConfigurationError(
                "browser.poll_interval_ms must be positive".to_string(),
            ));
        }
        if self.selectors.input.trim().is_empty() {
            return Err(AgentError::ConfigurationError(
                "selectors.input must not be empty".to_string(),
            ));
        }
        Ok(())
    }

    /// Longest the session phase can legitimately take: a rejected resume
    /// followed by a full login, each allowed every navigation retry.
    pub fn session_budget(&self) -> Duration {
        let navigation = self.browser.action_timeout() * self.session.retry_attempts.max(1);
        self.session.resume_timeout()
            + navigation * 2
            + self.session.login_step_timeout() * LOGIN_WAITS
    }
}

/// Element waits in a fresh login: entry, email, continue, password,
/// continue and the chat input.
const LOGIN_WAITS: u32 = 6;

impl BrowserConfig {
    pub fn action_timeout(&self) -> Duration {
        Duration::from_millis(self.timeout_ms)
    }

    pub fn poll_interval(&self) -> Duration {
        Duration::from_millis(self.poll_interval_ms)
    }
}

impl SessionConfig {
    pub fn resume_timeout(&self) -> Duration {
        Duration::from_millis(self.resume_timeout_ms)
    }

    pub fn login_step_timeout(&self) -> Duration {
        Duration::from_millis(self.login_step_timeout_ms)
    }
}

impl SelectorConfig {
    /// Selector for the model menu entry carrying `label`.
    pub fn model_entry(&self, label: &str) -> String {
        format!("{}:has-text(\"{}\")", self.model_option, label.replace('"', "\\\""))
    }
}

impl TimingConfig {
    pub fn quiescence_tick(&self) -> Duration {
        Duration::from_millis(self.quiescence_tick_ms)
    }

    pub fn quiescence_idle(&self) -> Duration {
        Duration::from_millis(self.quiescence_idle_ms)
    }

    pub fn quiescence_max_wait(&self) -> Duration {
        Duration::from_millis(self.quiescence_max_wait_ms)
    }

    pub fn settle_after_input(&self) -> Duration {
        Duration::from_millis(self.settle_after_input_ms)
    }

    pub fn settle_before_capture(&self) -> Duration {
        Duration::from_millis(self.settle_before_capture_ms)
    }
}

impl PhaseTimeouts {
    pub fn establish_session(&self) -> Duration {
        Duration::from_millis(self.establish_session_ms)
    }

    pub fn configure(&self) -> Duration {
        Duration::from_millis(self.configure_ms)
    }

    pub fn await_ready(&self) -> Duration {
        Duration::from_millis(self.await_ready_ms)
    }

    pub fn submit_input(&self) -> Duration {
        Duration::from_millis(self.submit_input_ms)
    }

    pub fn await_completion(&self) -> Duration {
        Duration::from_millis(self.await_completion_ms)
    }

    pub fn response_stage(&self) -> Duration {
        Duration::from_millis(self.response_stage_ms)
    }

    pub fn extract(&self) -> Duration {
        Duration::from_millis(self.extract_ms)
    }

    pub fn capture(&self) -> Duration {
        Duration::from_millis(self.capture_ms)
    }

    pub fn teardown(&self) -> Duration {
        Duration::from_millis(self.teardown_ms)
    }
}

impl Default for BrowserConfig {
    fn default() -> Self {
        Self {
            headless: true,
            viewport: Viewport::default(),
            user_agent: None,
            disable_images: false,
            args: vec![],
            timeout_ms: 30000,
            poll_interval_ms: 100,
        }
    }
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            state_path: PathBuf::from("auth_state.json"),
            resume_timeout_ms: 5000,
            login_step_timeout_ms: 30000,
            retry_attempts: 3,
            require_login: true,
        }
    }
}

impl Default for SelectorConfig {
    fn default() -> Self {
        Self {
            input: r#"textarea[placeholder="Message ChatGPT"]"#.to_string(),
            prompt_area: "#prompt-textarea".to_string(),
            login_button: r#"[data-testid="login-button"]"#.to_string(),
            email_input: "#email-input.email-input".to_string(),
            email_continue: r#".continue-btn:has-text("Continue")"#.to_string(),
            password_input: "#password".to_string(),
            password_continue: r#"._button-login-password:has-text("Continue")"#.to_string(),
            menu_trigger: r#"div[type="button"][aria-haspopup="menu"]"#.to_string(),
            ephemeral_switch: r#"button[role="switch"]"#.to_string(),
            model_option: "div".to_string(),
            attach_button: r#"input[type="file"][multiple][style*="display: none"] + button ~ button"#
                .to_string(),
            upload_menu_item: r#"div[role="menu"] > :last-child"#.to_string(),
            stop_generating: r#"button[aria-label="Stop generating"]"#.to_string(),
            response: "div.text-message div.markdown".to_string(),
            disabled: ":disabled".to_string(),
            page_body: "body".to_string(),
        }
    }
}

impl Default for TimingConfig {
    fn default() -> Self {
        Self {
            quiescence_tick_ms: 500,
            quiescence_idle_ms: 2500,
            quiescence_max_wait_ms: 30000,
            settle_after_input_ms: 1000,
            settle_before_capture_ms: 2000,
        }
    }
}

impl Default for PhaseTimeouts {
    fn default() -> Self {
        Self {
            establish_session_ms: 420_000,
            configure_ms: 30_000,
            await_ready_ms: 60_000,
            submit_input_ms: 90_000,
            await_completion_ms: 600_000,
            response_stage_ms: 180_000,
            extract_ms: 10_000,
            capture_ms: 30_000,
            teardown_ms: 10_000,
        }
    }
}

impl Default for Viewport {
    fn default() -> Self {
        Self {
            width: 1280,
            height: 720,
            device_scale_factor: 1.0,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn partial_json_falls_back_to_defaults() {
        let config: Config = serde_json::from_str(
            r#"{ "browser": { "headless": false }, "session": { "retry_attempts": 1 } }"#,
        )
        .unwrap();

        assert!(!config.browser.headless);
        assert_eq!(config.browser.timeout_ms, 30000);
        assert_eq!(config.session.retry_attempts, 1);
        assert_eq!(config.session.state_path, PathBuf::from("auth_state.json"));
        assert_eq!(config.timing.quiescence_idle_ms, 2500);
    }

    #[test]
    fn zero_tick_is_rejected() {
        let mut config = Config::default();
        config.timing.quiescence_tick_ms = 0;
        assert!(matches!(
            config.validate(),
            Err(AgentError::ConfigurationError(_))
        ));
    }

    #[test]
    fn model_entry_filters_on_label() {
        let selectors = SelectorConfig::default();
        assert_eq!(
            selectors.model_entry("GPT-4o"),
            r#"div:has-text("GPT-4o")"#
        );
    }

    #[test]
    fn credentials_debug_hides_password() {
        let creds = Credentials::new("user@example.test", "hunter2");
        let rendered = format!("{:?}", creds);
        assert!(rendered.contains("user@example.test"));
        assert!(!rendered.contains("hunter2"));
    }

    #[test]
    fn poll_interval_belongs_to_the_browser() {
        let config: Config =
            serde_json::from_str(r#"{ "browser": { "poll_interval_ms": 250 } }"#).unwrap();
        assert_eq!(config.browser.poll_interval(), Duration::from_millis(250));

        let mut config = Config::default();
        config.browser.poll_interval_ms = 0;
        assert!(matches!(
            config.validate(),
            Err(AgentError::ConfigurationError(_))
        ));
    }

    #[test]
    fn default_session_limit_covers_resume_and_login() {
        let config = Config::default();
        // 5 s resume + 2 x 3 x 30 s navigation + 6 x 30 s login steps
        assert_eq!(config.session_budget(), Duration::from_secs(365));
        assert!(config.timeouts.establish_session() >= config.session_budget());
    }
}
