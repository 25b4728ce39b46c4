use crate::core::{
    BrowserFactory, BrowserTrait, Config, Credentials, SessionConfig, Target, WaitState,
};
use crate::errors::{AgentError, Result};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::time::Duration;
use tracing::{debug, info, warn};

/// Cookies and storage of an authenticated context, as written to the
/// state file by engines that serialize sessions themselves.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PersistedState {
    /// Origin the storage belongs to, e.g. `https://chat.example`
    pub origin: String,
    pub cookies: Vec<CookieData>,
    #[serde(default)]
    pub local_storage: HashMap<String, String>,
    pub saved_at: DateTime<Utc>,
}

/// One cookie with the attributes needed to restore it, HttpOnly included.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CookieData {
    pub name: String,
    pub value: String,
    pub domain: String,
    #[serde(default = "root_path")]
    pub path: String,
    #[serde(default)]
    pub secure: bool,
    #[serde(default)]
    pub http_only: bool,
    /// Seconds since the epoch; absent or negative for session cookies
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub expires: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub same_site: Option<String>,
}

fn root_path() -> String {
    "/".to_string()
}

impl PersistedState {
    pub async fn load(path: &Path) -> Result<Self> {
        let raw = tokio::fs::read_to_string(path).await?;
        Ok(serde_json::from_str(&raw)?)
    }

    pub async fn save(&self, path: &Path) -> Result<()> {
        let raw = serde_json::to_string_pretty(self)?;
        tokio::fs::write(path, raw).await?;
        Ok(())
    }
}

/// How the live session behind a [`Session`] came to be.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SessionOrigin {
    /// Persisted state was accepted by the site
    Resumed,
    /// Fresh credential login
    Authenticated,
    /// Login disabled by configuration
    Anonymous,
}

/// A launched browser plus the tab that reached the chat input.
pub struct Session<B: BrowserTrait> {
    id: String,
    browser: B,
    tab: Option<B::TabHandle>,
    origin: SessionOrigin,
    persisted_state_path: Option<PathBuf>,
}

impl<B: BrowserTrait> Session<B> {
    fn new(id: &str, browser: B, tab: B::TabHandle, origin: SessionOrigin) -> Self {
        Self {
            id: id.to_string(),
            browser,
            tab: Some(tab),
            origin,
            persisted_state_path: None,
        }
    }

    pub fn id(&self) -> &str {
        &self.id
    }

    pub fn browser(&self) -> &B {
        &self.browser
    }

    pub fn tab(&self) -> Result<&B::TabHandle> {
        self.tab.as_ref().ok_or(AgentError::NoActiveTab)
    }

    pub fn origin(&self) -> SessionOrigin {
        self.origin
    }

    pub fn is_authenticated(&self) -> bool {
        self.origin != SessionOrigin::Anonymous
    }

    /// State file this session was resumed from or saved to.
    pub fn persisted_state_path(&self) -> Option<&Path> {
        self.persisted_state_path.as_deref()
    }

    /// Close the tab, then the browser. Both are attempted; the first
    /// failure is returned.
    pub async fn close(mut self) -> Result<()> {
        let tab_result = match self.tab.take() {
            Some(tab) => self.browser.close_tab(tab).await,
            None => Ok(()),
        };
        let browser_result = self.browser.close().await;
        debug!(session_id = %self.id, "session closed");
        tab_result.and(browser_result)
    }
}

/// Produces a [`Session`] whose tab shows the chat input, reusing persisted
/// state when the site still accepts it.
pub struct SessionManager<'a, F: BrowserFactory> {
    factory: &'a F,
    config: &'a Config,
    credentials: Option<&'a Credentials>,
}

impl<'a, F: BrowserFactory> SessionManager<'a, F> {
    pub fn new(factory: &'a F, config: &'a Config, credentials: Option<&'a Credentials>) -> Self {
        Self {
            factory,
            config,
            credentials,
        }
    }

    fn settings(&self) -> &SessionConfig {
        &self.config.session
    }

    pub async fn obtain(&self, url: &str, session_id: &str) -> Result<Session<F::Browser>> {
        if !self.settings().require_login {
            let session = self.anonymous(url, session_id).await?;
            info!("anonymous session ready");
            return Ok(session);
        }

        let state_path = self.settings().state_path.as_path();
        if state_path.exists() {
            match self.resume(url, session_id, state_path).await {
                Ok(session) => {
                    info!(path = %state_path.display(), "resumed persisted session");
                    return Ok(session);
                }
                Err(err) => {
                    warn!(
                        path = %state_path.display(),
                        error = %err,
                        "persisted session rejected; logging in again"
                    );
                }
            }
        } else {
            debug!(path = %state_path.display(), "no persisted session");
        }

        let mut session = self.login(url, session_id).await.map_err(|err| match err {
            AgentError::AuthenticationFailed(_) => err,
            other => AgentError::AuthenticationFailed(other.to_string()),
        })?;

        let persisted = session
            .browser()
            .persist_state(session.tab()?, state_path)
            .await;
        match persisted {
            Ok(()) => {
                info!(path = %state_path.display(), "persisted session state");
                session.persisted_state_path = Some(state_path.to_path_buf());
            }
            Err(err) => warn!(error = %err, "could not persist session state"),
        }

        Ok(session)
    }

    async fn anonymous(&self, url: &str, session_id: &str) -> Result<Session<F::Browser>> {
        let session = self.open(session_id, None, SessionOrigin::Anonymous).await?;
        let wait = self.config.browser.action_timeout();
        match self.reach_input(&session, url, wait).await {
            Ok(()) => Ok(session),
            Err(err) => Err(close_after(session, err).await),
        }
    }

    async fn resume(
        &self,
        url: &str,
        session_id: &str,
        state_path: &Path,
    ) -> Result<Session<F::Browser>> {
        let mut session = self
            .open(session_id, Some(state_path), SessionOrigin::Resumed)
            .await?;
        session.persisted_state_path = Some(state_path.to_path_buf());
        let wait = self.settings().resume_timeout();
        match self.reach_input(&session, url, wait).await {
            Ok(()) => Ok(session),
            Err(err) => Err(close_after(session, err).await),
        }
    }

    async fn login(&self, url: &str, session_id: &str) -> Result<Session<F::Browser>> {
        let credentials = self.credentials.ok_or_else(|| {
            AgentError::AuthenticationFailed("no credentials available for login".to_string())
        })?;

        let session = self
            .open(session_id, None, SessionOrigin::Authenticated)
            .await?;
        match self.submit_credentials(&session, url, credentials).await {
            Ok(()) => {
                info!(email = %credentials.email, "logged in");
                Ok(session)
            }
            Err(err) => Err(close_after(session, err).await),
        }
    }

    async fn submit_credentials(
        &self,
        session: &Session<F::Browser>,
        url: &str,
        credentials: &Credentials,
    ) -> Result<()> {
        let browser = session.browser();
        let tab = session.tab()?;
        let selectors = &self.config.selectors;
        let step = self.settings().login_step_timeout();

        self.navigate_with_retry(browser, tab, url).await?;

        click_when_visible(browser, tab, &selectors.login_button, step).await?;

        browser
            .wait_for_selector(tab, &selectors.email_input, WaitState::Visible, step)
            .await?;
        browser
            .fill(tab, &selectors.email_input, &credentials.email)
            .await?;
        click_when_visible(browser, tab, &selectors.email_continue, step).await?;

        browser
            .wait_for_selector(tab, &selectors.password_input, WaitState::Visible, step)
            .await?;
        browser
            .fill(tab, &selectors.password_input, &credentials.password)
            .await?;
        click_when_visible(browser, tab, &selectors.password_continue, step).await?;

        browser
            .wait_for_selector(tab, &selectors.input, WaitState::Visible, step)
            .await
    }

    async fn open(
        &self,
        session_id: &str,
        persisted_state: Option<&Path>,
        origin: SessionOrigin,
    ) -> Result<Session<F::Browser>> {
        let mut browser = self.factory.create();
        browser.launch(&self.config.browser).await?;

        match browser.new_tab(persisted_state).await {
            Ok(tab) => Ok(Session::new(session_id, browser, tab, origin)),
            Err(err) => {
                if let Err(close_err) = browser.close().await {
                    warn!(error = %close_err, "failed to close browser after tab error");
                }
                Err(err)
            }
        }
    }

    async fn reach_input(
        &self,
        session: &Session<F::Browser>,
        url: &str,
        wait: Duration,
    ) -> Result<()> {
        let browser = session.browser();
        let tab = session.tab()?;
        self.navigate_with_retry(browser, tab, url).await?;
        browser
            .wait_for_selector(tab, &self.config.selectors.input, WaitState::Visible, wait)
            .await
    }

    async fn navigate_with_retry(
        &self,
        browser: &F::Browser,
        tab: &<F::Browser as BrowserTrait>::TabHandle,
        url: &str,
    ) -> Result<()> {
        let attempts = self.settings().retry_attempts.max(1);
        let mut last_error = None;

        for attempt in 1..=attempts {
            match browser.navigate(tab, url).await {
                Ok(()) => return Ok(()),
                Err(err) => {
                    warn!(attempt, attempts, error = %err, "navigation failed");
                    last_error = Some(err);
                }
            }
        }

        Err(last_error.unwrap_or_else(|| AgentError::NavigationFailed(url.to_string())))
    }
}

async fn click_when_visible<B: BrowserTrait>(
    browser: &B,
    tab: &B::TabHandle,
    selector: &str,
    timeout: Duration,
) -> Result<()> {
    browser
        .wait_for_selector(tab, selector, WaitState::Visible, timeout)
        .await?;
    browser
        .click(tab, &Target::Selector(selector.to_string()))
        .await
}

/// Close a session that failed to initialize and hand back the original error.
async fn close_after<B: BrowserTrait>(session: Session<B>, err: AgentError) -> AgentError {
    if let Err(close_err) = session.close().await {
        warn!(error = %close_err, "failed to close abandoned session");
    }
    err
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::{MockCall, MockElement, MockSite, TestHelper, MOCK_URL};

    #[tokio::test]
    async fn persisted_state_round_trips_through_disk() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("auth_state.json");
        let state = PersistedState {
            origin: "https://chat.example".to_string(),
            cookies: vec![CookieData {
                name: "sid".to_string(),
                value: "abc".to_string(),
                domain: "chat.example".to_string(),
                path: "/".to_string(),
                secure: true,
                http_only: true,
                expires: Some(1_900_000_000.0),
                same_site: Some("Lax".to_string()),
            }],
            local_storage: HashMap::from([("theme".to_string(), "dark".to_string())]),
            saved_at: Utc::now(),
        };

        state.save(&path).await.unwrap();
        assert_eq!(PersistedState::load(&path).await.unwrap(), state);
    }

    #[test]
    fn cookie_defaults_apply_to_sparse_entries() {
        let cookie: CookieData =
            serde_json::from_str(r#"{ "name": "sid", "value": "1", "domain": "x" }"#).unwrap();
        assert_eq!(cookie.path, "/");
        assert!(!cookie.secure);
        assert!(!cookie.http_only);
        assert_eq!(cookie.expires, None);
    }

    #[test]
    fn engine_cookie_records_keep_http_only_and_expiry() {
        let cookie: CookieData = serde_json::from_str(
            r#"{ "name": "__Secure-token", "value": "t", "domain": ".chat.example",
                 "path": "/", "expires": 1900000000.5, "size": 20, "httpOnly": true,
                 "secure": true, "session": false, "sameSite": "Lax", "priority": "Medium" }"#,
        )
        .unwrap();
        assert!(cookie.http_only);
        assert_eq!(cookie.expires, Some(1_900_000_000.5));
        assert_eq!(cookie.same_site.as_deref(), Some("Lax"));
    }

    #[tokio::test(start_paused = true)]
    async fn anonymous_session_skips_login() {
        let handle = TestHelper::chat_site().without_login().into_handle();
        let dir = tempfile::tempdir().unwrap();
        let mut config = TestHelper::config(&dir.path().join("state.json"));
        config.session.require_login = false;
        let factory = handle.factory();

        let session = SessionManager::new(&factory, &config, None)
            .obtain(MOCK_URL, "anon")
            .await
            .unwrap();

        assert_eq!(session.origin(), SessionOrigin::Anonymous);
        assert!(!session.is_authenticated());
        assert_eq!(handle.count(|c| matches!(c, MockCall::PersistState(_))), 0);
        session.close().await.unwrap();
        assert_eq!(handle.closes(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn missing_credentials_fail_without_launching() {
        let handle = TestHelper::chat_site().into_handle();
        let dir = tempfile::tempdir().unwrap();
        let config = TestHelper::config(&dir.path().join("state.json"));
        let factory = handle.factory();

        let err = SessionManager::new(&factory, &config, None)
            .obtain(MOCK_URL, "s1")
            .await
            .err()
            .unwrap();

        assert!(matches!(err, AgentError::AuthenticationFailed(_)));
        assert_eq!(handle.launches(), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn rejected_password_closes_the_browser() {
        let handle = TestHelper::chat_site().into_handle();
        let dir = tempfile::tempdir().unwrap();
        let config = TestHelper::config(&dir.path().join("state.json"));
        let factory = handle.factory();
        let wrong = Credentials::new("user@example.test", "nope");

        let err = SessionManager::new(&factory, &config, Some(&wrong))
            .obtain(MOCK_URL, "s1")
            .await
            .err()
            .unwrap();

        assert!(matches!(err, AgentError::AuthenticationFailed(_)));
        assert_eq!(handle.closes(), 1);
        assert!(!dir.path().join("state.json").exists());
    }

    #[tokio::test(start_paused = true)]
    async fn navigation_is_not_retried_on_success() {
        let handle = MockSite::blank()
            .with_app_page(vec![MockElement::new("body", "body").matching("body")])
            .into_handle();
        let dir = tempfile::tempdir().unwrap();
        let mut config = TestHelper::config(&dir.path().join("state.json"));
        config.session.require_login = false;
        config.selectors.input = "body".to_string();
        let factory = handle.factory();

        let session = SessionManager::new(&factory, &config, None)
            .obtain(MOCK_URL, "s1")
            .await
            .unwrap();

        assert_eq!(handle.navigations(), 1);
        session.close().await.unwrap();
    }

    fn anonymous_page(failing_navigations: u32) -> (crate::testing::MockHandle, Config) {
        let handle = MockSite::blank()
            .with_app_page(vec![MockElement::new("body", "body")])
            .with_failing_navigations(failing_navigations)
            .into_handle();
        let mut config = TestHelper::config(Path::new("unused-state.json"));
        config.session.require_login = false;
        config.session.retry_attempts = 3;
        config.selectors.input = "body".to_string();
        (handle, config)
    }

    #[tokio::test(start_paused = true)]
    async fn navigation_gives_up_after_configured_attempts() {
        let (handle, config) = anonymous_page(10);
        let factory = handle.factory();

        let err = SessionManager::new(&factory, &config, None)
            .obtain(MOCK_URL, "s1")
            .await
            .err()
            .unwrap();

        assert!(matches!(err, AgentError::NavigationFailed(_)));
        assert_eq!(handle.navigations(), 3);
        assert_eq!(handle.closes(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn transient_navigation_failures_are_retried() {
        let (handle, config) = anonymous_page(2);
        let factory = handle.factory();

        let session = SessionManager::new(&factory, &config, None)
            .obtain(MOCK_URL, "s1")
            .await
            .unwrap();

        assert_eq!(handle.navigations(), 3);
        session.close().await.unwrap();
    }
}
