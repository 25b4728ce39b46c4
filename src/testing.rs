//! Scripted in-memory engine for exercising the interaction core without a
//! real browser.
//!
//! A [`MockSite`] describes two pages (login and app) as flat element lists
//! plus rules that mutate the DOM when an element is clicked, an input is
//! filled or files are attached. Every adapter call is recorded as a
//! [`MockCall`]. Timers use `tokio::time`, so tests can run with a paused
//! clock.

use crate::core::config::{BrowserConfig, Credentials, SelectorConfig, DEFAULT_MODEL_LABEL};
use crate::core::{BrowserTrait, ElementRef, FileChooser, NetworkEvent, Target, WaitState};
use crate::errors::{AgentError, Result};
use async_trait::async_trait;
use std::collections::{BTreeMap, HashMap};
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;
use tokio::time::Instant;

pub const MOCK_URL: &str = "https://example-chat.test";
pub const MOCK_SESSION_TOKEN: &str = "mock-session-token";
pub const FILE_INPUT_SELECTOR: &str = "input[type=\"file\"]";
/// Bytes written by the mock screenshot.
pub const PNG_SIGNATURE: &[u8] = b"\x89PNG\r\n\x1a\n";

#[derive(Debug, Clone)]
pub struct MockElement {
    pub id: String,
    pub tag: String,
    /// Stands in for the engine's structural path; rules may move it.
    pub locator: String,
    pub selectors: Vec<String>,
    pub attributes: BTreeMap<String, String>,
    pub attached: bool,
    pub visible: bool,
    pub disabled: bool,
    pub inner_html: String,
}

impl MockElement {
    pub fn new(id: impl Into<String>, tag: impl Into<String>) -> Self {
        let id = id.into();
        Self {
            locator: format!("mock:{}", id),
            id,
            tag: tag.into(),
            selectors: Vec::new(),
            attributes: BTreeMap::new(),
            attached: true,
            visible: true,
            disabled: false,
            inner_html: String::new(),
        }
    }

    pub fn matching(mut self, selector: &str) -> Self {
        self.selectors.push(selector.to_string());
        self
    }

    pub fn attr(mut self, name: &str, value: &str) -> Self {
        self.attributes.insert(name.to_string(), value.to_string());
        self
    }

    pub fn disabled(mut self) -> Self {
        self.disabled = true;
        self
    }

    /// Attached but not rendered.
    pub fn hidden(mut self) -> Self {
        self.visible = false;
        self
    }

    /// Not in the DOM until a rule shows it.
    pub fn absent(mut self) -> Self {
        self.attached = false;
        self
    }

    pub fn html(mut self, html: &str) -> Self {
        self.inner_html = html.to_string();
        self
    }

    /// Exact selector strings, the bare tag name and `:disabled`.
    fn matches(&self, selector: &str) -> bool {
        if selector == ":disabled" {
            return self.disabled;
        }
        selector == self.tag || self.selectors.iter().any(|candidate| candidate == selector)
    }

    fn to_ref(&self) -> ElementRef {
        ElementRef {
            tag: self.tag.clone(),
            locator: self.locator.clone(),
            attributes: self.attributes.clone(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum MockAction {
    Show(String),
    Hide(String),
    Enable(String),
    Disable(String),
    SetAttribute {
        id: String,
        name: String,
        value: String,
    },
    /// Flip `aria-checked` between "true" and "false".
    Toggle(String),
    /// Give the element a new locator, as a sibling insertion would.
    Relocate { id: String, locator: String },
    /// Run the action once the delay has elapsed.
    Delay(Duration, Box<MockAction>),
    /// Check the filled login fields and swap in the app page on success.
    CompleteLogin,
}

impl MockAction {
    pub fn after(delay: Duration, action: MockAction) -> Self {
        MockAction::Delay(delay, Box::new(action))
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum MockTrigger {
    /// Click on the element with this mock id
    Click(String),
    /// Fill through this exact selector
    Fill(String),
    Files,
}

#[derive(Debug, Clone)]
pub struct MockRule {
    pub trigger: MockTrigger,
    pub actions: Vec<MockAction>,
}

impl MockRule {
    pub fn on_click(id: &str, actions: Vec<MockAction>) -> Self {
        Self {
            trigger: MockTrigger::Click(id.to_string()),
            actions,
        }
    }

    pub fn on_fill(selector: &str, actions: Vec<MockAction>) -> Self {
        Self {
            trigger: MockTrigger::Fill(selector.to_string()),
            actions,
        }
    }

    pub fn on_files(actions: Vec<MockAction>) -> Self {
        Self {
            trigger: MockTrigger::Files,
            actions,
        }
    }
}

/// Request lifecycle events a tab emits once observed, relative to the
/// moment observation started.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum NetworkScript {
    Silent,
    Periodic { every: Duration },
    Scripted(Vec<(Duration, NetworkEvent)>),
}

impl NetworkScript {
    fn events_between(&self, from: Duration, to: Duration) -> Vec<NetworkEvent> {
        match self {
            NetworkScript::Silent => Vec::new(),
            NetworkScript::Periodic { every } => {
                let every_ms = every.as_millis().max(1);
                let first = from.as_millis() / every_ms + 1;
                let last = to.as_millis() / every_ms;
                (first..=last)
                    .flat_map(|_| [NetworkEvent::RequestStarted, NetworkEvent::RequestFinished])
                    .collect()
            }
            NetworkScript::Scripted(events) => events
                .iter()
                .filter(|(at, _)| *at > from && *at <= to)
                .map(|(_, event)| *event)
                .collect(),
        }
    }
}

#[derive(Debug, Clone)]
pub struct LoginExpectation {
    pub email_selector: String,
    pub password_selector: String,
    pub credentials: Credentials,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum MockCall {
    Launch,
    NewTab { seeded: bool },
    Navigate(String),
    QueryAll(String),
    Fill { selector: String, text: String },
    Click(String),
    WaitForSelector { selector: String, state: WaitState },
    GetAttribute { target: String, name: String },
    InnerHtml(String),
    Screenshot(PathBuf),
    PersistState(PathBuf),
    ExpectFileChooser(String),
    SetFiles(PathBuf),
    ObserveNetwork,
    DrainNetwork,
    CloseTab,
    Close,
}

/// Shared description of the simulated site plus the call log.
#[derive(Debug, Clone)]
pub struct MockSite {
    pub login_page: Vec<MockElement>,
    pub app_page: Vec<MockElement>,
    pub rules: Vec<MockRule>,
    pub require_login: bool,
    pub login: Option<LoginExpectation>,
    pub valid_state: String,
    pub network: NetworkScript,
    pub fail_screenshots: bool,
    /// Navigations that fail before one succeeds.
    pub failing_navigations: u32,
    calls: Vec<MockCall>,
}

impl MockSite {
    /// A site without login that renders an empty app page.
    pub fn blank() -> Self {
        Self {
            login_page: Vec::new(),
            app_page: Vec::new(),
            rules: Vec::new(),
            require_login: false,
            login: None,
            valid_state: MOCK_SESSION_TOKEN.to_string(),
            network: NetworkScript::Silent,
            fail_screenshots: false,
            failing_navigations: 0,
            calls: Vec::new(),
        }
    }

    /// Chat application behind a three-step login.
    ///
    /// After login the page shows the prompt, an always-disabled voice
    /// button and a send button that enables on input. Clicking send shows
    /// a "stop generating" indicator for `generation` and then renders the
    /// response container with `<p>pong</p>`.
    pub fn chat_app(selectors: &SelectorConfig, credentials: &Credentials) -> Self {
        Self::chat_app_with_generation(selectors, credentials, Duration::from_millis(1500))
    }

    pub fn chat_app_with_generation(
        selectors: &SelectorConfig,
        credentials: &Credentials,
        generation: Duration,
    ) -> Self {
        let login_page = vec![
            MockElement::new("login", "button").matching(&selectors.login_button),
            MockElement::new("email", "input")
                .matching(&selectors.email_input)
                .absent(),
            MockElement::new("email-continue", "button")
                .matching(&selectors.email_continue)
                .absent(),
            MockElement::new("password", "input")
                .matching(&selectors.password_input)
                .absent(),
            MockElement::new("password-continue", "button")
                .matching(&selectors.password_continue)
                .absent(),
        ];

        let app_page = vec![
            MockElement::new("prompt", "textarea")
                .matching(&selectors.input)
                .matching(&selectors.prompt_area),
            MockElement::new("menu", "div").matching(&selectors.menu_trigger),
            MockElement::new("switch", "button")
                .matching(&selectors.ephemeral_switch)
                .attr("role", "switch")
                .attr("aria-checked", "false")
                .absent(),
            MockElement::new("model", "div")
                .matching(&selectors.model_entry(DEFAULT_MODEL_LABEL))
                .absent(),
            MockElement::new("attach", "button").matching(&selectors.attach_button),
            MockElement::new("upload", "div")
                .matching(&selectors.upload_menu_item)
                .absent(),
            MockElement::new("file", "input")
                .matching(FILE_INPUT_SELECTOR)
                .hidden(),
            MockElement::new("voice", "button")
                .attr("aria-label", "Voice")
                .disabled(),
            MockElement::new("send", "button")
                .attr("class", "mb-1 mr-1")
                .disabled(),
            MockElement::new("stop", "button")
                .matching(&selectors.stop_generating)
                .absent(),
            MockElement::new("response", "div")
                .matching(&selectors.response)
                .html("<p>pong</p>")
                .absent(),
        ];

        let rules = vec![
            MockRule::on_click(
                "login",
                vec![
                    MockAction::Show("email".into()),
                    MockAction::Show("email-continue".into()),
                ],
            ),
            MockRule::on_click(
                "email-continue",
                vec![
                    MockAction::Show("password".into()),
                    MockAction::Show("password-continue".into()),
                ],
            ),
            MockRule::on_click("password-continue", vec![MockAction::CompleteLogin]),
            MockRule::on_click(
                "menu",
                vec![
                    MockAction::Show("switch".into()),
                    MockAction::Show("model".into()),
                ],
            ),
            MockRule::on_click("switch", vec![MockAction::Toggle("switch".into())]),
            MockRule::on_click(
                "model",
                vec![MockAction::Hide("model".into()), MockAction::Hide("switch".into())],
            ),
            MockRule::on_click("attach", vec![MockAction::Show("upload".into())]),
            MockRule::on_click("upload", vec![MockAction::Hide("upload".into())]),
            MockRule::on_fill(&selectors.input, vec![MockAction::Enable("send".into())]),
            MockRule::on_files(vec![MockAction::Enable("send".into())]),
            MockRule::on_click(
                "send",
                vec![
                    MockAction::Disable("send".into()),
                    MockAction::Show("stop".into()),
                    MockAction::after(generation, MockAction::Hide("stop".into())),
                    MockAction::after(generation, MockAction::Show("response".into())),
                ],
            ),
        ];

        Self {
            login_page,
            app_page,
            rules,
            require_login: true,
            login: Some(LoginExpectation {
                email_selector: selectors.email_input.clone(),
                password_selector: selectors.password_input.clone(),
                credentials: credentials.clone(),
            }),
            valid_state: MOCK_SESSION_TOKEN.to_string(),
            network: NetworkScript::Silent,
            fail_screenshots: false,
            failing_navigations: 0,
            calls: Vec::new(),
        }
    }

    pub fn with_app_page(mut self, elements: Vec<MockElement>) -> Self {
        self.app_page = elements;
        self
    }

    pub fn with_rule(mut self, rule: MockRule) -> Self {
        self.rules.push(rule);
        self
    }

    /// Drop every rule fired by `trigger`.
    pub fn without_rules_for(mut self, trigger: &MockTrigger) -> Self {
        self.rules.retain(|rule| &rule.trigger != trigger);
        self
    }

    pub fn with_network(mut self, network: NetworkScript) -> Self {
        self.network = network;
        self
    }

    pub fn without_login(mut self) -> Self {
        self.require_login = false;
        self
    }

    pub fn with_failing_screenshots(mut self) -> Self {
        self.fail_screenshots = true;
        self
    }

    pub fn with_failing_navigations(mut self, count: u32) -> Self {
        self.failing_navigations = count;
        self
    }

    pub fn into_handle(self) -> MockHandle {
        MockHandle {
            site: Arc::new(Mutex::new(self)),
        }
    }
}

/// Shared access to a site; hands out browsers that all drive the same site.
#[derive(Debug, Clone)]
pub struct MockHandle {
    site: Arc<Mutex<MockSite>>,
}

impl MockHandle {
    pub fn browser(&self) -> MockBrowser {
        MockBrowser {
            site: Arc::clone(&self.site),
            launched: false,
            poll_interval: BrowserConfig::default().poll_interval(),
        }
    }

    /// Factory for the session manager and workflow.
    pub fn factory(&self) -> impl Fn() -> MockBrowser + Send + Sync + 'static {
        let handle = self.clone();
        move || handle.browser()
    }

    pub fn calls(&self) -> Vec<MockCall> {
        lock(&self.site).calls.clone()
    }

    pub fn count(&self, predicate: impl Fn(&MockCall) -> bool) -> usize {
        lock(&self.site).calls.iter().filter(|call| predicate(call)).count()
    }

    pub fn clicks(&self) -> usize {
        self.count(|call| matches!(call, MockCall::Click(_)))
    }

    pub fn navigations(&self) -> usize {
        self.count(|call| matches!(call, MockCall::Navigate(_)))
    }

    pub fn launches(&self) -> usize {
        self.count(|call| matches!(call, MockCall::Launch))
    }

    pub fn closes(&self) -> usize {
        self.count(|call| matches!(call, MockCall::Close))
    }
}

#[derive(Debug)]
struct TabState {
    dom: Vec<MockElement>,
    authenticated: bool,
    scheduled: Vec<(Instant, MockAction)>,
    network_origin: Option<Instant>,
    network_cursor: Duration,
    filled: HashMap<String, String>,
}

/// Tab handle of the mock engine.
#[derive(Debug, Clone)]
pub struct MockTab {
    state: Arc<Mutex<TabState>>,
}

pub struct MockBrowser {
    site: Arc<Mutex<MockSite>>,
    launched: bool,
    poll_interval: Duration,
}

impl MockBrowser {
    pub fn new(site: MockSite) -> Self {
        site.into_handle().browser()
    }

    pub fn calls(&self) -> Vec<MockCall> {
        lock(&self.site).calls.clone()
    }

    fn record(&self, call: MockCall) {
        lock(&self.site).calls.push(call);
    }

    fn ensure_launched(&self) -> Result<()> {
        if self.launched {
            Ok(())
        } else {
            Err(AgentError::BrowserNotLaunched)
        }
    }

    fn run_rules(&self, tab: &MockTab, trigger: &MockTrigger) {
        let site = lock(&self.site);
        let mut state = lock(&tab.state);
        let actions: Vec<MockAction> = site
            .rules
            .iter()
            .filter(|rule| &rule.trigger == trigger)
            .flat_map(|rule| rule.actions.clone())
            .collect();
        for action in actions {
            apply(&site, &mut state, action);
        }
    }

    /// Run the closure against the tab after due scheduled actions fired.
    fn with_dom<T>(&self, tab: &MockTab, f: impl FnOnce(&mut TabState) -> T) -> T {
        let site = lock(&self.site);
        let mut state = lock(&tab.state);
        fire_due(&site, &mut state);
        f(&mut state)
    }

    fn resolve(&self, tab: &MockTab, target: &Target) -> Result<MockElement> {
        self.with_dom(tab, |state| {
            state
                .dom
                .iter()
                .find(|element| {
                    element.attached
                        && match target {
                            Target::Selector(selector) => element.matches(selector),
                            Target::Element(reference) => element.locator == reference.locator,
                        }
                })
                .cloned()
                .ok_or_else(|| AgentError::ElementNotFound(target.to_string()))
        })
    }
}

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}

fn fire_due(site: &MockSite, state: &mut TabState) {
    let now = Instant::now();
    let (due, pending): (Vec<_>, Vec<_>) = std::mem::take(&mut state.scheduled)
        .into_iter()
        .partition(|(at, _)| *at <= now);
    state.scheduled = pending;
    for (_, action) in due {
        apply(site, state, action);
    }
}

fn update(dom: &mut [MockElement], id: &str, f: impl FnOnce(&mut MockElement)) {
    if let Some(element) = dom.iter_mut().find(|element| element.id == id) {
        f(element);
    }
}

fn apply(site: &MockSite, state: &mut TabState, action: MockAction) {
    match action {
        MockAction::Show(id) => update(&mut state.dom, &id, |e| {
            e.attached = true;
            e.visible = true;
        }),
        MockAction::Hide(id) => update(&mut state.dom, &id, |e| e.attached = false),
        MockAction::Enable(id) => update(&mut state.dom, &id, |e| e.disabled = false),
        MockAction::Disable(id) => update(&mut state.dom, &id, |e| e.disabled = true),
        MockAction::SetAttribute { id, name, value } => update(&mut state.dom, &id, |e| {
            e.attributes.insert(name, value);
        }),
        MockAction::Toggle(id) => update(&mut state.dom, &id, |e| {
            let checked = e.attributes.get("aria-checked").map(String::as_str) == Some("true");
            e.attributes
                .insert("aria-checked".to_string(), (!checked).to_string());
        }),
        MockAction::Relocate { id, locator } => update(&mut state.dom, &id, |e| e.locator = locator),
        MockAction::Delay(delay, action) => {
            state.scheduled.push((Instant::now() + delay, *action));
        }
        MockAction::CompleteLogin => {
            let Some(login) = &site.login else {
                return;
            };
            let email = state.filled.get(&login.email_selector);
            let password = state.filled.get(&login.password_selector);
            if email == Some(&login.credentials.email)
                && password == Some(&login.credentials.password)
            {
                state.authenticated = true;
                state.dom = site.app_page.clone();
            }
        }
    }
}

#[async_trait]
impl BrowserTrait for MockBrowser {
    type TabHandle = MockTab;

    async fn launch(&mut self, config: &BrowserConfig) -> Result<()> {
        self.record(MockCall::Launch);
        self.launched = true;
        self.poll_interval = config.poll_interval();
        Ok(())
    }

    async fn new_tab(&self, persisted_state: Option<&Path>) -> Result<MockTab> {
        self.ensure_launched()?;
        self.record(MockCall::NewTab {
            seeded: persisted_state.is_some(),
        });

        let authenticated = match persisted_state {
            Some(path) => {
                let stored = std::fs::read_to_string(path)?;
                stored.trim() == lock(&self.site).valid_state
            }
            None => false,
        };

        Ok(MockTab {
            state: Arc::new(Mutex::new(TabState {
                dom: Vec::new(),
                authenticated,
                scheduled: Vec::new(),
                network_origin: None,
                network_cursor: Duration::ZERO,
                filled: HashMap::new(),
            })),
        })
    }

    async fn navigate(&self, tab: &MockTab, url: &str) -> Result<()> {
        self.ensure_launched()?;
        self.record(MockCall::Navigate(url.to_string()));
        let mut site = lock(&self.site);
        if site.failing_navigations > 0 {
            site.failing_navigations -= 1;
            return Err(AgentError::NavigationFailed(format!("{}: connection reset", url)));
        }
        let mut state = lock(&tab.state);
        state.scheduled.clear();
        state.dom = if state.authenticated || !site.require_login {
            site.app_page.clone()
        } else {
            site.login_page.clone()
        };
        Ok(())
    }

    async fn query_all(&self, tab: &MockTab, selector: &str) -> Result<Vec<ElementRef>> {
        self.record(MockCall::QueryAll(selector.to_string()));
        Ok(self.with_dom(tab, |state| {
            state
                .dom
                .iter()
                .filter(|element| element.attached && element.matches(selector))
                .map(MockElement::to_ref)
                .collect()
        }))
    }

    async fn fill(&self, tab: &MockTab, selector: &str, text: &str) -> Result<()> {
        self.record(MockCall::Fill {
            selector: selector.to_string(),
            text: text.to_string(),
        });
        self.resolve(tab, &Target::Selector(selector.to_string()))?;
        lock(&tab.state)
            .filled
            .insert(selector.to_string(), text.to_string());
        self.run_rules(tab, &MockTrigger::Fill(selector.to_string()));
        Ok(())
    }

    async fn click(&self, tab: &MockTab, target: &Target) -> Result<()> {
        self.record(MockCall::Click(target.to_string()));
        let element = self.resolve(tab, target)?;
        if element.disabled {
            return Err(AgentError::ElementNotFound(format!(
                "{} is disabled",
                target
            )));
        }
        self.run_rules(tab, &MockTrigger::Click(element.id));
        Ok(())
    }

    async fn wait_for_selector(
        &self,
        tab: &MockTab,
        selector: &str,
        state: WaitState,
        timeout: Duration,
    ) -> Result<()> {
        self.record(MockCall::WaitForSelector {
            selector: selector.to_string(),
            state,
        });
        let deadline = Instant::now() + timeout;
        loop {
            let satisfied = self.with_dom(tab, |tab_state| {
                let found = tab_state
                    .dom
                    .iter()
                    .find(|element| element.attached && element.matches(selector));
                match found {
                    Some(element) => state.is_satisfied(true, element.visible),
                    None => state.is_satisfied(false, false),
                }
            });
            if satisfied {
                return Ok(());
            }
            if Instant::now() >= deadline {
                return Err(AgentError::TimeoutError(format!(
                    "{} not {} within {} ms",
                    selector,
                    state,
                    timeout.as_millis()
                )));
            }
            tokio::time::sleep(self.poll_interval).await;
        }
    }

    async fn get_attribute(
        &self,
        tab: &MockTab,
        target: &Target,
        name: &str,
    ) -> Result<Option<String>> {
        self.record(MockCall::GetAttribute {
            target: target.to_string(),
            name: name.to_string(),
        });
        let element = self.resolve(tab, target)?;
        Ok(element.attributes.get(name).cloned())
    }

    async fn inner_html(&self, tab: &MockTab, target: &Target) -> Result<String> {
        self.record(MockCall::InnerHtml(target.to_string()));
        Ok(self.resolve(tab, target)?.inner_html)
    }

    async fn screenshot(&self, _tab: &MockTab, path: &Path, _full_page: bool) -> Result<()> {
        self.record(MockCall::Screenshot(path.to_path_buf()));
        if lock(&self.site).fail_screenshots {
            return Err(AgentError::ScreenshotFailed("capture rejected".to_string()));
        }
        std::fs::write(path, PNG_SIGNATURE)?;
        Ok(())
    }

    async fn persist_state(&self, tab: &MockTab, path: &Path) -> Result<()> {
        self.record(MockCall::PersistState(path.to_path_buf()));
        if !lock(&tab.state).authenticated {
            return Err(AgentError::ChromeError(
                "no authenticated state to persist".to_string(),
            ));
        }
        let token = lock(&self.site).valid_state.clone();
        std::fs::write(path, token)?;
        Ok(())
    }

    async fn expect_file_chooser(&self, tab: &MockTab, trigger_selector: &str) -> Result<FileChooser> {
        self.record(MockCall::ExpectFileChooser(trigger_selector.to_string()));
        self.resolve(tab, &Target::Selector(trigger_selector.to_string()))?;
        Ok(FileChooser {
            input_selector: FILE_INPUT_SELECTOR.to_string(),
        })
    }

    async fn set_files(&self, tab: &MockTab, chooser: &FileChooser, path: &Path) -> Result<()> {
        self.record(MockCall::SetFiles(path.to_path_buf()));
        self.resolve(tab, &Target::Selector(chooser.input_selector.clone()))?;
        self.run_rules(tab, &MockTrigger::Files);
        Ok(())
    }

    async fn observe_network(&self, tab: &MockTab) -> Result<()> {
        self.record(MockCall::ObserveNetwork);
        let mut state = lock(&tab.state);
        state.network_origin = Some(Instant::now());
        state.network_cursor = Duration::ZERO;
        Ok(())
    }

    async fn drain_network_events(&self, tab: &MockTab) -> Result<Vec<NetworkEvent>> {
        self.record(MockCall::DrainNetwork);
        let script = lock(&self.site).network.clone();
        let mut state = lock(&tab.state);
        let Some(origin) = state.network_origin else {
            return Ok(Vec::new());
        };
        let now = Instant::now().duration_since(origin);
        let events = script.events_between(state.network_cursor, now);
        state.network_cursor = now;
        Ok(events)
    }

    async fn close_tab(&self, _tab: MockTab) -> Result<()> {
        self.record(MockCall::CloseTab);
        Ok(())
    }

    fn is_running(&self) -> bool {
        self.launched
    }

    async fn close(&mut self) -> Result<()> {
        self.record(MockCall::Close);
        self.launched = false;
        Ok(())
    }
}

/// Shortcuts shared by the unit and integration tests.
pub struct TestHelper;

impl TestHelper {
    pub fn credentials() -> Credentials {
        Credentials::new("user@example.test", "correct horse")
    }

    /// Default config pointed at `state_path`.
    pub fn config(state_path: &Path) -> crate::core::Config {
        let mut config = crate::core::Config::default();
        config.session.state_path = state_path.to_path_buf();
        config
    }

    pub fn chat_site() -> MockSite {
        MockSite::chat_app(&SelectorConfig::default(), &Self::credentials())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn periodic_script_counts_whole_periods() {
        let script = NetworkScript::Periodic {
            every: Duration::from_millis(400),
        };
        let events = script.events_between(Duration::ZERO, Duration::from_millis(500));
        assert_eq!(
            events,
            vec![NetworkEvent::RequestStarted, NetworkEvent::RequestFinished]
        );
        let events = script.events_between(Duration::from_millis(500), Duration::from_millis(1000));
        assert_eq!(events.len(), 2);
        assert!(script
            .events_between(Duration::from_millis(800), Duration::from_millis(1100))
            .is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn delayed_actions_fire_on_later_access() {
        let site = MockSite::blank()
            .with_app_page(vec![MockElement::new("stop", "button").matching("#stop")])
            .with_rule(MockRule::on_click(
                "stop",
                vec![MockAction::after(
                    Duration::from_millis(300),
                    MockAction::Hide("stop".into()),
                )],
            ));
        let mut browser = MockBrowser::new(site);
        browser.launch(&BrowserConfig::default()).await.unwrap();
        let tab = browser.new_tab(None).await.unwrap();
        browser.navigate(&tab, MOCK_URL).await.unwrap();
        browser.click(&tab, &Target::from("#stop")).await.unwrap();

        assert_eq!(browser.query_all(&tab, "#stop").await.unwrap().len(), 1);
        browser
            .wait_for_selector(&tab, "#stop", WaitState::Detached, Duration::from_secs(1))
            .await
            .unwrap();
        assert!(browser.query_all(&tab, "#stop").await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn actions_require_launch() {
        let browser = MockBrowser::new(MockSite::blank());
        assert!(matches!(
            browser.new_tab(None).await,
            Err(AgentError::BrowserNotLaunched)
        ));
    }
}
