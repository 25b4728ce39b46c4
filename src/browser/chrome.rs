use crate::browser::session::{CookieData, PersistedState};
use crate::core::{
    BrowserConfig, BrowserTrait, ElementRef, FileChooser, NetworkEvent, Target, WaitState,
};
use crate::errors::{AgentError, Result};
use crate::utils::javascript::{ElementQuery, Scripts};
use async_trait::async_trait;
use chrono::Utc;
use headless_chrome::protocol::cdp::types::Event;
use headless_chrome::protocol::cdp::{Network, Page, DOM};
use headless_chrome::{Browser, LaunchOptions, Tab};
use serde::de::DeserializeOwned;
use serde::Deserialize;
use serde_json::json;
use std::collections::{HashMap, HashSet};
use std::ffi::OsStr;
use std::path::Path;
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;
use tokio::time::Instant;
use tracing::{debug, info, warn};

const IDLE_BROWSER_TIMEOUT: Duration = Duration::from_secs(600);

/// Request lifecycle as reported by the CDP `Network` domain.
#[derive(Debug, Default)]
struct NetworkLog {
    events: Vec<NetworkEvent>,
    in_flight: HashSet<String>,
}

impl NetworkLog {
    fn started(&mut self, request_id: &str) {
        self.in_flight.insert(request_id.to_string());
        self.events.push(NetworkEvent::RequestStarted);
    }

    fn settled(&mut self, request_id: &str, event: NetworkEvent) {
        self.in_flight.remove(request_id);
        self.events.push(event);
    }

    /// Forget past events; requests still in flight count as just started.
    fn restart(&mut self) {
        self.events = vec![NetworkEvent::RequestStarted; self.in_flight.len()];
    }
}

/// Chrome tab plus local storage still waiting to be applied.
///
/// Cookies go in through CDP before the first navigation. Storage can only
/// be written once the page sits on the right origin, so a seeded tab
/// injects it after its first navigation and then reloads.
pub struct ChromeTab {
    tab: Arc<Tab>,
    seed: Mutex<Option<PersistedState>>,
    network: Arc<Mutex<NetworkLog>>,
}

impl ChromeTab {
    pub fn inner(&self) -> &Arc<Tab> {
        &self.tab
    }

    fn take_seed(&self) -> Option<PersistedState> {
        lock(&self.seed).take()
    }
}

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}

/// Build CDP parameters from JSON; optional fields differ between
/// protocol revisions and are left out.
fn cdp_params<T: DeserializeOwned>(value: serde_json::Value) -> Result<T> {
    Ok(serde_json::from_value(value)?)
}

/// Chrome browser implementation
pub struct ChromeBrowser {
    browser: Option<Browser>,
    action_timeout: Duration,
    poll_interval: Duration,
}

impl Default for ChromeBrowser {
    fn default() -> Self {
        Self::new()
    }
}

#[derive(Debug, Deserialize)]
struct ElementState {
    attached: bool,
    visible: bool,
}

#[derive(Debug, Deserialize)]
struct AttributeValue {
    found: bool,
    value: Option<String>,
}

#[derive(Debug, Deserialize)]
struct PageSize {
    width: f64,
    height: f64,
}

#[derive(Debug, Deserialize)]
struct StorageSnapshot {
    origin: String,
    storage: HashMap<String, String>,
}

impl ChromeBrowser {
    pub fn new() -> Self {
        let defaults = BrowserConfig::default();
        Self {
            browser: None,
            action_timeout: defaults.action_timeout(),
            poll_interval: defaults.poll_interval(),
        }
    }

    fn browser(&self) -> Result<&Browser> {
        self.browser.as_ref().ok_or(AgentError::BrowserNotLaunched)
    }

    /// Run a script that returns `JSON.stringify(...)` and decode the payload.
    fn evaluate<T: DeserializeOwned>(tab: &Tab, script: &str) -> Result<T> {
        let object = tab
            .evaluate(script, false)
            .map_err(|e| AgentError::JavaScriptFailed(e.to_string()))?;
        let payload = object
            .value
            .as_ref()
            .and_then(|value| value.as_str())
            .ok_or_else(|| {
                AgentError::JavaScriptFailed("script did not return a JSON string".to_string())
            })?;
        Ok(serde_json::from_str(payload)?)
    }

    /// Structural locator of the first element the target resolves to.
    fn locate(tab: &Tab, target: &Target) -> Result<String> {
        let query = ElementQuery::from_target(target);
        let locator: Option<String> = Self::evaluate(tab, &Scripts::locate(&query))?;
        locator.ok_or_else(|| AgentError::ElementNotFound(target.to_string()))
    }

    async fn apply_seed(&self, tab: &ChromeTab, url: &str) -> Result<()> {
        let Some(state) = tab.take_seed() else {
            return Ok(());
        };

        if state.local_storage.is_empty() {
            return Ok(());
        }
        Self::evaluate::<usize>(&tab.tab, &Scripts::write_storage(&state.local_storage))?;
        debug!(entries = state.local_storage.len(), "applied persisted storage");

        tab.tab
            .navigate_to(url)
            .map_err(|e| AgentError::NavigationFailed(e.to_string()))?;
        tab.tab
            .wait_until_navigated()
            .map_err(|e| AgentError::NavigationFailed(e.to_string()))?;
        Ok(())
    }

    fn restore_cookies(tab: &Tab, cookies: &[CookieData]) -> Result<()> {
        if cookies.is_empty() {
            return Ok(());
        }
        let params = cookies
            .iter()
            .map(|cookie| {
                let mut param = json!({
                    "name": cookie.name,
                    "value": cookie.value,
                    "domain": cookie.domain,
                    "path": cookie.path,
                    "secure": cookie.secure,
                    "httpOnly": cookie.http_only,
                });
                // Session cookies carry no positive expiry.
                if let Some(expires) = cookie.expires.filter(|expires| *expires > 0.0) {
                    param["expires"] = json!(expires);
                }
                if let Some(same_site) = &cookie.same_site {
                    param["sameSite"] = json!(same_site);
                }
                cdp_params::<Network::CookieParam>(param)
            })
            .collect::<Result<Vec<_>>>()?;

        tab.set_cookies(params)
            .map_err(|e| AgentError::ChromeError(e.to_string()))?;
        debug!(cookies = cookies.len(), "restored persisted cookies");
        Ok(())
    }

    /// Feed `Network.*` lifecycle events of `tab` into `log`.
    fn watch_network(tab: &Tab, log: &Arc<Mutex<NetworkLog>>) -> Result<()> {
        tab.call_method(cdp_params::<Network::Enable>(json!({}))?)
            .map_err(|e| AgentError::ChromeError(e.to_string()))?;

        let log = Arc::clone(log);
        tab.add_event_listener(Arc::new(move |event: &Event| match event {
            Event::NetworkRequestWillBeSent(sent) => lock(&log).started(&sent.params.request_id),
            Event::NetworkLoadingFinished(done) => {
                lock(&log).settled(&done.params.request_id, NetworkEvent::RequestFinished)
            }
            Event::NetworkLoadingFailed(failed) => {
                lock(&log).settled(&failed.params.request_id, NetworkEvent::RequestFailed)
            }
            _ => {}
        }))
        .map_err(|e| AgentError::ChromeError(e.to_string()))?;
        Ok(())
    }
}

#[async_trait]
impl BrowserTrait for ChromeBrowser {
    type TabHandle = ChromeTab;

    async fn launch(&mut self, config: &BrowserConfig) -> Result<()> {
        let window_size_arg = format!(
            "--window-size={},{}",
            config.viewport.width, config.viewport.height
        );

        let user_agent_arg = config
            .user_agent
            .as_ref()
            .map(|ua| format!("--user-agent={}", ua));

        let mut args = vec![
            OsStr::new("--no-sandbox"),
            OsStr::new("--disable-dev-shm-usage"),
            OsStr::new(&window_size_arg),
        ];

        if let Some(ref ua_arg) = user_agent_arg {
            args.push(OsStr::new(ua_arg));
        }

        if config.disable_images {
            args.push(OsStr::new("--blink-settings=imagesEnabled=false"));
        }

        for arg in &config.args {
            args.push(OsStr::new(arg));
        }

        let launch_options = LaunchOptions::default_builder()
            .headless(config.headless)
            .args(args)
            .idle_browser_timeout(IDLE_BROWSER_TIMEOUT)
            .build()
            .map_err(|e| AgentError::LaunchFailed(e.to_string()))?;

        let browser =
            Browser::new(launch_options).map_err(|e| AgentError::LaunchFailed(e.to_string()))?;

        self.browser = Some(browser);
        self.action_timeout = config.action_timeout();
        self.poll_interval = config.poll_interval();
        info!(headless = config.headless, "chrome launched");
        Ok(())
    }

    async fn new_tab(&self, persisted_state: Option<&Path>) -> Result<ChromeTab> {
        let seed = match persisted_state {
            Some(path) => Some(PersistedState::load(path).await?),
            None => None,
        };

        let tab = self
            .browser()?
            .new_tab()
            .map_err(|e| AgentError::TabCreationFailed(e.to_string()))?;
        tab.set_default_timeout(self.action_timeout);

        let network = Arc::new(Mutex::new(NetworkLog::default()));
        Self::watch_network(&tab, &network)?;
        if let Some(state) = &seed {
            Self::restore_cookies(&tab, &state.cookies)?;
        }

        Ok(ChromeTab {
            tab,
            seed: Mutex::new(seed),
            network,
        })
    }

    async fn navigate(&self, tab: &ChromeTab, url: &str) -> Result<()> {
        tab.tab
            .navigate_to(url)
            .map_err(|e| AgentError::NavigationFailed(e.to_string()))?;
        tab.tab
            .wait_until_navigated()
            .map_err(|e| AgentError::NavigationFailed(e.to_string()))?;

        self.apply_seed(tab, url).await
    }

    async fn query_all(&self, tab: &ChromeTab, selector: &str) -> Result<Vec<ElementRef>> {
        let query = ElementQuery::parse(selector);
        Self::evaluate(&tab.tab, &Scripts::query_all(&query))
    }

    async fn fill(&self, tab: &ChromeTab, selector: &str, text: &str) -> Result<()> {
        let target = Target::Selector(selector.to_string());
        let locator = Self::locate(&tab.tab, &target)?;
        let element = tab
            .tab
            .find_element(&locator)
            .map_err(|e| AgentError::ElementNotFound(format!("{}: {}", selector, e)))?;
        element
            .click()
            .map_err(|e| AgentError::ChromeError(e.to_string()))?;

        let clear = Scripts::clear_value(&ElementQuery::parse(&locator));
        let cleared: bool = Self::evaluate(&tab.tab, &clear)?;
        if !cleared {
            return Err(AgentError::ElementNotFound(selector.to_string()));
        }

        element
            .type_into(text)
            .map_err(|e| AgentError::ChromeError(e.to_string()))?;
        Ok(())
    }

    async fn click(&self, tab: &ChromeTab, target: &Target) -> Result<()> {
        let locator = Self::locate(&tab.tab, target)?;
        tab.tab
            .find_element(&locator)
            .map_err(|e| AgentError::ElementNotFound(format!("{}: {}", target, e)))?
            .click()
            .map_err(|e| AgentError::ChromeError(e.to_string()))?;
        Ok(())
    }

    async fn wait_for_selector(
        &self,
        tab: &ChromeTab,
        selector: &str,
        state: WaitState,
        timeout: Duration,
    ) -> Result<()> {
        let script = Scripts::element_state(&ElementQuery::parse(selector));
        let deadline = Instant::now() + timeout;

        loop {
            let current: ElementState = Self::evaluate(&tab.tab, &script)?;
            if state.is_satisfied(current.attached, current.visible) {
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
        tab: &ChromeTab,
        target: &Target,
        name: &str,
    ) -> Result<Option<String>> {
        let query = ElementQuery::from_target(target);
        let attribute: AttributeValue = Self::evaluate(&tab.tab, &Scripts::attribute(&query, name))?;
        if !attribute.found {
            return Err(AgentError::ElementNotFound(target.to_string()));
        }
        Ok(attribute.value)
    }

    async fn inner_html(&self, tab: &ChromeTab, target: &Target) -> Result<String> {
        let query = ElementQuery::from_target(target);
        let html: Option<String> = Self::evaluate(&tab.tab, &Scripts::inner_html(&query))?;
        html.ok_or_else(|| AgentError::ElementNotFound(target.to_string()))
    }

    async fn screenshot(&self, tab: &ChromeTab, path: &Path, full_page: bool) -> Result<()> {
        let clip = if full_page {
            let size: PageSize = Self::evaluate(&tab.tab, &Scripts::page_size())?;
            Some(Page::Viewport {
                x: 0.0,
                y: 0.0,
                width: size.width,
                height: size.height,
                scale: 1.0,
            })
        } else {
            None
        };

        let png = tab
            .tab
            .capture_screenshot(Page::CaptureScreenshotFormatOption::Png, None, clip, true)
            .map_err(|e| AgentError::ScreenshotFailed(e.to_string()))?;

        tokio::fs::write(path, png)
            .await
            .map_err(|e| AgentError::ScreenshotFailed(format!("{}: {}", path.display(), e)))
    }

    async fn persist_state(&self, tab: &ChromeTab, path: &Path) -> Result<()> {
        let cookies = tab
            .tab
            .get_cookies()
            .map_err(|e| AgentError::ChromeError(e.to_string()))?
            .into_iter()
            .map(|cookie| Ok(serde_json::from_value(serde_json::to_value(cookie)?)?))
            .collect::<Result<Vec<CookieData>>>()?;
        let snapshot: StorageSnapshot = Self::evaluate(&tab.tab, &Scripts::read_storage())?;

        let state = PersistedState {
            origin: snapshot.origin,
            cookies,
            local_storage: snapshot.storage,
            saved_at: Utc::now(),
        };
        state.save(path).await
    }

    async fn expect_file_chooser(&self, tab: &ChromeTab, trigger_selector: &str) -> Result<FileChooser> {
        // Files go straight to the hidden input; opening the native dialog
        // would block a headless session.
        let input = Target::Selector(r#"input[type="file"]"#.to_string());
        let input_selector = Self::locate(&tab.tab, &input)?;
        debug!(trigger = trigger_selector, input = %input_selector, "armed file chooser");
        Ok(FileChooser { input_selector })
    }

    async fn set_files(&self, tab: &ChromeTab, chooser: &FileChooser, path: &Path) -> Result<()> {
        let absolute = std::fs::canonicalize(path)?;
        let element = tab
            .tab
            .find_element(&chooser.input_selector)
            .map_err(|e| AgentError::ElementNotFound(format!("{}: {}", chooser.input_selector, e)))?;

        tab.tab
            .call_method(DOM::SetFileInputFiles {
                files: vec![absolute.to_string_lossy().into_owned()],
                node_id: None,
                backend_node_id: None,
                object_id: Some(element.remote_object_id.clone()),
            })
            .map_err(|e| AgentError::ChromeError(e.to_string()))?;
        Ok(())
    }

    async fn observe_network(&self, tab: &ChromeTab) -> Result<()> {
        let mut log = lock(&tab.network);
        log.restart();
        debug!(in_flight = log.in_flight.len(), "network observation restarted");
        Ok(())
    }

    async fn drain_network_events(&self, tab: &ChromeTab) -> Result<Vec<NetworkEvent>> {
        Ok(std::mem::take(&mut lock(&tab.network).events))
    }

    async fn close_tab(&self, tab: ChromeTab) -> Result<()> {
        if let Err(e) = tab.tab.close(true) {
            warn!(error = %e, "tab did not close cleanly");
            return Err(AgentError::ChromeError(e.to_string()));
        }
        Ok(())
    }

    fn is_running(&self) -> bool {
        self.browser.is_some()
    }

    async fn close(&mut self) -> Result<()> {
        self.browser = None;
        Ok(())
    }
}
