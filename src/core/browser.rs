use crate::core::config::BrowserConfig;
use crate::errors::Result;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;
use std::path::Path;
use std::time::Duration;

/// Capability surface the interaction core needs from a page-automation engine.
///
/// A tab bundles an isolated browsing context with one active page. Element
/// references handed out by `query_all` are only meaningful for the tab that
/// produced them and must be re-resolved after the page mutates.
#[async_trait]
pub trait BrowserTrait: Send + Sync {
    type TabHandle: Send + Sync;

    /// Launch a new browser instance
    async fn launch(&mut self, config: &BrowserConfig) -> Result<()>;

    /// Open an isolated tab, optionally seeded with persisted session state
    async fn new_tab(&self, persisted_state: Option<&Path>) -> Result<Self::TabHandle>;

    /// Navigate to a URL
    async fn navigate(&self, tab: &Self::TabHandle, url: &str) -> Result<()>;

    /// All elements currently matching `selector`, in document order
    async fn query_all(&self, tab: &Self::TabHandle, selector: &str) -> Result<Vec<ElementRef>>;

    /// Replace the value of the input matching `selector`
    async fn fill(&self, tab: &Self::TabHandle, selector: &str, text: &str) -> Result<()>;

    async fn click(&self, tab: &Self::TabHandle, target: &Target) -> Result<()>;

    /// Wait until the first element matching `selector` reaches `state`
    async fn wait_for_selector(
        &self,
        tab: &Self::TabHandle,
        selector: &str,
        state: WaitState,
        timeout: Duration,
    ) -> Result<()>;

    async fn get_attribute(
        &self,
        tab: &Self::TabHandle,
        target: &Target,
        name: &str,
    ) -> Result<Option<String>>;

    async fn inner_html(&self, tab: &Self::TabHandle, target: &Target) -> Result<String>;

    /// Write a PNG of the page to `path`
    async fn screenshot(&self, tab: &Self::TabHandle, path: &Path, full_page: bool) -> Result<()>;

    /// Serialize cookies and storage of the tab's context to `path`
    async fn persist_state(&self, tab: &Self::TabHandle, path: &Path) -> Result<()>;

    /// Arm the file-chooser flow behind `trigger_selector`
    async fn expect_file_chooser(
        &self,
        tab: &Self::TabHandle,
        trigger_selector: &str,
    ) -> Result<FileChooser>;

    async fn set_files(&self, tab: &Self::TabHandle, chooser: &FileChooser, path: &Path)
        -> Result<()>;

    /// Start recording request lifecycle events; restarts the record if already active
    async fn observe_network(&self, tab: &Self::TabHandle) -> Result<()>;

    /// Events recorded since the previous drain, oldest first
    async fn drain_network_events(&self, tab: &Self::TabHandle) -> Result<Vec<NetworkEvent>>;

    async fn close_tab(&self, tab: Self::TabHandle) -> Result<()>;

    /// Check if browser is still running
    fn is_running(&self) -> bool;

    /// Close the browser
    async fn close(&mut self) -> Result<()>;
}

/// Produces fresh, not yet launched engine instances.
pub trait BrowserFactory: Send + Sync {
    type Browser: BrowserTrait;

    fn create(&self) -> Self::Browser;
}

impl<B, F> BrowserFactory for F
where
    B: BrowserTrait,
    F: Fn() -> B + Send + Sync,
{
    type Browser = B;

    fn create(&self) -> B {
        self()
    }
}

/// Attributes that flip with UI state and therefore do not identify an element.
pub const VOLATILE_ATTRIBUTES: &[&str] = &[
    "disabled",
    "aria-disabled",
    "class",
    "style",
    "data-state",
    "data-disabled",
];

/// Engine-scoped reference to a DOM node.
///
/// `locator` is whatever the engine needs to find the node again (a structural
/// CSS path for Chrome). It shifts when siblings are inserted, so only `tag`
/// and `attributes` form the fingerprint.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ElementRef {
    pub tag: String,
    pub locator: String,
    #[serde(default)]
    pub attributes: BTreeMap<String, String>,
}

/// Value-comparable identity of an element, stable across state changes
/// and DOM position.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ElementKey {
    pub tag: String,
    pub attributes: Vec<(String, String)>,
}

impl ElementRef {
    pub fn new(tag: impl Into<String>, locator: impl Into<String>) -> Self {
        Self {
            tag: tag.into(),
            locator: locator.into(),
            attributes: BTreeMap::new(),
        }
    }

    pub fn with_attribute(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.attributes.insert(name.into(), value.into());
        self
    }

    pub fn key(&self) -> ElementKey {
        ElementKey {
            tag: self.tag.to_ascii_lowercase(),
            attributes: self
                .attributes
                .iter()
                .filter(|(name, _)| !VOLATILE_ATTRIBUTES.contains(&name.as_str()))
                .map(|(name, value)| (name.clone(), value.clone()))
                .collect(),
        }
    }
}

impl fmt::Display for ElementRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "<{}> at {}", self.tag, self.locator)
    }
}

/// What an action is aimed at.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Target {
    /// First element matching the selector at the time of the action
    Selector(String),
    /// A previously resolved element
    Element(ElementRef),
}

impl From<&str> for Target {
    fn from(selector: &str) -> Self {
        Target::Selector(selector.to_string())
    }
}

impl From<ElementRef> for Target {
    fn from(element: ElementRef) -> Self {
        Target::Element(element)
    }
}

impl fmt::Display for Target {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Target::Selector(selector) => write!(f, "{}", selector),
            Target::Element(element) => write!(f, "{}", element),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum WaitState {
    Attached,
    Detached,
    Visible,
    Hidden,
}

impl WaitState {
    /// Whether an element with the given presence flags satisfies this state.
    pub fn is_satisfied(self, attached: bool, visible: bool) -> bool {
        match self {
            WaitState::Attached => attached,
            WaitState::Detached => !attached,
            WaitState::Visible => attached && visible,
            WaitState::Hidden => !attached || !visible,
        }
    }
}

impl fmt::Display for WaitState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            WaitState::Attached => "attached",
            WaitState::Detached => "detached",
            WaitState::Visible => "visible",
            WaitState::Hidden => "hidden",
        };
        f.write_str(name)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum NetworkEvent {
    RequestStarted,
    RequestFinished,
    RequestFailed,
}

/// Armed file chooser; files are attached through `set_files`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FileChooser {
    pub input_selector: String,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn key_ignores_state_attributes() {
        let before = ElementRef::new("button", "html > body:nth-child(2) > button:nth-child(3)")
            .with_attribute("class", "btn disabled")
            .with_attribute("disabled", "")
            .with_attribute("aria-label", "Send");
        let after = ElementRef::new("BUTTON", "html > body:nth-child(2) > button:nth-child(3)")
            .with_attribute("class", "btn")
            .with_attribute("aria-label", "Send");

        assert_eq!(before.key(), after.key());
    }

    #[test]
    fn key_ignores_position() {
        let before = ElementRef::new("button", "div:nth-child(2) > button:nth-child(2)")
            .with_attribute("aria-label", "Voice");
        let after = ElementRef::new("button", "div:nth-child(2) > button:nth-child(3)")
            .with_attribute("aria-label", "Voice");
        assert_eq!(before.key(), after.key());
    }

    #[test]
    fn key_keeps_identity_attributes() {
        let a = ElementRef::new("button", "p").with_attribute("aria-label", "Send");
        let b = ElementRef::new("button", "p").with_attribute("aria-label", "Voice");
        assert_ne!(a.key(), b.key());
    }

    #[test]
    fn wait_states() {
        assert!(WaitState::Attached.is_satisfied(true, false));
        assert!(!WaitState::Visible.is_satisfied(true, false));
        assert!(WaitState::Detached.is_satisfied(false, false));
        assert!(WaitState::Hidden.is_satisfied(true, false));
        assert!(!WaitState::Hidden.is_satisfied(true, true));
    }
}
