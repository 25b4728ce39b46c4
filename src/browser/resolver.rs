use crate::core::{
    BrowserTrait, Config, ElementKey, ElementRef, SelectorConfig, Target, WaitState,
};
use crate::errors::{AgentError, Result};
use std::collections::HashMap;
use std::path::Path;
use std::time::Duration;
use tracing::{debug, info};

/// Input applied to the page before looking for the control it unlocked.
#[derive(Debug, Clone, Copy, Default)]
pub struct TriggerInput<'a> {
    pub text: Option<&'a str>,
    pub file_path: Option<&'a Path>,
}

impl<'a> TriggerInput<'a> {
    pub fn text(text: &'a str) -> Self {
        Self {
            text: Some(text),
            file_path: None,
        }
    }

    pub fn is_empty(&self) -> bool {
        self.text.map_or(true, str::is_empty) && self.file_path.is_none()
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TriggerResolution {
    Found(ElementRef),
    NotFound,
}

/// Elements matching one predicate at one instant, in document order.
#[derive(Debug, Clone, Default)]
pub struct ElementSnapshot {
    elements: Vec<ElementRef>,
}

impl ElementSnapshot {
    pub async fn capture<B: BrowserTrait>(
        browser: &B,
        tab: &B::TabHandle,
        selector: &str,
    ) -> Result<Self> {
        let elements = browser.query_all(tab, selector).await?;
        Ok(Self { elements })
    }

    pub fn from_elements(elements: Vec<ElementRef>) -> Self {
        Self { elements }
    }

    pub fn len(&self) -> usize {
        self.elements.len()
    }

    pub fn is_empty(&self) -> bool {
        self.elements.is_empty()
    }

    pub fn elements(&self) -> &[ElementRef] {
        &self.elements
    }

    /// First element of `self` with no counterpart in `later`.
    ///
    /// Elements pair up by fingerprint. Among elements sharing a fingerprint,
    /// an unchanged locator pairs first and document order decides the rest.
    pub fn first_missing_from(&self, later: &ElementSnapshot) -> Option<&ElementRef> {
        let mut unpaired: HashMap<ElementKey, Vec<&ElementRef>> = HashMap::new();
        for element in &later.elements {
            unpaired.entry(element.key()).or_default().push(element);
        }

        let mut paired = vec![false; self.elements.len()];
        for (index, element) in self.elements.iter().enumerate() {
            if let Some(candidates) = unpaired.get_mut(&element.key()) {
                if let Some(at) = candidates.iter().position(|c| c.locator == element.locator) {
                    candidates.remove(at);
                    paired[index] = true;
                }
            }
        }

        for (index, element) in self.elements.iter().enumerate() {
            if paired[index] {
                continue;
            }
            match unpaired.get_mut(&element.key()) {
                Some(candidates) if !candidates.is_empty() => {
                    candidates.remove(0);
                }
                _ => return Some(element),
            }
        }
        None
    }
}

/// Locate `element` again in the current DOM: same fingerprint, preferring an
/// unchanged locator, else the first in document order.
pub async fn refresh_element<B: BrowserTrait>(
    browser: &B,
    tab: &B::TabHandle,
    element: &ElementRef,
) -> Result<Option<ElementRef>> {
    let key = element.key();
    let candidates: Vec<ElementRef> = browser
        .query_all(tab, &element.tag)
        .await?
        .into_iter()
        .filter(|candidate| candidate.key() == key)
        .collect();

    let fresh = match candidates
        .iter()
        .position(|candidate| candidate.locator == element.locator)
    {
        Some(at) => candidates.into_iter().nth(at),
        None => candidates.into_iter().next(),
    };
    Ok(fresh)
}

/// Finds the unlabeled submit control: the element that stops being
/// disabled once input has been provided.
pub struct TriggerResolver<'a> {
    selectors: &'a SelectorConfig,
    settle: Duration,
    step_timeout: Duration,
}

impl<'a> TriggerResolver<'a> {
    pub fn new(selectors: &'a SelectorConfig, settle: Duration, step_timeout: Duration) -> Self {
        Self {
            selectors,
            settle,
            step_timeout,
        }
    }

    pub async fn resolve<B: BrowserTrait>(
        &self,
        browser: &B,
        tab: &B::TabHandle,
        input_selector: &str,
        input: TriggerInput<'_>,
    ) -> Result<TriggerResolution> {
        if input.is_empty() {
            return Err(AgentError::NoInputProvided);
        }

        let before = ElementSnapshot::capture(browser, tab, &self.selectors.disabled).await?;
        debug!(disabled = before.len(), "captured disabled elements before input");

        if let Some(path) = input.file_path {
            self.attach_file(browser, tab, path).await?;
        }
        if let Some(text) = input.text.filter(|text| !text.is_empty()) {
            browser.fill(tab, input_selector, text).await?;
        }

        tokio::time::sleep(self.settle).await;

        let after = ElementSnapshot::capture(browser, tab, &self.selectors.disabled).await?;
        debug!(disabled = after.len(), "captured disabled elements after input");

        let Some(unlocked) = before.first_missing_from(&after) else {
            return Ok(TriggerResolution::NotFound);
        };

        match refresh_element(browser, tab, unlocked).await? {
            Some(element) => {
                info!(trigger = %element, "resolved trigger control");
                Ok(TriggerResolution::Found(element))
            }
            None => {
                debug!(element = %unlocked, "enabled control vanished before use");
                Ok(TriggerResolution::NotFound)
            }
        }
    }

    /// Open the attachment menu and hand `path` to the file chooser.
    pub async fn attach_file<B: BrowserTrait>(
        &self,
        browser: &B,
        tab: &B::TabHandle,
        path: &Path,
    ) -> Result<()> {
        let selectors = self.selectors;

        browser
            .wait_for_selector(tab, &selectors.prompt_area, WaitState::Attached, self.step_timeout)
            .await?;
        browser
            .wait_for_selector(tab, &selectors.attach_button, WaitState::Visible, self.step_timeout)
            .await?;
        browser
            .click(tab, &Target::Selector(selectors.attach_button.clone()))
            .await?;

        browser
            .wait_for_selector(
                tab,
                &selectors.upload_menu_item,
                WaitState::Visible,
                self.step_timeout,
            )
            .await?;
        browser
            .click(tab, &Target::Selector(selectors.upload_menu_item.clone()))
            .await?;

        let chooser = browser
            .expect_file_chooser(tab, &selectors.attach_button)
            .await?;
        browser.set_files(tab, &chooser, path).await?;

        info!(file = %path.display(), "attached file");
        Ok(())
    }
}

/// Resolve the submit control with the configured selectors and delays.
pub async fn resolve_trigger_control<B: BrowserTrait>(
    browser: &B,
    tab: &B::TabHandle,
    config: &Config,
    input: TriggerInput<'_>,
) -> Result<TriggerResolution> {
    TriggerResolver::new(
        &config.selectors,
        config.timing.settle_after_input(),
        config.browser.action_timeout(),
    )
    .resolve(browser, tab, &config.selectors.input, input)
    .await
}
