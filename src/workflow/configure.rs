use crate::core::{BrowserTrait, SelectorConfig, Target, WaitState};
use crate::errors::Result;
use crate::workflow::request::ChatOptions;
use std::time::Duration;
use tracing::{debug, info};

/// Bring the ephemeral-chat switch to `enabled`.
///
/// Opens the menu only when the switch is not already on screen and clicks
/// the switch only when its `aria-checked` state differs. Returns whether
/// the switch was clicked.
pub async fn set_ephemeral_mode<B: BrowserTrait>(
    browser: &B,
    tab: &B::TabHandle,
    selectors: &SelectorConfig,
    enabled: bool,
    step_timeout: Duration,
) -> Result<bool> {
    let switch = Target::Selector(selectors.ephemeral_switch.clone());

    if browser
        .query_all(tab, &selectors.ephemeral_switch)
        .await?
        .is_empty()
    {
        open_menu(browser, tab, selectors, step_timeout).await?;
    }
    browser
        .wait_for_selector(tab, &selectors.ephemeral_switch, WaitState::Visible, step_timeout)
        .await?;

    let checked = browser
        .get_attribute(tab, &switch, "aria-checked")
        .await?
        .is_some_and(|value| value.eq_ignore_ascii_case("true"));

    if checked == enabled {
        debug!(enabled, "ephemeral mode already set");
        return Ok(false);
    }

    browser.click(tab, &switch).await?;
    info!(enabled, "ephemeral mode toggled");
    Ok(true)
}

/// Pick the model whose menu entry shows `label`.
pub async fn select_model<B: BrowserTrait>(
    browser: &B,
    tab: &B::TabHandle,
    selectors: &SelectorConfig,
    label: &str,
    step_timeout: Duration,
) -> Result<()> {
    let entry = selectors.model_entry(label);

    if browser.query_all(tab, &entry).await?.is_empty() {
        open_menu(browser, tab, selectors, step_timeout).await?;
    }
    browser
        .wait_for_selector(tab, &entry, WaitState::Visible, step_timeout)
        .await?;
    browser.click(tab, &Target::Selector(entry)).await?;

    info!(model = label, "model selected");
    Ok(())
}

/// Apply every option the request asks for, ephemeral mode first.
pub async fn configure_chat<B: BrowserTrait>(
    browser: &B,
    tab: &B::TabHandle,
    selectors: &SelectorConfig,
    options: &ChatOptions,
    step_timeout: Duration,
) -> Result<()> {
    if let Some(enabled) = options.ephemeral {
        set_ephemeral_mode(browser, tab, selectors, enabled, step_timeout).await?;
    }
    if let Some(label) = options.model_label.as_deref() {
        select_model(browser, tab, selectors, label, step_timeout).await?;
    }
    Ok(())
}

async fn open_menu<B: BrowserTrait>(
    browser: &B,
    tab: &B::TabHandle,
    selectors: &SelectorConfig,
    step_timeout: Duration,
) -> Result<()> {
    browser
        .wait_for_selector(tab, &selectors.menu_trigger, WaitState::Visible, step_timeout)
        .await?;
    browser
        .click(tab, &Target::Selector(selectors.menu_trigger.clone()))
        .await
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::{MockBrowser, MockCall, MockTab, TestHelper, MOCK_URL};

    const STEP: Duration = Duration::from_secs(5);

    async fn open_chat() -> (MockBrowser, MockTab) {
        let mut browser = MockBrowser::new(TestHelper::chat_site().without_login());
        browser.launch(&Default::default()).await.unwrap();
        let tab = browser.new_tab(None).await.unwrap();
        browser.navigate(&tab, MOCK_URL).await.unwrap();
        (browser, tab)
    }

    fn clicks(browser: &MockBrowser) -> usize {
        browser
            .calls()
            .iter()
            .filter(|call| matches!(call, MockCall::Click(_)))
            .count()
    }

    #[tokio::test(start_paused = true)]
    async fn ephemeral_toggle_is_idempotent() {
        let (browser, tab) = open_chat().await;
        let selectors = SelectorConfig::default();

        let clicked = set_ephemeral_mode(&browser, &tab, &selectors, true, STEP)
            .await
            .unwrap();
        assert!(clicked);
        let after_first = clicks(&browser);
        assert_eq!(after_first, 2, "menu and switch");

        let clicked = set_ephemeral_mode(&browser, &tab, &selectors, true, STEP)
            .await
            .unwrap();
        assert!(!clicked);
        assert_eq!(clicks(&browser), after_first);
    }

    #[tokio::test(start_paused = true)]
    async fn model_entry_is_clicked_by_label() {
        let (browser, tab) = open_chat().await;
        let selectors = SelectorConfig::default();
        let entry = selectors.model_entry(crate::core::config::DEFAULT_MODEL_LABEL);

        select_model(
            &browser,
            &tab,
            &selectors,
            crate::core::config::DEFAULT_MODEL_LABEL,
            STEP,
        )
        .await
        .unwrap();

        assert!(browser.calls().contains(&MockCall::Click(entry.clone())));
        assert!(browser.query_all(&tab, &entry).await.unwrap().is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn untouched_options_make_no_calls() {
        let (browser, tab) = open_chat().await;
        let before = browser.calls().len();

        configure_chat(
            &browser,
            &tab,
            &SelectorConfig::default(),
            &ChatOptions::untouched(),
            STEP,
        )
        .await
        .unwrap();

        assert_eq!(browser.calls().len(), before);
    }

    #[tokio::test(start_paused = true)]
    async fn unknown_model_times_out() {
        let (browser, tab) = open_chat().await;

        let err = select_model(&browser, &tab, &SelectorConfig::default(), "Legacy", STEP)
            .await
            .unwrap_err();

        assert!(err.is_timeout());
    }
}
