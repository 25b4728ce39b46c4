use crate::browser::{await_quiescence, QuiescenceSettings};
use crate::core::{BrowserFactory, BrowserTrait, Config, WaitState};
use crate::errors::Result;
use crate::utils::ScreenshotManager;
use std::path::{Path, PathBuf};
use std::time::Duration;
use tracing::{info, warn};

/// Open `url` in a fresh browser, wait until the page stops issuing
/// requests and save a full-page screenshot to `save_path`.
///
/// Unlike the chat workflow, a page that never goes quiet is an error here.
pub async fn capture_page<F: BrowserFactory>(
    factory: &F,
    config: &Config,
    url: &str,
    save_path: &Path,
) -> Result<PathBuf> {
    config.validate()?;
    url::Url::parse(url)?;

    let mut browser = factory.create();
    browser.launch(&config.browser).await?;

    let tab = match browser.new_tab(None).await {
        Ok(tab) => tab,
        Err(err) => {
            if let Err(close_err) = browser.close().await {
                warn!(error = %close_err, "failed to close browser after tab error");
            }
            return Err(err);
        }
    };

    let outcome = snapshot(&browser, &tab, config, url, save_path).await;

    if let Err(err) = browser.close_tab(tab).await {
        warn!(error = %err, "failed to close tab");
    }
    if let Err(err) = browser.close().await {
        warn!(error = %err, "failed to close browser");
    }

    outcome?;
    info!(url, path = %save_path.display(), "page captured");
    Ok(save_path.to_path_buf())
}

async fn snapshot<B: BrowserTrait>(
    browser: &B,
    tab: &B::TabHandle,
    config: &Config,
    url: &str,
    save_path: &Path,
) -> Result<()> {
    browser.navigate(tab, url).await?;
    browser
        .wait_for_selector(
            tab,
            &config.selectors.page_body,
            WaitState::Attached,
            config.browser.action_timeout(),
        )
        .await?;

    await_quiescence(browser, tab, QuiescenceSettings::from(&config.timing)).await?;
    ScreenshotManager::capture_full_page(browser, tab, save_path, Duration::ZERO).await
}
