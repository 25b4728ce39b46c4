use crate::core::BrowserTrait;
use crate::errors::{AgentError, Result};
use std::path::Path;
use std::time::Duration;
use tracing::debug;

pub struct ScreenshotManager;

impl ScreenshotManager {
    /// Let late rendering settle, then write a full-page PNG to `path`.
    pub async fn capture_full_page<B: BrowserTrait>(
        browser: &B,
        tab: &B::TabHandle,
        path: &Path,
        settle: Duration,
    ) -> Result<()> {
        Self::ensure_parent(path).await?;
        tokio::time::sleep(settle).await;
        browser.screenshot(tab, path, true).await?;
        debug!(path = %path.display(), "saved full-page screenshot");
        Ok(())
    }

    async fn ensure_parent(path: &Path) -> Result<()> {
        match path.parent() {
            Some(parent) if !parent.as_os_str().is_empty() && !parent.exists() => {
                tokio::fs::create_dir_all(parent).await.map_err(|e| {
                    AgentError::ScreenshotFailed(format!(
                        "cannot create {}: {}",
                        parent.display(),
                        e
                    ))
                })
            }
            _ => Ok(()),
        }
    }
}
