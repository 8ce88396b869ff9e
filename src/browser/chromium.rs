use async_trait::async_trait;
use chromiumoxide::browser::{Browser, BrowserConfig};
use chromiumoxide::cdp::browser_protocol::page::CaptureScreenshotFormat;
use chromiumoxide::{Element, Page};
use futures::StreamExt;
use std::path::{Path, PathBuf};
use std::time::Duration;
use tokio::sync::Mutex;
use tokio::task::JoinHandle;
use tokio::time::Instant;

use super::{js_string, BrowserError, BrowserLauncher, BrowserPage, BrowserResult};

const POLL_INTERVAL: Duration = Duration::from_millis(250);

/// Launches Chromium through the DevTools protocol.
#[derive(Debug, Clone)]
pub struct ChromiumLauncher {
    headless: bool,
    chrome_path: Option<PathBuf>,
}

impl ChromiumLauncher {
    pub fn new(headless: bool, chrome_path: Option<PathBuf>) -> Self {
        Self { headless, chrome_path }
    }
}

#[async_trait]
impl BrowserLauncher for ChromiumLauncher {
    async fn launch(&self) -> BrowserResult<Box<dyn BrowserPage>> {
        let mut builder = BrowserConfig::builder()
            .no_sandbox()
            .window_size(1366, 900)
            .args(vec![
                "--disable-blink-features=AutomationControlled",
                "--disable-dev-shm-usage",
                "--disable-gpu",
                "--no-first-run",
                "--no-default-browser-check",
            ]);
        if !self.headless {
            builder = builder.with_head();
        }
        if let Some(path) = &self.chrome_path {
            builder = builder.chrome_executable(path);
        }
        let config = builder.build().map_err(BrowserError::Launch)?;

        let (browser, mut handler) = Browser::launch(config)
            .await
            .map_err(|e| BrowserError::Launch(e.to_string()))?;

        let handler_task = tokio::spawn(async move {
            while let Some(event) = handler.next().await {
                if let Err(e) = event {
                    tracing::debug!("Browser event error: {}", e);
                }
            }
        });

        let page = match browser.new_page("about:blank").await {
            Ok(page) => page,
            Err(e) => {
                let mut browser = browser;
                let _ = browser.close().await;
                handler_task.abort();
                return Err(BrowserError::Launch(e.to_string()));
            }
        };

        Ok(Box::new(ChromiumPage {
            browser: Mutex::new(browser),
            page,
            handler_task,
        }))
    }
}

pub struct ChromiumPage {
    browser: Mutex<Browser>,
    page: Page,
    handler_task: JoinHandle<()>,
}

impl ChromiumPage {
    async fn element(&self, selector: &str) -> BrowserResult<Element> {
        self.page
            .find_element(selector)
            .await
            .map_err(|_| BrowserError::ElementNotFound(selector.to_string()))
    }
}

#[async_trait]
impl BrowserPage for ChromiumPage {
    async fn goto(&self, url: &str) -> BrowserResult<()> {
        self.page
            .goto(url)
            .await
            .map_err(|e| BrowserError::Navigation {
                url: url.to_string(),
                reason: e.to_string(),
            })?;
        Ok(())
    }

    async fn wait_for(&self, selector: &str, timeout: Duration) -> BrowserResult<()> {
        let deadline = Instant::now() + timeout;
        loop {
            if self.page.find_element(selector).await.is_ok() {
                return Ok(());
            }
            if Instant::now() >= deadline {
                return Err(BrowserError::Timeout {
                    what: selector.to_string(),
                    secs: timeout.as_secs(),
                });
            }
            tokio::time::sleep(POLL_INTERVAL).await;
        }
    }

    async fn is_visible(&self, selector: &str) -> BrowserResult<bool> {
        let script = format!(
            r#"(() => {{
                const el = document.querySelector({sel});
                if (!el) return false;
                const style = window.getComputedStyle(el);
                const rect = el.getBoundingClientRect();
                return style.display !== 'none' && style.visibility !== 'hidden'
                    && rect.width > 0 && rect.height > 0;
            }})()"#,
            sel = js_string(selector)
        );
        Ok(self.evaluate(&script).await?.as_bool().unwrap_or(false))
    }

    async fn click(&self, selector: &str) -> BrowserResult<()> {
        self.element(selector)
            .await?
            .click()
            .await
            .map_err(|e| BrowserError::Script(e.to_string()))?;
        Ok(())
    }

    async fn fill(&self, selector: &str, value: &str) -> BrowserResult<()> {
        let clear = format!(
            "(() => {{ const el = document.querySelector({sel}); if (el) el.value = ''; return !!el; }})()",
            sel = js_string(selector)
        );
        if !self.evaluate(&clear).await?.as_bool().unwrap_or(false) {
            return Err(BrowserError::ElementNotFound(selector.to_string()));
        }
        self.type_text(selector, value).await
    }

    async fn type_text(&self, selector: &str, text: &str) -> BrowserResult<()> {
        let element = self.element(selector).await?;
        element
            .click()
            .await
            .map_err(|e| BrowserError::Script(e.to_string()))?
            .type_str(text)
            .await
            .map_err(|e| BrowserError::Script(e.to_string()))?;
        Ok(())
    }

    async fn press_key(&self, selector: &str, key: &str) -> BrowserResult<()> {
        self.element(selector)
            .await?
            .press_key(key)
            .await
            .map_err(|e| BrowserError::Script(e.to_string()))?;
        Ok(())
    }

    async fn input_value(&self, selector: &str) -> BrowserResult<Option<String>> {
        let script = format!(
            "(() => {{ const el = document.querySelector({sel}); return el ? String(el.value ?? '') : null; }})()",
            sel = js_string(selector)
        );
        Ok(self.evaluate(&script).await?.as_str().map(str::to_string))
    }

    async fn evaluate(&self, script: &str) -> BrowserResult<serde_json::Value> {
        let result = self
            .page
            .evaluate(script)
            .await
            .map_err(|e| BrowserError::Script(e.to_string()))?;
        // `undefined` has no JSON form
        Ok(result.into_value().unwrap_or(serde_json::Value::Null))
    }

    async fn screenshot_element(&self, selector: &str, path: &Path) -> BrowserResult<()> {
        let bytes = self
            .element(selector)
            .await?
            .screenshot(CaptureScreenshotFormat::Png)
            .await
            .map_err(|e| BrowserError::Script(e.to_string()))?;
        if let Some(parent) = path.parent() {
            tokio::fs::create_dir_all(parent).await?;
        }
        tokio::fs::write(path, bytes).await?;
        Ok(())
    }

    async fn close(&self) -> BrowserResult<()> {
        let mut browser = self.browser.lock().await;
        let result = browser.close().await;
        let _ = browser.wait().await;
        self.handler_task.abort();
        result.map_err(|e| BrowserError::Launch(e.to_string()))?;
        Ok(())
    }
}
