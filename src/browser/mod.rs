//! Headless browser abstraction.
//!
//! Everything that touches a live page goes through [`BrowserPage`], so the
//! scanner and the booking orchestrator can be driven by chromiumoxide in
//! production and by scripted fakes in tests. [`BrowserPool`] bounds how
//! many browsers may be open at once across all users.

pub mod chromium;
pub mod sessions;

use async_trait::async_trait;
use std::path::Path;
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;
use tokio::sync::{OwnedSemaphorePermit, Semaphore};

#[derive(Debug, Error)]
pub enum BrowserError {
    #[error("failed to launch browser: {0}")]
    Launch(String),

    #[error("navigation to {url} failed: {reason}")]
    Navigation { url: String, reason: String },

    #[error("element not found: {0}")]
    ElementNotFound(String),

    #[error("timed out after {secs}s waiting for {what}")]
    Timeout { what: String, secs: u64 },

    #[error("script evaluation failed: {0}")]
    Script(String),

    #[error("browser I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("browser launch pool is closed")]
    PoolClosed,
}

impl BrowserError {
    /// Connection-level failures worth retrying on the next poll.
    pub fn is_transient_network(&self) -> bool {
        match self {
            BrowserError::Navigation { reason, .. } => {
                let reason = reason.to_ascii_uppercase();
                reason.contains("NET::ERR_")
                    || reason.contains("ERR_CONNECTION")
                    || reason.contains("ERR_EMPTY_RESPONSE")
                    || reason.contains("ERR_NAME_NOT_RESOLVED")
                    || reason.contains("ERR_TIMED_OUT")
            }
            BrowserError::Timeout { .. } => true,
            _ => false,
        }
    }
}

pub type BrowserResult<T> = Result<T, BrowserError>;

/// Expression used to check that a page still answers.
pub const LIVENESS_PROBE: &str = "1 + 1";

/// One open browser with one open page.
#[async_trait]
pub trait BrowserPage: Send + Sync {
    async fn goto(&self, url: &str) -> BrowserResult<()>;

    /// Polls until `selector` matches an element or `timeout` elapses.
    async fn wait_for(&self, selector: &str, timeout: Duration) -> BrowserResult<()>;

    async fn is_visible(&self, selector: &str) -> BrowserResult<bool>;

    async fn click(&self, selector: &str) -> BrowserResult<()>;

    /// Clears the field, then types `value` into it.
    async fn fill(&self, selector: &str, value: &str) -> BrowserResult<()>;

    /// Focuses the field and types `text` key by key without clearing it.
    async fn type_text(&self, selector: &str, text: &str) -> BrowserResult<()>;

    async fn press_key(&self, selector: &str, key: &str) -> BrowserResult<()>;

    /// `value` of an input element, `None` when the element is absent.
    async fn input_value(&self, selector: &str) -> BrowserResult<Option<String>>;

    /// Evaluates a script and returns its JSON value (promises are awaited).
    async fn evaluate(&self, script: &str) -> BrowserResult<serde_json::Value>;

    async fn screenshot_element(&self, selector: &str, path: &Path) -> BrowserResult<()>;

    /// Closes the page and its browser process.
    async fn close(&self) -> BrowserResult<()>;
}

#[async_trait]
pub trait BrowserLauncher: Send + Sync {
    async fn launch(&self) -> BrowserResult<Box<dyn BrowserPage>>;
}

/// A launched page holding one slot of the pool until closed or dropped.
pub struct LeasedPage {
    page: Box<dyn BrowserPage>,
    _permit: OwnedSemaphorePermit,
}

impl LeasedPage {
    pub fn page(&self) -> &dyn BrowserPage {
        self.page.as_ref()
    }

    pub async fn close(self) -> BrowserResult<()> {
        self.page.close().await
    }
}

/// Bounded launcher shared by the scanner and the booking sessions.
#[derive(Clone)]
pub struct BrowserPool {
    launcher: Arc<dyn BrowserLauncher>,
    permits: Arc<Semaphore>,
    capacity: usize,
}

impl BrowserPool {
    pub fn new(launcher: Arc<dyn BrowserLauncher>, max_browsers: usize) -> Self {
        let capacity = max_browsers.max(1);
        Self {
            launcher,
            permits: Arc::new(Semaphore::new(capacity)),
            capacity,
        }
    }

    /// Waits for a free slot, then launches a browser in it.
    pub async fn launch(&self) -> BrowserResult<LeasedPage> {
        let permit = self
            .permits
            .clone()
            .acquire_owned()
            .await
            .map_err(|_| BrowserError::PoolClosed)?;

        let page = self.launcher.launch().await?;

        Ok(LeasedPage { page, _permit: permit })
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    pub fn in_use(&self) -> usize {
        self.capacity - self.permits.available_permits()
    }
}

/// Quotes a string as a JavaScript literal.
pub fn js_string(value: &str) -> String {
    serde_json::Value::String(value.to_string()).to_string()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_transient_network_detection() {
        let err = BrowserError::Navigation {
            url: "https://example.org".into(),
            reason: "net::ERR_CONNECTION_REFUSED".into(),
        };
        assert!(err.is_transient_network());

        let layout = BrowserError::ElementNotFound(".captcha_item img".into());
        assert!(!layout.is_transient_network());
    }

    #[test]
    fn test_js_string_escapes_quotes() {
        assert_eq!(js_string(r#"a"b"#), r#""a\"b""#);
        assert_eq!(js_string("[data-value='09:00']"), r#""[data-value='09:00']""#);
    }
}
