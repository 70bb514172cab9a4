// src/fetch/browser.rs

//! Interactive fetch strategy: render the page in a real browser.
//!
//! One session is created lazily and shared by every interactive source.
//! The session sits behind an async mutex, so one source's navigation and
//! snapshot finish (or time out) before the next source touches it. A render
//! that fails or is cancelled discards the session; the next source starts
//! from a fresh one.

use std::time::Duration;

use async_trait::async_trait;
use serde_json::Value;
use tokio::sync::{Mutex, MutexGuard};

use crate::error::{AppError, Result};
use crate::fetch::Fetcher;
use crate::fetch::webdriver::{WebDriverClient, WebDriverSession};
use crate::models::{BrowserConfig, InteractionStep, Readiness, SourceDescriptor};

/// Script polled for network quiescence: ready state and resource count.
const NETWORK_STATE: &str =
    "return [document.readyState, performance.getEntriesByType('resource').length];";

/// Fetches listing pages through a WebDriver-controlled browser.
pub struct BrowserFetcher {
    driver: WebDriverClient,
    config: BrowserConfig,
    session: Mutex<Option<WebDriverSession>>,
}

impl BrowserFetcher {
    pub fn new(config: &BrowserConfig) -> Result<Self> {
        // Commands must outlive the longest navigation the driver may block on.
        let command_timeout = Duration::from_secs(config.page_load_timeout_secs + 10);
        Ok(Self {
            driver: WebDriverClient::new(&config.webdriver_url, command_timeout)?,
            config: config.clone(),
            session: Mutex::new(None),
        })
    }

    fn ready_timeout(&self) -> Duration {
        Duration::from_secs(self.config.ready_timeout_secs)
    }

    fn poll_interval(&self) -> Duration {
        Duration::from_millis(self.config.poll_interval_ms.max(10))
    }

    /// Close the shared session, if one was started.
    pub async fn close_session(&self) {
        let session = self.session.lock().await.take();
        if let Some(session) = session {
            if let Err(e) = session.close().await {
                log::warn!("Failed to close browser session: {}", e);
            }
        }
    }

    async fn render(
        &self,
        session: &WebDriverSession,
        source: &SourceDescriptor,
    ) -> Result<String> {
        let page_load = Duration::from_secs(self.config.page_load_timeout_secs);
        tokio::time::timeout(page_load, session.navigate(&source.url))
            .await
            .map_err(|_| {
                AppError::fetch(
                    &source.url,
                    format!("navigation timed out after {}s", page_load.as_secs()),
                )
            })??;

        self.wait_ready(session, source, &source.readiness_or_default())
            .await?;

        for step in &source.steps {
            self.apply_step(session, source, step).await?;
        }

        match &source.capture_script {
            Some(script) => {
                let value =
                    tokio::time::timeout(self.ready_timeout(), session.execute_async(script))
                        .await
                        .map_err(|_| AppError::fetch(&source.url, "capture script timed out"))??;
                match value {
                    Value::String(s) => Ok(s),
                    other => Ok(other.to_string()),
                }
            }
            None => session.source().await,
        }
    }

    /// Block until `readiness` holds, bounded by the readiness timeout.
    /// A timeout is reported as a fetch error and never retried.
    async fn wait_ready(
        &self,
        session: &WebDriverSession,
        source: &SourceDescriptor,
        readiness: &Readiness,
    ) -> Result<()> {
        let limit = self.ready_timeout();
        let outcome = tokio::time::timeout(limit, self.poll_ready(session, readiness)).await;
        match outcome {
            Ok(result) => result,
            Err(_) => Err(AppError::fetch(
                &source.url,
                format!(
                    "readiness condition {:?} not met within {}s",
                    readiness,
                    limit.as_secs()
                ),
            )),
        }
    }

    async fn poll_ready(&self, session: &WebDriverSession, readiness: &Readiness) -> Result<()> {
        let interval = self.poll_interval();
        match readiness {
            Readiness::Settle { millis } => {
                tokio::time::sleep(Duration::from_millis(*millis)).await;
                Ok(())
            }
            Readiness::DomContentLoaded => loop {
                let state = session.execute("return document.readyState;").await?;
                if matches!(state.as_str(), Some("interactive") | Some("complete")) {
                    return Ok(());
                }
                tokio::time::sleep(interval).await;
            },
            Readiness::Element { selector } => loop {
                if session.find_element(selector).await?.is_some() {
                    return Ok(());
                }
                tokio::time::sleep(interval).await;
            },
            Readiness::NetworkIdle { quiet_ms } => {
                let quiet = Duration::from_millis(*quiet_ms);
                let mut last_count: Option<u64> = None;
                let mut stable_since = tokio::time::Instant::now();
                loop {
                    let state = session.execute(NETWORK_STATE).await?;
                    let complete = state.get(0).and_then(Value::as_str) == Some("complete");
                    let count = state.get(1).and_then(Value::as_u64);

                    if !complete || count != last_count {
                        last_count = count;
                        stable_since = tokio::time::Instant::now();
                    } else if stable_since.elapsed() >= quiet {
                        return Ok(());
                    }
                    tokio::time::sleep(interval).await;
                }
            }
        }
    }

    async fn apply_step(
        &self,
        session: &WebDriverSession,
        source: &SourceDescriptor,
        step: &InteractionStep,
    ) -> Result<()> {
        log::debug!("[{}] step {:?}", source.id, step);
        match step {
            InteractionStep::Click { selector } => {
                let element = session.find_element(selector).await?.ok_or_else(|| {
                    AppError::fetch(&source.url, format!("no element to click: {selector}"))
                })?;
                session.click(&element).await
            }
            InteractionStep::WaitFor { selector } => {
                let readiness = Readiness::Element {
                    selector: selector.clone(),
                };
                self.wait_ready(session, source, &readiness).await
            }
            InteractionStep::Sleep { millis } => {
                tokio::time::sleep(Duration::from_millis(*millis)).await;
                Ok(())
            }
            InteractionStep::Script { source: script } => {
                session.execute(script).await?;
                Ok(())
            }
        }
    }
}

/// The locked session slot for one render.
///
/// Dropped without `keep()`, it takes the session out of the slot and closes
/// it in the background. A render cut off by a deadline therefore never hands
/// a page that is still navigating to the next source.
struct SessionLease<'a> {
    slot: MutexGuard<'a, Option<WebDriverSession>>,
    keep: bool,
}

impl SessionLease<'_> {
    fn keep(&mut self) {
        self.keep = true;
    }
}

impl Drop for SessionLease<'_> {
    fn drop(&mut self) {
        if self.keep {
            return;
        }
        let Some(session) = self.slot.take() else {
            return;
        };
        log::debug!("Discarding browser session {}", session.id());
        match tokio::runtime::Handle::try_current() {
            Ok(handle) => {
                handle.spawn(async move {
                    if let Err(e) = session.close().await {
                        log::debug!("Closing discarded browser session failed: {}", e);
                    }
                });
            }
            Err(_) => log::warn!("No runtime left to close browser session {}", session.id()),
        }
    }
}

#[async_trait]
impl Fetcher for BrowserFetcher {
    async fn fetch(&self, source: &SourceDescriptor) -> Result<String> {
        let mut lease = SessionLease {
            slot: self.session.lock().await,
            keep: false,
        };

        if lease.slot.is_none() {
            *lease.slot = Some(self.driver.new_session(&self.config).await?);
        }
        let Some(session) = lease.slot.as_ref() else {
            return Err(AppError::fetch(&source.url, "browser session unavailable"));
        };

        let result = self.render(session, source).await;
        match &result {
            Ok(html) => {
                log::debug!("[{}] rendered {} bytes", source.id, html.len());
                lease.keep();
            }
            Err(e) => log::warn!("[{}] browser fetch failed: {}", source.id, e),
        }
        result
    }

    async fn shutdown(&self) {
        self.close_session().await;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_poll_interval_has_floor() {
        let config = BrowserConfig {
            poll_interval_ms: 0,
            ..BrowserConfig::default()
        };
        let fetcher = BrowserFetcher::new(&config).unwrap();
        assert_eq!(fetcher.poll_interval(), Duration::from_millis(10));
        assert_eq!(fetcher.ready_timeout(), Duration::from_secs(30));
    }

    #[tokio::test]
    async fn test_unreachable_driver_is_fetch_error() {
        let config = BrowserConfig {
            webdriver_url: "http://127.0.0.1:9".into(),
            ..BrowserConfig::default()
        };
        let fetcher = BrowserFetcher::new(&config).unwrap();
        let mut source =
            SourceDescriptor::new("mtcte", "https://mtcte.tec.gov.in/", &["title"], &["title"]);
        source.strategy = crate::models::FetchStrategy::Interactive;

        let err = fetcher.fetch(&source).await.unwrap_err();
        assert!(matches!(err, AppError::Fetch { .. }));
    }
}
