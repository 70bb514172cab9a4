// src/fetch/mod.rs

//! Fetch adapter: raw page content for a source descriptor.
//!
//! - `StaticFetcher`: one HTTP request with bounded retries
//! - `BrowserFetcher`: a WebDriver session renders the page first
//!
//! Both sit behind the `Fetcher` trait; `FetchAdapter` picks one per source
//! from its configured strategy.

pub mod browser;
pub mod http;
pub mod retry;
pub mod webdriver;

use async_trait::async_trait;

use crate::error::{AppError, Result};
use crate::models::{Config, FetchStrategy, SourceDescriptor};

pub use browser::BrowserFetcher;
pub use http::StaticFetcher;
pub use retry::RetryPolicy;

/// Returns raw page content for a source, or a fetch error.
#[async_trait]
pub trait Fetcher: Send + Sync {
    async fn fetch(&self, source: &SourceDescriptor) -> Result<String>;

    /// Release long-lived resources (browser sessions). Default: nothing.
    async fn shutdown(&self) {}
}

/// Dispatches to the static or interactive strategy per source.
pub struct FetchAdapter {
    http: StaticFetcher,
    browser: Option<BrowserFetcher>,
}

impl FetchAdapter {
    /// Build the adapter; a browser fetcher is only created when some source
    /// needs it.
    pub fn new(config: &Config) -> Result<Self> {
        let browser = if config.needs_browser() {
            Some(BrowserFetcher::new(&config.browser)?)
        } else {
            None
        };
        Ok(Self {
            http: StaticFetcher::new(&config.fetch)?,
            browser,
        })
    }
}

#[async_trait]
impl Fetcher for FetchAdapter {
    async fn fetch(&self, source: &SourceDescriptor) -> Result<String> {
        match source.strategy {
            FetchStrategy::Static => self.http.fetch(source).await,
            FetchStrategy::Interactive => match &self.browser {
                Some(browser) => browser.fetch(source).await,
                None => Err(AppError::fetch(
                    &source.url,
                    "interactive source but no browser configured",
                )),
            },
        }
    }

    async fn shutdown(&self) {
        if let Some(browser) = &self.browser {
            browser.close_session().await;
        }
    }
}
