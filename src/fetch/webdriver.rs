// src/fetch/webdriver.rs

//! Minimal W3C WebDriver client over HTTP+JSON.
//!
//! Only the commands the interactive strategy needs: session lifecycle,
//! navigation, element lookup and click, script execution and page source.
//! Works against chromedriver or geckodriver.

use std::time::Duration;

use reqwest::{Client, Method};
use serde_json::{Value, json};

use crate::error::{AppError, Result};
use crate::models::BrowserConfig;

/// W3C element reference key.
const ELEMENT_KEY: &str = "element-6066-11e4-a52e-4f735466cecf";

/// Error returned by the remote end.
#[derive(Debug, Clone)]
pub struct WireError {
    /// W3C error code, e.g. `no such element`
    pub code: String,
    pub message: String,
}

impl WireError {
    fn is_no_such_element(&self) -> bool {
        self.code == "no such element"
    }
}

/// Connection to a WebDriver endpoint.
#[derive(Clone)]
pub struct WebDriverClient {
    http: Client,
    base_url: String,
}

impl WebDriverClient {
    pub fn new(base_url: impl Into<String>, command_timeout: Duration) -> Result<Self> {
        let http = Client::builder().timeout(command_timeout).build()?;
        Ok(Self {
            http,
            base_url: base_url.into().trim_end_matches('/').to_string(),
        })
    }

    fn endpoint(&self, path: &str) -> String {
        format!("{}{}", self.base_url, path)
    }

    /// Send one command and unwrap the `value` member of the response.
    async fn send(
        &self,
        method: Method,
        path: &str,
        body: Option<Value>,
    ) -> Result<std::result::Result<Value, WireError>> {
        let url = self.endpoint(path);
        let mut request = self.http.request(method, &url);
        if let Some(body) = body {
            request = request.json(&body);
        }

        let response = request
            .send()
            .await
            .map_err(|e| AppError::fetch(&url, format!("webdriver unreachable: {e}")))?;
        let status = response.status();
        let payload: Value = response
            .json()
            .await
            .map_err(|e| AppError::fetch(&url, format!("invalid webdriver response: {e}")))?;
        let value = payload.get("value").cloned().unwrap_or(Value::Null);

        if status.is_success() {
            return Ok(Ok(value));
        }

        Ok(Err(WireError {
            code: value
                .get("error")
                .and_then(Value::as_str)
                .unwrap_or("unknown error")
                .to_string(),
            message: value
                .get("message")
                .and_then(Value::as_str)
                .unwrap_or_default()
                .to_string(),
        }))
    }

    async fn command(&self, method: Method, path: &str, body: Option<Value>) -> Result<Value> {
        self.send(method, path, body).await?.map_err(|e| {
            AppError::fetch(self.endpoint(path), format!("{}: {}", e.code, e.message))
        })
    }

    /// Start a new browser session.
    pub async fn new_session(&self, config: &BrowserConfig) -> Result<WebDriverSession> {
        let mut args = config.args.clone();
        let mut firefox_args = Vec::new();
        if config.headless {
            args.push("--headless=new".to_string());
            firefox_args.push("-headless".to_string());
        }

        let capabilities = json!({
            "capabilities": {
                "alwaysMatch": {
                    "browserName": config.browser_name,
                    "pageLoadStrategy": "normal",
                    "timeouts": {
                        "pageLoad": config.page_load_timeout_secs * 1_000,
                        "script": config.ready_timeout_secs * 1_000,
                    },
                    "goog:chromeOptions": { "args": args },
                    "moz:firefoxOptions": { "args": firefox_args },
                }
            }
        });

        let value = self
            .command(Method::POST, "/session", Some(capabilities))
            .await?;
        let id = value
            .get("sessionId")
            .and_then(Value::as_str)
            .ok_or_else(|| {
                AppError::fetch(self.endpoint("/session"), "response has no sessionId")
            })?;

        log::info!("Started WebDriver session {}", id);
        Ok(WebDriverSession {
            client: self.clone(),
            id: id.to_string(),
        })
    }
}

/// One live browser session.
pub struct WebDriverSession {
    client: WebDriverClient,
    id: String,
}

impl WebDriverSession {
    pub fn id(&self) -> &str {
        &self.id
    }

    fn path(&self, suffix: &str) -> String {
        format!("/session/{}{}", self.id, suffix)
    }

    pub async fn navigate(&self, url: &str) -> Result<()> {
        self.client
            .command(Method::POST, &self.path("/url"), Some(json!({ "url": url })))
            .await?;
        Ok(())
    }

    /// Find the first element matching a CSS selector; `None` when absent.
    pub async fn find_element(&self, selector: &str) -> Result<Option<String>> {
        let body = json!({ "using": "css selector", "value": selector });
        let path = self.path("/element");
        match self.client.send(Method::POST, &path, Some(body)).await? {
            Ok(value) => Ok(value
                .get(ELEMENT_KEY)
                .and_then(Value::as_str)
                .map(str::to_string)),
            Err(e) if e.is_no_such_element() => Ok(None),
            Err(e) => Err(AppError::fetch(
                self.client.endpoint(&path),
                format!("{}: {}", e.code, e.message),
            )),
        }
    }

    pub async fn click(&self, element_id: &str) -> Result<()> {
        let path = self.path(&format!("/element/{element_id}/click"));
        self.client
            .command(Method::POST, &path, Some(json!({})))
            .await?;
        Ok(())
    }

    /// Run a synchronous script and return its result.
    pub async fn execute(&self, script: &str) -> Result<Value> {
        let body = json!({ "script": script, "args": [] });
        self.client
            .command(Method::POST, &self.path("/execute/sync"), Some(body))
            .await
    }

    /// Run an asynchronous script; the script receives a completion callback
    /// as its last argument.
    pub async fn execute_async(&self, script: &str) -> Result<Value> {
        let body = json!({ "script": script, "args": [] });
        self.client
            .command(Method::POST, &self.path("/execute/async"), Some(body))
            .await
    }

    /// Serialized DOM of the current page.
    pub async fn source(&self) -> Result<String> {
        let value = self
            .client
            .command(Method::GET, &self.path("/source"), None)
            .await?;
        value.as_str().map(str::to_string).ok_or_else(|| {
            AppError::fetch(
                self.client.endpoint(&self.path("/source")),
                "source is not a string",
            )
        })
    }

    /// End the session and close the browser.
    pub async fn close(self) -> Result<()> {
        self.client
            .command(Method::DELETE, &self.path(""), None)
            .await?;
        log::info!("Closed WebDriver session {}", self.id);
        Ok(())
    }
}
