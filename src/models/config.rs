//! Application configuration structures.

use std::collections::HashSet;
use std::fs;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

use crate::error::{AppError, Result};
use crate::models::{FetchStrategy, SourceDescriptor};

/// Root application configuration.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Config {
    /// HTTP behavior for the static strategy
    #[serde(default)]
    pub fetch: FetchConfig,

    /// WebDriver settings for the interactive strategy
    #[serde(default)]
    pub browser: BrowserConfig,

    /// Where master stores and deltas live
    #[serde(default)]
    pub storage: StorageConfig,

    /// Batch scheduling
    #[serde(default)]
    pub engine: EngineConfig,

    /// Text preprocessing settings
    #[serde(default)]
    pub cleaning: CleaningConfig,

    /// Watched sources
    #[serde(default)]
    pub sources: Vec<SourceDescriptor>,
}

impl Config {
    /// Load configuration from a TOML file. A missing or malformed file is
    /// an error; there is no fallback to defaults.
    pub fn load(path: impl AsRef<Path>) -> Result<Self> {
        let content = fs::read_to_string(path)?;
        Ok(toml::from_str(&content)?)
    }

    /// Validate configuration values for basic sanity.
    pub fn validate(&self) -> Result<()> {
        if self.fetch.user_agent.trim().is_empty() {
            return Err(AppError::validation("fetch.user_agent is empty"));
        }
        if self.fetch.timeout_secs == 0 {
            return Err(AppError::validation("fetch.timeout_secs must be > 0"));
        }
        if self.fetch.retry.max_attempts == 0 {
            return Err(AppError::validation("fetch.retry.max_attempts must be > 0"));
        }
        if self.fetch.retry.max_delay_ms < self.fetch.retry.base_delay_ms {
            return Err(AppError::validation(
                "fetch.retry.max_delay_ms must be >= base_delay_ms",
            ));
        }
        if self.browser.ready_timeout_secs == 0 || self.browser.page_load_timeout_secs == 0 {
            return Err(AppError::validation("browser timeouts must be > 0"));
        }
        if self.engine.max_concurrent == 0 {
            return Err(AppError::validation("engine.max_concurrent must be > 0"));
        }
        if self.engine.source_timeout_secs == 0 {
            return Err(AppError::validation("engine.source_timeout_secs must be > 0"));
        }
        if self.engine.max_candidates == 0 {
            return Err(AppError::validation("engine.max_candidates must be > 0"));
        }
        if self.sources.is_empty() {
            return Err(AppError::validation("No sources defined"));
        }

        let mut ids = HashSet::new();
        for source in &self.sources {
            source.validate().map_err(AppError::validation)?;
            if !ids.insert(source.id.as_str()) {
                return Err(AppError::validation(format!(
                    "duplicate source id '{}'",
                    source.id
                )));
            }
            if source.extract.is_none() {
                return Err(AppError::validation(format!(
                    "source '{}' has no extract rules",
                    source.id
                )));
            }
        }
        Ok(())
    }

    /// Whether any source needs a browser session.
    pub fn needs_browser(&self) -> bool {
        self.sources
            .iter()
            .any(|s| s.strategy == FetchStrategy::Interactive)
    }

    /// Look up a source by id.
    pub fn source(&self, id: &str) -> Option<&SourceDescriptor> {
        self.sources.iter().find(|s| s.id == id)
    }
}

/// HTTP client behavior for static fetches.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FetchConfig {
    /// User-Agent header for HTTP requests
    #[serde(default = "defaults::user_agent")]
    pub user_agent: String,

    /// Accept-Language header
    #[serde(default = "defaults::accept_language")]
    pub accept_language: String,

    /// Request timeout in seconds
    #[serde(default = "defaults::timeout")]
    pub timeout_secs: u64,

    /// Retry/backoff policy for transient failures
    #[serde(default)]
    pub retry: RetryConfig,
}

impl Default for FetchConfig {
    fn default() -> Self {
        Self {
            user_agent: defaults::user_agent(),
            accept_language: defaults::accept_language(),
            timeout_secs: defaults::timeout(),
            retry: RetryConfig::default(),
        }
    }
}

/// Retry policy shared by all static sources.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RetryConfig {
    /// Total attempts, including the first
    #[serde(default = "defaults::max_attempts")]
    pub max_attempts: u32,

    /// Delay before the first retry
    #[serde(default = "defaults::base_delay")]
    pub base_delay_ms: u64,

    /// Upper bound for any single delay, including Retry-After hints
    #[serde(default = "defaults::max_delay")]
    pub max_delay_ms: u64,

    /// Add up to 50% random jitter to computed delays
    #[serde(default = "defaults::jitter")]
    pub jitter: bool,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            max_attempts: defaults::max_attempts(),
            base_delay_ms: defaults::base_delay(),
            max_delay_ms: defaults::max_delay(),
            jitter: defaults::jitter(),
        }
    }
}

/// WebDriver endpoint and browser session settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BrowserConfig {
    /// chromedriver / geckodriver endpoint
    #[serde(default = "defaults::webdriver_url")]
    pub webdriver_url: String,

    /// Browser name requested in capabilities
    #[serde(default = "defaults::browser_name")]
    pub browser_name: String,

    /// Run without a visible window
    #[serde(default = "defaults::headless")]
    pub headless: bool,

    /// Extra browser command line arguments
    #[serde(default = "defaults::browser_args")]
    pub args: Vec<String>,

    /// Navigation timeout in seconds
    #[serde(default = "defaults::page_load_timeout")]
    pub page_load_timeout_secs: u64,

    /// Readiness wait timeout in seconds
    #[serde(default = "defaults::ready_timeout")]
    pub ready_timeout_secs: u64,

    /// Poll interval for readiness checks
    #[serde(default = "defaults::poll_interval")]
    pub poll_interval_ms: u64,
}

impl Default for BrowserConfig {
    fn default() -> Self {
        Self {
            webdriver_url: defaults::webdriver_url(),
            browser_name: defaults::browser_name(),
            headless: defaults::headless(),
            args: defaults::browser_args(),
            page_load_timeout_secs: defaults::page_load_timeout(),
            ready_timeout_secs: defaults::ready_timeout(),
            poll_interval_ms: defaults::poll_interval(),
        }
    }
}

/// Storage location settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StorageConfig {
    /// Directory holding `{source}_master.csv` and `{source}_new_entries.json`
    #[serde(default = "defaults::data_dir")]
    pub data_dir: PathBuf,
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self {
            data_dir: defaults::data_dir(),
        }
    }
}

/// Batch scheduling settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EngineConfig {
    /// Sources processed at the same time
    #[serde(default = "defaults::max_concurrent")]
    pub max_concurrent: usize,

    /// Deadline for one source's fetch and extraction
    #[serde(default = "defaults::source_timeout")]
    pub source_timeout_secs: u64,

    /// Default candidate window for sources without their own
    #[serde(default = "defaults::max_candidates")]
    pub max_candidates: usize,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            max_concurrent: defaults::max_concurrent(),
            source_timeout_secs: defaults::source_timeout(),
            max_candidates: defaults::max_candidates(),
        }
    }
}

/// Text cleaning/preprocessing settings.
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct CleaningConfig {
    /// Substrings removed from every extracted text value
    #[serde(default)]
    pub remove_patterns: Vec<String>,

    /// Text replacements applied after removal
    #[serde(default)]
    pub replacements: Vec<Replacement>,
}

impl CleaningConfig {
    /// Normalize whitespace, drop removable substrings and apply replacements.
    pub fn clean(&self, text: &str) -> String {
        let mut result = Self::normalize_whitespace(text);

        for pattern in &self.remove_patterns {
            result = result.replace(pattern, "");
        }

        for r in &self.replacements {
            result = result.replace(&r.from, &r.to);
        }

        result.trim().to_string()
    }

    fn normalize_whitespace(s: &str) -> String {
        s.split_whitespace().collect::<Vec<_>>().join(" ")
    }
}

/// A text replacement rule.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Replacement {
    pub from: String,
    pub to: String,
}

mod defaults {
    use std::path::PathBuf;

    // Fetch defaults
    pub fn user_agent() -> String {
        "Mozilla/5.0 (Windows NT 10.0; Win64; x64) AppleWebKit/537.36 \
         (KHTML, like Gecko) Chrome/120.0.0.0 Safari/537.36"
            .into()
    }
    pub fn accept_language() -> String {
        "en-IN,en;q=0.9".into()
    }
    pub fn timeout() -> u64 {
        30
    }
    pub fn max_attempts() -> u32 {
        6
    }
    pub fn base_delay() -> u64 {
        700
    }
    pub fn max_delay() -> u64 {
        30_000
    }
    pub fn jitter() -> bool {
        true
    }

    // Browser defaults
    pub fn webdriver_url() -> String {
        "http://localhost:9515".into()
    }
    pub fn browser_name() -> String {
        "chrome".into()
    }
    pub fn headless() -> bool {
        true
    }
    pub fn browser_args() -> Vec<String> {
        vec![
            "--no-sandbox".into(),
            "--disable-dev-shm-usage".into(),
            "--disable-blink-features=AutomationControlled".into(),
        ]
    }
    pub fn page_load_timeout() -> u64 {
        60
    }
    pub fn ready_timeout() -> u64 {
        30
    }
    pub fn poll_interval() -> u64 {
        250
    }

    // Storage defaults
    pub fn data_dir() -> PathBuf {
        PathBuf::from("data")
    }

    // Engine defaults
    pub fn max_concurrent() -> usize {
        4
    }
    pub fn source_timeout() -> u64 {
        120
    }
    pub fn max_candidates() -> usize {
        10
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{ExtractSpec, FieldSpec};

    fn valid_config() -> Config {
        let mut source = SourceDescriptor::new(
            "fiu",
            "https://fiuindia.gov.in/files/Compliance_Orders/orders.html",
            &["title", "pdf_link"],
            &["date", "title", "pdf_link"],
        );
        source.extract = Some(ExtractSpec {
            container: None,
            row: "tbody tr".into(),
            skip_rows: 0,
            fields: vec![FieldSpec::text("title", "td")],
        });
        Config {
            sources: vec![source],
            ..Config::default()
        }
    }

    #[test]
    fn validate_valid_config_ok() {
        assert!(valid_config().validate().is_ok());
    }

    #[test]
    fn validate_rejects_empty_user_agent() {
        let mut config = valid_config();
        config.fetch.user_agent = "  ".to_string();
        assert!(config.validate().is_err());
    }

    #[test]
    fn validate_rejects_zero_concurrency() {
        let mut config = valid_config();
        config.engine.max_concurrent = 0;
        assert!(config.validate().is_err());
    }

    #[test]
    fn validate_rejects_duplicate_sources() {
        let mut config = valid_config();
        let dup = config.sources[0].clone();
        config.sources.push(dup);
        assert!(config.validate().is_err());
    }

    #[test]
    fn validate_rejects_missing_extract_rules() {
        let mut config = valid_config();
        config.sources[0].extract = None;
        assert!(config.validate().is_err());
    }

    #[test]
    fn defaults_fill_missing_sections() {
        let config: Config = toml::from_str(
            r#"
            [engine]
            max_concurrent = 2
            "#,
        )
        .unwrap();
        assert_eq!(config.engine.max_concurrent, 2);
        assert_eq!(config.engine.max_candidates, 10);
        assert_eq!(config.fetch.retry.max_attempts, 6);
        assert_eq!(config.storage.data_dir, PathBuf::from("data"));
        assert!(!config.needs_browser());
    }

    #[test]
    fn cleaning_normalizes_whitespace() {
        let cleaning = CleaningConfig {
            remove_patterns: vec!["NEW".into()],
            replacements: vec![Replacement {
                from: "\u{a0}".into(),
                to: " ".into(),
            }],
        };
        assert_eq!(cleaning.clean("  Circular \n  No. 5 NEW "), "Circular No. 5");
    }

    #[test]
    fn load_rejects_malformed_toml() {
        let tmp = tempfile::TempDir::new().unwrap();
        let path = tmp.path().join("config.toml");
        fs::write(&path, "[[sources]]\nid = \"dot\"\nidentity = [\"title\"\n").unwrap();

        assert!(matches!(Config::load(&path), Err(AppError::Toml(_))));
        assert!(matches!(
            Config::load(tmp.path().join("missing.toml")),
            Err(AppError::Io(_))
        ));
    }
}
