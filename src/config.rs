//! Configuration loading.
//!
//! Settings come from an optional TOML file with serde-supplied defaults
//! for everything, so a bare `reviews scrape <url>` works with no file at
//! all. Target URLs may come from the file, the command line, or both.

use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::Deserialize;
use tracing::debug;

use crate::error::ConfigError;
use crate::models::{Retailer, ScrapeTarget};
use crate::rate_limit::RateLimitConfig;
use crate::session::SessionConfig;

/// Conventional config location, relative to the working directory.
pub const DEFAULT_CONFIG_PATH: &str = "reviewscrape.toml";

#[derive(Debug, Clone, Deserialize, Default)]
#[serde(deny_unknown_fields)]
pub struct Settings {
    #[serde(default)]
    pub database: DatabaseSettings,
    #[serde(default)]
    pub rate_limit: RateLimitSettings,
    #[serde(default)]
    pub scraping: ScrapingSettings,
    /// Product URLs to scrape when the command line names none.
    #[serde(default)]
    pub targets: Vec<String>,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct DatabaseSettings {
    #[serde(default = "default_db_path")]
    pub path: PathBuf,
}

impl Default for DatabaseSettings {
    fn default() -> Self {
        Self {
            path: default_db_path(),
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct RateLimitSettings {
    #[serde(default = "default_base_delay_ms")]
    pub base_delay_ms: u64,
    #[serde(default = "default_max_delay_ms")]
    pub max_delay_ms: u64,
    #[serde(default = "default_backoff_multiplier")]
    pub backoff_multiplier: f64,
}

impl Default for RateLimitSettings {
    fn default() -> Self {
        Self {
            base_delay_ms: default_base_delay_ms(),
            max_delay_ms: default_max_delay_ms(),
            backoff_multiplier: default_backoff_multiplier(),
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct ScrapingSettings {
    #[serde(default = "default_max_retries")]
    pub max_retries: u32,
    #[serde(default = "default_max_pages")]
    pub max_pages: u32,
    #[serde(default = "default_max_concurrent")]
    pub max_concurrent: usize,
    #[serde(default = "default_request_timeout_secs")]
    pub request_timeout_secs: u64,
}

impl Default for ScrapingSettings {
    fn default() -> Self {
        Self {
            max_retries: default_max_retries(),
            max_pages: default_max_pages(),
            max_concurrent: default_max_concurrent(),
            request_timeout_secs: default_request_timeout_secs(),
        }
    }
}

fn default_db_path() -> PathBuf {
    PathBuf::from("data/reviews.db")
}
fn default_base_delay_ms() -> u64 {
    2000
}
fn default_max_delay_ms() -> u64 {
    60_000
}
fn default_backoff_multiplier() -> f64 {
    2.0
}
fn default_max_retries() -> u32 {
    3
}
fn default_max_pages() -> u32 {
    10
}
fn default_max_concurrent() -> usize {
    4
}
fn default_request_timeout_secs() -> u64 {
    30
}

impl Settings {
    /// Load from an explicit path, or from the conventional path if it
    /// exists, or fall back to built-in defaults.
    pub fn load(path: Option<&Path>) -> Result<Self, ConfigError> {
        match path {
            Some(path) => Self::from_file(path),
            None => {
                let conventional = Path::new(DEFAULT_CONFIG_PATH);
                if conventional.exists() {
                    Self::from_file(conventional)
                } else {
                    debug!("no config file, using defaults");
                    Ok(Self::default())
                }
            }
        }
    }

    fn from_file(path: &Path) -> Result<Self, ConfigError> {
        let body = std::fs::read_to_string(path).map_err(|source| ConfigError::Read {
            path: path.to_path_buf(),
            source,
        })?;
        let settings: Self = toml::from_str(&body).map_err(|source| ConfigError::Parse {
            path: path.to_path_buf(),
            source,
        })?;
        debug!(path = %path.display(), "config loaded");
        Ok(settings)
    }

    /// Turn configured and command-line URLs into scrape targets,
    /// classifying each by retailer domain. Command-line URLs take the
    /// place of configured ones when present.
    pub fn resolve_targets(&self, cli_urls: &[String]) -> Result<Vec<ScrapeTarget>, ConfigError> {
        let urls = if cli_urls.is_empty() {
            &self.targets
        } else {
            cli_urls
        };
        if urls.is_empty() {
            return Err(ConfigError::NoTargets);
        }
        urls.iter()
            .map(|url| {
                Retailer::for_url(url)
                    .map(|retailer| ScrapeTarget {
                        retailer,
                        url: url.clone(),
                    })
                    .ok_or_else(|| ConfigError::UnknownRetailer(url.clone()))
            })
            .collect()
    }

    pub fn rate_limit_config(&self) -> RateLimitConfig {
        RateLimitConfig {
            base_delay: Duration::from_millis(self.rate_limit.base_delay_ms),
            max_delay: Duration::from_millis(self.rate_limit.max_delay_ms),
            backoff_multiplier: self.rate_limit.backoff_multiplier,
        }
    }

    pub fn session_config(&self) -> SessionConfig {
        SessionConfig {
            max_retries: self.scraping.max_retries,
            max_pages: self.scraping.max_pages,
        }
    }

    pub fn request_timeout(&self) -> Duration {
        Duration::from_secs(self.scraping.request_timeout_secs)
    }
}

/// Starter config written by `reviews init`.
pub const SAMPLE_CONFIG: &str = r#"# reviewscrape configuration

# Product pages to scrape when `reviews scrape` is run without URLs.
targets = [
    # "https://www.walmart.com/ip/example-product/12345",
]

[database]
path = "data/reviews.db"

[rate_limit]
base_delay_ms = 2000
max_delay_ms = 60000
backoff_multiplier = 2.0

[scraping]
max_retries = 3
max_pages = 10
max_concurrent = 4
request_timeout_secs = 30
"#;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_are_sane() {
        let settings = Settings::default();
        assert_eq!(settings.scraping.max_retries, 3);
        assert_eq!(settings.scraping.max_pages, 10);
        assert_eq!(
            settings.rate_limit_config().base_delay,
            Duration::from_secs(2)
        );
        assert_eq!(settings.request_timeout(), Duration::from_secs(30));
    }

    #[test]
    fn parses_partial_file_with_defaults_filled_in() {
        let settings: Settings = toml::from_str(
            r#"
            targets = ["https://www.ulta.com/p/kit-pimprod123"]

            [scraping]
            max_retries = 5
            "#,
        )
        .unwrap();
        assert_eq!(settings.scraping.max_retries, 5);
        assert_eq!(settings.scraping.max_pages, 10);
        assert_eq!(settings.targets.len(), 1);
    }

    #[test]
    fn sample_config_round_trips() {
        let settings: Settings = toml::from_str(SAMPLE_CONFIG).unwrap();
        assert_eq!(settings.database.path, PathBuf::from("data/reviews.db"));
        assert!(settings.targets.is_empty());
    }

    #[test]
    fn unknown_keys_are_rejected() {
        assert!(toml::from_str::<Settings>("[scrapin]\nmax_retries = 1").is_err());
    }

    #[test]
    fn classifies_targets_by_domain() {
        let settings = Settings {
            targets: vec![
                "https://www.walmart.com/ip/a/1".into(),
                "https://www.target.com/p/b/-/A-2".into(),
            ],
            ..Default::default()
        };
        let targets = settings.resolve_targets(&[]).unwrap();
        assert_eq!(targets[0].retailer, Retailer::Walmart);
        assert_eq!(targets[1].retailer, Retailer::Target);
    }

    #[test]
    fn cli_urls_override_configured_targets() {
        let settings = Settings {
            targets: vec!["https://www.walmart.com/ip/a/1".into()],
            ..Default::default()
        };
        let targets = settings
            .resolve_targets(&["https://www.ulta.com/p/kit-pimprod9".to_string()])
            .unwrap();
        assert_eq!(targets.len(), 1);
        assert_eq!(targets[0].retailer, Retailer::Ulta);
    }

    #[test]
    fn unknown_retailer_is_an_error() {
        let settings = Settings::default();
        let err = settings
            .resolve_targets(&["https://www.amazon.com/dp/B000".to_string()])
            .unwrap_err();
        assert!(matches!(err, ConfigError::UnknownRetailer(_)));
    }

    #[test]
    fn empty_everything_is_no_targets() {
        assert!(matches!(
            Settings::default().resolve_targets(&[]),
            Err(ConfigError::NoTargets)
        ));
    }
}
