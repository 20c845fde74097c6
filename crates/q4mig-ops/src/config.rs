use std::path::PathBuf;
use std::time::Duration;

use q4mig_screens::AdminUrls;

#[derive(Debug, Clone)]
pub struct RunConfig {
    pub sites_file: PathBuf,
    pub state_file: PathBuf,
    pub data_dir: PathBuf,
    pub admin_url_template: String,
    pub max_concurrent_sites: usize,
    pub headless: bool,
    pub step_delay: Duration,
    pub wait_timeout: Duration,
}

impl Default for RunConfig {
    fn default() -> Self {
        Self {
            sites_file: PathBuf::from("./sites.json"),
            state_file: PathBuf::from("./run-state.json"),
            data_dir: PathBuf::from("./data"),
            admin_url_template: "https://{subdomain}.s4.q4web.com".to_string(),
            max_concurrent_sites: 3,
            headless: true,
            step_delay: Duration::from_millis(750),
            wait_timeout: Duration::from_millis(5000),
        }
    }
}

impl RunConfig {
    pub fn from_env() -> Self {
        let defaults = Self::default();
        Self {
            sites_file: std::env::var("Q4MIG_SITES_FILE")
                .map(PathBuf::from)
                .unwrap_or(defaults.sites_file),
            state_file: std::env::var("Q4MIG_STATE_FILE")
                .map(PathBuf::from)
                .unwrap_or(defaults.state_file),
            data_dir: std::env::var("Q4MIG_DATA_DIR")
                .map(PathBuf::from)
                .unwrap_or(defaults.data_dir),
            admin_url_template: std::env::var("Q4MIG_ADMIN_URL_TEMPLATE")
                .unwrap_or(defaults.admin_url_template),
            max_concurrent_sites: std::env::var("Q4MIG_MAX_CONCURRENT_SITES")
                .ok()
                .and_then(|v| v.parse().ok())
                .filter(|n| *n > 0)
                .unwrap_or(defaults.max_concurrent_sites),
            headless: std::env::var("Q4MIG_HEADLESS")
                .map(|v| !matches!(v.as_str(), "0" | "false" | "FALSE" | "False"))
                .unwrap_or(defaults.headless),
            step_delay: std::env::var("Q4MIG_STEP_DELAY_MS")
                .ok()
                .and_then(|v| v.parse().ok())
                .map(Duration::from_millis)
                .unwrap_or(defaults.step_delay),
            wait_timeout: std::env::var("Q4MIG_WAIT_TIMEOUT_MS")
                .ok()
                .and_then(|v| v.parse().ok())
                .map(Duration::from_millis)
                .unwrap_or(defaults.wait_timeout),
        }
    }

    pub fn urls_for(&self, subdomain: &str) -> AdminUrls {
        AdminUrls::from_template(&self.admin_url_template, subdomain)
    }
}

/// Bounds shared by login, screen transitions and per-record retries.
#[derive(Debug, Clone, Copy)]
pub struct RetryPolicy {
    pub attempts: usize,
    pub delay: Duration,
    /// Extra reopenings of an FAQ edit form whose answer rendered empty.
    pub empty_answer_retries: usize,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            attempts: 3,
            delay: Duration::from_millis(750),
            empty_answer_retries: 3,
        }
    }
}

#[derive(Debug, Clone)]
pub struct DrainConfig {
    /// Consecutive observations without progress before a delete loop gives up.
    pub stuck_limit: usize,
    pub delete_comment: String,
}

impl Default for DrainConfig {
    fn default() -> Self {
        Self {
            stuck_limit: 10,
            delete_comment: "Removed during content migration".to_string(),
        }
    }
}

/// Thresholds for reconciling scraped person names with curated committee members.
#[derive(Debug, Clone, Copy)]
pub struct MatchConfig {
    pub normalized_confidence: f64,
    pub strict_fuzzy: f64,
    pub loose_fuzzy: f64,
    pub ordered_token_min: usize,
    pub ordered_token_confidence: f64,
}

impl Default for MatchConfig {
    fn default() -> Self {
        Self {
            normalized_confidence: 0.95,
            strict_fuzzy: 0.85,
            loose_fuzzy: 0.75,
            ordered_token_min: 2,
            ordered_token_confidence: 0.9,
        }
    }
}
