//! Browser driver port + admin screen knowledge: layout selectors, page-state detection,
//! table-driven navigation, pagination, login and DOM extraction.
//!
//! Every DOM read goes through [`AdminPage::content`] and is parsed with `scraper`, so the
//! detection and extraction helpers are plain functions over HTML that can be tested
//! against captured markup.

use std::path::Path;
use std::time::Duration;

use async_trait::async_trait;
use scraper::{Html, Selector};
use thiserror::Error;

pub mod chrome;
pub mod content;
pub mod extract;
#[cfg(any(test, feature = "fake"))]
pub mod fake;
pub mod pagination;
pub mod selectors;
pub mod session;
pub mod state;

pub use chrome::ChromeLauncher;
pub use content::{AdminUrls, ContentNavigator, ContentScreen, ContentSection, FieldKind, FormField};
pub use pagination::{next_page, parse_pager, PageStep, PagerLink, PagerSnapshot};
pub use session::{login, verify_dashboard, AdminSession, Credentials};
pub use state::{
    content_detector, navigate_to, NavigationPolicy, ScreenState, StateDetector, TransitionAction,
    TransitionTable,
};

pub const CRATE_NAME: &str = "q4mig-screens";

#[derive(Debug, Error)]
pub enum DriverError {
    #[error("browser launch failed: {0}")]
    Launch(String),
    #[error("navigation to {url} failed: {reason}")]
    Navigation { url: String, reason: String },
    #[error("no element matches {selector}")]
    ElementNotFound { selector: String },
    #[error("interaction with {selector} failed: {reason}")]
    Interaction { selector: String, reason: String },
    #[error("page is closed")]
    Closed,
}

#[derive(Debug, Error)]
pub enum ScreenError {
    #[error(transparent)]
    Driver(#[from] DriverError),
    #[error("invalid selector {selector}: {reason}")]
    InvalidSelector { selector: String, reason: String },
    #[error("no transition defined from {from} to {to}")]
    NoTransition { from: String, to: String },
    #[error("expected screen {target}, still on {reached}")]
    StateNotReached { target: String, reached: String },
    #[error("login failed after {attempts} attempts: {reason}")]
    LoginFailed { attempts: usize, reason: String },
    #[error("dashboard marker not found at {url}")]
    DashboardNotVerified { url: String },
    #[error("missing environment variable {0}")]
    MissingCredential(&'static str),
    #[error("{0}")]
    Extraction(String),
}

/// One authenticated browser tab. Implemented by the Chrome driver and by the
/// in-memory fake used in tests.
#[async_trait]
pub trait AdminPage: Send + Sync {
    async fn goto(&self, url: &str) -> Result<(), DriverError>;
    async fn content(&self) -> Result<String, DriverError>;
    async fn current_url(&self) -> Result<String, DriverError>;
    async fn click(&self, selector: &str) -> Result<(), DriverError>;
    /// Click the `index`-th element (document order) matching `selector`.
    async fn click_nth(&self, selector: &str, index: usize) -> Result<(), DriverError>;
    async fn fill(&self, selector: &str, text: &str) -> Result<(), DriverError>;
    /// Select the option whose visible text or value equals `value`.
    async fn select_option(&self, selector: &str, value: &str) -> Result<(), DriverError>;
    async fn upload_file(&self, selector: &str, path: &Path) -> Result<(), DriverError>;
    /// Wait until `selector` matches; `Ok(false)` on timeout.
    async fn wait_for(&self, selector: &str, timeout: Duration) -> Result<bool, DriverError>;
    async fn close(&self) -> Result<(), DriverError>;
}

#[async_trait]
pub trait BrowserLauncher: Send + Sync {
    async fn launch(&self) -> Result<Box<dyn AdminPage>, DriverError>;
}

pub(crate) fn parse_selector(selector: &str) -> Result<Selector, ScreenError> {
    Selector::parse(selector).map_err(|e| ScreenError::InvalidSelector {
        selector: selector.to_string(),
        reason: e.to_string(),
    })
}

pub(crate) fn text_or_none(value: String) -> Option<String> {
    let trimmed = value.split_whitespace().collect::<Vec<_>>().join(" ");
    if trimmed.is_empty() {
        None
    } else {
        Some(trimmed)
    }
}

pub(crate) fn select_first_text(document: &Html, selector: &str) -> Result<Option<String>, ScreenError> {
    let sel = parse_selector(selector)?;
    Ok(document
        .select(&sel)
        .next()
        .and_then(|n| text_or_none(n.text().collect::<String>())))
}

pub(crate) fn select_all_texts(document: &Html, selector: &str) -> Result<Vec<String>, ScreenError> {
    let sel = parse_selector(selector)?;
    Ok(document
        .select(&sel)
        .filter_map(|n| text_or_none(n.text().collect::<String>()))
        .collect())
}

pub(crate) fn select_first_attr(
    document: &Html,
    selector: &str,
    attr: &str,
) -> Result<Option<String>, ScreenError> {
    let sel = parse_selector(selector)?;
    Ok(document
        .select(&sel)
        .next()
        .and_then(|n| n.value().attr(attr))
        .and_then(|s| text_or_none(s.to_string())))
}

pub fn has_selector(html: &str, selector: &str) -> Result<bool, ScreenError> {
    let sel = parse_selector(selector)?;
    let document = Html::parse_document(html);
    let found = document.select(&sel).next().is_some();
    Ok(found)
}

pub fn count_matches(html: &str, selector: &str) -> Result<usize, ScreenError> {
    let sel = parse_selector(selector)?;
    let document = Html::parse_document(html);
    let count = document.select(&sel).count();
    Ok(count)
}

/// True when `marker` appears verbatim in the page's visible text.
pub fn document_contains_text(html: &str, marker: &str) -> bool {
    let document = Html::parse_document(html);
    let text = document.root_element().text().collect::<Vec<_>>().join(" ");
    let collapsed = text.split_whitespace().collect::<Vec<_>>().join(" ");
    collapsed.contains(marker)
}
