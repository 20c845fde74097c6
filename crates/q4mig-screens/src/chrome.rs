//! `AdminPage` over a real Chrome tab. `headless_chrome` is blocking, so every call runs
//! on the blocking pool with its own handle to the tab.

use std::ffi::OsStr;
use std::path::Path;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use headless_chrome::protocol::cdp::DOM;
use headless_chrome::{Browser, LaunchOptions, Tab};
use tracing::debug;

use crate::{AdminPage, BrowserLauncher, DriverError};

#[derive(Debug, Clone)]
pub struct ChromeLauncher {
    pub headless: bool,
    pub window: (u32, u32),
    pub wait_timeout: Duration,
    pub step_delay: Duration,
}

impl Default for ChromeLauncher {
    fn default() -> Self {
        Self {
            headless: true,
            window: (1440, 900),
            wait_timeout: Duration::from_secs(5),
            step_delay: Duration::from_millis(750),
        }
    }
}

#[async_trait]
impl BrowserLauncher for ChromeLauncher {
    async fn launch(&self) -> Result<Box<dyn AdminPage>, DriverError> {
        let headless = self.headless;
        let window = self.window;
        let (browser, tab) = tokio::task::spawn_blocking(move || {
            let options = LaunchOptions::default_builder()
                .headless(headless)
                .window_size(Some(window))
                .idle_browser_timeout(Duration::from_secs(600))
                .args(vec![OsStr::new("--disable-gpu")])
                .build()
                .map_err(|e| DriverError::Launch(e.to_string()))?;
            let browser = Browser::new(options).map_err(|e| DriverError::Launch(e.to_string()))?;
            let tab = browser
                .new_tab()
                .map_err(|e| DriverError::Launch(e.to_string()))?;
            Ok::<_, DriverError>((browser, tab))
        })
        .await
        .map_err(|e| DriverError::Launch(e.to_string()))??;

        debug!(headless, "chrome launched");
        Ok(Box::new(ChromePage {
            _browser: browser,
            tab,
            wait_timeout: self.wait_timeout,
            step_delay: self.step_delay,
        }))
    }
}

pub struct ChromePage {
    // Dropping the browser kills the process; it lives as long as the page.
    _browser: Browser,
    tab: Arc<Tab>,
    wait_timeout: Duration,
    step_delay: Duration,
}

impl ChromePage {
    async fn blocking<T, F>(&self, f: F) -> Result<T, DriverError>
    where
        T: Send + 'static,
        F: FnOnce(Arc<Tab>) -> Result<T, DriverError> + Send + 'static,
    {
        let tab = Arc::clone(&self.tab);
        tokio::task::spawn_blocking(move || f(tab))
            .await
            .map_err(|_| DriverError::Closed)?
    }

    /// Pause between interactions so the admin's postbacks settle.
    async fn settle(&self) {
        if !self.step_delay.is_zero() {
            tokio::time::sleep(self.step_delay).await;
        }
    }
}

fn interaction(selector: &str, err: impl ToString) -> DriverError {
    DriverError::Interaction {
        selector: selector.to_string(),
        reason: err.to_string(),
    }
}

/// Set a form control's value and fire the events the admin's scripts listen for.
fn set_value_script(selector: &str, value: &str) -> Result<String, DriverError> {
    let sel = serde_json::to_string(selector).map_err(|e| interaction(selector, e))?;
    let val = serde_json::to_string(value).map_err(|e| interaction(selector, e))?;
    Ok(format!(
        "(() => {{ const el = document.querySelector({sel}); if (!el) return false; \
         el.value = {val}; \
         el.dispatchEvent(new Event('input', {{ bubbles: true }})); \
         el.dispatchEvent(new Event('change', {{ bubbles: true }})); return true; }})()"
    ))
}

fn select_script(selector: &str, value: &str) -> Result<String, DriverError> {
    let sel = serde_json::to_string(selector).map_err(|e| interaction(selector, e))?;
    let val = serde_json::to_string(value).map_err(|e| interaction(selector, e))?;
    Ok(format!(
        "(() => {{ const el = document.querySelector({sel}); if (!el) return false; \
         const opt = Array.from(el.options).find(o => o.text.trim() === {val} || o.value === {val}); \
         if (!opt) return false; el.value = opt.value; \
         el.dispatchEvent(new Event('change', {{ bubbles: true }})); return true; }})()"
    ))
}

fn evaluated_true(result: &headless_chrome::protocol::cdp::Runtime::RemoteObject) -> bool {
    result
        .value
        .as_ref()
        .and_then(|v| v.as_bool())
        .unwrap_or(false)
}

#[async_trait]
impl AdminPage for ChromePage {
    async fn goto(&self, url: &str) -> Result<(), DriverError> {
        let url = url.to_string();
        self.blocking(move |tab| {
            tab.navigate_to(&url)
                .and_then(|t| t.wait_until_navigated())
                .map(|_| ())
                .map_err(|e| DriverError::Navigation {
                    url: url.clone(),
                    reason: e.to_string(),
                })
        })
        .await
    }

    async fn content(&self) -> Result<String, DriverError> {
        self.blocking(|tab| {
            tab.get_content().map_err(|e| DriverError::Interaction {
                selector: "html".into(),
                reason: e.to_string(),
            })
        })
        .await
    }

    async fn current_url(&self) -> Result<String, DriverError> {
        self.blocking(|tab| Ok(tab.get_url())).await
    }

    async fn click(&self, selector: &str) -> Result<(), DriverError> {
        let selector = selector.to_string();
        let timeout = self.wait_timeout;
        self.blocking(move |tab| {
            let element = tab
                .wait_for_element_with_custom_timeout(&selector, timeout)
                .map_err(|_| DriverError::ElementNotFound {
                    selector: selector.clone(),
                })?;
            element.click().map_err(|e| interaction(&selector, e))?;
            Ok(())
        })
        .await?;
        self.settle().await;
        Ok(())
    }

    async fn click_nth(&self, selector: &str, index: usize) -> Result<(), DriverError> {
        let selector = selector.to_string();
        self.blocking(move |tab| {
            let elements = tab
                .find_elements(&selector)
                .map_err(|_| DriverError::ElementNotFound {
                    selector: selector.clone(),
                })?;
            let element = elements.get(index).ok_or_else(|| DriverError::ElementNotFound {
                selector: format!("{selector} [{index}]"),
            })?;
            element.click().map_err(|e| interaction(&selector, e))?;
            Ok(())
        })
        .await?;
        self.settle().await;
        Ok(())
    }

    async fn fill(&self, selector: &str, text: &str) -> Result<(), DriverError> {
        let script = set_value_script(selector, text)?;
        let selector = selector.to_string();
        self.blocking(move |tab| {
            let result = tab.evaluate(&script, false).map_err(|e| interaction(&selector, e))?;
            if evaluated_true(&result) {
                Ok(())
            } else {
                Err(DriverError::ElementNotFound { selector })
            }
        })
        .await
    }

    async fn select_option(&self, selector: &str, value: &str) -> Result<(), DriverError> {
        let script = select_script(selector, value)?;
        let selector = selector.to_string();
        let value = value.to_string();
        self.blocking(move |tab| {
            let result = tab.evaluate(&script, false).map_err(|e| interaction(&selector, e))?;
            if evaluated_true(&result) {
                Ok(())
            } else {
                Err(interaction(&selector, format!("no option {value}")))
            }
        })
        .await
    }

    async fn upload_file(&self, selector: &str, path: &Path) -> Result<(), DriverError> {
        let selector = selector.to_string();
        let file = path.to_string_lossy().into_owned();
        let timeout = self.wait_timeout;
        self.blocking(move |tab| {
            let element = tab
                .wait_for_element_with_custom_timeout(&selector, timeout)
                .map_err(|_| DriverError::ElementNotFound {
                    selector: selector.clone(),
                })?;
            tab.call_method(DOM::SetFileInputFiles {
                files: vec![file],
                node_id: None,
                backend_node_id: None,
                object_id: Some(element.remote_object_id.clone()),
            })
            .map_err(|e| interaction(&selector, e))?;
            Ok(())
        })
        .await?;
        self.settle().await;
        Ok(())
    }

    async fn wait_for(&self, selector: &str, timeout: Duration) -> Result<bool, DriverError> {
        let selector = selector.to_string();
        self.blocking(move |tab| {
            Ok(tab
                .wait_for_element_with_custom_timeout(&selector, timeout)
                .is_ok())
        })
        .await
    }

    async fn close(&self) -> Result<(), DriverError> {
        self.blocking(|tab| {
            tab.close(true)
                .map(|_| ())
                .map_err(|e| interaction("tab", e))
        })
        .await
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn scripts_quote_selectors_and_values() {
        let script = set_value_script("#txtTitle", "O'Neil \"CFO\"").unwrap();
        assert!(script.contains(r##"document.querySelector("#txtTitle")"##));
        assert!(script.contains(r#""O'Neil \"CFO\"""#));

        let script = select_script("select#ddlCommittee", "Audit").unwrap();
        assert!(script.contains(r#"o.text.trim() === "Audit""#));
    }
}
