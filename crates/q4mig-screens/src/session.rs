//! Login and dashboard verification for one admin instance.

use std::fmt;

use q4mig_storage::retry_bounded;
use tracing::{info, warn};

use crate::content::AdminUrls;
use crate::selectors;
use crate::state::{detect_current, NavigationPolicy, StateDetector};
use crate::{document_contains_text, AdminPage, BrowserLauncher, ScreenError};

pub const USERNAME_ENV: &str = "Q4_ADMIN_USERNAME";
pub const PASSWORD_ENV: &str = "Q4_ADMIN_PASSWORD";

#[derive(Clone)]
pub struct Credentials {
    pub username: String,
    pub password: String,
}

impl Credentials {
    pub fn new(username: impl Into<String>, password: impl Into<String>) -> Self {
        Self {
            username: username.into(),
            password: password.into(),
        }
    }

    pub fn from_env() -> Result<Self, ScreenError> {
        let username = non_empty_env(USERNAME_ENV)?;
        let password = non_empty_env(PASSWORD_ENV)?;
        Ok(Self { username, password })
    }
}

impl fmt::Debug for Credentials {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Credentials")
            .field("username", &self.username)
            .field("password", &"<redacted>")
            .finish()
    }
}

fn non_empty_env(key: &'static str) -> Result<String, ScreenError> {
    match std::env::var(key) {
        Ok(value) if !value.trim().is_empty() => Ok(value),
        _ => Err(ScreenError::MissingCredential(key)),
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionState {
    LoginForm,
    AdminShell,
    Unknown,
}

pub fn session_detector() -> Result<StateDetector<SessionState>, ScreenError> {
    StateDetector::new(SessionState::Unknown)
        .rule(SessionState::LoginForm, &[selectors::LOGIN_FORM])?
        .rule(SessionState::AdminShell, &[selectors::ADMIN_NAV])
}

/// An authenticated tab on one admin instance. Operations chained on one site share it.
pub struct AdminSession {
    page: Box<dyn AdminPage>,
    urls: AdminUrls,
}

impl AdminSession {
    pub fn new(page: Box<dyn AdminPage>, urls: AdminUrls) -> Self {
        Self { page, urls }
    }

    pub fn page(&self) -> &dyn AdminPage {
        self.page.as_ref()
    }

    pub fn urls(&self) -> &AdminUrls {
        &self.urls
    }

    pub async fn close(self) -> Result<(), ScreenError> {
        self.page.close().await?;
        Ok(())
    }
}

/// Launch a tab and sign in, retrying the whole form submission. The tab is closed when
/// every attempt fails.
pub async fn login(
    launcher: &dyn BrowserLauncher,
    urls: AdminUrls,
    credentials: &Credentials,
    policy: &NavigationPolicy,
) -> Result<AdminSession, ScreenError> {
    let page = launcher.launch().await?;
    let detector = session_detector()?;

    let outcome = retry_bounded(
        &policy.backoff,
        "login",
        |attempt| {
            let page = page.as_ref();
            let detector = &detector;
            let urls = &urls;
            async move {
                page.goto(&urls.login()).await?;
                page.wait_for(selectors::LOGIN_FORM, policy.wait_timeout).await?;
                if detect_current(page, detector).await? == SessionState::LoginForm {
                    page.fill(selectors::LOGIN_USERNAME, &credentials.username).await?;
                    page.fill(selectors::LOGIN_PASSWORD, &credentials.password).await?;
                    page.click(selectors::LOGIN_SUBMIT).await?;
                    page.wait_for(selectors::ADMIN_NAV, policy.wait_timeout).await?;
                }
                let html = page.content().await?;
                if detector.detect(&html) == SessionState::AdminShell
                    && document_contains_text(&html, selectors::DASHBOARD_MARKER)
                {
                    Ok(())
                } else {
                    Err(ScreenError::DashboardNotVerified {
                        url: format!("{} (attempt {})", page.current_url().await?, attempt + 1),
                    })
                }
            }
        },
        |err| matches!(err, ScreenError::InvalidSelector { .. }),
    )
    .await;

    match outcome {
        Ok(()) => {
            info!(site = urls.base(), "logged in");
            Ok(AdminSession::new(page, urls))
        }
        Err(err) => {
            if let Err(close_err) = page.close().await {
                warn!(error = %close_err, "closing tab after failed login");
            }
            Err(ScreenError::LoginFailed {
                attempts: policy.backoff.max_attempts.max(1),
                reason: err.to_string(),
            })
        }
    }
}

/// Load the dashboard and require the authenticated-only marker text.
pub async fn verify_dashboard(session: &AdminSession, policy: &NavigationPolicy) -> Result<(), ScreenError> {
    let page = session.page();
    let url = session.urls().dashboard();
    page.goto(&url).await?;
    page.wait_for(selectors::ADMIN_NAV, policy.wait_timeout).await?;
    let html = page.content().await?;
    if document_contains_text(&html, selectors::DASHBOARD_MARKER) {
        Ok(())
    } else {
        Err(ScreenError::DashboardNotVerified { url })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::fake::{FakeAdmin, FakeLauncher};

    fn urls() -> AdminUrls {
        AdminUrls::new("https://acme.example")
    }

    #[test]
    fn debug_output_redacts_the_password() {
        let creds = Credentials::new("ops@acme.example", "hunter2");
        let printed = format!("{creds:?}");
        assert!(printed.contains("ops@acme.example"));
        assert!(!printed.contains("hunter2"));
    }

    #[tokio::test]
    async fn login_reaches_the_dashboard() {
        let admin = FakeAdmin::new("ops", "secret");
        let launcher = FakeLauncher::new(admin.clone());
        let session = login(
            &launcher,
            urls(),
            &Credentials::new("ops", "secret"),
            &NavigationPolicy::immediate(),
        )
        .await
        .unwrap();
        verify_dashboard(&session, &NavigationPolicy::immediate())
            .await
            .unwrap();
        session.close().await.unwrap();
        assert!(admin.is_closed());
    }

    #[tokio::test]
    async fn transient_login_failures_are_retried() {
        let admin = FakeAdmin::new("ops", "secret");
        admin.set_login_failures(2);
        let launcher = FakeLauncher::new(admin.clone());
        let session = login(
            &launcher,
            urls(),
            &Credentials::new("ops", "secret"),
            &NavigationPolicy::immediate(),
        )
        .await
        .unwrap();
        let submits = admin
            .action_log()
            .iter()
            .filter(|a| a.contains(selectors::LOGIN_SUBMIT))
            .count();
        assert_eq!(submits, 3);
        session.close().await.unwrap();
    }

    #[tokio::test]
    async fn wrong_password_fails_and_closes_the_tab() {
        let admin = FakeAdmin::new("ops", "secret");
        let launcher = FakeLauncher::new(admin.clone());
        let err = login(
            &launcher,
            urls(),
            &Credentials::new("ops", "wrong"),
            &NavigationPolicy::immediate(),
        )
        .await
        .err()
        .unwrap();
        assert!(matches!(err, ScreenError::LoginFailed { attempts: 3, .. }));
        assert!(admin.is_closed());
    }

    #[test]
    fn session_detector_tells_login_from_shell() {
        let detector = session_detector().unwrap();
        assert_eq!(
            detector.detect("<form id='loginForm'></form>"),
            SessionState::LoginForm
        );
        assert_eq!(
            detector.detect("<nav id='adminNav'></nav>"),
            SessionState::AdminShell
        );
        assert_eq!(detector.detect("<p>502</p>"), SessionState::Unknown);
    }
}
