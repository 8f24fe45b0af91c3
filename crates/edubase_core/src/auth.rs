//! crates/edubase_core/src/auth.rs
//!
//! Drives a page through the platform's login flow, either by filling the form
//! or by waiting for a human to finish an out-of-band login (SSO) in a visible window.
//!
//! The authenticator never retries on its own. Callers wrap it with
//! [`crate::retry::retry_async`] when they want a bounded retry.

use std::time::Duration;

use tokio::time::sleep;
use tracing::{debug, info, warn};

use crate::config::EdubaseConfig;
use crate::domain::Credentials;
use crate::ports::{LoadState, Locator, PageDriver, PortError};
use crate::retry::{poll, PollLimit};
use crate::selectors;

/// How the user proves who they are.
#[derive(Debug, Clone)]
pub enum LoginMode {
    Credentials(Credentials),
    /// A human completes the login in the browser window.
    Manual,
}

#[derive(Debug, thiserror::Error)]
pub enum AuthError {
    #[error("could not reach the login page: {0}")]
    NavigationTimeout(#[source] PortError),
    #[error("login form not ready: {0}")]
    FormNotFound(#[source] PortError),
    #[error("credentials were rejected")]
    CredentialsRejected,
    #[error("login failed (could not find account button)")]
    MarkerNotFound,
    #[error("manual login timeout: no successful login detected within {0:?}")]
    ManualTimeout(Duration),
    #[error("browser error during login: {0}")]
    Browser(#[source] PortError),
}

pub struct Authenticator<'a> {
    driver: &'a dyn PageDriver,
    config: &'a EdubaseConfig,
}

impl<'a> Authenticator<'a> {
    pub fn new(driver: &'a dyn PageDriver, config: &'a EdubaseConfig) -> Self {
        Self { driver, config }
    }

    pub async fn login(&self, mode: &LoginMode) -> Result<(), AuthError> {
        match mode {
            LoginMode::Credentials(credentials) => self.login_with_credentials(credentials).await,
            LoginMode::Manual => self.login_manually().await,
        }
    }

    /// Resets browser state, submits the login form and verifies the account marker.
    pub async fn login_with_credentials(&self, credentials: &Credentials) -> Result<(), AuthError> {
        let timeouts = &self.config.timeouts;
        let delays = &self.config.delays;
        debug!("Logging in as {}", credentials.email);

        self.driver
            .clear_browser_state()
            .await
            .map_err(AuthError::Browser)?;

        self.driver
            .goto(
                &selectors::login_url(&self.config.base_url),
                LoadState::Load,
                timeouts.login_navigation,
            )
            .await
            .map_err(AuthError::NavigationTimeout)?;

        // The app can reload itself right after the first paint.
        sleep(delays.login_page_settle).await;

        let email_input = Locator::new(selectors::LOGIN_EMAIL_INPUT);
        self.driver
            .wait_for_visible(&email_input, timeouts.login_form)
            .await
            .map_err(AuthError::FormNotFound)?;
        self.driver
            .fill(&email_input, &credentials.email)
            .await
            .map_err(AuthError::FormNotFound)?;

        sleep(delays.password_fill).await;

        let password_input = Locator::new(selectors::LOGIN_PASSWORD_INPUT);
        self.driver
            .fill(&password_input, &credentials.password)
            .await
            .map_err(AuthError::FormNotFound)?;
        self.driver
            .click(&Locator::new(selectors::LOGIN_SUBMIT_BUTTON))
            .await
            .map_err(AuthError::FormNotFound)?;

        self.driver
            .wait_for_load_state(LoadState::NetworkIdle, timeouts.login_load_state)
            .await
            .map_err(AuthError::NavigationTimeout)?;

        sleep(delays.verify_login).await;

        if self.account_marker_visible().await? {
            info!("Login successful");
            return Ok(());
        }

        // A form that is still on screen means the platform refused the credentials.
        let form_still_shown = self
            .driver
            .is_visible(&email_input)
            .await
            .map_err(AuthError::Browser)?;
        if form_still_shown {
            warn!("Login form still visible after submit");
            Err(AuthError::CredentialsRejected)
        } else {
            Err(AuthError::MarkerNotFound)
        }
    }

    /// Opens the login prompt and waits for the user to log in out-of-band.
    pub async fn login_manually(&self) -> Result<(), AuthError> {
        self.driver
            .goto(
                &selectors::login_url(&self.config.base_url),
                LoadState::Load,
                self.config.timeouts.login_navigation,
            )
            .await
            .map_err(AuthError::NavigationTimeout)?;

        info!("Waiting for the login to be completed in the browser window...");
        let policy = self.config.manual_login_poll;
        // Probe errors mean "not yet": redirects during the login replace the page
        // under the probe. Only the poll deadline ends the wait.
        let logged_in = poll(&policy, || async {
            let url = match self.driver.current_url().await {
                Ok(url) => url,
                Err(e) => {
                    debug!("Could not read the page URL yet: {}", e);
                    return Ok(None);
                }
            };
            if selectors::is_login_location(&url) {
                return Ok(None);
            }
            sleep(self.config.delays.verify_login).await;
            match self.account_marker_visible().await {
                Ok(visible) => Ok::<_, AuthError>(visible.then_some(())),
                Err(e) => {
                    debug!("Account marker probe failed: {}", e);
                    Ok(None)
                }
            }
        })
        .await?;

        match logged_in {
            Some(()) => {
                info!("Login successful");
                Ok(())
            }
            None => {
                let waited = match policy.limit {
                    PollLimit::Elapsed(max) => max,
                    PollLimit::Attempts(n) => policy.interval * n,
                };
                Err(AuthError::ManualTimeout(waited))
            }
        }
    }

    async fn account_marker_visible(&self) -> Result<bool, AuthError> {
        self.driver
            .is_visible(&Locator::new(selectors::ACCOUNT_MARKER))
            .await
            .map_err(AuthError::Browser)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::retry::{retry_async, RetryPolicy};
    use crate::testing::ScriptedPage;

    fn valid() -> Credentials {
        Credentials::new("reader@example.com", "secret")
    }

    #[tokio::test]
    async fn login_succeeds_with_accepted_credentials() {
        let page = ScriptedPage::builder().accept(valid()).build();
        let config = EdubaseConfig::immediate();
        let auth = Authenticator::new(&page, &config);

        auth.login(&LoginMode::Credentials(valid())).await.unwrap();

        assert!(page.is_logged_in());
        assert_eq!(page.filled(selectors::LOGIN_EMAIL_INPUT).as_deref(), Some("reader@example.com"));
        assert!(page.calls().starts_with(&["clear_browser_state".to_string()]));
    }

    #[tokio::test]
    async fn login_reports_rejected_credentials() {
        let page = ScriptedPage::builder().accept(valid()).build();
        let config = EdubaseConfig::immediate();
        let auth = Authenticator::new(&page, &config);

        let err = auth
            .login(&LoginMode::Credentials(Credentials::new("reader@example.com", "wrong")))
            .await
            .unwrap_err();

        assert!(matches!(err, AuthError::CredentialsRejected), "{err:?}");
    }

    #[tokio::test]
    async fn login_reports_missing_form() {
        let page = ScriptedPage::builder().accept(valid()).without_login_form().build();
        let config = EdubaseConfig::immediate();
        let auth = Authenticator::new(&page, &config);

        let err = auth.login(&LoginMode::Credentials(valid())).await.unwrap_err();

        assert!(matches!(err, AuthError::FormNotFound(_)), "{err:?}");
    }

    #[tokio::test]
    async fn login_resets_state_on_every_call() {
        let page = ScriptedPage::builder().accept(valid()).build();
        let config = EdubaseConfig::immediate();
        let auth = Authenticator::new(&page, &config);

        auth.login(&LoginMode::Credentials(valid())).await.unwrap();
        auth.login(&LoginMode::Credentials(valid())).await.unwrap();

        let resets = page
            .calls()
            .iter()
            .filter(|c| c.as_str() == "clear_browser_state")
            .count();
        assert_eq!(resets, 2);
    }

    #[tokio::test]
    async fn manual_login_waits_for_out_of_band_login() {
        let page = ScriptedPage::builder().manual_login_after_polls(2).build();
        let config = EdubaseConfig::immediate();
        let auth = Authenticator::new(&page, &config);

        auth.login(&LoginMode::Manual).await.unwrap();

        assert!(page.is_logged_in());
    }

    #[tokio::test]
    async fn manual_login_keeps_waiting_through_probe_errors() {
        let page = ScriptedPage::builder()
            .manual_login_after_polls(1)
            .fail_visibility_probes(1)
            .build();
        let config = EdubaseConfig::immediate();
        let auth = Authenticator::new(&page, &config);

        auth.login(&LoginMode::Manual).await.unwrap();

        assert!(page.is_logged_in());
    }

    #[tokio::test]
    async fn manual_login_times_out_when_probes_keep_failing() {
        let page = ScriptedPage::builder()
            .manual_login_after_polls(0)
            .fail_visibility_probes(u32::MAX)
            .build();
        let config = EdubaseConfig::immediate();
        let auth = Authenticator::new(&page, &config);

        let err = auth.login(&LoginMode::Manual).await.unwrap_err();

        assert!(matches!(err, AuthError::ManualTimeout(_)), "{err:?}");
    }

    #[tokio::test]
    async fn manual_login_times_out() {
        let page = ScriptedPage::builder().build();
        let config = EdubaseConfig::immediate();
        let auth = Authenticator::new(&page, &config);

        let err = auth.login(&LoginMode::Manual).await.unwrap_err();

        assert!(matches!(err, AuthError::ManualTimeout(_)), "{err:?}");
    }

    #[tokio::test]
    async fn retry_wrapper_recovers_from_a_transient_failure() {
        let page = ScriptedPage::builder()
            .accept(valid())
            .fail_login_navigation_times(1)
            .build();
        let config = EdubaseConfig::immediate();
        let auth = Authenticator::new(&page, &config);
        let mode = LoginMode::Credentials(valid());

        retry_async(&RetryPolicy::new(3, Duration::ZERO), "login", |_| auth.login(&mode))
            .await
            .unwrap();

        assert!(page.is_logged_in());
    }
}
