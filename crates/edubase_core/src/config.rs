//! crates/edubase_core/src/config.rs
//!
//! The immutable configuration value handed to every component constructor.
//! Defaults reproduce the timings the platform's web app needs in practice.

use std::time::Duration;

use crate::retry::{PollPolicy, RetryPolicy};

pub const DEFAULT_BASE_URL: &str = "https://app.edubase.ch";

/// Timeouts for single browser operations.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Timeouts {
    pub login_navigation: Duration,
    pub login_form: Duration,
    pub login_load_state: Duration,
    pub book_navigation: Duration,
    pub element_visible: Duration,
}

impl Default for Timeouts {
    fn default() -> Self {
        Self {
            login_navigation: Duration::from_secs(60),
            login_form: Duration::from_secs(30),
            login_load_state: Duration::from_secs(60),
            book_navigation: Duration::from_secs(15),
            element_visible: Duration::from_secs(10),
        }
    }
}

/// Fixed settle delays inserted after UI-mutating actions.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Delays {
    /// After the login page loads; the app may reload itself once.
    pub login_page_settle: Duration,
    pub password_fill: Duration,
    pub verify_login: Duration,
    /// Before reading the library, opening a book or reading the page count.
    pub initial: Duration,
    /// Before each page capture.
    pub page: Duration,
    /// Before extracting page text.
    pub text_extraction: Duration,
}

impl Default for Delays {
    fn default() -> Self {
        Self {
            login_page_settle: Duration::from_secs(2),
            password_fill: Duration::from_millis(500),
            verify_login: Duration::from_millis(500),
            initial: Duration::from_millis(500),
            page: Duration::from_millis(500),
            text_extraction: Duration::from_millis(500),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EdubaseConfig {
    pub base_url: String,
    pub timeouts: Timeouts,
    pub delays: Delays,
    /// Reading the asynchronously populated page-count indicator.
    pub page_count_poll: PollPolicy,
    /// Waiting for a human to finish logging in.
    pub manual_login_poll: PollPolicy,
    /// Applied by callers that wrap the authenticator.
    pub login_retry: RetryPolicy,
}

impl Default for EdubaseConfig {
    fn default() -> Self {
        Self {
            base_url: DEFAULT_BASE_URL.to_string(),
            timeouts: Timeouts::default(),
            delays: Delays::default(),
            page_count_poll: PollPolicy::attempts(10, Duration::from_millis(500)),
            manual_login_poll: PollPolicy::elapsed(Duration::from_secs(300), Duration::from_secs(1)),
            login_retry: RetryPolicy::new(3, Duration::from_secs(2)),
        }
    }
}

impl EdubaseConfig {
    pub fn with_base_url(mut self, base_url: impl Into<String>) -> Self {
        self.base_url = base_url.into().trim_end_matches('/').to_string();
        self
    }

    pub fn with_page_delay(mut self, delay: Duration) -> Self {
        self.delays.page = delay;
        self
    }

    /// A configuration with every delay and interval set to zero and tight
    /// attempt bounds, for driving scripted browsers in tests.
    pub fn immediate() -> Self {
        Self {
            base_url: DEFAULT_BASE_URL.to_string(),
            timeouts: Timeouts::default(),
            delays: Delays {
                login_page_settle: Duration::ZERO,
                password_fill: Duration::ZERO,
                verify_login: Duration::ZERO,
                initial: Duration::ZERO,
                page: Duration::ZERO,
                text_extraction: Duration::ZERO,
            },
            page_count_poll: PollPolicy::attempts(10, Duration::ZERO),
            manual_login_poll: PollPolicy::attempts(5, Duration::ZERO),
            login_retry: RetryPolicy::new(3, Duration::ZERO),
        }
    }
}
