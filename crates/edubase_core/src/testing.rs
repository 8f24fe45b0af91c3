//! crates/edubase_core/src/testing.rs
//!
//! In-memory stand-ins for the ports: a scripted page that mimics the platform's
//! web app closely enough for the protocol code, a launcher handing out such
//! pages, and an assembler that writes one line per page instead of a real PDF.
//!
//! Only compiled for tests or with the `testing` feature.

use std::collections::{HashMap, VecDeque};
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;

use async_trait::async_trait;

use crate::config::DEFAULT_BASE_URL;
use crate::domain::Credentials;
use crate::ports::{
    BrowserLauncher, LaunchOptions, LoadState, Locator, PageContent, PageDriver, PdfAssembler,
    PortError, PortResult, ScreenshotOptions,
};
use crate::selectors;

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}

//=========================================================================================
// ScriptedPage
//=========================================================================================

/// Builder for [`ScriptedPage`]. Cloneable so a launcher can build a fresh page
/// per launch.
#[derive(Debug, Clone, Default)]
pub struct ScriptedPageBuilder {
    accepted: Option<Credentials>,
    without_login_form: bool,
    manual_login_after_polls: Option<u32>,
    fail_login_navigation: u32,
    fail_visibility_probes: u32,
    books: Vec<(String, String)>,
    pages: u32,
    pagination_texts: Vec<String>,
    page_texts: HashMap<u32, String>,
    fail_screenshot_on: Option<u32>,
    fail_next_on: Option<u32>,
    capture_delay: Duration,
}

impl ScriptedPageBuilder {
    /// Credentials the login form accepts.
    pub fn accept(mut self, credentials: Credentials) -> Self {
        self.accepted = Some(credentials);
        self
    }

    /// The login page never renders its form.
    pub fn without_login_form(mut self) -> Self {
        self.without_login_form = true;
        self
    }

    /// A human "finishes" an out-of-band login after `polls` URL reads.
    pub fn manual_login_after_polls(mut self, polls: u32) -> Self {
        self.manual_login_after_polls = Some(polls);
        self
    }

    /// The first `times` navigations to the login page time out.
    pub fn fail_login_navigation_times(mut self, times: u32) -> Self {
        self.fail_login_navigation = times;
        self
    }

    /// The first `times` visibility probes fail the way a page does while it
    /// is being replaced by a redirect.
    pub fn fail_visibility_probes(mut self, times: u32) -> Self {
        self.fail_visibility_probes = times;
        self
    }

    /// Adds a library entry with a raw id attribute.
    pub fn book(mut self, id: impl Into<String>, title: impl Into<String>) -> Self {
        self.books.push((id.into(), title.into()));
        self
    }

    /// Number of pages of every book this page opens.
    pub fn pages(mut self, pages: u32) -> Self {
        self.pages = pages;
        self
    }

    /// Successive texts of the pagination indicator; once used up the
    /// indicator reads `"/ {pages}"`.
    pub fn pagination_texts<I, S>(mut self, texts: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.pagination_texts = texts.into_iter().map(Into::into).collect();
        self
    }

    pub fn page_text(mut self, page: u32, text: impl Into<String>) -> Self {
        self.page_texts.insert(page, text.into());
        self
    }

    pub fn fail_screenshot_on(mut self, page: u32) -> Self {
        self.fail_screenshot_on = Some(page);
        self
    }

    pub fn fail_next_on(mut self, page: u32) -> Self {
        self.fail_next_on = Some(page);
        self
    }

    /// Makes every capture take `delay`, to observe jobs while they run.
    pub fn capture_delay(mut self, delay: Duration) -> Self {
        self.capture_delay = delay;
        self
    }

    pub fn build(self) -> ScriptedPage {
        let state = PageState {
            url: "about:blank".to_string(),
            pagination_texts: self.pagination_texts.iter().cloned().collect(),
            ..PageState::default()
        };
        ScriptedPage {
            script: self,
            state: Mutex::new(state),
        }
    }
}

#[derive(Debug, Default)]
struct PageState {
    url: String,
    logged_in: bool,
    url_polls: u32,
    login_navigation_failures: u32,
    visibility_failures: u32,
    filled: HashMap<String, String>,
    calls: Vec<String>,
    pagination_texts: VecDeque<String>,
    current_page: u32,
    captured: Vec<u32>,
    written: Vec<PathBuf>,
    next_clicks: u32,
    viewport: Option<(u32, u32)>,
    closed: bool,
}

/// A fake browser page that follows the platform's login, library and reader
/// behaviour.
#[derive(Debug)]
pub struct ScriptedPage {
    script: ScriptedPageBuilder,
    state: Mutex<PageState>,
}

impl ScriptedPage {
    pub fn builder() -> ScriptedPageBuilder {
        ScriptedPageBuilder::default()
    }

    pub fn is_logged_in(&self) -> bool {
        lock(&self.state).logged_in
    }

    /// The last value filled into the input matching `selector`.
    pub fn filled(&self, selector: &str) -> Option<String> {
        lock(&self.state).filled.get(selector).cloned()
    }

    /// Names of the driver operations in call order.
    pub fn calls(&self) -> Vec<String> {
        lock(&self.state).calls.clone()
    }

    pub fn current_page(&self) -> u32 {
        lock(&self.state).current_page
    }

    /// Book pages captured so far, in capture order.
    pub fn captured_pages(&self) -> Vec<u32> {
        lock(&self.state).captured.clone()
    }

    pub fn written_files(&self) -> Vec<PathBuf> {
        lock(&self.state).written.clone()
    }

    pub fn next_clicks(&self) -> u32 {
        lock(&self.state).next_clicks
    }

    pub fn viewport(&self) -> Option<(u32, u32)> {
        lock(&self.state).viewport
    }

    pub fn is_closed(&self) -> bool {
        lock(&self.state).closed
    }

    fn record(&self, call: impl Into<String>) -> MutexGuard<'_, PageState> {
        let mut state = lock(&self.state);
        state.calls.push(call.into());
        state
    }

    fn visible(&self, state: &PageState, locator: &Locator) -> bool {
        let on_login = selectors::is_login_location(&state.url);
        let in_book = state.url.contains("#doc/") && self.script.pages > 0;
        match locator.selector() {
            selectors::LOGIN_EMAIL_INPUT
            | selectors::LOGIN_PASSWORD_INPUT
            | selectors::LOGIN_SUBMIT_BUTTON => {
                on_login && !state.logged_in && !self.script.without_login_form
            }
            selectors::ACCOUNT_MARKER => state.logged_in,
            selectors::LIBRARY_ITEMS => locator.index() < self.script.books.len(),
            selectors::LIBRARY_ITEM_TITLE => locator
                .parent()
                .map(|p| p.index() < self.script.books.len())
                .unwrap_or(false),
            selectors::PAGINATION_INDICATOR
            | selectors::NEXT_PAGE_BUTTON
            | selectors::PAGE_CONTENT => in_book,
            _ => false,
        }
    }

    fn book(&self, locator: &Locator) -> PortResult<&(String, String)> {
        self.script
            .books
            .get(locator.index())
            .ok_or_else(|| PortError::NotFound(locator.selector().to_string()))
    }
}

#[async_trait]
impl PageDriver for ScriptedPage {
    async fn goto(&self, url: &str, _state: LoadState, _timeout: Duration) -> PortResult<()> {
        let mut state = self.record(format!("goto {}", url));
        if selectors::is_login_location(url)
            && state.login_navigation_failures < self.script.fail_login_navigation
        {
            state.login_navigation_failures += 1;
            return Err(PortError::Timeout(format!("navigating to {}", url)));
        }
        if let Some((_, rest)) = url.split_once("#doc/") {
            state.current_page = rest
                .rsplit('/')
                .next()
                .and_then(|p| p.parse().ok())
                .unwrap_or(1);
        }
        state.url = url.to_string();
        Ok(())
    }

    async fn wait_for_load_state(&self, _state: LoadState, _timeout: Duration) -> PortResult<()> {
        Ok(())
    }

    async fn wait_for_visible(&self, locator: &Locator, _timeout: Duration) -> PortResult<()> {
        let state = self.record(format!("wait_for_visible {}", locator.selector()));
        if self.visible(&state, locator) {
            Ok(())
        } else {
            Err(PortError::Timeout(format!(
                "waiting for {} to be visible",
                locator.selector()
            )))
        }
    }

    async fn is_visible(&self, locator: &Locator) -> PortResult<bool> {
        let mut state = lock(&self.state);
        if state.visibility_failures < self.script.fail_visibility_probes {
            state.visibility_failures += 1;
            return Err(PortError::Browser("Execution context was destroyed".to_string()));
        }
        Ok(self.visible(&state, locator))
    }

    async fn count(&self, selector: &str) -> PortResult<usize> {
        let state = lock(&self.state);
        Ok(match selector {
            selectors::LIBRARY_ITEMS => self.script.books.len(),
            other => usize::from(self.visible(&state, &Locator::new(other))),
        })
    }

    async fn inner_text(&self, locator: &Locator) -> PortResult<String> {
        let mut state = lock(&self.state);
        match locator.selector() {
            selectors::LIBRARY_ITEM_TITLE => {
                let parent = locator
                    .parent()
                    .ok_or_else(|| PortError::NotFound(locator.selector().to_string()))?;
                Ok(self.book(&parent)?.1.clone())
            }
            selectors::PAGINATION_INDICATOR if self.visible(&state, locator) => Ok(state
                .pagination_texts
                .pop_front()
                .unwrap_or_else(|| format!("/ {}", self.script.pages))),
            other => Err(PortError::NotFound(other.to_string())),
        }
    }

    async fn attribute(&self, locator: &Locator, name: &str) -> PortResult<Option<String>> {
        if locator.selector() == selectors::LIBRARY_ITEMS
            && name == selectors::LIBRARY_ITEM_ID_ATTRIBUTE
        {
            return Ok(Some(self.book(locator)?.0.clone()));
        }
        Ok(None)
    }

    async fn fill(&self, locator: &Locator, value: &str) -> PortResult<()> {
        let mut state = self.record(format!("fill {}", locator.selector()));
        if !self.visible(&state, locator) {
            return Err(PortError::NotFound(locator.selector().to_string()));
        }
        state
            .filled
            .insert(locator.selector().to_string(), value.to_string());
        Ok(())
    }

    async fn click(&self, locator: &Locator) -> PortResult<()> {
        let mut state = self.record(format!("click {}", locator.selector()));
        if !self.visible(&state, locator) {
            return Err(PortError::NotFound(locator.selector().to_string()));
        }
        match locator.selector() {
            selectors::LOGIN_SUBMIT_BUTTON => {
                let submitted = Credentials::new(
                    state
                        .filled
                        .get(selectors::LOGIN_EMAIL_INPUT)
                        .cloned()
                        .unwrap_or_default(),
                    state
                        .filled
                        .get(selectors::LOGIN_PASSWORD_INPUT)
                        .cloned()
                        .unwrap_or_default(),
                );
                if self.script.accepted.as_ref() == Some(&submitted) {
                    state.logged_in = true;
                    state.url = format!("{}/#library", DEFAULT_BASE_URL);
                }
            }
            selectors::NEXT_PAGE_BUTTON => {
                if self.script.fail_next_on == Some(state.current_page) {
                    return Err(PortError::Browser(format!(
                        "next-page control detached on page {}",
                        state.current_page
                    )));
                }
                state.next_clicks += 1;
                if state.current_page < self.script.pages {
                    state.current_page += 1;
                }
            }
            _ => {}
        }
        Ok(())
    }

    async fn screenshot(
        &self,
        locator: &Locator,
        path: &Path,
        _options: ScreenshotOptions,
    ) -> PortResult<()> {
        if !self.script.capture_delay.is_zero() {
            tokio::time::sleep(self.script.capture_delay).await;
        }
        let mut state = self.record(format!("screenshot {}", locator.selector()));
        let page = state.current_page;
        if self.script.fail_screenshot_on == Some(page) {
            return Err(PortError::Browser(format!("page {} did not render", page)));
        }
        if !self.visible(&state, locator) {
            return Err(PortError::NotFound(locator.selector().to_string()));
        }
        std::fs::write(path, format!("page {}", page))?;
        state.captured.push(page);
        state.written.push(path.to_path_buf());
        Ok(())
    }

    async fn evaluate(&self, script: &str) -> PortResult<serde_json::Value> {
        let state = lock(&self.state);
        if script == selectors::PAGE_TEXT_SCRIPT {
            let text = self
                .script
                .page_texts
                .get(&state.current_page)
                .cloned()
                .unwrap_or_default();
            return Ok(serde_json::Value::String(text));
        }
        Ok(serde_json::Value::Null)
    }

    async fn clear_browser_state(&self) -> PortResult<()> {
        let mut state = self.record("clear_browser_state");
        state.logged_in = false;
        state.filled.clear();
        Ok(())
    }

    async fn current_url(&self) -> PortResult<String> {
        let mut state = lock(&self.state);
        if let Some(after) = self.script.manual_login_after_polls {
            if selectors::is_login_location(&state.url) {
                state.url_polls += 1;
                if state.url_polls > after {
                    state.logged_in = true;
                    state.url = format!("{}/#library", DEFAULT_BASE_URL);
                }
            }
        }
        Ok(state.url.clone())
    }

    async fn set_viewport(&self, width: u32, height: u32) -> PortResult<()> {
        let mut state = self.record(format!("set_viewport {}x{}", width, height));
        state.viewport = Some((width, height));
        Ok(())
    }

    async fn close(&self) -> PortResult<()> {
        let mut state = self.record("close");
        state.closed = true;
        Ok(())
    }
}

//=========================================================================================
// ScriptedLauncher
//=========================================================================================

/// Hands out a fresh [`ScriptedPage`] per launch and remembers every one.
#[derive(Debug, Default)]
pub struct ScriptedLauncher {
    template: Option<ScriptedPageBuilder>,
    launched: Mutex<Vec<Arc<ScriptedPage>>>,
    options: Mutex<Vec<LaunchOptions>>,
}

impl ScriptedLauncher {
    pub fn new(template: ScriptedPageBuilder) -> Self {
        Self {
            template: Some(template),
            ..Self::default()
        }
    }

    /// A launcher whose browser never starts.
    pub fn failing() -> Self {
        Self::default()
    }

    pub fn launch_count(&self) -> usize {
        lock(&self.launched).len()
    }

    pub fn last_page(&self) -> Option<Arc<ScriptedPage>> {
        lock(&self.launched).last().cloned()
    }

    pub fn pages(&self) -> Vec<Arc<ScriptedPage>> {
        lock(&self.launched).clone()
    }

    pub fn launch_options(&self) -> Vec<LaunchOptions> {
        lock(&self.options).clone()
    }
}

#[async_trait]
impl BrowserLauncher for ScriptedLauncher {
    async fn launch(&self, options: &LaunchOptions) -> PortResult<Arc<dyn PageDriver>> {
        lock(&self.options).push(options.clone());
        let template = self
            .template
            .clone()
            .ok_or_else(|| PortError::Browser("no browser executable found".to_string()))?;
        let page = Arc::new(template.build());
        lock(&self.launched).push(page.clone());
        Ok(page)
    }
}

//=========================================================================================
// CountingAssembler
//=========================================================================================

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AppendedPage {
    pub pdf: PathBuf,
    pub image: PathBuf,
    pub content: PageContent,
}

/// Writes one `page` line per appended image. `page_count` counts the lines,
/// shifted by an optional skew to simulate a broken writer.
#[derive(Debug, Default)]
pub struct CountingAssembler {
    skew: i64,
    appended: Mutex<Vec<AppendedPage>>,
}

impl CountingAssembler {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_skew(mut self, skew: i64) -> Self {
        self.skew = skew;
        self
    }

    pub fn appended(&self) -> Vec<AppendedPage> {
        lock(&self.appended).clone()
    }

    /// Pages actually appended to `pdf`, ignoring the skew.
    pub fn page_count_of(&self, pdf: &Path) -> usize {
        lock(&self.appended).iter().filter(|a| a.pdf == pdf).count()
    }
}

#[async_trait]
impl PdfAssembler for CountingAssembler {
    async fn append_page(&self, pdf: &Path, image: &Path, content: &PageContent) -> PortResult<()> {
        if !image.exists() {
            return Err(PortError::NotFound(image.display().to_string()));
        }
        let mut existing = std::fs::read_to_string(pdf).unwrap_or_default();
        existing.push_str("page\n");
        std::fs::write(pdf, existing)?;
        lock(&self.appended).push(AppendedPage {
            pdf: pdf.to_path_buf(),
            image: image.to_path_buf(),
            content: content.clone(),
        });
        Ok(())
    }

    async fn page_count(&self, pdf: &Path) -> PortResult<usize> {
        let lines = std::fs::read_to_string(pdf)?.lines().count() as i64;
        Ok((lines + self.skew).max(0) as usize)
    }
}
