//! crates/edubase_core/src/ports.rs
//!
//! Defines the service contracts (traits) for the application's core logic.
//! These traits form the boundary of the hexagonal architecture, allowing the core
//! to be independent of a specific browser-automation engine or PDF library.

use async_trait::async_trait;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

//=========================================================================================
// Generic Port Error and Result Types
//=========================================================================================

/// A generic error type for all port operations.
/// This abstracts away the specific errors from external engines (browser, PDF writer).
#[derive(Debug, thiserror::Error)]
pub enum PortError {
    #[error("Item not found: {0}")]
    NotFound(String),
    #[error("Timed out: {0}")]
    Timeout(String),
    #[error("Browser error: {0}")]
    Browser(String),
    #[error("PDF error: {0}")]
    Pdf(String),
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
    #[error("An unexpected error occurred: {0}")]
    Unexpected(String),
}

/// A convenience type alias for `Result<T, PortError>`.
pub type PortResult<T> = Result<T, PortError>;

//=========================================================================================
// Element addressing
//=========================================================================================

#[derive(Debug, Clone, PartialEq, Eq)]
struct Step {
    selector: String,
    nth: usize,
}

/// Addresses one element on the page as a chain of `(css selector, nth match)` steps.
///
/// `Locator::new("#libraryItems > li").nth(2).child(".title")` means "the first
/// `.title` element inside the third list entry".
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Locator {
    steps: Vec<Step>,
}

impl Locator {
    /// The first element matching `selector`.
    pub fn new(selector: impl Into<String>) -> Self {
        Self {
            steps: vec![Step {
                selector: selector.into(),
                nth: 0,
            }],
        }
    }

    /// Selects the `n`th (zero-based) match of the innermost step instead of the first.
    pub fn nth(mut self, n: usize) -> Self {
        if let Some(last) = self.steps.last_mut() {
            last.nth = n;
        }
        self
    }

    /// The first element matching `selector` inside the element addressed so far.
    pub fn child(mut self, selector: impl Into<String>) -> Self {
        self.steps.push(Step {
            selector: selector.into(),
            nth: 0,
        });
        self
    }

    /// Iterates over `(selector, nth)` from the outermost step inwards.
    pub fn steps(&self) -> impl Iterator<Item = (&str, usize)> {
        self.steps.iter().map(|s| (s.selector.as_str(), s.nth))
    }

    /// The selector of the innermost step.
    pub fn selector(&self) -> &str {
        self.steps
            .last()
            .map(|s| s.selector.as_str())
            .unwrap_or_default()
    }

    /// The index of the innermost step.
    pub fn index(&self) -> usize {
        self.steps.last().map(|s| s.nth).unwrap_or_default()
    }

    /// The locator with the innermost step removed, if any.
    pub fn parent(&self) -> Option<Locator> {
        if self.steps.len() < 2 {
            return None;
        }
        Some(Locator {
            steps: self.steps[..self.steps.len() - 1].to_vec(),
        })
    }
}

/// How far a navigation must progress before the call returns.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LoadState {
    DomContentLoaded,
    Load,
    NetworkIdle,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ImageFormat {
    Jpeg,
    Png,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ScreenshotOptions {
    pub format: ImageFormat,
    /// Encoder quality in `0..=100`; ignored for PNG.
    pub quality: u8,
}

impl ScreenshotOptions {
    pub fn jpeg_max_quality() -> Self {
        Self {
            format: ImageFormat::Jpeg,
            quality: 100,
        }
    }
}

//=========================================================================================
// Service Ports (Traits)
//=========================================================================================

/// One browser page (tab) of a running browser. Not re-entrant: callers must not
/// drive the same page from two tasks at once.
#[async_trait]
pub trait PageDriver: Send + Sync {
    /// Navigates to `url` and waits until `state` is reached.
    async fn goto(&self, url: &str, state: LoadState, timeout: Duration) -> PortResult<()>;

    async fn wait_for_load_state(&self, state: LoadState, timeout: Duration) -> PortResult<()>;

    /// Waits until the element exists and is visible.
    async fn wait_for_visible(&self, locator: &Locator, timeout: Duration) -> PortResult<()>;

    /// Probes visibility once. A missing element is `Ok(false)`.
    async fn is_visible(&self, locator: &Locator) -> PortResult<bool>;

    /// Number of elements matching `selector`.
    async fn count(&self, selector: &str) -> PortResult<usize>;

    async fn inner_text(&self, locator: &Locator) -> PortResult<String>;

    async fn attribute(&self, locator: &Locator, name: &str) -> PortResult<Option<String>>;

    /// Replaces the value of an input field.
    async fn fill(&self, locator: &Locator, value: &str) -> PortResult<()>;

    async fn click(&self, locator: &Locator) -> PortResult<()>;

    /// Captures exactly the element's box into `path`.
    async fn screenshot(
        &self,
        locator: &Locator,
        path: &Path,
        options: ScreenshotOptions,
    ) -> PortResult<()>;

    /// Evaluates a JavaScript expression and returns its JSON value.
    async fn evaluate(&self, script: &str) -> PortResult<serde_json::Value>;

    /// Clears cookies plus local and session storage.
    async fn clear_browser_state(&self) -> PortResult<()>;

    async fn current_url(&self) -> PortResult<String>;

    async fn set_viewport(&self, width: u32, height: u32) -> PortResult<()>;

    /// Closes the page, the browser and the automation engine. Idempotent.
    async fn close(&self) -> PortResult<()>;
}

/// Parameters for starting one browser with one window and one page.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LaunchOptions {
    pub headless: bool,
    pub width: u32,
    pub height: u32,
    /// Upper bound for the browser process to come up.
    pub timeout: Duration,
    pub executable: Option<PathBuf>,
}

impl Default for LaunchOptions {
    fn default() -> Self {
        Self {
            headless: true,
            width: 1920,
            height: 1080,
            timeout: Duration::from_secs(300),
            executable: None,
        }
    }
}

#[async_trait]
pub trait BrowserLauncher: Send + Sync {
    async fn launch(&self, options: &LaunchOptions) -> PortResult<Arc<dyn PageDriver>>;
}

/// How an image is placed on its PDF page.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum PageLayout {
    /// The page takes the image's own size (96 dpi).
    #[default]
    Native,
    /// The image is fitted and centred on an A4 portrait page.
    A4,
}

/// What goes onto one appended PDF page besides the image.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct PageContent {
    pub layout: PageLayout,
    /// Written as an invisible text layer to make the page searchable.
    pub text: Option<String>,
}

#[async_trait]
pub trait PdfAssembler: Send + Sync {
    /// Appends `image` (a JPEG) as a new last page, creating `pdf` if it does not exist.
    async fn append_page(&self, pdf: &Path, image: &Path, content: &PageContent)
        -> PortResult<()>;

    /// Number of pages in an existing PDF.
    async fn page_count(&self, pdf: &Path) -> PortResult<usize>;
}
