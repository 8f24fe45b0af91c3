//! crates/edubase_core/src/reader.rs
//!
//! Page-level navigation inside one opened book.

use std::path::Path;
use std::sync::LazyLock;

use regex::Regex;
use tokio::time::sleep;
use tracing::{debug, warn};

use crate::config::EdubaseConfig;
use crate::domain::BookId;
use crate::ports::{LoadState, Locator, PageDriver, PortError, ScreenshotOptions};
use crate::retry::poll;
use crate::selectors;

#[derive(Debug, thiserror::Error)]
pub enum ReaderError {
    #[error("could not open book {book_id} at page {page}: {source}")]
    OpenError {
        book_id: BookId,
        page: u32,
        #[source]
        source: PortError,
    },
    #[error("could not determine the number of pages")]
    PageCountUnavailable,
    #[error("screenshot path must be non-empty and end in .jpg or .jpeg, got {0:?}")]
    InvalidScreenshotPath(String),
    #[error("failed to capture page {page}: {source}")]
    CaptureError {
        page: u32,
        #[source]
        source: PortError,
    },
    #[error("failed to advance past page {page}: {source}")]
    NavigationError {
        page: u32,
        #[source]
        source: PortError,
    },
    #[error("reader is not open")]
    NotOpen,
}

/// Where the reader stands in a book.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReaderState {
    Closed,
    Opened { current_page: u32 },
    PagesKnown { current_page: u32, total_pages: u32 },
}

impl ReaderState {
    pub fn current_page(&self) -> Option<u32> {
        match self {
            ReaderState::Closed => None,
            ReaderState::Opened { current_page } | ReaderState::PagesKnown { current_page, .. } => {
                Some(*current_page)
            }
        }
    }

    pub fn total_pages(&self) -> Option<u32> {
        match self {
            ReaderState::PagesKnown { total_pages, .. } => Some(*total_pages),
            _ => None,
        }
    }
}

static PAGE_NUMBER_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"[0-9]+").expect("PAGE_NUMBER_RE should compile"));

/// First run of digits in the pagination indicator, e.g. `"/ 124"` -> 124.
pub fn parse_page_count(text: &str) -> Option<u32> {
    PAGE_NUMBER_RE
        .find(text)
        .and_then(|m| m.as_str().parse::<u32>().ok())
        .filter(|n| *n > 0)
}

/// Whether `path` names a JPEG file the capture contract accepts.
pub fn is_jpeg_path(path: &Path) -> bool {
    if path.as_os_str().is_empty() {
        return false;
    }
    path.extension()
        .and_then(|ext| ext.to_str())
        .map(|ext| ext.eq_ignore_ascii_case("jpg") || ext.eq_ignore_ascii_case("jpeg"))
        .unwrap_or(false)
}

pub struct BookReader<'a> {
    driver: &'a dyn PageDriver,
    config: &'a EdubaseConfig,
    book_id: BookId,
    state: ReaderState,
}

impl<'a> BookReader<'a> {
    pub fn new(driver: &'a dyn PageDriver, config: &'a EdubaseConfig, book_id: BookId) -> Self {
        Self {
            driver,
            config,
            book_id,
            state: ReaderState::Closed,
        }
    }

    pub fn state(&self) -> ReaderState {
        self.state
    }

    pub fn book_id(&self) -> BookId {
        self.book_id
    }

    pub async fn open(&mut self, start_page: u32) -> Result<(), ReaderError> {
        sleep(self.config.delays.initial).await;

        let url = selectors::book_url(&self.config.base_url, self.book_id, start_page);
        debug!("Opening {}", url);
        self.driver
            .goto(&url, LoadState::DomContentLoaded, self.config.timeouts.book_navigation)
            .await
            .map_err(|source| ReaderError::OpenError {
                book_id: self.book_id,
                page: start_page,
                source,
            })?;

        self.state = ReaderState::Opened {
            current_page: start_page,
        };
        Ok(())
    }

    /// Reads the total from the pagination indicator, which the app fills in
    /// some time after the document has loaded.
    pub async fn total_pages(&mut self) -> Result<u32, ReaderError> {
        let current_page = self.state.current_page().ok_or(ReaderError::NotOpen)?;
        if let Some(total) = self.state.total_pages() {
            return Ok(total);
        }

        sleep(self.config.delays.initial).await;

        let indicator = Locator::new(selectors::PAGINATION_INDICATOR);
        if let Err(e) = self
            .driver
            .wait_for_visible(&indicator, self.config.timeouts.element_visible)
            .await
        {
            warn!("Pagination indicator did not appear: {}", e);
            return Err(ReaderError::PageCountUnavailable);
        }

        let total = poll(&self.config.page_count_poll, || async {
            match self.driver.inner_text(&indicator).await {
                Ok(text) => {
                    let parsed = parse_page_count(&text);
                    if parsed.is_none() {
                        debug!("Pagination indicator not populated yet: {:?}", text);
                    }
                    Ok::<_, ReaderError>(parsed)
                }
                Err(e) => {
                    debug!("Reading pagination indicator failed: {}", e);
                    Ok(None)
                }
            }
        })
        .await?
        .ok_or(ReaderError::PageCountUnavailable)?;

        self.state = ReaderState::PagesKnown {
            current_page,
            total_pages: total,
        };
        Ok(total)
    }

    /// Captures the rendered page (and only the page) as a maximum-quality JPEG.
    pub async fn screenshot(&self, path: &Path) -> Result<(), ReaderError> {
        let page = self.state.current_page().ok_or(ReaderError::NotOpen)?;
        if !is_jpeg_path(path) {
            return Err(ReaderError::InvalidScreenshotPath(
                path.display().to_string(),
            ));
        }

        self.driver
            .screenshot(
                &Locator::new(selectors::PAGE_CONTENT),
                path,
                ScreenshotOptions::jpeg_max_quality(),
            )
            .await
            .map_err(|source| ReaderError::CaptureError { page, source })
    }

    /// Clicks the next-page control. The caller owns the settle delay before the
    /// next capture.
    pub async fn next_page(&mut self) -> Result<(), ReaderError> {
        let page = self.state.current_page().ok_or(ReaderError::NotOpen)?;
        self.driver
            .click(&Locator::new(selectors::NEXT_PAGE_BUTTON))
            .await
            .map_err(|source| ReaderError::NavigationError { page, source })?;

        self.state = match self.state {
            ReaderState::PagesKnown { total_pages, .. } => ReaderState::PagesKnown {
                current_page: page + 1,
                total_pages,
            },
            _ => ReaderState::Opened {
                current_page: page + 1,
            },
        };
        Ok(())
    }

    /// Best-effort text of the current page. Never fails; an empty string means
    /// nothing could be extracted.
    pub async fn page_text(&self) -> String {
        sleep(self.config.delays.text_extraction).await;
        match self.driver.evaluate(selectors::PAGE_TEXT_SCRIPT).await {
            Ok(serde_json::Value::String(text)) => text.trim().to_string(),
            Ok(other) => {
                debug!("Page text script returned a non-string value: {}", other);
                String::new()
            }
            Err(e) => {
                debug!("Page text extraction failed: {}", e);
                String::new()
            }
        }
    }

    pub fn close(&mut self) {
        self.state = ReaderState::Closed;
    }
}
