//! crates/edubase_core/src/orchestrator.rs
//!
//! The download-and-assemble workflow: authenticate, open the book, capture every
//! requested page in order, append the captures to a PDF and check the result.
//!
//! The orchestrator owns no browser. [`DownloadOrchestrator::run`] launches and
//! always closes one; [`DownloadOrchestrator::download`] drives a page the caller
//! already holds (the server keeps one browser per session).

use std::path::{Path, PathBuf};
use std::sync::Arc;

use tokio::time::sleep;
use tracing::{debug, info, warn};

use crate::auth::{AuthError, Authenticator, LoginMode};
use crate::config::EdubaseConfig;
use crate::domain::BookId;
use crate::ports::{
    BrowserLauncher, LaunchOptions, PageContent, PageDriver, PageLayout, PdfAssembler, PortError,
};
use crate::reader::{BookReader, ReaderError};
use crate::retry::retry_async;

//=========================================================================================
// Plan, outcome and errors
//=========================================================================================

/// Everything one download needs besides the browser.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DownloadPlan {
    pub book_id: BookId,
    pub start_page: u32,
    /// `None` downloads up to the last page.
    pub max_pages: Option<u32>,
    /// Where page captures are written (and looked up when resuming).
    pub staging_dir: PathBuf,
    pub output_path: PathBuf,
    /// Re-capture pages whose image already exists.
    pub overwrite: bool,
    pub layout: PageLayout,
    /// Add each page's text as an invisible, searchable layer.
    pub extract_text: bool,
}

impl DownloadPlan {
    pub fn new(book_id: BookId, staging_dir: impl Into<PathBuf>, output_path: impl Into<PathBuf>) -> Self {
        Self {
            book_id,
            start_page: 1,
            max_pages: None,
            staging_dir: staging_dir.into(),
            output_path: output_path.into(),
            overwrite: false,
            layout: PageLayout::Native,
            extract_text: false,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DownloadOutcome {
    pub pdf_path: PathBuf,
    /// Pages in the whole book.
    pub book_pages: u32,
    /// Pages that went into the PDF.
    pub pages: u32,
    /// Pages whose existing capture was reused.
    pub reused: u32,
    /// Page images in PDF order.
    pub images: Vec<PathBuf>,
}

#[derive(Debug, thiserror::Error)]
pub enum DownloadError {
    #[error("authentication failed")]
    AuthFailed(#[source] AuthError),
    #[error("could not start the browser: {0}")]
    Launch(#[source] PortError),
    #[error(transparent)]
    Reader(#[from] ReaderError),
    #[error("start page {start_page} is beyond the last page ({total_pages})")]
    StartPageOutOfRange { start_page: u32, total_pages: u32 },
    #[error("failed to add a page to the PDF: {0}")]
    Assembly(#[source] PortError),
    #[error(
        "PDF has {actual} pages but {expected} were downloaded; delete the output and retry"
    )]
    ArtifactMismatch { expected: u32, actual: usize },
    #[error("file system error: {0}")]
    Io(#[from] std::io::Error),
}

//=========================================================================================
// Progress reporting
//=========================================================================================

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ProgressUpdate {
    LoggingIn,
    LoggedIn,
    /// The book is open; `pages` is how many will be downloaded.
    BookOpened { book_pages: u32, pages: u32 },
    /// `done` of `of` pages are on disk; `page` is the book page number.
    PageCaptured { page: u32, done: u32, of: u32, reused: bool },
    PageAppended { done: u32, of: u32 },
    Validated { pages: u32 },
}

/// Receives progress from the workflow. Must not block.
pub trait ProgressSink: Send + Sync {
    fn update(&self, update: ProgressUpdate);
}

impl<F> ProgressSink for F
where
    F: Fn(ProgressUpdate) + Send + Sync,
{
    fn update(&self, update: ProgressUpdate) {
        self(update)
    }
}

//=========================================================================================
// Helpers
//=========================================================================================

/// `{dir}/{bookId}_{page}.jpeg`
pub fn page_image_path(dir: &Path, book_id: BookId, page: u32) -> PathBuf {
    dir.join(format!("{}_{}.jpeg", book_id, page))
}

/// Pages to download: everything from `start_page` to the end, capped by `max_pages`.
pub fn effective_page_count(
    book_pages: u32,
    start_page: u32,
    max_pages: Option<u32>,
) -> Result<u32, DownloadError> {
    if start_page == 0 || start_page > book_pages {
        return Err(DownloadError::StartPageOutOfRange {
            start_page,
            total_pages: book_pages,
        });
    }
    let remaining = book_pages - start_page + 1;
    Ok(max_pages.map_or(remaining, |max| max.min(remaining)))
}

//=========================================================================================
// Orchestrator
//=========================================================================================

pub struct DownloadOrchestrator {
    config: Arc<EdubaseConfig>,
    assembler: Arc<dyn PdfAssembler>,
}

impl DownloadOrchestrator {
    pub fn new(config: Arc<EdubaseConfig>, assembler: Arc<dyn PdfAssembler>) -> Self {
        Self { config, assembler }
    }

    /// Launches a browser, logs in, downloads and closes the browser again, on
    /// success and failure alike.
    pub async fn run(
        &self,
        launcher: &dyn BrowserLauncher,
        options: &LaunchOptions,
        mode: &LoginMode,
        plan: &DownloadPlan,
        progress: &dyn ProgressSink,
    ) -> Result<DownloadOutcome, DownloadError> {
        let driver = launcher.launch(options).await.map_err(DownloadError::Launch)?;

        let result = async {
            self.authenticate(driver.as_ref(), mode, progress).await?;
            self.download(driver.as_ref(), plan, progress).await
        }
        .await;

        if let Err(e) = driver.close().await {
            warn!("Failed to close the browser: {}", e);
        }
        result
    }

    /// Logs in under the configured retry policy.
    pub async fn authenticate(
        &self,
        driver: &dyn PageDriver,
        mode: &LoginMode,
        progress: &dyn ProgressSink,
    ) -> Result<(), DownloadError> {
        progress.update(ProgressUpdate::LoggingIn);
        let auth = Authenticator::new(driver, &self.config);
        retry_async(&self.config.login_retry, "login", |_| auth.login(mode))
            .await
            .map_err(DownloadError::AuthFailed)?;
        progress.update(ProgressUpdate::LoggedIn);
        Ok(())
    }

    /// Downloads the pages of `plan` with an already authenticated page and
    /// assembles them into `plan.output_path`.
    pub async fn download(
        &self,
        driver: &dyn PageDriver,
        plan: &DownloadPlan,
        progress: &dyn ProgressSink,
    ) -> Result<DownloadOutcome, DownloadError> {
        tokio::fs::create_dir_all(&plan.staging_dir).await?;

        let mut reader = BookReader::new(driver, &self.config, plan.book_id);
        reader.open(plan.start_page).await?;
        let book_pages = reader.total_pages().await?;
        let pages = effective_page_count(book_pages, plan.start_page, plan.max_pages)?;
        info!(
            "Book {} has {} pages, downloading {} starting at page {}",
            plan.book_id, book_pages, pages, plan.start_page
        );
        progress.update(ProgressUpdate::BookOpened { book_pages, pages });

        let mut images = Vec::with_capacity(pages as usize);
        let mut texts = Vec::with_capacity(pages as usize);
        let mut reused = 0;

        for index in 0..pages {
            let page = plan.start_page + index;
            let path = page_image_path(&plan.staging_dir, plan.book_id, page);

            let exists = tokio::fs::try_exists(&path).await.unwrap_or(false);
            let reuse = exists && !plan.overwrite;
            if reuse {
                debug!("Reusing existing capture of page {}", page);
                reused += 1;
            } else {
                sleep(self.config.delays.page).await;
                reader.screenshot(&path).await?;
            }

            texts.push(if plan.extract_text {
                Some(reader.page_text().await).filter(|t| !t.is_empty())
            } else {
                None
            });
            images.push(path);
            progress.update(ProgressUpdate::PageCaptured {
                page,
                done: index + 1,
                of: pages,
                reused: reuse,
            });

            if index + 1 < pages {
                reader.next_page().await?;
            }
        }
        reader.close();

        self.assemble(plan, &images, texts, progress).await?;

        Ok(DownloadOutcome {
            pdf_path: plan.output_path.clone(),
            book_pages,
            pages,
            reused,
            images,
        })
    }

    /// Appends the images one page at a time, then checks the page count.
    async fn assemble(
        &self,
        plan: &DownloadPlan,
        images: &[PathBuf],
        texts: Vec<Option<String>>,
        progress: &dyn ProgressSink,
    ) -> Result<(), DownloadError> {
        let expected = images.len() as u32;

        // Pages are appended, so a PDF left over from an earlier run would be extended.
        if tokio::fs::try_exists(&plan.output_path).await.unwrap_or(false) {
            info!("Replacing existing {}", plan.output_path.display());
            tokio::fs::remove_file(&plan.output_path).await?;
        }
        if let Some(parent) = plan.output_path.parent().filter(|p| !p.as_os_str().is_empty()) {
            tokio::fs::create_dir_all(parent).await?;
        }

        for (index, (image, text)) in images.iter().zip(texts).enumerate() {
            let content = PageContent {
                layout: plan.layout,
                text,
            };
            self.assembler
                .append_page(&plan.output_path, image, &content)
                .await
                .map_err(DownloadError::Assembly)?;
            progress.update(ProgressUpdate::PageAppended {
                done: index as u32 + 1,
                of: expected,
            });
        }

        let actual = self
            .assembler
            .page_count(&plan.output_path)
            .await
            .map_err(DownloadError::Assembly)?;
        if actual != expected as usize {
            return Err(DownloadError::ArtifactMismatch { expected, actual });
        }

        progress.update(ProgressUpdate::Validated { pages: expected });
        info!("Wrote {} pages to {}", expected, plan.output_path.display());
        Ok(())
    }
}
