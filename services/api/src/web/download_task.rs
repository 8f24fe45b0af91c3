//! services/api/src/web/download_task.rs
//!
//! The background worker that runs one session download job to completion.

use std::path::Path;
use std::sync::Arc;

use edubase_core::orchestrator::{DownloadOrchestrator, DownloadPlan};
use edubase_core::ports::PageLayout;
use tracing::{error, info, warn};

use crate::web::{job::DownloadJob, session::Session, state::AppState};

/// Runs `job` on the session's browser.
///
/// The session browser lock is held for the whole download, so jobs of the same
/// session run one after the other and stay `pending` while they wait.
pub async fn download_process(app_state: Arc<AppState>, session: Arc<Session>, job: Arc<DownloadJob>) {
    let browser = session.browser().lock().await;
    let Some(driver) = browser.as_ref().cloned() else {
        warn!("Job {} has no browser to run on", job.id);
        job.fail("Session has no browser; log in again");
        return;
    };

    info!("Download job {} started for book {}", job.id, job.book_id);
    job.start();

    if let Err(e) = driver.set_viewport(job.width, job.height).await {
        error!("Job {}: failed to set the viewport: {}", job.id, e);
        job.fail(format!("Failed to set viewport size: {}", e));
        return;
    }

    let plan = DownloadPlan {
        overwrite: true,
        layout: PageLayout::A4,
        extract_text: true,
        ..DownloadPlan::new(
            job.book_id,
            job.staging_dir.clone(),
            job.staging_dir.join(format!("book_{}.pdf", job.book_id)),
        )
    };
    let orchestrator = DownloadOrchestrator::new(app_state.edubase.clone(), app_state.assembler.clone());

    match orchestrator.download(driver.as_ref(), &plan, job.as_ref()).await {
        Ok(outcome) => {
            remove_images(&outcome.images).await;
            info!(
                "Download job {} completed: {} pages",
                job.id, outcome.pages
            );
            job.complete(outcome.pdf_path);
        }
        Err(e) => {
            error!("Download job {} failed: {}", job.id, e);
            job.fail(e.to_string());
        }
    }
}

/// The captures are no longer needed once they are inside the PDF.
async fn remove_images(images: &[impl AsRef<Path>]) {
    for image in images {
        if let Err(e) = tokio::fs::remove_file(image).await {
            warn!("Failed to remove {}: {}", image.as_ref().display(), e);
        }
    }
}
