//! services/api/src/web/job.rs
//!
//! A server-side download job: its observable state, the status machine that
//! guards it and the fan-out of progress events to subscribers.

use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, RwLock};

use chrono::{DateTime, Utc};
use edubase_core::domain::{BookId, JobStatus};
use edubase_core::orchestrator::{ProgressSink, ProgressUpdate};
use tokio::sync::mpsc;
use tracing::{debug, warn};
use uuid::Uuid;

use crate::web::protocol::{JobStatusResponse, ProgressEvent};

/// Events buffered per subscriber before further events are dropped for it.
pub const SUBSCRIBER_BUFFER: usize = 10;

/// Mutable part of a job.
#[derive(Debug, Clone)]
pub struct JobState {
    pub status: JobStatus,
    pub progress: u32,
    pub total_pages: u32,
    pub message: String,
    pub error: Option<String>,
    pub pdf_path: Option<PathBuf>,
    pub started_at: DateTime<Utc>,
    pub completed_at: Option<DateTime<Utc>>,
}

pub struct DownloadJob {
    pub id: Uuid,
    pub book_id: BookId,
    pub width: u32,
    pub height: u32,
    /// Holds the page captures and the finished PDF.
    pub staging_dir: PathBuf,
    state: RwLock<JobState>,
    subscribers: Mutex<HashMap<u64, mpsc::Sender<ProgressEvent>>>,
    next_subscriber: AtomicU64,
}

impl DownloadJob {
    pub fn new(id: Uuid, book_id: BookId, width: u32, height: u32, staging_dir: PathBuf) -> Self {
        Self {
            id,
            book_id,
            width,
            height,
            staging_dir,
            state: RwLock::new(JobState {
                status: JobStatus::Pending,
                progress: 0,
                total_pages: 0,
                message: "Waiting for the session browser".to_string(),
                error: None,
                pdf_path: None,
                started_at: Utc::now(),
                completed_at: None,
            }),
            subscribers: Mutex::new(HashMap::new()),
            next_subscriber: AtomicU64::new(0),
        }
    }

    pub fn state(&self) -> JobState {
        match self.state.read() {
            Ok(state) => state.clone(),
            Err(poisoned) => poisoned.into_inner().clone(),
        }
    }

    pub fn status(&self) -> JobStatus {
        self.state().status
    }

    pub fn status_response(&self) -> JobStatusResponse {
        let state = self.state();
        JobStatusResponse {
            job_id: self.id,
            book_id: self.book_id.get(),
            status: state.status,
            progress: state.progress,
            total_pages: state.total_pages,
            message: state.message,
            error: state.error,
            started_at: state.started_at,
            completed_at: state.completed_at,
        }
    }

    //=====================================================================================
    // Transitions
    //=====================================================================================

    pub fn start(&self) {
        self.apply(JobStatus::Downloading, |state| {
            state.message = "Opening book".to_string();
        });
    }

    /// Records a progress step. Progress never decreases and never exceeds the total.
    pub fn set_progress(&self, done: u32, message: impl Into<String>) {
        let message = message.into();
        self.apply(JobStatus::Downloading, |state| {
            state.progress = state.progress.max(done);
            state.message = message;
        });
    }

    pub fn set_total_pages(&self, total_pages: u32) {
        self.apply(JobStatus::Downloading, |state| {
            state.total_pages = total_pages;
            state.message = format!("Downloading {} pages", total_pages);
        });
    }

    pub fn set_message(&self, message: impl Into<String>) {
        let message = message.into();
        let status = self.status();
        self.apply(status, |state| state.message = message);
    }

    pub fn complete(&self, pdf_path: PathBuf) {
        self.apply(JobStatus::Completed, |state| {
            state.progress = state.total_pages;
            state.message = "Download complete".to_string();
            state.pdf_path = Some(pdf_path);
        });
    }

    pub fn fail(&self, error: impl Into<String>) {
        let error = error.into();
        self.apply(JobStatus::Failed, |state| {
            state.message = "Download failed".to_string();
            state.error = Some(error);
        });
    }

    /// Moves to `next` and applies `change`, then notifies subscribers. Invalid
    /// transitions (anything out of a terminal state) are ignored.
    fn apply(&self, next: JobStatus, change: impl FnOnce(&mut JobState)) {
        let event = {
            let mut state = match self.state.write() {
                Ok(state) => state,
                Err(poisoned) => poisoned.into_inner(),
            };
            if !state.status.can_transition_to(next) {
                warn!(
                    "Ignoring job {} transition {} -> {}",
                    self.id, state.status, next
                );
                return;
            }
            state.status = next;
            change(&mut state);
            if state.progress > state.total_pages {
                state.progress = state.total_pages;
            }
            if next.is_terminal() && state.completed_at.is_none() {
                state.completed_at = Some(Utc::now());
            }
            self.event_from(&state)
        };
        self.broadcast(event);
    }

    //=====================================================================================
    // Event fan-out
    //=====================================================================================

    fn event_from(&self, state: &JobState) -> ProgressEvent {
        ProgressEvent {
            job_id: self.id,
            status: state.status,
            progress: state.progress,
            total_pages: state.total_pages,
            message: state.message.clone(),
            timestamp: Utc::now(),
        }
    }

    pub fn snapshot(&self) -> ProgressEvent {
        let state = self.state();
        self.event_from(&state)
    }

    /// Registers a subscriber whose first event is the current snapshot. The
    /// channel closes once the job is terminal, right away if it already is.
    pub fn subscribe(self: &Arc<Self>) -> Subscription {
        let (tx, rx) = mpsc::channel(SUBSCRIBER_BUFFER);
        let id = self.next_subscriber.fetch_add(1, Ordering::Relaxed);
        {
            let mut subscribers = self.lock_subscribers();
            let snapshot = self.snapshot();
            if !snapshot.status.is_terminal() {
                subscribers.insert(id, tx.clone());
            }
            // The channel is empty, so the snapshot always fits.
            let _ = tx.try_send(snapshot);
        }
        Subscription {
            job: Arc::clone(self),
            id,
            receiver: rx,
        }
    }

    pub fn subscriber_count(&self) -> usize {
        self.lock_subscribers().len()
    }

    fn broadcast(&self, event: ProgressEvent) {
        let last = event.status.is_terminal();
        let mut subscribers = self.lock_subscribers();
        subscribers.retain(|id, tx| match tx.try_send(event.clone()) {
            Ok(()) => true,
            Err(mpsc::error::TrySendError::Full(_)) => {
                debug!("Subscriber {} of job {} is lagging; event dropped", id, self.id);
                true
            }
            Err(mpsc::error::TrySendError::Closed(_)) => false,
        });
        if last {
            subscribers.clear();
        }
    }

    fn unsubscribe(&self, id: u64) {
        self.lock_subscribers().remove(&id);
    }

    fn lock_subscribers(&self) -> std::sync::MutexGuard<'_, HashMap<u64, mpsc::Sender<ProgressEvent>>> {
        match self.subscribers.lock() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        }
    }
}

impl ProgressSink for DownloadJob {
    fn update(&self, update: ProgressUpdate) {
        match update {
            ProgressUpdate::LoggingIn | ProgressUpdate::LoggedIn => {}
            ProgressUpdate::BookOpened { pages, .. } => self.set_total_pages(pages),
            ProgressUpdate::PageCaptured { page, done, of, .. } => {
                self.set_progress(done, format!("Captured page {} ({}/{})", page, done, of))
            }
            ProgressUpdate::PageAppended { done, of } => {
                self.set_message(format!("Building PDF ({}/{})", done, of))
            }
            ProgressUpdate::Validated { .. } => self.set_message("Validating PDF"),
        }
    }
}

/// A live view of a job's events. Deregisters itself when dropped.
pub struct Subscription {
    job: Arc<DownloadJob>,
    id: u64,
    receiver: mpsc::Receiver<ProgressEvent>,
}

impl Subscription {
    pub async fn recv(&mut self) -> Option<ProgressEvent> {
        self.receiver.recv().await
    }
}

impl Drop for Subscription {
    fn drop(&mut self) {
        self.job.unsubscribe(self.id);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn job() -> Arc<DownloadJob> {
        Arc::new(DownloadJob::new(
            Uuid::new_v4(),
            BookId::new(42).unwrap(),
            3840,
            2160,
            PathBuf::from("/tmp/job"),
        ))
    }

    #[test]
    fn new_jobs_are_pending() {
        let job = job();
        let status = job.status_response();
        assert_eq!(status.status, JobStatus::Pending);
        assert_eq!(status.progress, 0);
        assert!(status.completed_at.is_none());
    }

    #[test]
    fn progress_is_monotonic_and_bounded() {
        let job = job();
        job.start();
        job.set_total_pages(3);
        job.set_progress(2, "two");
        job.set_progress(1, "stale");
        assert_eq!(job.state().progress, 2);
        job.set_progress(9, "too far");
        assert_eq!(job.state().progress, 3);
    }

    #[test]
    fn terminal_states_are_final() {
        let job = job();
        job.start();
        job.set_total_pages(2);
        job.complete(PathBuf::from("/tmp/job/book.pdf"));
        job.fail("late failure");
        job.set_progress(1, "late progress");

        let state = job.state();
        assert_eq!(state.status, JobStatus::Completed);
        assert_eq!(state.progress, 2);
        assert!(state.error.is_none());
        assert!(state.completed_at.is_some());
    }

    #[test]
    fn pending_jobs_can_fail_directly() {
        let job = job();
        job.fail("no browser");
        let state = job.state();
        assert_eq!(state.status, JobStatus::Failed);
        assert_eq!(state.error.as_deref(), Some("no browser"));
    }

    #[tokio::test]
    async fn subscribers_get_a_snapshot_then_updates() {
        let job = job();
        job.start();
        let mut sub = job.subscribe();
        job.set_total_pages(4);

        let first = sub.recv().await.unwrap();
        assert_eq!(first.status, JobStatus::Downloading);
        assert_eq!(first.total_pages, 0);
        let second = sub.recv().await.unwrap();
        assert_eq!(second.total_pages, 4);
    }

    #[tokio::test]
    async fn slow_subscribers_lose_events_without_blocking() {
        let job = job();
        job.start();
        job.set_total_pages(100);
        let mut sub = job.subscribe();
        for done in 1..=50 {
            job.set_progress(done, "page");
        }

        let mut received = 0;
        while let Ok(event) = sub.receiver.try_recv() {
            received += 1;
            assert!(event.progress <= 50);
        }
        assert_eq!(received, SUBSCRIBER_BUFFER);
        assert_eq!(job.state().progress, 50);
    }

    #[test]
    fn dropping_a_subscription_deregisters_it() {
        let job = job();
        let sub = job.subscribe();
        assert_eq!(job.subscriber_count(), 1);
        drop(sub);
        assert_eq!(job.subscriber_count(), 0);
    }

    #[tokio::test]
    async fn channels_close_when_the_job_ends() {
        let job = job();
        job.start();
        let mut sub = job.subscribe();
        job.complete(PathBuf::from("/tmp/job/book.pdf"));

        assert_eq!(sub.recv().await.unwrap().status, JobStatus::Downloading);
        assert_eq!(sub.recv().await.unwrap().status, JobStatus::Completed);
        assert!(sub.recv().await.is_none());
        assert_eq!(job.subscriber_count(), 0);
    }

    #[tokio::test]
    async fn late_subscribers_get_only_the_final_snapshot() {
        let job = job();
        job.fail("boom");
        let mut sub = job.subscribe();
        assert_eq!(sub.recv().await.unwrap().status, JobStatus::Failed);
        assert!(sub.recv().await.is_none());
    }

    #[test]
    fn orchestrator_updates_drive_the_job() {
        let job = job();
        job.start();
        job.update(ProgressUpdate::BookOpened { book_pages: 10, pages: 3 });
        job.update(ProgressUpdate::PageCaptured { page: 5, done: 1, of: 3, reused: false });
        let state = job.state();
        assert_eq!(state.total_pages, 3);
        assert_eq!(state.progress, 1);
        assert_eq!(state.message, "Captured page 5 (1/3)");
    }
}
