//! services/api/src/web/session.rs
//!
//! Per-client sessions. Each session owns at most one logged-in browser and
//! the download jobs started through it. Sessions never see each other's jobs.

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex as StdMutex};
use std::time::Duration;

use chrono::{DateTime, Utc};
use edubase_core::ports::PageDriver;
use tokio::sync::{Mutex, RwLock};
use tokio::time::Instant;
use tracing::{info, warn};
use uuid::Uuid;

use crate::web::job::DownloadJob;

/// The session's browser. Locked for the whole of a login, a library listing
/// or a download, so the page is never driven by two operations at once.
pub type BrowserSlot = Mutex<Option<Arc<dyn PageDriver>>>;

pub struct Session {
    pub id: Uuid,
    pub created_at: DateTime<Utc>,
    last_seen: StdMutex<Instant>,
    browser: BrowserSlot,
    authenticated: AtomicBool,
    jobs: RwLock<HashMap<Uuid, Arc<DownloadJob>>>,
}

impl Session {
    pub fn new(id: Uuid) -> Self {
        Self {
            id,
            created_at: Utc::now(),
            last_seen: StdMutex::new(Instant::now()),
            browser: Mutex::new(None),
            authenticated: AtomicBool::new(false),
            jobs: RwLock::new(HashMap::new()),
        }
    }

    pub fn touch(&self) {
        if let Ok(mut last_seen) = self.last_seen.lock() {
            *last_seen = Instant::now();
        }
    }

    pub fn idle_for(&self) -> Duration {
        match self.last_seen.lock() {
            Ok(last_seen) => last_seen.elapsed(),
            Err(_) => Duration::ZERO,
        }
    }

    pub fn browser(&self) -> &BrowserSlot {
        &self.browser
    }

    pub fn is_authenticated(&self) -> bool {
        self.authenticated.load(Ordering::Acquire)
    }

    /// Credentials are not kept; a session that needs a new login asks the
    /// client again.
    pub fn set_authenticated(&self, logged_in: bool) {
        self.authenticated.store(logged_in, Ordering::Release);
    }

    //=====================================================================================
    // Jobs
    //=====================================================================================

    pub async fn insert_job(&self, job: Arc<DownloadJob>) {
        self.jobs.write().await.insert(job.id, job);
    }

    pub async fn job(&self, id: Uuid) -> Option<Arc<DownloadJob>> {
        self.jobs.read().await.get(&id).cloned()
    }

    pub async fn job_count(&self) -> usize {
        self.jobs.read().await.len()
    }

    /// Whether any job is pending or downloading.
    pub async fn has_active_jobs(&self) -> bool {
        self.jobs
            .read()
            .await
            .values()
            .any(|job| !job.status().is_terminal())
    }

    /// Closes the browser and deletes every job's staging directory.
    pub async fn close(&self) {
        let driver = self.browser.lock().await.take();
        if let Some(driver) = driver {
            if let Err(e) = driver.close().await {
                warn!("Failed to close browser of session {}: {}", self.id, e);
            }
        }
        self.set_authenticated(false);

        let jobs: Vec<_> = self.jobs.write().await.drain().map(|(_, job)| job).collect();
        for job in jobs {
            match tokio::fs::remove_dir_all(&job.staging_dir).await {
                Ok(()) => {}
                Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
                Err(e) => warn!(
                    "Failed to remove {} of job {}: {}",
                    job.staging_dir.display(),
                    job.id,
                    e
                ),
            }
        }
    }
}

/// All live sessions, keyed by id.
#[derive(Default)]
pub struct SessionRegistry {
    sessions: RwLock<HashMap<Uuid, Arc<Session>>>,
}

impl SessionRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn create(&self) -> Arc<Session> {
        let session = Arc::new(Session::new(Uuid::new_v4()));
        self.sessions
            .write()
            .await
            .insert(session.id, Arc::clone(&session));
        info!("Created session {}", session.id);
        session
    }

    pub async fn get(&self, id: Uuid) -> Option<Arc<Session>> {
        self.sessions.read().await.get(&id).cloned()
    }

    /// Returns the session with `id`, creating an empty one if it is unknown
    /// (e.g. after it was evicted).
    pub async fn get_or_create(&self, id: Uuid) -> Arc<Session> {
        if let Some(session) = self.get(id).await {
            return session;
        }
        let mut sessions = self.sessions.write().await;
        Arc::clone(sessions.entry(id).or_insert_with(|| {
            info!("Created session {}", id);
            Arc::new(Session::new(id))
        }))
    }

    pub async fn len(&self) -> usize {
        self.sessions.read().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.len().await == 0
    }

    /// Removes sessions idle for longer than `ttl` that have no active jobs and
    /// returns them so the caller can close them.
    pub async fn evict_idle(&self, ttl: Duration) -> Vec<Arc<Session>> {
        let mut sessions = self.sessions.write().await;
        let mut expired = Vec::new();
        for (id, session) in sessions.iter() {
            if session.idle_for() > ttl && !session.has_active_jobs().await {
                expired.push(*id);
            }
        }
        expired
            .into_iter()
            .filter_map(|id| sessions.remove(&id))
            .collect()
    }

    /// Removes every session, for shutdown.
    pub async fn drain(&self) -> Vec<Arc<Session>> {
        self.sessions.write().await.drain().map(|(_, s)| s).collect()
    }
}
