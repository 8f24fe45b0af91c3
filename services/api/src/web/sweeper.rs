//! services/api/src/web/sweeper.rs
//!
//! Background eviction of idle sessions.

use std::sync::Arc;
use std::time::Duration;

use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::info;

use crate::web::state::AppState;

pub const SWEEP_INTERVAL: Duration = Duration::from_secs(60);

/// Evicts idle sessions every [`SWEEP_INTERVAL`] until `shutdown` fires.
pub fn spawn_session_sweeper(state: Arc<AppState>, shutdown: CancellationToken) -> JoinHandle<()> {
    tokio::spawn(async move {
        let mut ticker = tokio::time::interval(SWEEP_INTERVAL);
        loop {
            tokio::select! {
                _ = shutdown.cancelled() => break,
                _ = ticker.tick() => {
                    sweep_idle_sessions(&state).await;
                }
            }
        }
        info!("Session sweeper stopped");
    })
}

/// Closes sessions idle longer than the configured TTL that have no running
/// jobs. Returns how many were evicted.
pub async fn sweep_idle_sessions(state: &AppState) -> usize {
    let evicted = state
        .sessions
        .evict_idle(state.config.session_idle_ttl)
        .await;
    for session in &evicted {
        info!("Evicting idle session {}", session.id);
        session.close().await;
    }
    evicted.len()
}

/// Closes every session, for shutdown.
pub async fn close_all_sessions(state: &AppState) {
    let sessions = state.sessions.drain().await;
    if !sessions.is_empty() {
        info!("Closing {} sessions", sessions.len());
    }
    for session in sessions {
        session.close().await;
    }
}
