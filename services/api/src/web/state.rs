//! services/api/src/web/state.rs
//!
//! Defines the application's shared state.

use std::sync::Arc;

use edubase_core::config::EdubaseConfig;
use edubase_core::ports::{BrowserLauncher, PdfAssembler};

use crate::config::Config;
use crate::web::session::SessionRegistry;

//=========================================================================================
// AppState (Shared Across All Requests)
//=========================================================================================

/// The shared application state, created once at startup and passed to all handlers.
pub struct AppState {
    pub config: Arc<Config>,
    pub edubase: Arc<EdubaseConfig>,
    pub launcher: Arc<dyn BrowserLauncher>,
    pub assembler: Arc<dyn PdfAssembler>,
    pub sessions: SessionRegistry,
}

impl AppState {
    pub fn new(
        config: Arc<Config>,
        edubase: Arc<EdubaseConfig>,
        launcher: Arc<dyn BrowserLauncher>,
        assembler: Arc<dyn PdfAssembler>,
    ) -> Self {
        Self {
            config,
            edubase,
            launcher,
            assembler,
            sessions: SessionRegistry::new(),
        }
    }
}
