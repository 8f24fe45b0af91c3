//! crates/edubase_core/src/lib.rs
//!
//! Core logic for turning books of the edubase reading platform into PDF files.
//! Everything here talks to the outside world through the traits in [`ports`].

pub mod auth;
pub mod config;
pub mod domain;
pub mod filename;
pub mod library;
pub mod orchestrator;
pub mod ports;
pub mod reader;
pub mod retry;
pub mod selectors;
pub mod validation;

#[cfg(any(test, feature = "testing"))]
pub mod testing;

pub use auth::{AuthError, Authenticator, LoginMode};
pub use config::EdubaseConfig;
pub use domain::{Book, BookId, Credentials, JobStatus};
pub use orchestrator::{
    DownloadError, DownloadOrchestrator, DownloadOutcome, DownloadPlan, ProgressSink, ProgressUpdate,
};
pub use ports::{
    BrowserLauncher, LaunchOptions, PageContent, PageDriver, PageLayout, PdfAssembler, PortError,
    PortResult,
};
