//! services/api/src/adapters/mod.rs
//!
//! Concrete implementations of the core ports.

pub mod chromium;
pub mod pdf;

pub use chromium::{ChromiumLauncher, ChromiumPage};
pub use pdf::LopdfAssembler;
