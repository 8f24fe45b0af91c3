pub mod auth;
pub mod download_task;
pub mod events;
pub mod job;
pub mod middleware;
pub mod protocol;
pub mod rest;
pub mod router;
pub mod session;
pub mod single_shot;
pub mod state;
pub mod sweeper;

// Re-export what the binaries need to build and run the web server.
pub use rest::ApiDoc;
pub use router::build_router;
pub use state::AppState;
pub use sweeper::{close_all_sessions, spawn_session_sweeper};
