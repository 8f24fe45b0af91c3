//! services/api/src/lib.rs
//!
//! The `api` service: browser and PDF adapters, configuration, the HTTP server
//! and the command line front end.

pub mod adapters;
pub mod cli;
pub mod config;
pub mod error;
pub mod web;
