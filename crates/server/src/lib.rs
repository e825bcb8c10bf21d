//! Rollout guard server: HTTP API over the guard library

pub mod api;
pub mod config;
