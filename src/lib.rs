//! livepoll library
//!
//! A live polling engine: one active question at a time, one vote per
//! respondent, real-time tallies and a server-driven countdown, served over
//! HTTP and WebSocket.

pub mod cli;
pub mod config;
pub mod metrics;
pub mod polls;
pub mod server;
pub mod sessions;
pub mod timer;
pub mod tracing;
