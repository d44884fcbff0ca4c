//! Host-Side Components
//!
//! Orchestrator-side connections to build servers.

pub mod client;

pub use client::{BuildServerClient, ClientConfig, ClientError, ClientResult, ServerInfo};
