//! spkg build server
//!
//! A build server listens for orchestrator connections, authenticates them
//! with a shared token, answers slot queries, and runs at most one package
//! build at a time. Finished packages are uploaded to the repository
//! endpoint before the orchestrator is told the build succeeded.
//!
//! The crate is used in two ways:
//! - **Operator process**: `spkg-compose build-server` binds and serves forever
//! - **In-process library**: tests bind on an ephemeral port with a fake backend

pub mod backend;
pub mod config;
pub mod server;
pub mod session;
pub mod slot;
pub mod upload;

pub use backend::{BuildBackend, BuildError, ShellBackend};
pub use config::{BuildServerConfig, ConfigError, LoadOutcome};
pub use server::{BuildServer, ServerContext, ServerHandle};
pub use session::{JobError, Session, SessionError, SessionState};
pub use slot::{BuildSlot, SlotGuard};
pub use upload::{ArtifactUploader, HttpUploader, UploadError};

/// Version reported to clients on successful authentication.
pub const BUILD_SERVER_VERSION: &str = env!("CARGO_PKG_VERSION");
