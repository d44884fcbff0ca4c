//! spkg-compose orchestrator
//!
//! Tracks upstream releases of the packages in a descriptor tree and keeps
//! their builds current across a fleet of architecture-tagged build
//! servers. A new upstream state is rebuilt for every architecture in
//! parallel and either committed everywhere or rolled back.

pub mod build;
pub mod config;
pub mod host;
pub mod index;
pub mod inventory;
pub mod logging;
pub mod orchestrator;
pub mod routines;
pub mod specfile;
pub mod tracker;
pub mod update;

pub use config::{ConfigError, OrchestratorConfig};
pub use host::{BuildServerClient, ClientError};
pub use index::{PackageIndex, PackageRecord};
pub use inventory::{ExecutorDescriptor, ExecutorInventory};
pub use orchestrator::{Orchestrator, OrchestratorError};
pub use routines::{ExclusionGate, RoutineProcess, Scheduler};
pub use tracker::{FetchOutcome, ReleaseTracker, TrackerError};
pub use update::{UpdateOutcome, UpdateRequest, UpdateWorkflow};
