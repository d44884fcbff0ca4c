//! spkg build-server protocol
//!
//! Defines the JSON messages exchanged between the orchestrator and its
//! build servers, the newline framing used on the TCP stream, and the
//! compose descriptor carried inside build requests.

pub mod codec;
pub mod compose;
pub mod error;
pub mod request;
pub mod response;

pub use codec::{read_message, write_message, MAX_MESSAGE_BYTES};
pub use compose::{
    BuildSystem, ComposeData, ComposeError, Descriptor, InstallFormat, Meta, Prepare, PrepareKind,
};
pub use error::ProtocolError;
pub use request::Request;
pub use response::Response;

/// Default TCP port a build server listens on.
pub const DEFAULT_PORT: u16 = 3086;
