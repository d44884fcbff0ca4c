//! Per-connection protocol session.
//!
//! Session states: UNAUTHENTICATED → AUTHENTICATED ⇄ BUILDING → DISCONNECTED
//!
//! A session is owned by the thread serving its connection. The only state
//! shared with other sessions is the server's [`BuildSlot`](crate::BuildSlot),
//! taken for the whole BUILDING interval.

use std::io::{BufRead, Write};
use std::path::PathBuf;
use std::sync::Arc;

use spkg_protocol::{read_message, write_message, Descriptor, ProtocolError, Request, Response};
use tracing::{debug, error, info, warn};

use crate::backend::BuildError;
use crate::server::ServerContext;
use crate::upload::UploadError;
use crate::BUILD_SERVER_VERSION;

/// Session state enumeration
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionState {
    /// Connected, no valid token seen yet
    Unauthenticated,
    /// Token accepted, idle
    Authenticated,
    /// A build accepted on this session is running
    Building,
    /// Session ended (disconnect, protocol error or I/O failure)
    Disconnected,
}

/// Errors that end a session.
#[derive(Debug, thiserror::Error)]
pub enum SessionError {
    #[error(transparent)]
    Protocol(#[from] ProtocolError),

    #[error("event '{event}' is not valid while {state:?}")]
    UnexpectedEvent {
        event: &'static str,
        state: SessionState,
    },
}

/// Errors from running an accepted build.
#[derive(Debug, thiserror::Error)]
pub enum JobError {
    #[error("build failed: {0}")]
    Build(#[from] BuildError),

    #[error("upload failed: {0}")]
    Upload(#[from] UploadError),

    #[error("artifact path {0} has no file name")]
    NoFileName(PathBuf),
}

enum Flow {
    Continue,
    Close,
}

/// One client connection.
pub struct Session {
    peer: String,
    state: SessionState,
    authenticated: bool,
    ctx: Arc<ServerContext>,
}

impl Session {
    pub fn new(ctx: Arc<ServerContext>, peer: impl Into<String>) -> Self {
        Self {
            peer: peer.into(),
            state: SessionState::Unauthenticated,
            authenticated: false,
            ctx,
        }
    }

    pub fn state(&self) -> SessionState {
        self.state
    }

    /// Whether this session ever presented a valid token.
    pub fn authenticated(&self) -> bool {
        self.authenticated
    }

    /// Whether this session is running a build.
    pub fn busy(&self) -> bool {
        self.state == SessionState::Building
    }

    pub fn peer(&self) -> &str {
        &self.peer
    }

    /// Serve requests until the peer disconnects or misbehaves.
    pub fn run_with_io<R: BufRead, W: Write>(&mut self, reader: &mut R, writer: &mut W) {
        loop {
            let request: Request = match read_message(reader) {
                Ok(request) => request,
                Err(e) if e.is_disconnect() => {
                    debug!("peer closed the connection");
                    break;
                }
                Err(e) => {
                    warn!(error = %e, "protocol error, closing session");
                    break;
                }
            };

            debug!(event = request.event(), state = ?self.state, "request received");
            match self.handle(request, writer) {
                Ok(Flow::Continue) => {}
                Ok(Flow::Close) => break,
                Err(e) => {
                    warn!(error = %e, "closing session");
                    break;
                }
            }
        }
        self.state = SessionState::Disconnected;
    }

    fn handle<W: Write>(&mut self, request: Request, writer: &mut W) -> Result<Flow, SessionError> {
        match (self.state, request) {
            (_, Request::Disconnect) => {
                debug!("client disconnected");
                Ok(Flow::Close)
            }
            (SessionState::Unauthenticated, Request::Auth { token }) => self.authenticate(&token, writer),
            (SessionState::Authenticated, Request::RequestSlot) => {
                let reply = if self.ctx.slot.is_busy() {
                    Response::Full
                } else {
                    Response::Free
                };
                write_message(writer, &reply)?;
                Ok(Flow::Continue)
            }
            (SessionState::Authenticated, Request::UpdatePkg { data, repo_url }) => {
                self.update_pkg(&data, repo_url, writer)?;
                Ok(Flow::Continue)
            }
            (state, request) => Err(SessionError::UnexpectedEvent {
                event: request.event(),
                state,
            }),
        }
    }

    fn authenticate<W: Write>(&mut self, token: &str, writer: &mut W) -> Result<Flow, SessionError> {
        if token != self.ctx.config.token {
            warn!("client presented an invalid token");
            write_message(writer, &Response::InvalidToken)?;
            return Ok(Flow::Close);
        }

        self.state = SessionState::Authenticated;
        self.authenticated = true;
        info!("client authenticated");
        write_message(
            writer,
            &Response::Authenticated {
                version: BUILD_SERVER_VERSION.to_string(),
                architecture: self.ctx.architecture.clone(),
            },
        )?;
        Ok(Flow::Continue)
    }

    fn update_pkg<W: Write>(
        &mut self,
        data: &serde_json::Value,
        repo_url: Option<String>,
        writer: &mut W,
    ) -> Result<(), SessionError> {
        let descriptor = match Descriptor::from_value(data) {
            Ok((_, descriptor)) => descriptor,
            Err(e) => {
                warn!(error = %e, "rejecting invalid package descriptor");
                write_message(writer, &Response::failed(e.to_string()))?;
                return Ok(());
            }
        };

        let Some(guard) = self.ctx.slot.try_acquire() else {
            warn!(package = %descriptor.meta.id, "build requested while another build is running");
            write_message(writer, &Response::failed("build server is busy"))?;
            return Ok(());
        };

        self.state = SessionState::Building;
        info!(
            package = %descriptor.meta.id,
            version = %descriptor.meta.version,
            "build request accepted"
        );
        let accepted = write_message(writer, &Response::Accept);
        let result = match accepted {
            Ok(()) => self.ctx.run_build(&descriptor, repo_url.as_deref()),
            Err(e) => {
                drop(guard);
                self.state = SessionState::Authenticated;
                return Err(e.into());
            }
        };
        drop(guard);
        self.state = SessionState::Authenticated;

        let reply = match result {
            Ok(package_file) => {
                info!(package = %descriptor.meta.id, file = %package_file, "build succeeded");
                Response::Success { package_file }
            }
            Err(e) => {
                error!(package = %descriptor.meta.id, error = %e, "build failed");
                Response::failed(e.to_string())
            }
        };
        write_message(writer, &reply)?;
        Ok(())
    }
}
