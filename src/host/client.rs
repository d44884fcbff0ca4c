//! Build server client
//!
//! Orchestrator side of the wire protocol: connect, authenticate, query the
//! slot, submit one build and wait for its terminal reply.

use std::io::BufReader;
use std::net::{Shutdown, TcpStream, ToSocketAddrs};
use std::time::Duration;

use spkg_protocol::{read_message, write_message, ComposeData, ProtocolError, Request, Response};
use tracing::{debug, warn};

use crate::inventory::ExecutorDescriptor;

/// Client timeouts
#[derive(Debug, Clone)]
pub struct ClientConfig {
    /// TCP connect timeout
    pub connect_timeout: Duration,
    /// Wait for handshake and slot replies
    pub reply_timeout: Duration,
}

impl Default for ClientConfig {
    fn default() -> Self {
        Self {
            connect_timeout: Duration::from_secs(10),
            reply_timeout: Duration::from_secs(30),
        }
    }
}

/// Build server client errors
#[derive(Debug, thiserror::Error)]
pub enum ClientError {
    #[error("Cannot reach build server '{server}' at {address}: {reason}")]
    Connection {
        server: String,
        address: String,
        reason: String,
    },

    #[error("Build server '{server}' closed the connection")]
    Closed { server: String },

    #[error("Build server '{server}' rejected the token")]
    InvalidToken { server: String },

    #[error("Build server '{server}' has no free slot")]
    SlotUnavailable { server: String },

    #[error("Protocol error with build server '{server}': {reason}")]
    Protocol { server: String, reason: String },

    #[error("Build on '{server}' failed: {reason}")]
    BuildFailed { server: String, reason: String },

    #[error("Build on '{server}' did not finish within {timeout:?}")]
    Timeout { server: String, timeout: Duration },
}

pub type ClientResult<T> = Result<T, ClientError>;

/// What the build server reported on authentication.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ServerInfo {
    pub version: String,
    pub architecture: String,
}

/// One connection to one build server.
pub struct BuildServerClient {
    server: String,
    reader: BufReader<TcpStream>,
    writer: TcpStream,
    config: ClientConfig,
    info: Option<ServerInfo>,
}

impl std::fmt::Debug for BuildServerClient {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("BuildServerClient")
            .field("server", &self.server)
            .field("info", &self.info)
            .finish_non_exhaustive()
    }
}

impl BuildServerClient {
    /// Open a TCP connection to `executor`.
    pub fn connect(executor: &ExecutorDescriptor, config: ClientConfig) -> ClientResult<Self> {
        let connection_error = |reason: String| ClientError::Connection {
            server: executor.name.clone(),
            address: executor.address.clone(),
            reason,
        };

        let addrs: Vec<_> = executor
            .address
            .to_socket_addrs()
            .map_err(|e| connection_error(e.to_string()))?
            .collect();

        let mut last_error = String::from("address resolved to nothing");
        let mut stream = None;
        for addr in addrs {
            match TcpStream::connect_timeout(&addr, config.connect_timeout) {
                Ok(s) => {
                    stream = Some(s);
                    break;
                }
                Err(e) => last_error = e.to_string(),
            }
        }
        let stream = stream.ok_or_else(|| connection_error(last_error))?;

        let _ = stream.set_nodelay(true);
        let read_half = stream.try_clone().map_err(|e| connection_error(e.to_string()))?;
        debug!(server = %executor.name, address = %executor.address, "connected");

        Ok(Self {
            server: executor.name.clone(),
            reader: BufReader::new(read_half),
            writer: stream,
            config,
            info: None,
        })
    }

    /// Connect and authenticate with the executor's configured token.
    pub fn open(executor: &ExecutorDescriptor, config: ClientConfig) -> ClientResult<Self> {
        let mut client = Self::connect(executor, config)?;
        client.auth(&executor.token)?;
        Ok(client)
    }

    pub fn server(&self) -> &str {
        &self.server
    }

    /// Version and architecture reported by the server, once authenticated.
    pub fn info(&self) -> Option<&ServerInfo> {
        self.info.as_ref()
    }

    /// Present `token`.
    pub fn auth(&mut self, token: &str) -> ClientResult<&ServerInfo> {
        self.send(&Request::Auth {
            token: token.to_string(),
        })?;

        match self.recv(Some(self.config.reply_timeout))? {
            Response::Authenticated {
                version,
                architecture,
            } => {
                debug!(server = %self.server, %version, %architecture, "authenticated");
                Ok(&*self.info.insert(ServerInfo {
                    version,
                    architecture,
                }))
            }
            Response::InvalidToken => Err(ClientError::InvalidToken {
                server: self.server.clone(),
            }),
            other => Err(self.unexpected("auth", &other)),
        }
    }

    /// Check that the server could start a build right now.
    ///
    /// A busy server is reported as [`ClientError::SlotUnavailable`]; the
    /// connection stays usable.
    pub fn request_slot(&mut self) -> ClientResult<()> {
        self.send(&Request::RequestSlot)?;
        match self.recv(Some(self.config.reply_timeout))? {
            Response::Free => Ok(()),
            Response::Full => Err(ClientError::SlotUnavailable {
                server: self.server.clone(),
            }),
            other => Err(self.unexpected("request_slot", &other)),
        }
    }

    /// Submit a build and wait for its outcome, then disconnect.
    ///
    /// Returns the package file name reported on success. `timeout` bounds
    /// the wait after `accept`; `None` waits indefinitely.
    pub fn submit_build(
        mut self,
        data: &ComposeData,
        repo_url: Option<String>,
        timeout: Option<Duration>,
    ) -> ClientResult<String> {
        let result = self.run_build(data, repo_url, timeout);
        self.disconnect();
        result
    }

    fn run_build(
        &mut self,
        data: &ComposeData,
        repo_url: Option<String>,
        timeout: Option<Duration>,
    ) -> ClientResult<String> {
        self.send(&Request::update_pkg(data, repo_url))?;

        match self.recv(Some(self.config.reply_timeout))? {
            Response::Accept => {}
            Response::Failed { reason } => {
                return Err(ClientError::BuildFailed {
                    server: self.server.clone(),
                    reason: reason.unwrap_or_else(|| "request refused".to_string()),
                })
            }
            other => return Err(self.unexpected("update_pkg", &other)),
        }
        debug!(server = %self.server, "build accepted");

        match self.recv(timeout)? {
            Response::Success { package_file } => Ok(package_file),
            Response::Failed { reason } => Err(ClientError::BuildFailed {
                server: self.server.clone(),
                reason: reason.unwrap_or_else(|| "no reason given".to_string()),
            }),
            other => Err(self.unexpected("update_pkg", &other)),
        }
    }

    /// Send `disconnect` and close the connection.
    pub fn disconnect(&mut self) {
        if let Err(e) = write_message(&mut self.writer, &Request::Disconnect) {
            debug!(server = %self.server, error = %e, "disconnect not delivered");
        }
        let _ = self.writer.shutdown(Shutdown::Both);
    }

    fn send(&mut self, request: &Request) -> ClientResult<()> {
        write_message(&mut self.writer, request).map_err(|e| self.map_protocol(e, None))
    }

    fn recv(&mut self, timeout: Option<Duration>) -> ClientResult<Response> {
        if let Err(e) = self.writer.set_read_timeout(timeout) {
            warn!(server = %self.server, error = %e, "failed to set read timeout");
        }
        read_message(&mut self.reader).map_err(|e| self.map_protocol(e, timeout))
    }

    fn map_protocol(&self, error: ProtocolError, timeout: Option<Duration>) -> ClientError {
        let server = self.server.clone();
        if error.is_disconnect() {
            ClientError::Closed { server }
        } else if error.is_timeout() {
            ClientError::Timeout {
                server,
                timeout: timeout.unwrap_or_default(),
            }
        } else {
            ClientError::Protocol {
                server,
                reason: error.to_string(),
            }
        }
    }

    fn unexpected(&self, request: &str, reply: &Response) -> ClientError {
        ClientError::Protocol {
            server: self.server.clone(),
            reason: format!("unexpected '{}' reply to '{}'", reply.name(), request),
        }
    }
}
