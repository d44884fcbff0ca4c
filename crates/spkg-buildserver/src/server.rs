//! TCP accept loop.
//!
//! Each accepted connection gets its own thread and [`Session`]. Sessions
//! share one [`ServerContext`], which owns the admission slot.

use std::fs;
use std::io::{self, BufReader};
use std::net::{Shutdown, SocketAddr, TcpListener, TcpStream};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::Duration;

use spkg_protocol::Descriptor;
use tracing::{debug, info, info_span, warn};
use uuid::Uuid;

use crate::backend::{BuildBackend, ShellBackend};
use crate::config::BuildServerConfig;
use crate::session::{JobError, Session};
use crate::slot::BuildSlot;
use crate::upload::{ArtifactUploader, HttpUploader};

/// How often the accept loop checks the stop flag when idle.
const ACCEPT_POLL_INTERVAL: Duration = Duration::from_millis(50);

/// State shared by every session of one server.
pub struct ServerContext {
    pub config: BuildServerConfig,
    pub slot: BuildSlot,
    pub architecture: String,
    backend: Arc<dyn BuildBackend>,
    uploader: Arc<dyn ArtifactUploader>,
}

impl ServerContext {
    pub fn new(
        config: BuildServerConfig,
        backend: Arc<dyn BuildBackend>,
        uploader: Arc<dyn ArtifactUploader>,
    ) -> Self {
        Self {
            config,
            slot: BuildSlot::new(),
            architecture: std::env::consts::ARCH.to_string(),
            backend,
            uploader,
        }
    }

    /// Build, upload and clean up one package. Returns the package file name.
    pub(crate) fn run_build(
        &self,
        descriptor: &Descriptor,
        repo_url: Option<&str>,
    ) -> Result<String, JobError> {
        let work_dir = self.config.work_dir.join(Uuid::new_v4().to_string());
        debug!(work_dir = %work_dir.display(), "starting build");

        let result = self.build_and_upload(descriptor, repo_url, &work_dir);

        if work_dir.exists() {
            if let Err(e) = fs::remove_dir_all(&work_dir) {
                warn!(work_dir = %work_dir.display(), error = %e, "failed to remove work dir");
            }
        }
        result
    }

    fn build_and_upload(
        &self,
        descriptor: &Descriptor,
        repo_url: Option<&str>,
        work_dir: &std::path::Path,
    ) -> Result<String, JobError> {
        let artifact = self.backend.build(descriptor, work_dir)?;
        let file_name = artifact
            .file_name()
            .map(|name| name.to_string_lossy().into_owned())
            .ok_or_else(|| JobError::NoFileName(artifact.clone()))?;

        let repo_url = repo_url.unwrap_or(&self.config.repo_url);
        info!(file = %file_name, repo = %repo_url, "uploading package");
        self.uploader.upload(repo_url, &descriptor.meta.id, &artifact)?;
        Ok(file_name)
    }
}

/// A build server ready to accept connections.
pub struct BuildServer {
    ctx: Arc<ServerContext>,
}

impl BuildServer {
    pub fn new(
        config: BuildServerConfig,
        backend: Arc<dyn BuildBackend>,
        uploader: Arc<dyn ArtifactUploader>,
    ) -> Self {
        Self {
            ctx: Arc::new(ServerContext::new(config, backend, uploader)),
        }
    }

    /// Server with the shell backend and HTTP uploader.
    pub fn with_defaults(config: BuildServerConfig) -> Self {
        let uploader = HttpUploader::new(config.upload_token());
        Self::new(config, Arc::new(ShellBackend::new()), Arc::new(uploader))
    }

    pub fn context(&self) -> &Arc<ServerContext> {
        &self.ctx
    }

    pub fn slot(&self) -> &BuildSlot {
        &self.ctx.slot
    }

    /// Bind the configured address.
    pub fn bind(&self) -> io::Result<TcpListener> {
        TcpListener::bind(self.ctx.config.bind_address())
    }

    /// Accept connections until `stop` is set.
    pub fn serve(&self, listener: TcpListener, stop: &AtomicBool) -> io::Result<()> {
        listener.set_nonblocking(true)?;
        info!(
            name = %self.ctx.config.name,
            address = %listener.local_addr()?,
            tags = ?self.ctx.config.tags,
            "build server listening"
        );

        while !stop.load(Ordering::Acquire) {
            match listener.accept() {
                Ok((stream, peer)) => self.dispatch(stream, peer),
                Err(e) if e.kind() == io::ErrorKind::WouldBlock => {
                    thread::sleep(ACCEPT_POLL_INTERVAL);
                }
                Err(e) => {
                    warn!(error = %e, "accept failed");
                    thread::sleep(ACCEPT_POLL_INTERVAL);
                }
            }
        }

        info!("build server stopped");
        Ok(())
    }

    /// Serve on a background thread.
    pub fn spawn(self, listener: TcpListener) -> io::Result<ServerHandle> {
        let addr = listener.local_addr()?;
        let stop = Arc::new(AtomicBool::new(false));
        let flag = Arc::clone(&stop);
        let thread = thread::Builder::new()
            .name("build-server".to_string())
            .spawn(move || self.serve(listener, &flag))?;

        Ok(ServerHandle {
            addr,
            stop,
            thread: Some(thread),
        })
    }

    fn dispatch(&self, stream: TcpStream, peer: SocketAddr) {
        if let Err(e) = stream.set_nonblocking(false) {
            warn!(%peer, error = %e, "dropping connection");
            return;
        }

        let ctx = Arc::clone(&self.ctx);
        let spawned = thread::Builder::new()
            .name(format!("session-{}", peer))
            .spawn(move || handle_connection(ctx, stream, peer));
        if let Err(e) = spawned {
            warn!(%peer, error = %e, "failed to spawn session thread");
        }
    }
}

fn handle_connection(ctx: Arc<ServerContext>, stream: TcpStream, peer: SocketAddr) {
    let span = info_span!("session", %peer);
    let _enter = span.enter();
    info!("connection accepted");

    let read_half = match stream.try_clone() {
        Ok(s) => s,
        Err(e) => {
            warn!(error = %e, "failed to clone stream");
            return;
        }
    };
    let mut reader = BufReader::new(read_half);
    let mut writer = stream;

    let mut session = Session::new(ctx, peer.to_string());
    session.run_with_io(&mut reader, &mut writer);

    let _ = writer.shutdown(Shutdown::Both);
    info!("connection closed");
}

/// Running server; stops the accept loop when shut down or dropped.
pub struct ServerHandle {
    addr: SocketAddr,
    stop: Arc<AtomicBool>,
    thread: Option<JoinHandle<io::Result<()>>>,
}

impl ServerHandle {
    pub fn local_addr(&self) -> SocketAddr {
        self.addr
    }

    /// Stop accepting and wait for the accept loop to exit.
    pub fn shutdown(mut self) -> io::Result<()> {
        self.stop_and_join()
    }

    fn stop_and_join(&mut self) -> io::Result<()> {
        self.stop.store(true, Ordering::Release);
        match self.thread.take() {
            Some(thread) => thread
                .join()
                .map_err(|_| io::Error::new(io::ErrorKind::Other, "build server thread panicked"))?,
            None => Ok(()),
        }
    }
}

impl Drop for ServerHandle {
    fn drop(&mut self) {
        let _ = self.stop_and_join();
    }
}
