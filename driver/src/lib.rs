//! Container runtime driver.
//!
//! Every simulation actor (chain node, coordinator, wallets) runs as an
//! isolated container instance. The orchestrator only ever talks to the
//! runtime through the [`Driver`] trait; [`CliDriver`] implements it on top
//! of the `docker`/`podman` command line.

use async_trait::async_trait;
use std::collections::HashMap;
use std::path::Path;
use thiserror::Error;

pub mod cli;

pub use cli::CliDriver;

/// Error type for driver operations.
#[derive(Debug, Error)]
pub enum DriverError {
    #[error("runtime command failed ({command}): {stderr}")]
    CommandFailed { command: String, stderr: String },
    #[error("could not launch runtime binary: {0}")]
    Spawn(#[from] std::io::Error),
    #[error("unexpected runtime output: {0}")]
    Malformed(String),
}

impl DriverError {
    /// Whether the failure is worth retrying at a higher level. Launch
    /// errors mean the runtime binary itself is missing; retrying cannot
    /// help with those.
    pub fn is_transient(&self) -> bool {
        !matches!(self, DriverError::Spawn(_))
    }
}

pub type Result<T> = std::result::Result<T, DriverError>;

/// Resource and network parameters for one container.
#[derive(Debug, Clone, Default)]
pub struct RunSpec {
    pub image: String,
    /// `(container_port, host_port)` publications.
    pub ports: Vec<(u16, u16)>,
    pub env: Vec<(String, String)>,
    /// CPU limit; 0.0 leaves the runtime default in place.
    pub cpus: f64,
    /// Memory limit in MB; 0 leaves the runtime default in place.
    pub memory_mb: u64,
}

impl RunSpec {
    pub fn new(image: impl Into<String>) -> Self {
        Self {
            image: image.into(),
            ..Self::default()
        }
    }

    pub fn port(mut self, container: u16, host: u16) -> Self {
        self.ports.push((container, host));
        self
    }

    pub fn env(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.env.push((key.into(), value.into()));
        self
    }

    pub fn resources(mut self, cpus: f64, memory_mb: u64) -> Self {
        self.cpus = cpus;
        self.memory_mb = memory_mb;
        self
    }
}

/// A started container: its internal address and host port mapping.
#[derive(Debug, Clone)]
pub struct Instance {
    /// Address reachable from other containers on the runtime network.
    pub address: String,
    /// `container_port -> host_port`, as requested in the [`RunSpec`].
    pub ports: HashMap<u16, u16>,
}

impl Instance {
    /// Host port a container port was published at. Unpublished ports fall
    /// back to the container port itself (direct-address setups).
    pub fn host_port(&self, container: u16) -> u16 {
        self.ports.get(&container).copied().unwrap_or(container)
    }
}

/// Contract between the orchestrator and the container runtime.
///
/// Implementations must scope every container name they create so that
/// [`Driver::cleanup`] can sweep all of them without touching unrelated
/// containers on the same host.
#[async_trait]
pub trait Driver: Send + Sync {
    /// Whether `image` is already present on the host.
    async fn has_image(&self, image: &str) -> Result<bool>;

    /// Build `image` from the given build context directory.
    async fn build(&self, image: &str, context: &Path) -> Result<()>;

    /// Pull `image` from a registry.
    async fn pull(&self, image: &str) -> Result<()>;

    /// Start a detached container called `name` and report where it runs.
    async fn run(&self, name: &str, spec: RunSpec) -> Result<Instance>;

    /// Stop and remove the container called `name`, clearing any partial
    /// state a failed start may have left behind.
    async fn stop(&self, name: &str) -> Result<()>;

    /// Copy a local file into the container.
    async fn upload(&self, name: &str, local: &Path, remote: &str) -> Result<()>;

    /// Copy a file or directory out of the container. Fails if the remote
    /// path does not exist.
    async fn download(&self, name: &str, remote: &str, local: &Path) -> Result<()>;

    /// Read a file inside the running container without copying it out.
    /// Fails if the container is gone or the path is unreadable.
    async fn peek(&self, name: &str, remote: &str) -> Result<Vec<u8>>;

    /// Remove every container this driver created.
    async fn cleanup(&self) -> Result<()>;
}
