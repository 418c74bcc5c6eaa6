//! Starting and stopping the managed service process.
//!
//! The coordinator only talks to the [`ProcessSupervisor`] trait, so tests
//! can substitute a recording fake. [`TcpProcessSupervisor`] is the real
//! implementation: it spawns a shell command and waits for a TCP port.

mod process;

pub use process::*;

use crate::error::Result;
use crate::record::ConnectionFields;
use async_trait::async_trait;
use std::fmt;
use std::path::PathBuf;
use std::time::Duration;

/// Everything needed to bring up one instance.
#[derive(Debug, Clone)]
pub struct StartRequest {
    pub kind: String,
    /// Fully rendered shell command.
    pub command: String,
    pub host: String,
    /// Port that must accept connections before the start counts as done.
    pub port: u16,
    pub timeout: Duration,
    pub work_dir: PathBuf,
    /// Connection fields the command was rendered from.
    pub fields: ConnectionFields,
}

#[async_trait]
pub trait ProcessSupervisor: Send {
    /// Launch the command and block until `host:port` accepts connections.
    /// Returns the connection fields to publish.
    async fn start(&mut self, request: &StartRequest) -> Result<ConnectionFields>;

    /// Terminate and reap the process. Calling it again is a no-op.
    async fn stop(&mut self) -> Result<()>;
}

#[async_trait]
impl<S: ProcessSupervisor + ?Sized> ProcessSupervisor for Box<S> {
    async fn start(&mut self, request: &StartRequest) -> Result<ConnectionFields> {
        (**self).start(request).await
    }

    async fn stop(&mut self) -> Result<()> {
        (**self).stop().await
    }
}

/// Where the child's stdout/stderr go.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum OutputMode {
    /// Discard output.
    #[default]
    Null,

    /// Inherit the parent's stdio (`--verbose`).
    Passthrough,
}

impl OutputMode {
    pub fn is_passthrough(&self) -> bool {
        matches!(self, OutputMode::Passthrough)
    }
}

impl fmt::Display for OutputMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            OutputMode::Null => write!(f, "null"),
            OutputMode::Passthrough => write!(f, "passthrough"),
        }
    }
}
