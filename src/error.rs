// Allow unused_assignments at module level because thiserror's generated code
// for struct variants triggers false positive warnings - the fields ARE used
// in the Display impl but rustc's lint pass doesn't see this.
#![allow(unused_assignments)]

use miette::Diagnostic;
use std::io;
use std::path::PathBuf;
use thiserror::Error;

#[derive(Error, Diagnostic, Debug)]
pub enum Error {
    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Invalid configuration: {0}")]
    #[diagnostic(
        code(fixtures::config::validation),
        help("Check the `services:` section of your service-fixtures.yaml")
    )]
    Validation(String),

    #[error("Protocol violation: {0}")]
    #[diagnostic(
        code(fixtures::protocol::violation),
        help("A worker joined twice or left without joining. This is a bug in the caller, not a retryable condition")
    )]
    ProtocolViolation(String),

    #[error("Corrupt shared state in {}: {reason}", .path.display())]
    #[diagnostic(
        code(fixtures::state::corrupt),
        help("Another worker wrote an unreadable record. Abort the test run and remove the file before retrying")
    )]
    CorruptState { path: PathBuf, reason: String },

    #[error("Service '{service}' failed to start: {reason}")]
    #[diagnostic(
        code(fixtures::service::start_failed),
        help("Verify the command exists and is executable, or increase the startup timeout")
    )]
    StartupFailure { service: String, reason: String },

    #[error("Process error: {0}")]
    #[diagnostic(
        code(fixtures::process::error),
        help("Check that the command exists and is executable")
    )]
    Process(String),

    #[error("Filesystem error: {0}")]
    #[diagnostic(code(fixtures::filesystem::error))]
    Filesystem(String),

    #[error("Template resolution error: {0}")]
    TemplateResolution(String),

    #[error("Port allocation failed: {0}")]
    #[diagnostic(code(fixtures::port::allocation_failed))]
    PortAllocation(String),

    #[error("Invalid connection details in '{}': {reason}", .path.display())]
    #[diagnostic(
        code(fixtures::env::details),
        help("The file named by the environment variable must contain a JSON object of connection fields")
    )]
    EnvDetails { path: PathBuf, reason: String },

    #[error("Invalid PID {pid}: {reason}")]
    InvalidPid { pid: u32, reason: String },

    #[error("YAML error: {0}")]
    Yaml(#[from] serde_yaml::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("IO error: {0}")]
    Io(#[from] io::Error),
}

pub type Result<T> = std::result::Result<T, Error>;

impl Error {
    /// Returns a helpful suggestion for resolving this error, if available.
    pub fn suggestion(&self) -> Option<String> {
        match self {
            Error::CorruptState { path, .. } => Some(format!(
                "Stop every worker of this test run, then remove {} and its .lock file.",
                path.display()
            )),
            Error::StartupFailure { service, .. } => Some(format!(
                "Run the '{}' command by hand to see why it does not come up.",
                service
            )),
            Error::EnvDetails { path, .. } => Some(format!(
                "Regenerate {} with run-test-services, or unset the variable pointing at it.",
                path.display()
            )),
            Error::Config(_) | Error::Validation(_) => {
                Some("Check service-fixtures.yaml against the built-in descriptors.".to_string())
            }
            Error::Process(_) => Some("Check that the command exists and is executable".to_string()),
            _ => None,
        }
    }

    /// Formats the error with its suggestion (if any) for user-friendly display.
    pub fn with_suggestion(&self) -> String {
        match self.suggestion() {
            Some(suggestion) => format!("{}\n\nHint: {}", self, suggestion),
            None => self.to_string(),
        }
    }
}

/// Validates and converts a u32 PID to nix::unistd::Pid safely.
/// Returns Err for PID 0 (process group), PID 1 (init), or values > i32::MAX.
pub fn validate_pid(pid: u32, service_name: &str) -> Result<nix::unistd::Pid> {
    if pid == 0 {
        return Err(Error::InvalidPid {
            pid,
            reason: format!(
                "PID 0 is invalid for service '{}' (refers to process group, not a process)",
                service_name
            ),
        });
    }
    if pid == 1 {
        return Err(Error::InvalidPid {
            pid,
            reason: format!(
                "refusing to operate on PID 1 (init) for service '{}'",
                service_name
            ),
        });
    }
    if pid > i32::MAX as u32 {
        return Err(Error::InvalidPid {
            pid,
            reason: format!(
                "PID {} exceeds i32::MAX for service '{}', cannot convert safely",
                pid, service_name
            ),
        });
    }
    Ok(nix::unistd::Pid::from_raw(pid as i32))
}
