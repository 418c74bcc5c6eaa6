use super::{OutputMode, ProcessSupervisor, StartRequest};
use crate::error::{validate_pid, Error, Result};
use crate::port::is_listening;
use crate::record::ConnectionFields;
use async_trait::async_trait;
use nix::sys::signal::{self, killpg, Signal};
use std::process::Stdio;
use std::time::{Duration, Instant};
use tokio::process::{Child, Command};

/// How often the readiness port is probed during startup.
const READY_POLL_INTERVAL: Duration = Duration::from_millis(100);

const DEFAULT_GRACE_PERIOD: Duration = Duration::from_secs(5);

/// Runs a service command under `bash -c` in its own process group and
/// treats it as started once its TCP port accepts connections.
pub struct TcpProcessSupervisor {
    name: String,
    output_mode: OutputMode,
    grace_period: Duration,
    child: Option<Child>,
}

impl TcpProcessSupervisor {
    pub fn new(output_mode: OutputMode) -> Self {
        Self {
            name: String::new(),
            output_mode,
            grace_period: DEFAULT_GRACE_PERIOD,
            child: None,
        }
    }

    /// Time between SIGTERM and SIGKILL on stop.
    pub fn with_grace_period(mut self, grace_period: Duration) -> Self {
        self.grace_period = grace_period;
        self
    }

    /// PID of the running child, `None` if nothing was spawned (or the port
    /// was already served by someone else).
    pub fn pid(&self) -> Option<u32> {
        self.child.as_ref().and_then(Child::id)
    }

    fn spawn(&self, request: &StartRequest) -> Result<Child> {
        tracing::debug!(
            "Spawning '{}' in {:?}: {} (output: {})",
            request.kind,
            request.work_dir,
            request.command,
            self.output_mode
        );

        let mut cmd = Command::new("/bin/bash");
        cmd.arg("-c")
            .arg(format!("exec {}", request.command))
            .current_dir(&request.work_dir)
            .stdin(Stdio::null());

        if self.output_mode.is_passthrough() {
            cmd.stdout(Stdio::inherit()).stderr(Stdio::inherit());
        } else {
            cmd.stdout(Stdio::null()).stderr(Stdio::null());
        }

        // New process group so stop() reaches anything the command forks.
        cmd.kill_on_drop(true).process_group(0);

        cmd.spawn().map_err(|e| {
            tracing::error!("Failed to spawn '{}': {}", request.kind, e);
            Error::StartupFailure {
                service: request.kind.clone(),
                reason: e.to_string(),
            }
        })
    }
}

#[async_trait]
impl ProcessSupervisor for TcpProcessSupervisor {
    #[tracing::instrument(skip(self, request), fields(service.kind = %request.kind))]
    async fn start(&mut self, request: &StartRequest) -> Result<ConnectionFields> {
        if self.child.is_some() {
            return Err(Error::Process(format!(
                "'{}' is already running (PID {:?})",
                self.name,
                self.pid()
            )));
        }
        self.name = request.kind.clone();

        if is_listening(&request.host, request.port).await {
            tracing::warn!(
                "Port {} already in use when trying to start '{}', assuming a compatible instance is running",
                request.port,
                request.kind
            );
            return Ok(request.fields.clone());
        }

        let mut child = self.spawn(request)?;
        let started = Instant::now();

        loop {
            if is_listening(&request.host, request.port).await {
                tracing::info!(
                    "'{}' accepting connections on {}:{} after {:?}",
                    request.kind,
                    request.host,
                    request.port,
                    started.elapsed()
                );
                self.child = Some(child);
                return Ok(request.fields.clone());
            }

            match child.try_wait() {
                Ok(Some(status)) => {
                    return Err(Error::StartupFailure {
                        service: request.kind.clone(),
                        reason: format!(
                            "process exited ({}) before accepting connections on {}:{}",
                            status, request.host, request.port
                        ),
                    });
                }
                Ok(None) => {}
                Err(e) => {
                    tracing::warn!("Failed to poll '{}' for exit: {}", request.kind, e);
                }
            }

            if started.elapsed() >= request.timeout {
                self.child = Some(child);
                if let Err(e) = self.stop().await {
                    tracing::warn!("Failed to stop '{}' after timeout: {}", request.kind, e);
                }
                return Err(Error::StartupFailure {
                    service: request.kind.clone(),
                    reason: format!(
                        "timed out after {:?} waiting for {}:{}",
                        request.timeout, request.host, request.port
                    ),
                });
            }

            tokio::time::sleep(READY_POLL_INTERVAL).await;
        }
    }

    #[tracing::instrument(skip(self), fields(service.kind = %self.name))]
    async fn stop(&mut self) -> Result<()> {
        let Some(mut child) = self.child.take() else {
            return Ok(());
        };

        if let Some(raw_pid) = child.id() {
            let pid = validate_pid(raw_pid, &self.name)?;

            // Signal the whole group first, fall back to the process itself.
            let signal_result =
                killpg(pid, Signal::SIGTERM).or_else(|_| signal::kill(pid, Signal::SIGTERM));

            if signal_result.is_ok() {
                match tokio::time::timeout(self.grace_period, child.wait()).await {
                    Ok(Ok(status)) => {
                        tracing::debug!("'{}' exited: {}", self.name, status);
                        return Ok(());
                    }
                    Ok(Err(e)) => {
                        tracing::warn!("Error waiting for '{}': {}", self.name, e);
                    }
                    Err(_) => {
                        tracing::warn!(
                            "'{}' did not exit after SIGTERM (grace period: {:?}), sending SIGKILL",
                            self.name,
                            self.grace_period
                        );
                    }
                }
            }

            let _ = killpg(pid, Signal::SIGKILL).or_else(|_| signal::kill(pid, Signal::SIGKILL));
        }

        match tokio::time::timeout(Duration::from_secs(2), child.wait()).await {
            Ok(Ok(_)) => Ok(()),
            Ok(Err(e)) => Err(Error::Process(format!(
                "Failed to reap '{}': {}",
                self.name, e
            ))),
            Err(_) => Err(Error::Process(format!(
                "'{}' still running after SIGKILL",
                self.name
            ))),
        }
    }
}
