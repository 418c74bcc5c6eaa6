//! Manager election and deferred teardown for one shared service.
//!
//! Every worker of a test run builds a [`LifecycleCoordinator`] for the same
//! resource kind and shared directory, calls [`join`](LifecycleCoordinator::join)
//! before its tests and [`leave`](LifecycleCoordinator::leave) after them.
//!
//! - The first worker to take the lock and find no state file becomes the
//!   **manager**: it starts the service while still holding the lock and
//!   writes the record with an empty `sessions` list.
//! - Later workers are **followers**: they append their id to `sessions`.
//! - On leave a follower removes its id. The manager polls until `sessions`
//!   is empty, then stops the service and deletes both files.
//!
//! If the descriptor's environment variable points at a details file the
//! service is managed elsewhere and none of the above happens. A worker
//! with id [`SERIAL_WORKER_ID`] runs alone and owns its own instance.
//!
//! ```text
//!               ┌──────────► ExternallyManaged ─┐
//!               ├──────────► Standalone ────────┤
//! NotJoined ────┼──────────► Manager ───────────┼──► Left
//!               └──────────► Follower ──────────┘
//! ```

use crate::config::CoordinatorConfig;
use crate::descriptor::ResourceDescriptor;
use crate::error::{Error, Result};
use crate::probe::EnvironmentProbe;
use crate::record::{ConnectionFields, ServiceRecord};
use crate::store::SharedRecordStore;
use crate::supervisor::ProcessSupervisor;
use std::fmt;
use tracing::{debug, info};

/// Worker id used when tests are not running in parallel.
pub const SERIAL_WORKER_ID: &str = "master";

/// How often (in polls) the manager logs who it is still waiting on.
const WAIT_LOG_EVERY: u64 = 20;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Role {
    /// Started the service (or recorded external details under the lock)
    /// and tears it down once every follower has left.
    Manager,
    /// Registered in `sessions` of a record created by another worker.
    Follower,
    /// Details came from the environment. Nothing to start or stop.
    ExternallyManaged,
    /// Serial run: started its own instance without the shared files.
    Standalone,
}

impl fmt::Display for Role {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Role::Manager => write!(f, "manager"),
            Role::Follower => write!(f, "follower"),
            Role::ExternallyManaged => write!(f, "externally-managed"),
            Role::Standalone => write!(f, "standalone"),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CoordinatorState {
    NotJoined,
    Joined(Role),
    Left,
}

pub struct LifecycleCoordinator<S: ProcessSupervisor> {
    config: CoordinatorConfig,
    descriptor: ResourceDescriptor,
    worker_id: String,
    store: SharedRecordStore,
    probe: EnvironmentProbe,
    supervisor: S,
    state: CoordinatorState,
    /// Whether this worker spawned a process that it must stop.
    owns_process: bool,
}

impl<S: ProcessSupervisor> LifecycleCoordinator<S> {
    pub fn new(
        config: CoordinatorConfig,
        descriptor: ResourceDescriptor,
        worker_id: impl Into<String>,
        supervisor: S,
    ) -> Result<Self> {
        descriptor.validate()?;

        let worker_id = worker_id.into();
        if worker_id.trim().is_empty() {
            return Err(Error::Config("Worker id cannot be empty".to_string()));
        }

        let store = SharedRecordStore::new(&config.shared_dir, &descriptor.kind);
        let probe = EnvironmentProbe::new(descriptor.env_var.clone());

        Ok(Self {
            config,
            descriptor,
            worker_id,
            store,
            probe,
            supervisor,
            state: CoordinatorState::NotJoined,
            owns_process: false,
        })
    }

    pub fn worker_id(&self) -> &str {
        &self.worker_id
    }

    pub fn descriptor(&self) -> &ResourceDescriptor {
        &self.descriptor
    }

    pub fn store(&self) -> &SharedRecordStore {
        &self.store
    }

    pub fn state(&self) -> CoordinatorState {
        self.state
    }

    pub fn role(&self) -> Option<Role> {
        match self.state {
            CoordinatorState::Joined(role) => Some(role),
            _ => None,
        }
    }

    /// Register this worker as a user of the service, starting it if no other
    /// worker has. Returns the connection details.
    #[tracing::instrument(skip(self), fields(worker = %self.worker_id, kind = %self.descriptor.kind))]
    pub async fn join(&mut self) -> Result<ServiceRecord> {
        if self.state != CoordinatorState::NotJoined {
            return Err(Error::ProtocolViolation(format!(
                "worker '{}' called join() for '{}' while {:?}",
                self.worker_id, self.descriptor.kind, self.state
            )));
        }

        if let Some(fields) = self.probe.probe()? {
            info!(
                "Using externally-managed '{}' from ${}",
                self.descriptor.kind,
                self.probe.env_var().unwrap_or_default()
            );
            self.state = CoordinatorState::Joined(Role::ExternallyManaged);
            return Ok(ServiceRecord::new(fields));
        }

        if self.worker_id == SERIAL_WORKER_ID {
            let fields = self.start_service().await?;
            self.state = CoordinatorState::Joined(Role::Standalone);
            return Ok(ServiceRecord::new(fields).with_manager(true));
        }

        let guard = self.store.lock().await?;
        match guard.load()? {
            None => {
                // Someone may have exported details while we waited on the lock.
                let fields = match self.probe.probe()? {
                    Some(fields) => {
                        info!(
                            "Details for '{}' appeared in ${} while waiting, not starting a process",
                            self.descriptor.kind,
                            self.probe.env_var().unwrap_or_default()
                        );
                        fields
                    }
                    None => self.start_service().await?,
                };

                let record = ServiceRecord::new(fields).managed_by(&self.worker_id);
                if let Err(e) = guard.persist(&record) {
                    drop(guard);
                    self.abandon_process().await;
                    return Err(e);
                }
                drop(guard);

                info!(
                    "Worker '{}' manages '{}'",
                    self.worker_id, self.descriptor.kind
                );
                self.state = CoordinatorState::Joined(Role::Manager);
                Ok(record.with_manager(true))
            }
            Some(mut record) => {
                record.add_session(&self.worker_id)?;
                guard.persist(&record)?;
                drop(guard);

                debug!(
                    "Worker '{}' follows '{}' (sessions: {:?})",
                    self.worker_id,
                    self.descriptor.kind,
                    record.sessions()
                );
                self.state = CoordinatorState::Joined(Role::Follower);
                Ok(record)
            }
        }
    }

    /// Release this worker's claim on the service. For the manager this
    /// waits, without bound, until every follower has left.
    #[tracing::instrument(skip(self), fields(worker = %self.worker_id, kind = %self.descriptor.kind))]
    pub async fn leave(&mut self) -> Result<()> {
        let role = match self.state {
            CoordinatorState::Joined(role) => role,
            CoordinatorState::NotJoined => {
                return Err(Error::ProtocolViolation(format!(
                    "worker '{}' called leave() for '{}' without joining",
                    self.worker_id, self.descriptor.kind
                )))
            }
            CoordinatorState::Left => {
                return Err(Error::ProtocolViolation(format!(
                    "worker '{}' already left '{}'",
                    self.worker_id, self.descriptor.kind
                )))
            }
        };

        let result = match role {
            Role::ExternallyManaged => Ok(()),
            Role::Standalone => self.stop_service().await,
            Role::Follower => self.deregister().await,
            Role::Manager => {
                let result = self.drain_and_teardown().await;
                if result.is_err() {
                    // The shared state is unusable, don't leave our process behind.
                    self.abandon_process().await;
                }
                result
            }
        };

        self.state = CoordinatorState::Left;
        result
    }

    async fn start_service(&mut self) -> Result<ConnectionFields> {
        let request = self
            .descriptor
            .start_request(self.config.startup_timeout)?;
        info!(
            "Starting '{}': {} (ready on {}:{})",
            request.kind, request.command, request.host, request.port
        );
        let fields = self.supervisor.start(&request).await?;
        self.owns_process = true;
        Ok(fields)
    }

    async fn stop_service(&mut self) -> Result<()> {
        if !self.owns_process {
            return Ok(());
        }
        self.owns_process = false;
        self.supervisor.stop().await
    }

    async fn abandon_process(&mut self) {
        if let Err(e) = self.stop_service().await {
            tracing::warn!("Failed to stop '{}': {}", self.descriptor.kind, e);
        }
    }

    async fn deregister(&self) -> Result<()> {
        let worker_id = self.worker_id.clone();
        let state_path = self.store.state_path().to_path_buf();

        self.store
            .with_lock(move |guard| {
                let mut record = guard.load()?.ok_or_else(|| Error::CorruptState {
                    path: state_path,
                    reason: format!(
                        "state file is gone while follower '{}' is still registered",
                        worker_id
                    ),
                })?;
                record.remove_session(&worker_id)?;
                guard.persist(&record)?;
                debug!(
                    "Worker '{}' left (remaining sessions: {:?})",
                    worker_id,
                    record.sessions()
                );
                Ok(())
            })
            .await
    }

    async fn drain_and_teardown(&mut self) -> Result<()> {
        let mut polls: u64 = 0;

        loop {
            let guard = self.store.lock().await?;
            let record = guard.load()?.ok_or_else(|| Error::CorruptState {
                path: self.store.state_path().to_path_buf(),
                reason: "state file removed before the manager tore the service down".to_string(),
            })?;

            if record.sessions().is_empty() {
                let stopped = self.stop_service().await;
                guard.destroy()?;
                info!(
                    "Tore down '{}' after {} poll(s)",
                    self.descriptor.kind, polls
                );
                return stopped;
            }

            if polls % WAIT_LOG_EVERY == 0 {
                debug!(
                    "Manager of '{}' waiting on {} follower(s): {:?}",
                    self.descriptor.kind,
                    record.sessions().len(),
                    record.sessions()
                );
            }

            // Never sleep holding the lock, followers must get in to leave.
            drop(guard);
            polls += 1;
            tokio::time::sleep(self.config.poll_interval).await;
        }
    }
}
