//! Services started outside a test run.
//!
//! A [`StandaloneService`] starts one descriptor, writes its connection
//! details to `<details_dir>/<kind>-details.json` and reports the
//! environment assignment that makes test runs pick the instance up through
//! the environment bypass instead of starting their own.

use crate::descriptor::ResourceDescriptor;
use crate::error::{Error, Result};
use crate::record::ConnectionFields;
use crate::supervisor::{OutputMode, ProcessSupervisor, TcpProcessSupervisor};
use serde_json::Value;
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;
use tracing::{info, warn};

pub struct StandaloneService<S: ProcessSupervisor = TcpProcessSupervisor> {
    descriptor: ResourceDescriptor,
    supervisor: S,
    details_path: PathBuf,
    fields: Option<ConnectionFields>,
}

impl StandaloneService<TcpProcessSupervisor> {
    pub fn new(descriptor: ResourceDescriptor, details_dir: &Path, output_mode: OutputMode) -> Self {
        Self::with_supervisor(descriptor, details_dir, TcpProcessSupervisor::new(output_mode))
    }
}

impl<S: ProcessSupervisor> StandaloneService<S> {
    pub fn with_supervisor(descriptor: ResourceDescriptor, details_dir: &Path, supervisor: S) -> Self {
        let details_path = details_dir.join(format!("{}-details.json", descriptor.kind));
        Self {
            descriptor,
            supervisor,
            details_path,
            fields: None,
        }
    }

    pub fn kind(&self) -> &str {
        &self.descriptor.kind
    }

    pub fn details_path(&self) -> &Path {
        &self.details_path
    }

    /// Connection fields of the running instance.
    pub fn fields(&self) -> Option<&ConnectionFields> {
        self.fields.as_ref()
    }

    /// Start the process, wait for readiness and write the details file.
    pub async fn start(&mut self, timeout: Duration) -> Result<&ConnectionFields> {
        if self.fields.is_some() {
            return Err(Error::Process(format!(
                "Service '{}' is already running",
                self.descriptor.kind
            )));
        }

        let request = self.descriptor.start_request(timeout)?;
        let mut fields = self.supervisor.start(&request).await?;
        fields.insert("command".to_string(), Value::String(request.command.clone()));

        if let Err(e) = self.write_details(&fields) {
            if let Err(stop_err) = self.supervisor.stop().await {
                warn!("Failed to stop '{}': {}", self.descriptor.kind, stop_err);
            }
            return Err(e);
        }

        info!(
            "Started '{}', details in {}",
            self.descriptor.kind,
            self.details_path.display()
        );
        Ok(&*self.fields.insert(fields))
    }

    /// Remove the details file and stop the process.
    pub async fn stop(&mut self) -> Result<()> {
        if self.fields.take().is_none() {
            return Ok(());
        }

        match fs::remove_file(&self.details_path) {
            Ok(()) => {}
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
            Err(e) => warn!("Failed to remove {}: {}", self.details_path.display(), e),
        }

        info!("Stopping '{}'", self.descriptor.kind);
        self.supervisor.stop().await
    }

    /// Shell line exporting the details variable, e.g.
    /// `TEST_REDIS_DETAILS=/tmp/redis-details.json; export TEST_REDIS_DETAILS`.
    pub fn env_export_line(&self) -> Option<String> {
        let var = self.descriptor.env_var.as_deref()?;
        Some(format!(
            "{}={}; export {}",
            var,
            self.details_path.display(),
            var
        ))
    }

    /// `.env` style assignment of the details variable.
    pub fn dotenv_line(&self) -> Option<String> {
        let var = self.descriptor.env_var.as_deref()?;
        Some(format!("{}={}", var, self.details_path.display()))
    }

    fn write_details(&self, fields: &ConnectionFields) -> Result<()> {
        if let Some(parent) = self.details_path.parent() {
            fs::create_dir_all(parent).map_err(|e| {
                Error::Filesystem(format!(
                    "Failed to create details directory {}: {}",
                    parent.display(),
                    e
                ))
            })?;
        }
        let contents = serde_json::to_string_pretty(fields)?;
        fs::write(&self.details_path, contents).map_err(|e| {
            Error::Filesystem(format!(
                "Failed to write {}: {}",
                self.details_path.display(),
                e
            ))
        })
    }
}
