//! Shared helpers for the coordinator integration tests.
#![allow(dead_code)]

use async_trait::async_trait;
use parking_lot::Mutex;
use service_fixtures::supervisor::{ProcessSupervisor, StartRequest};
use service_fixtures::{
    ConnectionFields, CoordinatorConfig, Error, LifecycleCoordinator, ResourceDescriptor, Result,
};
use std::path::Path;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

/// Counts start and stop calls across every supervisor cloned from the same
/// counters, i.e. across all workers of one simulated test run.
#[derive(Debug, Clone, Default)]
pub struct Calls {
    starts: Arc<AtomicUsize>,
    stops: Arc<AtomicUsize>,
    events: Arc<Mutex<Vec<String>>>,
}

impl Calls {
    pub fn starts(&self) -> usize {
        self.starts.load(Ordering::SeqCst)
    }

    pub fn stops(&self) -> usize {
        self.stops.load(Ordering::SeqCst)
    }

    /// `start:<kind>` and `stop` entries in call order.
    pub fn events(&self) -> Vec<String> {
        self.events.lock().clone()
    }

    pub fn supervisor(&self) -> RecordingSupervisor {
        RecordingSupervisor {
            calls: self.clone(),
            start_delay: Duration::ZERO,
            fail_start: false,
            running: false,
        }
    }
}

/// Fake supervisor: echoes the requested fields back as the started
/// instance's connection details and records each call.
pub struct RecordingSupervisor {
    calls: Calls,
    start_delay: Duration,
    fail_start: bool,
    running: bool,
}

impl RecordingSupervisor {
    /// Take this long to "start", so concurrent joins pile up on the lock.
    pub fn with_start_delay(mut self, delay: Duration) -> Self {
        self.start_delay = delay;
        self
    }

    pub fn failing(mut self) -> Self {
        self.fail_start = true;
        self
    }
}

#[async_trait]
impl ProcessSupervisor for RecordingSupervisor {
    async fn start(&mut self, request: &StartRequest) -> Result<ConnectionFields> {
        self.calls.starts.fetch_add(1, Ordering::SeqCst);
        self.calls.events.lock().push(format!("start:{}", request.kind));
        tokio::time::sleep(self.start_delay).await;
        if self.fail_start {
            return Err(Error::StartupFailure {
                service: request.kind.clone(),
                reason: "process exited with status 1".to_string(),
            });
        }
        self.running = true;
        Ok(request.fields.clone())
    }

    async fn stop(&mut self) -> Result<()> {
        if self.running {
            self.running = false;
            self.calls.stops.fetch_add(1, Ordering::SeqCst);
            self.calls.events.lock().push("stop".to_string());
        }
        Ok(())
    }
}

pub fn test_config(shared_dir: &Path) -> CoordinatorConfig {
    CoordinatorConfig::new(shared_dir)
        .with_poll_interval(Duration::from_millis(10))
        .with_startup_timeout(Duration::from_secs(5))
}

/// A redis-like descriptor without an environment variable, so a developer's
/// own `TEST_REDIS_DETAILS` cannot leak into the tests.
pub fn fake_redis() -> ResourceDescriptor {
    ResourceDescriptor::new("redis", "redis-server --port {port}")
}

pub fn worker(
    shared_dir: &Path,
    descriptor: &ResourceDescriptor,
    id: &str,
    calls: &Calls,
) -> LifecycleCoordinator<RecordingSupervisor> {
    LifecycleCoordinator::new(
        test_config(shared_dir),
        descriptor.clone(),
        id,
        calls.supervisor(),
    )
    .expect("valid coordinator")
}

/// Sessions currently persisted for `kind`, read without taking the lock.
pub fn persisted_sessions(shared_dir: &Path, kind: &str) -> Option<Vec<String>> {
    let contents = std::fs::read_to_string(shared_dir.join(format!("{}.json", kind))).ok()?;
    let value: serde_json::Value = serde_json::from_str(&contents).expect("state is JSON");
    Some(
        value["sessions"]
            .as_array()
            .expect("sessions array")
            .iter()
            .map(|s| s.as_str().expect("session id").to_string())
            .collect(),
    )
}
