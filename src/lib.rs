#![allow(unused_assignments)]

//! # Service Fixtures
//!
//! Share one instance of an external service (Redis, Vault, CockroachDB, a
//! Moto S3 mock, or anything described in `service-fixtures.yaml`) among the
//! parallel workers of a test run.
//!
//! ## Features
//!
//! - **Manager Election**: The first worker to take the per-kind file lock starts the service
//! - **Deferred Teardown**: The manager stops the service only after every follower has left
//! - **Environment Bypass**: Point `TEST_<KIND>_DETAILS` at a details file to use a service started elsewhere
//! - **Serial Mode**: Worker id `master` owns a private instance with no shared files
//! - **Standalone Launcher**: `run-test-services` starts services for a whole shell session
//!
//! ## Quick Start
//!
//! ```no_run
//! use service_fixtures::supervisor::{OutputMode, TcpProcessSupervisor};
//! use service_fixtures::{CoordinatorConfig, LifecycleCoordinator, ResourceDescriptor};
//!
//! # async fn example() -> service_fixtures::Result<()> {
//! let worker = std::env::var("TEST_WORKER").unwrap_or_else(|_| "gw0".to_string());
//! let mut redis = LifecycleCoordinator::new(
//!     CoordinatorConfig::from_env()?,
//!     ResourceDescriptor::redis(),
//!     worker,
//!     TcpProcessSupervisor::new(OutputMode::Null),
//! )?;
//!
//! let record = redis.join().await?;
//! println!("redis on port {:?}", record.get_port("port"));
//!
//! // ... run tests ...
//!
//! redis.leave().await?;
//! # Ok(())
//! # }
//! ```
//!
//! ## Concurrency Model
//!
//! Workers are separate processes that share nothing but a directory:
//! - Every read or write of a kind's record happens under an exclusive `flock`
//! - The manager starts the service while holding the lock, so followers never see a half-started instance
//! - The manager's teardown loop releases the lock between polls

pub mod config;
pub mod coordinator;
pub mod descriptor;
pub mod details;
pub mod error;
pub mod port;
pub mod probe;
pub mod record;
pub mod standalone;
pub mod store;
pub mod supervisor;

// Re-export commonly used types
pub use config::{CoordinatorConfig, FixturesConfig, Parser};
pub use coordinator::{CoordinatorState, LifecycleCoordinator, Role, SERIAL_WORKER_ID};
pub use descriptor::ResourceDescriptor;
pub use error::{Error, Result};
pub use probe::EnvironmentProbe;
pub use record::{ConnectionFields, ServiceRecord};
pub use standalone::StandaloneService;
pub use store::{RecordGuard, SharedRecordStore};
pub use supervisor::{OutputMode, ProcessSupervisor, TcpProcessSupervisor};
