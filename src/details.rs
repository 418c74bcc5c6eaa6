//! Typed views of the connection fields published by the built-in kinds.
//!
//! ```no_run
//! # async fn example(mut coordinator: service_fixtures::LifecycleCoordinator<service_fixtures::supervisor::TcpProcessSupervisor>) -> service_fixtures::Result<()> {
//! use service_fixtures::details::RedisDetails;
//!
//! let record = coordinator.join().await?;
//! let redis: RedisDetails = record.details()?;
//! println!("connect to {}", redis.url());
//! # Ok(())
//! # }
//! ```

use serde::{Deserialize, Serialize};

fn localhost() -> String {
    "localhost".to_string()
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RedisDetails {
    #[serde(default = "localhost")]
    pub hostname: String,
    #[serde(default = "RedisDetails::default_port")]
    pub port: u16,
}

impl RedisDetails {
    fn default_port() -> u16 {
        6379
    }

    pub fn url(&self) -> String {
        format!("redis://{}:{}", self.hostname, self.port)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct VaultDetails {
    #[serde(default = "localhost")]
    pub hostname: String,
    #[serde(default = "VaultDetails::default_port")]
    pub port: u16,
    #[serde(default = "VaultDetails::default_token")]
    pub token: String,
}

impl VaultDetails {
    fn default_port() -> u16 {
        8200
    }

    fn default_token() -> String {
        "root".to_string()
    }

    pub fn url(&self) -> String {
        format!("http://{}:{}", self.hostname, self.port)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CockroachDetails {
    #[serde(default = "localhost")]
    pub hostname: String,
    #[serde(default = "CockroachDetails::default_sql_port")]
    pub sql_port: u16,
    #[serde(default = "CockroachDetails::default_http_port")]
    pub http_port: u16,
    #[serde(default = "CockroachDetails::default_username")]
    pub username: String,
    #[serde(default)]
    pub password: String,
    #[serde(default = "CockroachDetails::default_dbname")]
    pub dbname: String,
}

impl CockroachDetails {
    fn default_sql_port() -> u16 {
        26257
    }

    fn default_http_port() -> u16 {
        8008
    }

    fn default_username() -> String {
        "root".to_string()
    }

    fn default_dbname() -> String {
        "defaultdb".to_string()
    }

    /// Synchronous SQLAlchemy-style DSN.
    pub fn sync_dsn(&self) -> String {
        format!(
            "cockroachdb://{}:{}@{}:{}/{}",
            self.username, self.password, self.hostname, self.sql_port, self.dbname
        )
    }

    pub fn async_dsn(&self) -> String {
        format!(
            "cockroachdb+asyncpg://{}:{}@{}:{}/{}",
            self.username, self.password, self.hostname, self.sql_port, self.dbname
        )
    }

    /// Dashboard URL.
    pub fn webui(&self) -> String {
        format!("http://{}:{}", self.hostname, self.http_port)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MotoDetails {
    #[serde(default = "localhost")]
    pub hostname: String,
    #[serde(default = "MotoDetails::default_port")]
    pub port: u16,
}

impl MotoDetails {
    fn default_port() -> u16 {
        5000
    }

    pub fn url(&self) -> String {
        format!("http://{}:{}", self.hostname, self.port)
    }
}

/// An ASGI app served by uvicorn.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AppDetails {
    #[serde(default = "localhost")]
    pub hostname: String,
    #[serde(default = "AppDetails::default_port")]
    pub port: u16,
}

impl AppDetails {
    fn default_port() -> u16 {
        8000
    }

    pub fn url(&self) -> String {
        format!("http://{}:{}", self.hostname, self.port)
    }

    /// Base for websocket routes, e.g. `format!("{}/ws", details.ws_base())`.
    pub fn ws_base(&self) -> String {
        format!("ws://{}:{}", self.hostname, self.port)
    }
}
