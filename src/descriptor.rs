//! Resource descriptors: everything kind-specific about a managed service,
//! expressed as data.
//!
//! A descriptor names the state files (`kind`), the environment variable
//! that may point at externally-managed details, the command template, and
//! the connection fields a started instance exposes.

use crate::error::{Error, Result};
use crate::port::PortAllocator;
use crate::record::{ConnectionFields, RESERVED_FIELDS};
use crate::supervisor::StartRequest;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::HashSet;
use std::time::Duration;

/// Built-in kinds, in the order `run-test-services` starts them.
pub const BUILTIN_KINDS: [&str; 4] = ["moto", "redis", "cockroachdb", "vault"];

/// Built-in kinds only started when asked for by name.
pub const ON_DEMAND_KINDS: [&str; 1] = ["asgi"];

/// Names the ASGI application uvicorn serves, e.g. `myapp.start:entrypoint`.
pub const APP_LOCATION_ENV: &str = "TEST_APP_LOCATION";

pub const DEFAULT_APP_LOCATION: &str = "app.main:app";

fn default_hostname() -> String {
    "localhost".to_string()
}

fn default_ports() -> Vec<String> {
    vec!["port".to_string()]
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ResourceDescriptor {
    /// Filled from the map key when loaded from a config file.
    #[serde(default)]
    pub kind: String,
    /// Environment variable pointing at a JSON file of connection details
    /// for an instance managed outside the test run.
    #[serde(default)]
    pub env_var: Option<String>,
    /// Command template, `{field}` placeholders are replaced with
    /// connection field values.
    pub command: String,
    #[serde(default = "default_hostname")]
    pub hostname: String,
    /// Port fields to allocate, each gets a free port.
    #[serde(default = "default_ports")]
    pub ports: Vec<String>,
    /// Port field polled for readiness. Defaults to the first port.
    #[serde(default)]
    pub ready_port: Option<String>,
    #[serde(default)]
    pub extra: ConnectionFields,
}

impl ResourceDescriptor {
    pub fn new(kind: impl Into<String>, command: impl Into<String>) -> Self {
        Self {
            kind: kind.into(),
            env_var: None,
            command: command.into(),
            hostname: default_hostname(),
            ports: default_ports(),
            ready_port: None,
            extra: ConnectionFields::new(),
        }
    }

    pub fn with_env_var(mut self, env_var: impl Into<String>) -> Self {
        self.env_var = Some(env_var.into());
        self
    }

    pub fn with_ports(mut self, ports: &[&str]) -> Self {
        self.ports = ports.iter().map(|p| p.to_string()).collect();
        self
    }

    pub fn with_ready_port(mut self, port: impl Into<String>) -> Self {
        self.ready_port = Some(port.into());
        self
    }

    pub fn with_extra(mut self, name: impl Into<String>, value: impl Into<Value>) -> Self {
        self.extra.insert(name.into(), value.into());
        self
    }

    /// Redis server on a free port. See https://redis.io/topics/quickstart.
    pub fn redis() -> Self {
        Self::new("redis", "redis-server --port {port}").with_env_var("TEST_REDIS_DETAILS")
    }

    /// Dev-mode Vault server with root token `root`.
    pub fn vault() -> Self {
        Self::new(
            "vault",
            "vault server -dev -dev-listen-address={hostname}:{port} -dev-root-token-id={token}",
        )
        .with_env_var("TEST_VAULT_DETAILS")
        .with_extra("token", "root")
    }

    /// Ephemeral in-memory single-node CockroachDB. The SQL port gates
    /// readiness; the HTTP port serves the dashboard.
    pub fn cockroach() -> Self {
        Self::new(
            "cockroachdb",
            "cockroach start-single-node --insecure --listen-addr={hostname}:{sql_port} \
             --http-addr={hostname}:{http_port} --store=type=mem,size=641mib",
        )
        .with_env_var("TEST_CRDB_DETAILS")
        .with_ports(&["sql_port", "http_port"])
        .with_ready_port("sql_port")
        .with_extra("username", "root")
        .with_extra("password", "")
        .with_extra("dbname", "defaultdb")
    }

    /// Moto S3 mock server (`pip install moto[server]`).
    pub fn moto() -> Self {
        Self::new("moto", "moto_server --host {hostname} --port {port} s3")
            .with_env_var("TEST_MOTO_DETAILS")
    }

    /// ASGI application (FastAPI, Starlette, ...) served by uvicorn.
    pub fn asgi(app_location: impl Into<String>) -> Self {
        Self::new(
            "asgi",
            "uvicorn --host {hostname} --port {port} {app_location}",
        )
        .with_env_var("TEST_APP_DETAILS")
        .with_extra("app_location", app_location.into())
    }

    /// [`ResourceDescriptor::asgi`] with the location from `$TEST_APP_LOCATION`,
    /// falling back to `app.main:app`.
    pub fn asgi_from_env() -> Self {
        let location = std::env::var(APP_LOCATION_ENV)
            .ok()
            .filter(|v| !v.trim().is_empty())
            .unwrap_or_else(|| DEFAULT_APP_LOCATION.to_string());
        Self::asgi(location)
    }

    /// The port field readiness is checked on.
    pub fn ready_port_name(&self) -> &str {
        self.ready_port
            .as_deref()
            .or_else(|| self.ports.first().map(String::as_str))
            .unwrap_or("port")
    }

    pub fn validate(&self) -> Result<()> {
        validate_kind(&self.kind)?;

        if self.command.trim().is_empty() {
            return Err(Error::Validation(format!(
                "Service '{}' has an empty command",
                self.kind
            )));
        }

        if self.ports.is_empty() {
            return Err(Error::Validation(format!(
                "Service '{}' must declare at least one port",
                self.kind
            )));
        }

        let mut seen = HashSet::new();
        for name in self.ports.iter().chain(self.extra.keys()) {
            if RESERVED_FIELDS.contains(&name.as_str()) || name == "hostname" {
                return Err(Error::Validation(format!(
                    "Service '{}' uses reserved field name '{}'",
                    self.kind, name
                )));
            }
            if !seen.insert(name.as_str()) {
                return Err(Error::Validation(format!(
                    "Service '{}' declares field '{}' twice",
                    self.kind, name
                )));
            }
        }

        if let Some(ready) = &self.ready_port {
            if !self.ports.contains(ready) {
                return Err(Error::Validation(format!(
                    "Service '{}': ready_port '{}' is not one of its ports {:?}",
                    self.kind, ready, self.ports
                )));
            }
        }

        Ok(())
    }

    /// Connection fields for a fresh instance: hostname, one free port per
    /// port field, then the static extras.
    pub fn connection_fields(&self) -> Result<ConnectionFields> {
        self.validate()?;

        let mut fields = ConnectionFields::new();
        fields.insert("hostname".to_string(), self.hostname.clone().into());

        let mut allocator = PortAllocator::new();
        for name in &self.ports {
            let port = allocator.allocate_random_port()?;
            fields.insert(name.clone(), port.into());
        }
        allocator.release_listeners();

        for (name, value) in &self.extra {
            fields.insert(name.clone(), value.clone());
        }
        Ok(fields)
    }

    /// Substitute `{field}` placeholders in the command template. `{{` and
    /// `}}` produce literal braces.
    pub fn render_command(&self, fields: &ConnectionFields) -> Result<String> {
        let template = &self.command;
        let mut out = String::with_capacity(template.len());
        let mut chars = template.chars().peekable();

        while let Some(c) = chars.next() {
            match c {
                '{' if chars.peek() == Some(&'{') => {
                    chars.next();
                    out.push('{');
                }
                '{' => {
                    let mut name = String::new();
                    loop {
                        match chars.next() {
                            Some('}') => break,
                            Some(ch) => name.push(ch),
                            None => {
                                return Err(Error::TemplateResolution(format!(
                                    "Unclosed '{{' in command for '{}': {}",
                                    self.kind, template
                                )))
                            }
                        }
                    }
                    let value = fields.get(name.trim()).ok_or_else(|| {
                        Error::TemplateResolution(format!(
                            "Unknown placeholder '{{{}}}' in command for '{}'",
                            name, self.kind
                        ))
                    })?;
                    match value {
                        Value::String(s) => out.push_str(s),
                        other => out.push_str(&other.to_string()),
                    }
                }
                '}' if chars.peek() == Some(&'}') => {
                    chars.next();
                    out.push('}');
                }
                '}' => {
                    return Err(Error::TemplateResolution(format!(
                        "Unmatched '}}' in command for '{}': {}",
                        self.kind, template
                    )))
                }
                _ => out.push(c),
            }
        }

        Ok(out)
    }

    /// Allocate fields and render the command for a fresh instance.
    pub fn start_request(&self, timeout: Duration) -> Result<StartRequest> {
        let fields = self.connection_fields()?;
        let command = self.render_command(&fields)?;
        let ready = self.ready_port_name();
        let port = fields
            .get(ready)
            .and_then(Value::as_u64)
            .and_then(|p| u16::try_from(p).ok())
            .ok_or_else(|| {
                Error::Validation(format!(
                    "Service '{}' has no port field '{}'",
                    self.kind, ready
                ))
            })?;

        Ok(StartRequest {
            kind: self.kind.clone(),
            command,
            host: self.hostname.clone(),
            port,
            timeout,
            work_dir: std::env::temp_dir(),
            fields,
        })
    }
}

/// Look up a built-in descriptor. `cockroach` is accepted as an alias of
/// `cockroachdb` and `fastapi` as an alias of `asgi`.
pub fn builtin(kind: &str) -> Option<ResourceDescriptor> {
    match kind {
        "redis" => Some(ResourceDescriptor::redis()),
        "vault" => Some(ResourceDescriptor::vault()),
        "cockroach" | "cockroachdb" => Some(ResourceDescriptor::cockroach()),
        "moto" => Some(ResourceDescriptor::moto()),
        "asgi" | "fastapi" => Some(ResourceDescriptor::asgi_from_env()),
        _ => None,
    }
}

/// Kinds become file names in the shared directory, so they must not
/// contain path separators or start with a dot.
fn validate_kind(kind: &str) -> Result<()> {
    if kind.is_empty() {
        return Err(Error::Validation("Service kind cannot be empty".to_string()));
    }
    if kind.starts_with('.') {
        return Err(Error::Validation(format!(
            "Service kind '{}' cannot start with a dot",
            kind
        )));
    }
    if !kind
        .chars()
        .all(|c| c.is_alphanumeric() || c == '-' || c == '_' || c == '.')
    {
        return Err(Error::Validation(format!(
            "Service kind '{}' contains invalid characters. Only alphanumeric, '-', '_' and '.' allowed.",
            kind
        )));
    }
    Ok(())
}
