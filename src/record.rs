//! The shared record persisted for one resource kind.
//!
//! On disk a record is a flat JSON object: the service's connection fields
//! as top-level keys, plus a `sessions` array naming the followers that
//! currently depend on the service and the `manager_id` of the worker that
//! owns it.
//!
//! ```json
//! { "hostname": "localhost", "port": 41234, "manager_id": "gw0", "sessions": ["gw1", "gw2"] }
//! ```

use crate::error::{Error, Result};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

/// Service-specific connection attributes (host, ports, credentials).
pub type ConnectionFields = Map<String, Value>;

/// Field names owned by the coordination protocol. Descriptors and external
/// details files may not use them as connection fields.
pub const RESERVED_FIELDS: [&str; 3] = ["sessions", "is_manager", "manager_id"];

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ServiceRecord {
    #[serde(flatten)]
    fields: ConnectionFields,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    manager_id: Option<String>,
    sessions: Vec<String>,
    /// Only meaningful inside the process that created the record.
    #[serde(skip)]
    is_manager: bool,
}

impl ServiceRecord {
    /// Create a record with no sessions.
    pub fn new(fields: ConnectionFields) -> Self {
        Self {
            fields,
            manager_id: None,
            sessions: Vec::new(),
            is_manager: false,
        }
    }

    pub fn fields(&self) -> &ConnectionFields {
        &self.fields
    }

    pub fn sessions(&self) -> &[String] {
        &self.sessions
    }

    pub fn is_manager(&self) -> bool {
        self.is_manager
    }

    /// Worker that created the record. `None` for externally-managed
    /// details.
    pub fn manager_id(&self) -> Option<&str> {
        self.manager_id.as_deref()
    }

    pub(crate) fn with_manager(mut self, is_manager: bool) -> Self {
        self.is_manager = is_manager;
        self
    }

    pub(crate) fn managed_by(mut self, worker_id: impl Into<String>) -> Self {
        self.manager_id = Some(worker_id.into());
        self
    }

    /// Register a follower. A worker that is already registered has joined
    /// twice without leaving.
    pub fn add_session(&mut self, worker_id: &str) -> Result<()> {
        if self.manager_id.as_deref() == Some(worker_id) {
            return Err(Error::ProtocolViolation(format!(
                "worker '{}' already manages this service and cannot also follow it",
                worker_id
            )));
        }
        if self.sessions.iter().any(|s| s == worker_id) {
            return Err(Error::ProtocolViolation(format!(
                "worker '{}' joined twice without leaving (sessions: {:?})",
                worker_id, self.sessions
            )));
        }
        self.sessions.push(worker_id.to_string());
        Ok(())
    }

    /// Deregister a follower.
    pub fn remove_session(&mut self, worker_id: &str) -> Result<()> {
        let Some(index) = self.sessions.iter().position(|s| s == worker_id) else {
            return Err(Error::ProtocolViolation(format!(
                "worker '{}' is leaving but is not registered (sessions: {:?})",
                worker_id, self.sessions
            )));
        };
        self.sessions.remove(index);
        Ok(())
    }

    /// Parse a persisted document. Returns the reason on failure so the
    /// caller can attach the file path.
    pub(crate) fn parse(contents: &str) -> std::result::Result<Self, String> {
        let record: ServiceRecord = serde_json::from_str(contents).map_err(|e| e.to_string())?;
        for (i, id) in record.sessions.iter().enumerate() {
            if record.sessions[..i].contains(id) {
                return Err(format!("session '{}' is listed more than once", id));
            }
        }
        if let Some(manager) = record.manager_id() {
            if record.sessions.iter().any(|s| s == manager) {
                return Err(format!("manager '{}' is also listed as a session", manager));
            }
        }
        Ok(record)
    }

    pub(crate) fn to_json(&self) -> Result<String> {
        Ok(serde_json::to_string_pretty(self)?)
    }

    /// Deserialize the connection fields into a typed details struct, e.g.
    /// [`crate::details::RedisDetails`].
    pub fn details<T: DeserializeOwned>(&self) -> Result<T> {
        Ok(serde_json::from_value(Value::Object(self.fields.clone()))?)
    }

    pub fn get_str(&self, name: &str) -> Option<&str> {
        self.fields.get(name).and_then(Value::as_str)
    }

    pub fn get_port(&self, name: &str) -> Option<u16> {
        self.fields
            .get(name)
            .and_then(Value::as_u64)
            .and_then(|p| u16::try_from(p).ok())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn fields() -> ConnectionFields {
        json!({"hostname": "localhost", "port": 6380})
            .as_object()
            .cloned()
            .unwrap()
    }

    #[test]
    fn serializes_flat_without_manager_flag() {
        let record = ServiceRecord::new(fields()).with_manager(true);
        let value: Value = serde_json::from_str(&record.to_json().unwrap()).unwrap();
        assert_eq!(
            value,
            json!({"hostname": "localhost", "port": 6380, "sessions": []})
        );
    }

    #[test]
    fn parse_never_sets_manager_flag() {
        let record =
            ServiceRecord::parse(r#"{"hostname": "localhost", "port": 6380, "sessions": ["gw1"]}"#)
                .unwrap();
        assert!(!record.is_manager());
        assert_eq!(record.sessions(), ["gw1"]);
        assert_eq!(record.get_port("port"), Some(6380));
        assert_eq!(record.get_str("hostname"), Some("localhost"));
    }

    #[test]
    fn parse_rejects_missing_sessions() {
        assert!(ServiceRecord::parse(r#"{"port": 1}"#).is_err());
    }

    #[test]
    fn parse_rejects_duplicate_sessions() {
        let err = ServiceRecord::parse(r#"{"sessions": ["gw1", "gw1"]}"#).unwrap_err();
        assert!(err.contains("gw1"));
    }

    #[test]
    fn parse_rejects_non_object() {
        assert!(ServiceRecord::parse("[1, 2]").is_err());
        assert!(ServiceRecord::parse("not json").is_err());
    }

    #[test]
    fn sessions_keep_join_order() {
        let mut record = ServiceRecord::new(fields());
        record.add_session("w1").unwrap();
        record.add_session("w2").unwrap();
        record.add_session("w3").unwrap();
        record.remove_session("w2").unwrap();
        assert_eq!(record.sessions(), ["w1", "w3"]);
    }

    #[test]
    fn duplicate_join_is_protocol_violation() {
        let mut record = ServiceRecord::new(fields());
        record.add_session("w1").unwrap();
        assert!(matches!(
            record.add_session("w1"),
            Err(Error::ProtocolViolation(_))
        ));
    }

    #[test]
    fn manager_cannot_join_as_follower() {
        let mut record = ServiceRecord::new(fields()).managed_by("gw0");
        assert!(matches!(
            record.add_session("gw0"),
            Err(Error::ProtocolViolation(_))
        ));
        record.add_session("gw1").unwrap();

        let value: Value = serde_json::from_str(&record.to_json().unwrap()).unwrap();
        assert_eq!(value["manager_id"], "gw0");
        let parsed = ServiceRecord::parse(&record.to_json().unwrap()).unwrap();
        assert_eq!(parsed.manager_id(), Some("gw0"));
        assert!(!parsed.fields().contains_key("manager_id"));
    }

    #[test]
    fn parse_rejects_manager_in_sessions() {
        let err = ServiceRecord::parse(r#"{"manager_id": "gw0", "sessions": ["gw0"]}"#).unwrap_err();
        assert!(err.contains("gw0"));
    }

    #[test]
    fn unknown_leave_is_protocol_violation() {
        let mut record = ServiceRecord::new(fields());
        assert!(matches!(
            record.remove_session("w9"),
            Err(Error::ProtocolViolation(_))
        ));
    }
}
