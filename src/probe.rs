use crate::error::{Error, Result};
use crate::record::{ConnectionFields, RESERVED_FIELDS};
use serde_json::Value;
use std::fs;
use std::path::{Path, PathBuf};

/// Looks for connection details of an externally-managed instance.
///
/// The descriptor names an environment variable (e.g. `TEST_REDIS_DETAILS`)
/// whose value is a path to a JSON file, typically written by
/// `run-test-services`. When that file exists the coordination protocol is
/// skipped entirely.
#[derive(Debug, Clone, Default)]
pub struct EnvironmentProbe {
    env_var: Option<String>,
}

impl EnvironmentProbe {
    pub fn new(env_var: Option<String>) -> Self {
        Self { env_var }
    }

    pub fn env_var(&self) -> Option<&str> {
        self.env_var.as_deref()
    }

    /// Connection fields from the file the variable points at, or `None` when
    /// the variable is unset, empty, or points at a missing file.
    pub fn probe(&self) -> Result<Option<ConnectionFields>> {
        let Some(var) = &self.env_var else {
            return Ok(None);
        };
        match std::env::var(var) {
            Ok(value) if !value.trim().is_empty() => self.read_pointer(var, Path::new(&value)),
            _ => Ok(None),
        }
    }

    fn read_pointer(&self, var: &str, path: &Path) -> Result<Option<ConnectionFields>> {
        let contents = match fs::read_to_string(path) {
            Ok(contents) => contents,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                tracing::warn!(
                    "Env variable {} set but no file exists at {}. Starting new service.",
                    var,
                    path.display()
                );
                return Ok(None);
            }
            Err(e) => {
                return Err(Error::EnvDetails {
                    path: path.to_path_buf(),
                    reason: e.to_string(),
                })
            }
        };

        parse_details(&contents, path).map(Some)
    }
}

fn parse_details(contents: &str, path: &Path) -> Result<ConnectionFields> {
    let invalid = |reason: String| Error::EnvDetails {
        path: PathBuf::from(path),
        reason,
    };

    let value: Value = serde_json::from_str(contents).map_err(|e| invalid(e.to_string()))?;
    let Value::Object(mut fields) = value else {
        return Err(invalid("expected a JSON object".to_string()));
    };

    for reserved in RESERVED_FIELDS {
        fields.remove(reserved);
    }
    Ok(fields)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn no_variable_means_no_details() {
        let probe = EnvironmentProbe::new(None);
        assert!(probe.probe().unwrap().is_none());

        let probe = EnvironmentProbe::new(Some("SERVICE_FIXTURES_PROBE_UNSET_VAR".to_string()));
        assert!(probe.probe().unwrap().is_none());
    }

    #[test]
    fn dangling_pointer_falls_back() {
        let dir = tempfile::tempdir().unwrap();
        let probe = EnvironmentProbe::default();
        let missing = dir.path().join("missing.json");
        assert!(probe
            .read_pointer("TEST_X_DETAILS", &missing)
            .unwrap()
            .is_none());
    }

    #[test]
    fn reads_details_and_strips_protocol_fields() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("redis.json");
        fs::write(
            &path,
            r#"{"hostname": "cache.internal", "port": 7000, "sessions": ["x"], "is_manager": true, "manager_id": "gw0"}"#,
        )
        .unwrap();

        let fields = EnvironmentProbe::default()
            .read_pointer("TEST_REDIS_DETAILS", &path)
            .unwrap()
            .unwrap();
        assert_eq!(fields["hostname"], "cache.internal");
        assert_eq!(fields["port"], 7000);
        assert!(!fields.contains_key("sessions"));
        assert!(!fields.contains_key("is_manager"));
        assert!(!fields.contains_key("manager_id"));
    }

    #[test]
    fn malformed_details_are_an_error() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("bad.json");
        fs::write(&path, "[1, 2, 3]").unwrap();
        let err = EnvironmentProbe::default()
            .read_pointer("TEST_X_DETAILS", &path)
            .unwrap_err();
        assert!(matches!(err, Error::EnvDetails { .. }));
    }

    #[test]
    fn probe_follows_the_variable() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("moto.json");
        fs::write(&path, r#"{"hostname": "localhost", "port": 5001}"#).unwrap();

        let var = "SERVICE_FIXTURES_PROBE_TEST_MOTO";
        std::env::set_var(var, &path);
        let fields = EnvironmentProbe::new(Some(var.to_string()))
            .probe()
            .unwrap()
            .unwrap();
        std::env::remove_var(var);

        assert_eq!(fields["port"], 5001);
    }
}
