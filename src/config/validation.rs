use super::FixturesConfig;
use crate::error::{Error, Result};
use std::collections::HashSet;

impl FixturesConfig {
    /// Validate every configured descriptor and the settings.
    pub fn validate(&self) -> Result<()> {
        for descriptor in self.services.values() {
            descriptor.validate()?;
        }

        let mut env_vars = HashSet::new();
        for (kind, descriptor) in &self.services {
            if let Some(var) = &descriptor.env_var {
                if !env_vars.insert(var.as_str()) {
                    return Err(Error::Validation(format!(
                        "Service '{}' reuses env_var '{}' of another service",
                        kind, var
                    )));
                }
            }
        }

        if self.settings.poll_interval.is_some_and(|p| p.is_zero()) {
            return Err(Error::Validation(
                "settings.poll_interval must be greater than zero".to_string(),
            ));
        }

        Ok(())
    }
}
