//! Driver configurations.
//!
//! A [`DriverConfiguration`] is the user-authored declaration of one driver:
//! which package provides it, which volume it binds to, and free-form
//! parameters. Its [`hash`](DriverConfiguration::hash) covers every field in
//! a fixed order and is used only for change detection.

use std::collections::BTreeMap;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::error::{CoreError, Result};
use crate::hash::ContentHasher;

/// Write-buffer tuning applied by backends that batch writes.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct BufferSettings {
    pub enabled: bool,
    pub interval_ms: u64,
    pub retry_interval_ms: u64,
    pub queue_size: usize,
}

impl Default for BufferSettings {
    fn default() -> Self {
        Self {
            enabled: false,
            interval_ms: 500,
            retry_interval_ms: 5_000,
            queue_size: 10_000,
        }
    }
}

/// A declarative driver configuration.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DriverConfiguration {
    pub id: String,
    #[serde(default)]
    pub name: String,
    #[serde(default)]
    pub description: Option<String>,
    pub package_id: String,
    #[serde(default = "default_version")]
    pub package_version: String,
    /// Volume to bind; the configuration id is used when absent.
    #[serde(default)]
    pub volume_id: Option<String>,
    #[serde(default = "default_enabled")]
    pub enabled: bool,
    #[serde(default)]
    pub parameters: BTreeMap<String, String>,
    #[serde(default)]
    pub buffer: BufferSettings,
}

fn default_version() -> String {
    "*".to_owned()
}

fn default_enabled() -> bool {
    true
}

impl DriverConfiguration {
    pub fn new(
        id: impl Into<String>,
        package_id: impl Into<String>,
        package_version: impl Into<String>,
    ) -> Self {
        let id = id.into();
        Self {
            name: id.clone(),
            id,
            description: None,
            package_id: package_id.into(),
            package_version: package_version.into(),
            volume_id: None,
            enabled: true,
            parameters: BTreeMap::new(),
            buffer: BufferSettings::default(),
        }
    }

    #[must_use]
    pub fn with_name(mut self, name: impl Into<String>) -> Self {
        self.name = name.into();
        self
    }

    #[must_use]
    pub fn with_description(mut self, description: impl Into<String>) -> Self {
        self.description = Some(description.into());
        self
    }

    #[must_use]
    pub fn with_volume(mut self, volume_id: impl Into<String>) -> Self {
        self.volume_id = Some(volume_id.into());
        self
    }

    #[must_use]
    pub fn with_parameter(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.parameters.insert(key.into(), value.into());
        self
    }

    #[must_use]
    pub fn with_enabled(mut self, enabled: bool) -> Self {
        self.enabled = enabled;
        self
    }

    /// The volume this driver binds to.
    pub fn volume_id(&self) -> &str {
        self.volume_id.as_deref().unwrap_or(&self.id)
    }

    pub fn parameter(&self, key: &str) -> Option<&str> {
        self.parameters.get(key).map(String::as_str)
    }

    /// Parse a parameter, returning `None` when it is absent.
    pub fn parameter_as<T>(&self, key: &str) -> Result<Option<T>>
    where
        T: FromStr,
        T::Err: std::fmt::Display,
    {
        match self.parameter(key) {
            None => Ok(None),
            Some(raw) => raw.trim().parse::<T>().map(Some).map_err(|e| {
                CoreError::InvalidConfiguration {
                    id: self.id.clone(),
                    reason: format!("parameter `{key}` = `{raw}`: {e}"),
                }
            }),
        }
    }

    /// Check the fields required before a driver can be reconciled.
    pub fn validate(&self) -> Result<()> {
        let missing = if self.id.trim().is_empty() {
            Some("id")
        } else if self.package_id.trim().is_empty() {
            Some("package_id")
        } else if self.package_version.trim().is_empty() {
            Some("package_version")
        } else {
            None
        };
        match missing {
            Some(field) => Err(CoreError::InvalidConfiguration {
                id: self.id.clone(),
                reason: format!("`{field}` must not be empty"),
            }),
            None => Ok(()),
        }
    }

    /// Content hash over every field. Parameters hash in key order.
    pub fn hash(&self) -> String {
        let mut hasher = ContentHasher::new()
            .field(&self.id)
            .field(&self.name)
            .optional(self.description.as_deref())
            .field(&self.package_id)
            .field(&self.package_version)
            .optional(self.volume_id.as_deref())
            .field(if self.enabled { "1" } else { "0" });
        for (key, value) in &self.parameters {
            hasher = hasher.field(key).field(value);
        }
        hasher
            .field(if self.buffer.enabled { "1" } else { "0" })
            .field(&self.buffer.interval_ms.to_string())
            .field(&self.buffer.retry_interval_ms.to_string())
            .field(&self.buffer.queue_size.to_string())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn base() -> DriverConfiguration {
        DriverConfiguration::new("cache", "strata.memory", "1.0.0")
            .with_parameter("ttl", "60")
    }

    #[test]
    fn hash_is_deterministic() {
        assert_eq!(base().hash(), base().hash());
    }

    #[test]
    fn every_field_affects_hash() {
        let h = base().hash();
        assert_ne!(h, base().with_name("renamed").hash());
        assert_ne!(h, base().with_description("d").hash());
        assert_ne!(h, base().with_volume("shared").hash());
        assert_ne!(h, base().with_parameter("ttl", "61").hash());
        assert_ne!(h, base().with_enabled(false).hash());

        let mut buffered = base();
        buffered.buffer.queue_size = 1;
        assert_ne!(h, buffered.hash());
    }

    #[test]
    fn volume_defaults_to_id() {
        assert_eq!(base().volume_id(), "cache");
        assert_eq!(base().with_volume("v").volume_id(), "v");
    }

    #[test]
    fn parameter_parsing() {
        let config = base().with_parameter("bad", "x");
        assert_eq!(config.parameter_as::<u64>("ttl").unwrap(), Some(60));
        assert_eq!(config.parameter_as::<u64>("missing").unwrap(), None);
        assert!(config.parameter_as::<u64>("bad").is_err());
    }

    #[test]
    fn validate_rejects_missing_package() {
        let config = DriverConfiguration::new("c", "", "1.0.0");
        assert!(config.validate().is_err());
        assert!(base().validate().is_ok());
    }

    #[test]
    fn deserializes_with_defaults() {
        let json = r#"{ "id": "c1", "package_id": "strata.sqlite" }"#;
        let config: DriverConfiguration = serde_json::from_str(json).unwrap();
        assert_eq!(config.package_version, "*");
        assert!(config.enabled);
        assert!(config.parameters.is_empty());
    }
}
