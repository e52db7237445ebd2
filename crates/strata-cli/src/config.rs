//! Platform configuration for the `strata` binary.
//!
//! Read from `strata.toml` (the `[platform]` section), then overridden by
//! `STRATA_*` environment variables. A missing file means defaults rooted at
//! `./data`.

use std::path::{Path, PathBuf};
use std::time::Duration;

use anyhow::{Context, Result};
use serde::Deserialize;
use strata_drivers::PlatformSettings;

/// Log output format.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LogFormat {
    #[default]
    Compact,
    Json,
}

impl std::str::FromStr for LogFormat {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self> {
        match s.trim().to_ascii_lowercase().as_str() {
            "compact" => Ok(Self::Compact),
            "json" => Ok(Self::Json),
            other => anyhow::bail!("unknown log format `{other}`"),
        }
    }
}

/// The `[platform]` section.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(default)]
pub struct PlatformSection {
    /// Base directory for any path left unset.
    pub root: PathBuf,
    pub packages_dir: Option<PathBuf>,
    pub modules_dir: Option<PathBuf>,
    pub volumes_dir: Option<PathBuf>,
    pub configurations_dir: Option<PathBuf>,
    pub debounce_ms: u64,
    pub watch_configurations: bool,
    pub log_level: String,
    pub log_format: LogFormat,
}

impl Default for PlatformSection {
    fn default() -> Self {
        Self {
            root: PathBuf::from("data"),
            packages_dir: None,
            modules_dir: None,
            volumes_dir: None,
            configurations_dir: None,
            debounce_ms: 5_000,
            watch_configurations: true,
            log_level: "info".to_owned(),
            log_format: LogFormat::Compact,
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize)]
#[serde(default)]
pub struct StrataConfig {
    pub platform: PlatformSection,
}

impl StrataConfig {
    /// Load `path` if it exists, then apply environment overrides.
    pub fn load(path: &Path) -> Result<Self> {
        let mut config = if path.exists() {
            let content = std::fs::read_to_string(path)
                .with_context(|| format!("failed to read {}", path.display()))?;
            Self::parse(&content).with_context(|| format!("invalid config {}", path.display()))?
        } else {
            Self::default()
        };
        config.apply_overrides(|key| std::env::var(key).ok())?;
        Ok(config)
    }

    pub fn parse(content: &str) -> Result<Self> {
        Ok(toml::from_str(content)?)
    }

    /// Override fields from `STRATA_*` variables resolved through `lookup`.
    pub fn apply_overrides(&mut self, lookup: impl Fn(&str) -> Option<String>) -> Result<()> {
        let platform = &mut self.platform;
        if let Some(root) = lookup("STRATA_ROOT") {
            platform.root = PathBuf::from(root);
        }
        for (key, slot) in [
            ("STRATA_PACKAGES_DIR", &mut platform.packages_dir),
            ("STRATA_MODULES_DIR", &mut platform.modules_dir),
            ("STRATA_VOLUMES_DIR", &mut platform.volumes_dir),
            ("STRATA_CONFIGURATIONS_DIR", &mut platform.configurations_dir),
        ] {
            if let Some(value) = lookup(key) {
                *slot = Some(PathBuf::from(value));
            }
        }
        if let Some(ms) = lookup("STRATA_DEBOUNCE_MS") {
            platform.debounce_ms = ms
                .trim()
                .parse()
                .with_context(|| format!("STRATA_DEBOUNCE_MS = `{ms}`"))?;
        }
        if let Some(level) = lookup("STRATA_LOG_LEVEL") {
            platform.log_level = level;
        }
        if let Some(format) = lookup("STRATA_LOG_FORMAT") {
            platform.log_format = format.parse()?;
        }
        Ok(())
    }

    /// Directory layout and timing for the platform.
    pub fn settings(&self) -> PlatformSettings {
        let platform = &self.platform;
        let mut settings = PlatformSettings::rooted(&platform.root);
        if let Some(dir) = &platform.packages_dir {
            settings.packages_dir = dir.clone();
        }
        if let Some(dir) = &platform.modules_dir {
            settings.modules_dir = dir.clone();
        }
        if let Some(dir) = &platform.volumes_dir {
            settings.volumes_dir = dir.clone();
        }
        if let Some(dir) = &platform.configurations_dir {
            settings.configurations_dir = dir.clone();
        }
        settings.debounce = Duration::from_millis(platform.debounce_ms);
        settings.watch_configurations = platform.watch_configurations;
        settings
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    #[test]
    fn missing_sections_use_defaults() {
        let config = StrataConfig::parse("").unwrap();
        assert_eq!(config, StrataConfig::default());
        let settings = config.settings();
        assert_eq!(settings.packages_dir, PathBuf::from("data/packages"));
        assert_eq!(settings.debounce, Duration::from_secs(5));
    }

    #[test]
    fn file_values_override_the_rooted_layout() {
        let config = StrataConfig::parse(
            r#"
            [platform]
            root = "/srv/strata"
            volumes_dir = "/mnt/volumes"
            debounce_ms = 250
            log_format = "json"
            "#,
        )
        .unwrap();
        let settings = config.settings();
        assert_eq!(settings.packages_dir, PathBuf::from("/srv/strata/packages"));
        assert_eq!(settings.volumes_dir, PathBuf::from("/mnt/volumes"));
        assert_eq!(settings.debounce, Duration::from_millis(250));
        assert_eq!(config.platform.log_format, LogFormat::Json);
    }

    #[test]
    fn environment_wins_over_file() {
        let mut config = StrataConfig::parse("[platform]\nlog_level = \"warn\"").unwrap();
        let env: HashMap<&str, &str> = HashMap::from([
            ("STRATA_LOG_LEVEL", "debug"),
            ("STRATA_CONFIGURATIONS_DIR", "/etc/strata/drivers"),
            ("STRATA_DEBOUNCE_MS", "10"),
        ]);
        config
            .apply_overrides(|key| env.get(key).map(|v| (*v).to_owned()))
            .unwrap();
        assert_eq!(config.platform.log_level, "debug");
        assert_eq!(
            config.settings().configurations_dir,
            PathBuf::from("/etc/strata/drivers")
        );
        assert_eq!(config.platform.debounce_ms, 10);
    }

    #[test]
    fn bad_override_is_reported() {
        let mut config = StrataConfig::default();
        let only = |name: &'static str, value: &'static str| {
            move |key: &str| (key == name).then(|| value.to_owned())
        };
        assert!(config.apply_overrides(only("STRATA_LOG_FORMAT", "xml")).is_err());
        assert!(config.apply_overrides(only("STRATA_DEBOUNCE_MS", "soon")).is_err());
    }

    #[test]
    fn load_reads_the_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("strata.toml");
        std::fs::write(&path, "[platform]\nroot = \"/opt/strata\"\n").unwrap();
        let config = StrataConfig::load(&path).unwrap();
        assert!(config.settings().modules_dir.ends_with("_modules"));
    }
}
