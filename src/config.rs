//! Bridge configuration.
//!
//! Loaded from an optional TOML file; command-line flags override whatever
//! the file says.

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};

/// Top-level configuration.
#[derive(Debug, Clone, Default, Deserialize, Serialize)]
#[serde(default)]
pub struct AppConfig {
    pub extension: ExtensionConfig,
    pub device: DeviceConfig,
    pub liveness: LivenessConfig,
}

/// How the bridge presents itself to the block host.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct ExtensionConfig {
    /// Display name shown in the host's block palette
    pub name: String,
    /// Short identifier used as the descriptor file stem
    pub id: String,
    /// Address the helper server binds to
    pub bind: String,
    /// Port the host expects the helper on
    pub port: u16,
}

impl Default for ExtensionConfig {
    fn default() -> Self {
        Self {
            name: "Mindstorms NXT".to_string(),
            id: "nxt".to_string(),
            bind: "127.0.0.1".to_string(),
            port: 1330,
        }
    }
}

/// Link to the brick.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct DeviceConfig {
    /// Serial device; auto-detected when unset
    pub port: Option<String>,
    pub baud: u32,
    /// Look for a brick on USB before serial detection
    pub usb: bool,
    /// How long to wait for a reply telegram
    pub reply_timeout_ms: u64,
}

impl Default for DeviceConfig {
    fn default() -> Self {
        Self {
            port: None,
            baud: 115_200,
            usb: true,
            reply_timeout_ms: 1_000,
        }
    }
}

/// Idle liveness checks.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct LivenessConfig {
    /// Check on the brick once it has been idle longer than this
    pub idle_secs: u64,
}

impl Default for LivenessConfig {
    fn default() -> Self {
        Self { idle_secs: 100 }
    }
}

impl AppConfig {
    /// Load configuration from a TOML file.
    pub fn from_file<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = path.as_ref();
        let contents = fs::read_to_string(path)
            .with_context(|| format!("Failed to read config file: {}", path.display()))?;
        toml::from_str(&contents)
            .with_context(|| format!("Invalid config file: {}", path.display()))
    }

    /// Load an explicit file, or the default location if it exists, or
    /// fall back to defaults.
    pub fn load(explicit: Option<&Path>) -> Result<Self> {
        if let Some(path) = explicit {
            return Self::from_file(path);
        }
        match default_path() {
            Some(path) if path.exists() => {
                tracing::debug!("Using config file {}", path.display());
                Self::from_file(path)
            }
            _ => Ok(Self::default()),
        }
    }
}

/// `<config dir>/nxt-bridge/config.toml`
pub fn default_path() -> Option<PathBuf> {
    dirs::config_dir().map(|dir| dir.join("nxt-bridge").join("config.toml"))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults_match_helper_identity() {
        let config = AppConfig::default();
        assert_eq!(config.extension.name, "Mindstorms NXT");
        assert_eq!(config.extension.id, "nxt");
        assert_eq!(config.extension.port, 1330);
        assert_eq!(config.liveness.idle_secs, 100);
    }

    #[test]
    fn test_partial_file_keeps_defaults() {
        let config: AppConfig = toml::from_str(
            r#"
            [device]
            port = "/dev/rfcomm0"

            [liveness]
            idle_secs = 30
            "#,
        )
        .unwrap();

        assert_eq!(config.device.port.as_deref(), Some("/dev/rfcomm0"));
        assert_eq!(config.device.baud, 115_200);
        assert!(config.device.usb);
        assert_eq!(config.liveness.idle_secs, 30);
        assert_eq!(config.extension.port, 1330);
    }

    #[test]
    fn test_load_explicit_file() {
        use std::io::Write;

        let mut file = tempfile::NamedTempFile::new().unwrap();
        writeln!(file, "[extension]\nport = 1440\n\n[device]\nbaud = 9600").unwrap();

        let config = AppConfig::load(Some(file.path())).unwrap();
        assert_eq!(config.extension.port, 1440);
        assert_eq!(config.extension.name, "Mindstorms NXT");
        assert_eq!(config.device.baud, 9600);
    }

    #[test]
    fn test_invalid_file_reports_path() {
        use std::io::Write;

        let mut file = tempfile::NamedTempFile::new().unwrap();
        writeln!(file, "[liveness]\nidle_secs = \"soon\"").unwrap();

        let err = AppConfig::load(Some(file.path())).unwrap_err();
        assert!(err.to_string().contains("Invalid config file"));
    }

    #[test]
    fn test_missing_explicit_file_is_an_error() {
        assert!(AppConfig::load(Some(Path::new("/nonexistent/nxt-bridge.toml"))).is_err());
    }
}
