//! Configuration Loader
//!
//! Loads and merges driver configuration from files and environment variables.

use crate::config::settings::DriverConfig;
use crate::error::{DriverError, Result};
use serde_json::Value;
use std::path::{Path, PathBuf};
use tracing::debug;

/// Environment variable naming an extra config file
pub const CONFIG_PATH_ENV: &str = "NETDRIVER_CONFIG_PATH";

pub const SOCKS5_ADDRESS_ENV: &str = "NETDRIVER_SOCKS5_ADDRESS";
pub const SOCKS5_PORT_ENV: &str = "NETDRIVER_SOCKS5_PORT";
pub const SOCKS5_LOGIN_ENV: &str = "NETDRIVER_SOCKS5_LOGIN";
pub const SOCKS5_PASSWORD_ENV: &str = "NETDRIVER_SOCKS5_PASSWORD";

/// Configuration loader with support for multiple sources
pub struct ConfigLoader {
    /// Merged raw configuration; later sources override earlier ones field by field
    raw: Value,
}

impl ConfigLoader {
    /// Create a loader from defaults, the default paths and the environment
    pub fn new() -> Result<Self> {
        // Load .env file if present
        let _ = dotenvy::dotenv();

        let mut loader = Self::empty();
        loader.load_from_default_paths()?;
        loader.apply_env_overrides(|key| std::env::var(key).ok())?;
        Ok(loader)
    }

    /// Create a loader with a specific config file
    pub fn from_path(path: impl AsRef<Path>) -> Result<Self> {
        let mut loader = Self::empty();
        loader.load_from_file(path)?;
        Ok(loader)
    }

    fn empty() -> Self {
        Self {
            raw: Value::Object(Default::default()),
        }
    }

    /// Load configuration from default paths
    fn load_from_default_paths(&mut self) -> Result<()> {
        for path in Self::get_config_paths() {
            if path.exists() {
                self.load_from_file(&path)?;
            }
        }

        Ok(())
    }

    /// Get list of config paths to check, lowest precedence first
    fn get_config_paths() -> Vec<PathBuf> {
        let mut paths = Vec::new();

        // 1. Home directory
        if let Some(home_dir) = dirs::home_dir() {
            paths.push(home_dir.join(".netdriver").join("config.json"));
        }

        // 2. User config directory
        if let Some(config_dir) = dirs::config_dir() {
            paths.push(config_dir.join("netdriver").join("config.json"));
        }

        // 3. Current directory
        paths.push(PathBuf::from("netdriver.json"));

        // 4. Environment variable
        if let Ok(custom_path) = std::env::var(CONFIG_PATH_ENV) {
            paths.push(PathBuf::from(custom_path));
        }

        paths
    }

    /// Merge a configuration file over what is loaded so far
    pub fn load_from_file(&mut self, path: impl AsRef<Path>) -> Result<()> {
        let path = path.as_ref();
        let content = std::fs::read_to_string(path).map_err(|e| {
            DriverError::Config(format!("Failed to read {}: {}", path.display(), e))
        })?;

        let value: Value = serde_json::from_str(&content).map_err(|e| {
            DriverError::Config(format!("Failed to parse {}: {}", path.display(), e))
        })?;

        if !value.is_object() {
            return Err(DriverError::Config(format!(
                "{} must contain a JSON object",
                path.display()
            )));
        }

        debug!(path = %path.display(), "loaded driver configuration");
        self.merge_value(value);
        Ok(())
    }

    /// Overlay proxy settings taken from `lookup` (normally the process environment)
    pub fn apply_env_overrides<F>(&mut self, lookup: F) -> Result<()>
    where
        F: Fn(&str) -> Option<String>,
    {
        let mut proxy = serde_json::Map::new();

        if let Some(address) = lookup(SOCKS5_ADDRESS_ENV) {
            proxy.insert("address".to_string(), Value::String(address));
        }
        if let Some(port) = lookup(SOCKS5_PORT_ENV) {
            let port: u16 = port.trim().parse().map_err(|_| {
                DriverError::Config(format!("{} is not a valid port: {}", SOCKS5_PORT_ENV, port))
            })?;
            proxy.insert("port".to_string(), Value::from(port));
        }
        if let Some(login) = lookup(SOCKS5_LOGIN_ENV) {
            proxy.insert("username".to_string(), Value::String(login));
        }
        if let Some(password) = lookup(SOCKS5_PASSWORD_ENV) {
            proxy.insert("password".to_string(), Value::String(password));
        }

        if !proxy.is_empty() {
            let mut overlay = serde_json::Map::new();
            overlay.insert("proxy".to_string(), Value::Object(proxy));
            self.merge_value(Value::Object(overlay));
        }

        Ok(())
    }

    /// Merge another config into this one (later configs override earlier)
    pub fn merge_config(&mut self, other: &DriverConfig) -> Result<()> {
        let value = serde_json::to_value(other)
            .map_err(|e| DriverError::Config(format!("Failed to serialize config: {}", e)))?;
        self.merge_value(value);
        Ok(())
    }

    fn merge_value(&mut self, other: Value) {
        merge(&mut self.raw, other);
    }

    /// Get the loaded configuration
    pub fn config(&self) -> Result<DriverConfig> {
        let config: DriverConfig = serde_json::from_value(self.raw.clone())
            .map_err(|e| DriverError::Config(format!("Invalid configuration: {}", e)))?;
        config.validate()?;
        Ok(config)
    }

    /// Take ownership of the configuration
    pub fn into_config(self) -> Result<DriverConfig> {
        self.config()
    }
}

/// Recursively merge `overlay` into `base`; objects merge, everything else replaces
fn merge(base: &mut Value, overlay: Value) {
    match (base, overlay) {
        (Value::Object(base), Value::Object(overlay)) => {
            for (key, value) in overlay {
                match base.get_mut(&key) {
                    Some(existing) => merge(existing, value),
                    None => {
                        base.insert(key, value);
                    }
                }
            }
        }
        (base, overlay) => *base = overlay,
    }
}
