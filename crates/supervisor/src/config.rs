//! Supervisor configuration.
//!
//! Priority: CLI flags > environment variables > config file > defaults.
//! The flag layer is applied by `main` after `load()` resolves the rest.

use std::fs::File;
use std::io::Read;
use std::path::Path;

use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct SupervisorConfig {
    /// Port the read-only status surface listens on.
    pub ui_port: u16,
    /// Inclusive lower bound of the dynamic range.
    pub min_port: u16,
    /// Inclusive upper bound of the dynamic range.
    pub max_port: u16,
    pub docker_bin: String,
    pub compose_bin: String,
}

impl SupervisorConfig {
    /// Load configuration from file or environment variables.
    /// Environment variables override config file settings.
    pub fn load() -> Result<Self, Box<dyn std::error::Error>> {
        let config_path = std::env::var("SUPERVISOR_CONFIG_FILE")
            .unwrap_or_else(|_| "/etc/dynamic-port-mapper/supervisor.toml".to_string());

        let mut config = if Path::new(&config_path).exists() {
            tracing::info!("Loading configuration from: {}", config_path);
            Self::from_file(&config_path)?
        } else {
            Self::default()
        };

        if let Ok(port) = std::env::var("SUPERVISOR_UI_PORT") {
            config.ui_port = port.parse()?;
        }
        if let Ok(port) = std::env::var("SUPERVISOR_MIN_PORT") {
            config.min_port = port.parse()?;
        }
        if let Ok(port) = std::env::var("SUPERVISOR_MAX_PORT") {
            config.max_port = port.parse()?;
        }
        if let Ok(bin) = std::env::var("SUPERVISOR_DOCKER_BIN") {
            config.docker_bin = bin;
        }
        if let Ok(bin) = std::env::var("SUPERVISOR_COMPOSE_BIN") {
            config.compose_bin = bin;
        }

        Ok(config)
    }

    /// Load configuration from a TOML file.
    pub fn from_file(path: &str) -> Result<Self, Box<dyn std::error::Error>> {
        let mut file = File::open(path)?;
        let mut contents = String::new();
        file.read_to_string(&mut contents)?;

        let config: SupervisorConfig = toml::from_str(&contents)?;
        Ok(config)
    }

    /// Validate configuration values.
    pub fn validate(&self) -> Result<(), String> {
        if self.min_port == 0 {
            return Err("min_port must be > 0".to_string());
        }
        if self.min_port > self.max_port {
            return Err(format!(
                "dynamic range is empty: min_port {} > max_port {}",
                self.min_port, self.max_port
            ));
        }
        if self.docker_bin.is_empty() {
            return Err("docker_bin must not be empty".to_string());
        }
        if self.compose_bin.is_empty() {
            return Err("compose_bin must not be empty".to_string());
        }
        Ok(())
    }
}

impl Default for SupervisorConfig {
    fn default() -> Self {
        Self {
            ui_port: 5000,
            min_port: 10000,
            max_port: 65000,
            docker_bin: "docker".to_string(),
            compose_bin: "docker-compose".to_string(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let config = SupervisorConfig::default();
        assert_eq!(config.ui_port, 5000);
        assert_eq!(config.min_port, 10000);
        assert_eq!(config.max_port, 65000);
        assert_eq!(config.docker_bin, "docker");
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_validate_inverted_range() {
        let config = SupervisorConfig {
            min_port: 20000,
            max_port: 10000,
            ..SupervisorConfig::default()
        };
        let err = config.validate().unwrap_err();
        assert!(err.contains("dynamic range"));
    }

    #[test]
    fn test_validate_zero_min_port() {
        let config = SupervisorConfig {
            min_port: 0,
            ..SupervisorConfig::default()
        };
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_validate_empty_binaries() {
        let config = SupervisorConfig {
            docker_bin: String::new(),
            ..SupervisorConfig::default()
        };
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_from_toml() {
        let config: SupervisorConfig =
            toml::from_str("ui_port = 8088\nmin_port = 30000\nmax_port = 40000\n").unwrap();
        assert_eq!(config.ui_port, 8088);
        assert_eq!(config.min_port, 30000);
        assert_eq!(config.max_port, 40000);
        // Unset keys fall back to defaults.
        assert_eq!(config.docker_bin, "docker");
    }
}
