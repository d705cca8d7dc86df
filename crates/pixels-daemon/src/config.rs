//! Configuration loading

use anyhow::{Context, Result};
use pixels_connect::{DieOptions, SchedulerConfig};
use pixels_core::{DfuFilesInfo, PixelId};
use pixels_dataset::CompileOptions;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;
use tracing::info;

/// Main configuration structure
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Config {
    #[serde(default)]
    pub daemon: DaemonConfig,
    #[serde(default)]
    pub scheduler: SchedulerConfig,
    #[serde(default)]
    pub compiler: CompileOptions,
    #[serde(default)]
    pub library: LibraryConfig,
    #[serde(default)]
    pub pairing: PairingConfig,
    #[serde(default)]
    pub simulation: SimulationConfig,
    /// Bundled DFU images offered to outdated dice
    #[serde(default)]
    pub firmware: Option<DfuFilesInfo>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DaemonConfig {
    /// Bind address for web server
    #[serde(default = "default_bind")]
    pub bind: String,
}

impl Default for DaemonConfig {
    fn default() -> Self {
        Self {
            bind: default_bind(),
        }
    }
}

fn default_bind() -> String {
    "127.0.0.1:8180".to_string()
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LibraryConfig {
    /// Profiles, animations and patterns
    #[serde(default = "default_library_path")]
    pub path: PathBuf,
}

impl Default for LibraryConfig {
    fn default() -> Self {
        Self {
            path: default_library_path(),
        }
    }
}

fn default_library_path() -> PathBuf {
    PathBuf::from("./pixels-library.json")
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PairingConfig {
    #[serde(default = "default_pairing_path")]
    pub path: PathBuf,
}

impl Default for PairingConfig {
    fn default() -> Self {
        Self {
            path: default_pairing_path(),
        }
    }
}

fn default_pairing_path() -> PathBuf {
    PathBuf::from("./pixels-pairings.json")
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SimulationConfig {
    /// Time each simulated connection takes
    #[serde(default = "default_connect_delay_ms")]
    pub connect_delay_ms: u64,
    /// Put every paired die in range
    #[serde(default = "default_true")]
    pub include_pairings: bool,
    #[serde(default, rename = "die")]
    pub dice: Vec<SimulatedDieConfig>,
}

impl Default for SimulationConfig {
    fn default() -> Self {
        Self {
            connect_delay_ms: default_connect_delay_ms(),
            include_pairings: true,
            dice: Vec::new(),
        }
    }
}

fn default_connect_delay_ms() -> u64 {
    250
}

fn default_true() -> bool {
    true
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SimulatedDieConfig {
    /// Pixel id in hex
    pub pixel_id: String,
    pub memory: Option<usize>,
    pub max_message_size: Option<usize>,
    /// Connection attempts that fail before one succeeds
    #[serde(default)]
    pub failing_connects: u32,
    /// Milliseconds the die spends storing each chunk
    #[serde(default)]
    pub chunk_delay_ms: u64,
}

impl SimulatedDieConfig {
    pub fn pixel(&self) -> Result<PixelId> {
        self.pixel_id
            .parse()
            .with_context(|| format!("invalid simulated pixel id {:?}", self.pixel_id))
    }

    pub fn options(&self) -> DieOptions {
        let defaults = DieOptions::default();
        DieOptions {
            memory: self.memory.unwrap_or(defaults.memory),
            max_message_size: self.max_message_size.unwrap_or(defaults.max_message_size),
            drop_after_chunks: None,
            chunk_delay: Duration::from_millis(self.chunk_delay_ms),
        }
    }
}

/// Load configuration from file
pub fn load_config(path: &Path) -> Result<Config> {
    if path.exists() {
        let content = std::fs::read_to_string(path)?;
        let config: Config = toml::from_str(&content)?;
        info!(path = %path.display(), "Loaded configuration");
        Ok(config)
    } else {
        info!(
            path = %path.display(),
            "Configuration file not found, using defaults"
        );
        Ok(Config::default())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_sections_fall_back_to_defaults() {
        let config: Config = toml::from_str(
            r#"
            [scheduler]
            max_connections = 3

            [[simulation.die]]
            pixel_id = "00C0FFEE"
            memory = 4096
            chunk_delay_ms = 20
            "#,
        )
        .unwrap();

        assert_eq!(config.scheduler.max_connections, 3);
        assert_eq!(config.scheduler.max_retries, 5);
        assert_eq!(config.daemon.bind, "127.0.0.1:8180");
        assert_eq!(config.compiler, CompileOptions::default());
        assert!(config.firmware.is_none());

        let die = &config.simulation.dice[0];
        assert_eq!(die.pixel().unwrap(), PixelId(0xc0ffee));
        assert_eq!(die.options().memory, 4096);
        assert_eq!(die.options().max_message_size, 512);
        assert_eq!(die.options().chunk_delay, Duration::from_millis(20));
    }

    #[test]
    fn test_missing_file_uses_defaults() {
        let dir = tempfile::tempdir().unwrap();
        let config = load_config(&dir.path().join("absent.toml")).unwrap();
        assert_eq!(config.simulation.connect_delay_ms, 250);
        assert!(config.simulation.include_pairings);
    }
}
