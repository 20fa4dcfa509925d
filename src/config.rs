use std::path::Path;
use std::time::Duration;

use anyhow::Context as _;
use serde_derive::Deserialize;

pub const DEFAULT_CONFIG_PATH: &str = "fan-follow.toml";

#[derive(Deserialize, Debug, Default, Clone)]
pub struct AppConfig {
    pub serial: Option<SerialConfig>,
}

#[derive(Deserialize, Debug, Default, Clone)]
pub struct SerialConfig {
    pub port: Option<String>,
    pub baud_rate: Option<u32>,
    pub timeout_ms: Option<u64>,
}

impl SerialConfig {
    pub fn baud_rate(&self) -> u32 {
        self.baud_rate.unwrap_or(115_200)
    }

    pub fn timeout(&self) -> Duration {
        Duration::from_millis(self.timeout_ms.unwrap_or(3000))
    }
}

impl AppConfig {
    /// Loads the config file. A missing file is only an error when the path
    /// was given explicitly; the default location falls back to defaults.
    pub fn load(path: Option<&Path>) -> anyhow::Result<Self> {
        let (path, explicit) = match path {
            Some(p) => (p, true),
            None => (Path::new(DEFAULT_CONFIG_PATH), false),
        };

        let contents = match std::fs::read_to_string(path) {
            Ok(contents) => contents,
            Err(err) if !explicit && err.kind() == std::io::ErrorKind::NotFound => {
                return Ok(AppConfig::default());
            }
            Err(err) => {
                return Err(err).with_context(|| format!("reading {}", path.display()));
            }
        };

        toml::de::from_str(&contents).with_context(|| format!("parsing {}", path.display()))
    }

    pub fn serial(&self) -> SerialConfig {
        self.serial.clone().unwrap_or_default()
    }
}
