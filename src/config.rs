use std::{path::PathBuf, time::Duration};

use log::warn;
use serde::{Deserialize, Serialize};

use crate::sorted::SortKey;

#[derive(Serialize, Deserialize, Clone, Copy, Debug, PartialEq, Eq)]
pub enum Mode {
    Tui,
    Out,
}

#[derive(Serialize, Deserialize, Debug, PartialEq)]
#[serde(default)]
pub struct TuiConfig {
    pub sort_key: SortKey,
    pub refresh_secs: f32,
}

impl TuiConfig {
    ///refresh_secs limited to 0.5s..1h, unusable values fall back to the default
    pub fn refresh_interval(&self) -> Duration {
        let secs = if self.refresh_secs.is_finite() && self.refresh_secs > 0. {
            self.refresh_secs.clamp(0.5, 3600.)
        } else {
            TuiConfig::default().refresh_secs
        };
        Duration::from_secs_f32(secs)
    }
}

impl Default for TuiConfig {
    fn default() -> Self {
        Self {
            sort_key: SortKey::Pid,
            refresh_secs: 2.,
        }
    }
}

#[derive(Serialize, Deserialize, Debug, PartialEq)]
#[serde(default)]
pub struct Config {
    pub mode: Mode,
    pub tui: TuiConfig,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            mode: Mode::Tui,
            tui: TuiConfig::default(),
        }
    }
}

impl Config {
    pub fn load() -> Config {
        let path = get_home_config();
        if path.exists() {
            if let Ok(contents) = std::fs::read_to_string(&path) {
                match Self::parse(&contents) {
                    Ok(config) => return config,
                    Err(err) => warn!("ignoring {}: {err}", path.display()),
                }
            }
        }

        //default
        Config::default()
    }

    pub fn parse(contents: &str) -> Result<Config, toml::de::Error> {
        toml::from_str::<Config>(contents)
    }

    pub fn save(&self) {
        let path = get_home_config();
        if let Ok(toml_str) = toml::to_string(self) {
            if let Some(parent) = path.parent() {
                let _ = std::fs::create_dir_all(parent);
            }
            if let Err(err) = std::fs::write(&path, toml_str) {
                warn!("could not save {}: {err}", path.display());
            }
        }
    }
}

fn get_home_config() -> PathBuf {
    //home directory
    if let Some(mut dir) = dirs::home_dir() {
        dir.push(".config");
        dir.push("proctree");
        dir.push("config.toml");
        return dir;
    }
    //should not happen, but just in case
    PathBuf::from("config.toml")
}
