use super::{github, schedule, sync, system};
use crate::utils::get_default_from_env;
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::Path;
use toml::from_str;

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct FetchSettings {
    /// Download directory, relative to the working directory
    #[serde(default = "_default_fetch_temp_dir")]
    pub temp_dir: String,
    /// File name of the apply agent inside an extracted release
    #[serde(default = "_default_fetch_updater_executable")]
    pub updater_executable: String,
}

fn _default_fetch_temp_dir() -> String {
    get_default_from_env("UPDATR_TEMP_DIR", "temp".into())
}
fn _default_fetch_updater_executable() -> String {
    get_default_from_env(
        "UPDATR_EXECUTABLE",
        format!("updatr{}", std::env::consts::EXE_SUFFIX),
    )
}

impl Default for FetchSettings {
    fn default() -> Self {
        Self {
            temp_dir: _default_fetch_temp_dir(),
            updater_executable: _default_fetch_updater_executable(),
        }
    }
}

#[derive(Debug, Default, Clone, Deserialize, Serialize)]
pub struct Settings {
    #[serde(default)]
    pub system: system::CurrentSystem,
    #[serde(default)]
    pub github: github::GithubSettings,
    #[serde(default)]
    pub schedule: schedule::ScheduleSettings,
    #[serde(default)]
    pub fetch: FetchSettings,
    #[serde(default)]
    pub apply: sync::ApplySettings,
}

impl Settings {
    pub fn load(config_path: &str) -> Self {
        if Path::new(config_path).exists() {
            match fs::read_to_string(config_path) {
                Ok(content) => match from_str::<Settings>(&content) {
                    Ok(settings) => settings,
                    Err(err) => {
                        log::error!("Failed to parse configuration: {}", err);
                        Self::default()
                    }
                },
                Err(err) => {
                    log::error!("Failed to read configuration file: {}", err);
                    Self::default()
                }
            }
        } else {
            log::debug!("Configuration file not found: {}", config_path);
            Self::default()
        }
    }
}
