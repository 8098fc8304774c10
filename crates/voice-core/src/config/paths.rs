//! Default locations of pipeline configuration files

use std::path::PathBuf;

/// Directory under the user config dir holding our files
const APP_DIR: &str = "voice-pipeline";

/// `~/.config/voice-pipeline` on Linux, `.` if no config dir is known
pub fn default_config_dir() -> PathBuf {
    dirs::config_dir()
        .unwrap_or_else(|| PathBuf::from("."))
        .join(APP_DIR)
}

pub fn default_config_path() -> PathBuf {
    default_config_dir().join("pipeline.yaml")
}
