use std::path::{Path, PathBuf};

use tracing::{info, warn};

use crate::error::SettingsError;

pub const APP_NAME: &str = "PulseOSC";
const SETTINGS_FILE: &str = "settings.json";

#[derive(Debug, Clone, PartialEq, Eq, Hash, serde::Serialize, serde::Deserialize)]
#[serde(default)]
pub struct AppSettings {
    pub osc_address: String,
    pub osc_port: u16,
    /// Only connect to a peripheral whose advertised name contains this.
    pub device_name: Option<String>,
}

impl Default for AppSettings {
    fn default() -> Self {
        AppSettings {
            osc_address: "127.0.0.1".to_string(),
            osc_port: 9000,
            device_name: None,
        }
    }
}

pub fn app_config_dir() -> Result<PathBuf, SettingsError> {
    let dir = dirs::data_local_dir()
        .ok_or(SettingsError::NoDataDir)?
        .join(APP_NAME);

    std::fs::create_dir_all(&dir)?;
    Ok(dir)
}

pub fn settings_path() -> Result<PathBuf, SettingsError> {
    Ok(app_config_dir()?.join(SETTINGS_FILE))
}

impl AppSettings {
    /// Loads the settings file from the local data directory.
    pub fn load() -> Result<Self, SettingsError> {
        Self::load_from(&settings_path()?)
    }

    pub fn save(&self) -> Result<(), SettingsError> {
        self.save_to(&settings_path()?)
    }

    /// Reads `path`, rewriting it with defaults when it is missing or unreadable.
    pub fn load_from(path: &Path) -> Result<Self, SettingsError> {
        let parsed = match std::fs::read_to_string(path) {
            Ok(contents) => serde_json::from_str::<AppSettings>(&contents).map_err(SettingsError::from),
            Err(err) => Err(SettingsError::from(err)),
        };

        match parsed {
            Ok(settings) => Ok(settings),
            Err(err) => {
                warn!(path = %path.display(), %err, "resetting app settings");
                let settings = AppSettings::default();
                settings.save_to(path)?;
                Ok(settings)
            }
        }
    }

    pub fn save_to(&self, path: &Path) -> Result<(), SettingsError> {
        let settings_json = serde_json::to_string_pretty(self)?;
        std::fs::write(path, settings_json)?;
        info!(path = %path.display(), "saved app settings");
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn missing_file_is_reset_to_defaults() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join(SETTINGS_FILE);

        let settings = AppSettings::load_from(&path).unwrap();
        assert_eq!(settings, AppSettings::default());
        assert!(path.exists());
    }

    #[test]
    fn corrupt_file_is_reset_to_defaults() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join(SETTINGS_FILE);
        std::fs::write(&path, "{ not json").unwrap();

        assert_eq!(AppSettings::load_from(&path).unwrap(), AppSettings::default());
        let rewritten = std::fs::read_to_string(&path).unwrap();
        assert!(rewritten.contains("\"osc_port\": 9000"));
    }

    #[test]
    fn saved_settings_load_back() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join(SETTINGS_FILE);
        let settings = AppSettings {
            osc_address: "192.168.1.20".into(),
            osc_port: 9001,
            device_name: Some("Polar H10".into()),
        };

        settings.save_to(&path).unwrap();
        assert_eq!(AppSettings::load_from(&path).unwrap(), settings);
    }

    #[test]
    fn partial_file_fills_defaults() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join(SETTINGS_FILE);
        std::fs::write(&path, r#"{ "osc_port": 9100 }"#).unwrap();

        let settings = AppSettings::load_from(&path).unwrap();
        assert_eq!(settings.osc_port, 9100);
        assert_eq!(settings.osc_address, "127.0.0.1");
    }
}
