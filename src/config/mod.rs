//! Configuration management for jiraone.
//!
//! The config file lives at `$CONFIG_DIR/jiraone/config.toml` (or under
//! `$JIRAONE_CONFIG_DIR` when set) and holds the shared [`Settings`] plus one
//! entry per [`Profile`]. Secrets are never written here; they go to the OS
//! keyring.

mod profile;
mod settings;

use std::fs;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::{debug, info, instrument};

pub use profile::{OAuthProfile, Profile};
pub use settings::Settings;

/// Environment variable that overrides the config directory.
pub const CONFIG_DIR_ENV: &str = "JIRAONE_CONFIG_DIR";

const APP_DIR: &str = "jiraone";
const CONFIG_FILE: &str = "config.toml";

/// Errors raised while loading, saving or validating configuration.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("could not determine the configuration directory")]
    NoConfigDir,

    #[error("failed to create configuration directory: {0}")]
    CreateDirError(std::io::Error),

    #[error("failed to read configuration file: {0}")]
    ReadError(std::io::Error),

    #[error("failed to write configuration file: {0}")]
    WriteError(std::io::Error),

    #[error("failed to parse configuration: {0}")]
    ParseError(#[from] toml::de::Error),

    #[error("failed to serialize configuration: {0}")]
    SerializeError(#[from] toml::ser::Error),

    #[error("invalid configuration: {0}")]
    ValidationError(String),

    #[error("profile '{0}' not found")]
    ProfileNotFound(String),
}

pub type Result<T> = std::result::Result<T, ConfigError>;

/// The whole config file.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Config {
    #[serde(default)]
    pub settings: Settings,
    #[serde(default)]
    pub profiles: Vec<Profile>,
}

impl Config {
    /// Directory holding the config file.
    pub fn config_dir() -> Result<PathBuf> {
        if let Some(dir) = std::env::var_os(CONFIG_DIR_ENV).filter(|d| !d.is_empty()) {
            return Ok(PathBuf::from(dir));
        }
        dirs::config_dir()
            .map(|d| d.join(APP_DIR))
            .ok_or(ConfigError::NoConfigDir)
    }

    /// Full path of the config file.
    pub fn config_path() -> Result<PathBuf> {
        Ok(Self::config_dir()?.join(CONFIG_FILE))
    }

    /// Load from the default location. A missing file yields the default config.
    pub fn load() -> Result<Self> {
        Self::load_from(&Self::config_path()?)
    }

    #[instrument]
    pub fn load_from(path: &Path) -> Result<Self> {
        if !path.exists() {
            debug!("No config file, using defaults");
            return Ok(Self::default());
        }

        let contents = fs::read_to_string(path).map_err(ConfigError::ReadError)?;
        let config: Config = toml::from_str(&contents)?;
        config.validate()?;

        info!(profiles = config.profiles.len(), "Loaded configuration");
        Ok(config)
    }

    pub fn save(&self) -> Result<()> {
        self.save_to(&Self::config_path()?)
    }

    #[instrument(skip(self))]
    pub fn save_to(&self, path: &Path) -> Result<()> {
        self.validate()?;

        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent).map_err(ConfigError::CreateDirError)?;
        }

        let contents = toml::to_string_pretty(self)?;
        fs::write(path, contents).map_err(ConfigError::WriteError)?;

        info!("Saved configuration");
        Ok(())
    }

    /// Validate every profile, name uniqueness and the default profile.
    pub fn validate(&self) -> Result<()> {
        for (i, profile) in self.profiles.iter().enumerate() {
            profile.validate()?;
            if self.profiles[..i].iter().any(|p| p.name == profile.name) {
                return Err(ConfigError::ValidationError(format!(
                    "duplicate profile name '{}'",
                    profile.name
                )));
            }
        }

        if let Some(default) = &self.settings.default_profile {
            if self.profile(default).is_none() {
                return Err(ConfigError::ValidationError(format!(
                    "default profile '{}' does not exist",
                    default
                )));
            }
        }

        Ok(())
    }

    pub fn profile(&self, name: &str) -> Option<&Profile> {
        self.profiles.iter().find(|p| p.name == name)
    }

    /// The configured default profile, or the only profile if there is one.
    pub fn default_profile(&self) -> Result<&Profile> {
        match &self.settings.default_profile {
            Some(name) => self
                .profile(name)
                .ok_or_else(|| ConfigError::ProfileNotFound(name.clone())),
            None if self.profiles.len() == 1 => Ok(&self.profiles[0]),
            None => Err(ConfigError::ProfileNotFound("default".to_string())),
        }
    }

    /// Add a validated profile. Names must be unique.
    pub fn add_profile(&mut self, profile: Profile) -> Result<()> {
        profile.validate()?;
        if self.profile(&profile.name).is_some() {
            return Err(ConfigError::ValidationError(format!(
                "profile '{}' already exists",
                profile.name
            )));
        }
        self.profiles.push(profile);
        Ok(())
    }

    /// Remove a profile, clearing the default if it pointed at it.
    pub fn remove_profile(&mut self, name: &str) -> Result<Profile> {
        let index = self
            .profiles
            .iter()
            .position(|p| p.name == name)
            .ok_or_else(|| ConfigError::ProfileNotFound(name.to_string()))?;

        if self.settings.default_profile.as_deref() == Some(name) {
            self.settings.default_profile = None;
        }
        Ok(self.profiles.remove(index))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serial_test::serial;
    use tempfile::TempDir;

    fn work() -> Profile {
        Profile::new(
            "work".to_string(),
            "https://work.atlassian.net".to_string(),
            "work@example.com".to_string(),
        )
    }

    fn personal() -> Profile {
        Profile::new(
            "personal".to_string(),
            "https://personal.atlassian.net".to_string(),
            "me@example.com".to_string(),
        )
    }

    #[test]
    fn test_missing_file_loads_default() {
        let dir = TempDir::new().unwrap();
        let config = Config::load_from(&dir.path().join("config.toml")).unwrap();
        assert_eq!(config, Config::default());
    }

    #[test]
    fn test_save_and_load_round_trip() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("nested").join("config.toml");

        let mut config = Config::default();
        config.add_profile(work()).unwrap();
        config
            .add_profile(Profile::oauth(
                "cloud".to_string(),
                "client".to_string(),
                "https://auth.atlassian.com/authorize?redirect_uri=https%3A%2F%2Flocalhost%2Fcb"
                    .to_string(),
            ))
            .unwrap();
        config.settings.default_profile = Some("work".to_string());
        config.save_to(&path).unwrap();

        let loaded = Config::load_from(&path).unwrap();
        assert_eq!(loaded, config);
        assert_eq!(loaded.default_profile().unwrap().name, "work");
    }

    #[test]
    fn test_load_rejects_invalid_toml() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("config.toml");
        fs::write(&path, "profiles = 3 =").unwrap();

        assert!(matches!(
            Config::load_from(&path),
            Err(ConfigError::ParseError(_))
        ));
    }

    #[test]
    fn test_load_rejects_unknown_default_profile() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("config.toml");
        fs::write(
            &path,
            r#"
            [settings]
            default_profile = "missing"

            [[profiles]]
            name = "work"
            url = "https://work.atlassian.net"
            email = "work@example.com"
            "#,
        )
        .unwrap();

        let err = Config::load_from(&path).unwrap_err();
        assert!(err.to_string().contains("default profile 'missing'"));
    }

    #[test]
    fn test_duplicate_profile_rejected() {
        let mut config = Config::default();
        config.add_profile(work()).unwrap();
        assert!(matches!(
            config.add_profile(work()),
            Err(ConfigError::ValidationError(_))
        ));

        config.profiles.push(work());
        assert!(config.validate().unwrap_err().to_string().contains("duplicate"));
    }

    #[test]
    fn test_default_profile_resolution() {
        let mut config = Config::default();
        assert!(matches!(
            config.default_profile(),
            Err(ConfigError::ProfileNotFound(_))
        ));

        config.add_profile(work()).unwrap();
        assert_eq!(config.default_profile().unwrap().name, "work");

        config.add_profile(personal()).unwrap();
        assert!(config.default_profile().is_err());

        config.settings.default_profile = Some("personal".to_string());
        assert_eq!(config.default_profile().unwrap().name, "personal");
    }

    #[test]
    fn test_remove_profile_clears_default() {
        let mut config = Config::default();
        config.add_profile(work()).unwrap();
        config.settings.default_profile = Some("work".to_string());

        let removed = config.remove_profile("work").unwrap();
        assert_eq!(removed.name, "work");
        assert!(config.settings.default_profile.is_none());
        assert!(matches!(
            config.remove_profile("work"),
            Err(ConfigError::ProfileNotFound(_))
        ));
    }

    #[test]
    #[serial]
    fn test_config_dir_env_override() {
        let dir = TempDir::new().unwrap();
        std::env::set_var(CONFIG_DIR_ENV, dir.path());

        let path = Config::config_path().unwrap();
        let mut config = Config::default();
        config.add_profile(work()).unwrap();
        config.save().unwrap();
        let loaded = Config::load().unwrap();

        std::env::remove_var(CONFIG_DIR_ENV);

        assert_eq!(path, dir.path().join("config.toml"));
        assert_eq!(loaded.profiles.len(), 1);
    }
}
