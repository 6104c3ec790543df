use crate::domain::models::{Language, Preferences, Theme};
use crate::infrastructure::error::InfraError;
use crate::infrastructure::storage::{read_setting, write_setting};
use rusqlite::Connection;
use std::path::{Path, PathBuf};
use std::sync::Mutex;

pub const THEME_KEY: &str = "theme";
pub const LANGUAGE_KEY: &str = "ntp-client-language";

pub trait PreferencesRepository: Send + Sync {
    fn load(&self) -> Result<Preferences, InfraError>;
    fn save_theme(&self, theme: Theme) -> Result<(), InfraError>;
    fn save_language(&self, language: Language) -> Result<(), InfraError>;
}

#[derive(Debug, Clone)]
pub struct SqlitePreferencesRepository {
    db_path: PathBuf,
}

impl SqlitePreferencesRepository {
    pub fn new(db_path: impl AsRef<Path>) -> Self {
        Self {
            db_path: db_path.as_ref().to_path_buf(),
        }
    }

    fn connect(&self) -> Result<Connection, InfraError> {
        Connection::open(&self.db_path).map_err(InfraError::from)
    }
}

impl PreferencesRepository for SqlitePreferencesRepository {
    // Unrecognised stored values fall back to defaults rather than failing start-up.
    fn load(&self) -> Result<Preferences, InfraError> {
        let connection = self.connect()?;
        let theme = read_setting(&connection, THEME_KEY)?
            .and_then(|raw| Theme::parse(&raw).ok())
            .unwrap_or_default();
        let language = read_setting(&connection, LANGUAGE_KEY)?
            .and_then(|raw| Language::parse(&raw).ok())
            .unwrap_or_default();
        Ok(Preferences { theme, language })
    }

    fn save_theme(&self, theme: Theme) -> Result<(), InfraError> {
        let connection = self.connect()?;
        write_setting(&connection, THEME_KEY, theme.as_str())
    }

    fn save_language(&self, language: Language) -> Result<(), InfraError> {
        let connection = self.connect()?;
        write_setting(&connection, LANGUAGE_KEY, language.as_str())
    }
}

#[derive(Debug, Default)]
pub struct InMemoryPreferencesRepository {
    preferences: Mutex<Preferences>,
}

impl PreferencesRepository for InMemoryPreferencesRepository {
    fn load(&self) -> Result<Preferences, InfraError> {
        let preferences = self
            .preferences
            .lock()
            .map_err(|error| InfraError::InvalidConfig(format!("preferences lock poisoned: {error}")))?;
        Ok(*preferences)
    }

    fn save_theme(&self, theme: Theme) -> Result<(), InfraError> {
        let mut preferences = self
            .preferences
            .lock()
            .map_err(|error| InfraError::InvalidConfig(format!("preferences lock poisoned: {error}")))?;
        preferences.theme = theme;
        Ok(())
    }

    fn save_language(&self, language: Language) -> Result<(), InfraError> {
        let mut preferences = self
            .preferences
            .lock()
            .map_err(|error| InfraError::InvalidConfig(format!("preferences lock poisoned: {error}")))?;
        preferences.language = language;
        Ok(())
    }
}
