//! JSON document persistence
//!
//! Small settings documents (biometrics, preferences) are kept as one JSON
//! file each. Writes go to a sibling temp file and are renamed into place so a
//! crash never leaves a half-written document behind.

use crate::error::TrackerError;
use serde::de::DeserializeOwned;
use serde::Serialize;
use std::fs;
use std::marker::PhantomData;
use std::path::{Path, PathBuf};

/// A single serde document stored at a fixed path, or only in memory
#[derive(Debug, Clone)]
pub struct JsonFile<T> {
    path: Option<PathBuf>,
    _marker: PhantomData<T>,
}

impl<T> JsonFile<T>
where
    T: Serialize + DeserializeOwned + Default,
{
    /// Back the document with a file at `path`
    pub fn at(path: impl Into<PathBuf>) -> Self {
        Self {
            path: Some(path.into()),
            _marker: PhantomData,
        }
    }

    /// Keep the document in memory only
    pub fn in_memory() -> Self {
        Self {
            path: None,
            _marker: PhantomData,
        }
    }

    pub fn path(&self) -> Option<&Path> {
        self.path.as_deref()
    }

    /// Load the document, or the default when nothing has been saved yet
    pub fn load_or_default(&self) -> Result<T, TrackerError> {
        let Some(path) = &self.path else {
            return Ok(T::default());
        };
        if !path.exists() {
            return Ok(T::default());
        }
        let content = fs::read_to_string(path)?;
        if content.trim().is_empty() {
            return Ok(T::default());
        }
        Ok(serde_json::from_str(&content)?)
    }

    /// Persist the whole document
    pub fn save(&self, value: &T) -> Result<(), TrackerError> {
        let Some(path) = &self.path else {
            return Ok(());
        };
        if let Some(parent) = path.parent() {
            if !parent.as_os_str().is_empty() {
                fs::create_dir_all(parent)?;
            }
        }
        let json = serde_json::to_string_pretty(value)?;
        let tmp = path.with_extension("json.tmp");
        fs::write(&tmp, json)?;
        fs::rename(&tmp, path)?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::Preferences;
    use crate::types::Theme;

    #[test]
    fn test_missing_file_yields_default() {
        let dir = tempfile::tempdir().unwrap();
        let file: JsonFile<Preferences> = JsonFile::at(dir.path().join("preferences.json"));
        assert_eq!(file.load_or_default().unwrap(), Preferences::default());
    }

    #[test]
    fn test_save_then_load() {
        let dir = tempfile::tempdir().unwrap();
        let file: JsonFile<Preferences> = JsonFile::at(dir.path().join("nested/preferences.json"));

        let prefs = Preferences {
            goal: 8000,
            theme: Theme::Dark,
        };
        file.save(&prefs).unwrap();

        let reopened: JsonFile<Preferences> =
            JsonFile::at(dir.path().join("nested/preferences.json"));
        assert_eq!(reopened.load_or_default().unwrap(), prefs);
        assert!(!dir.path().join("nested/preferences.json.tmp").exists());
    }

    #[test]
    fn test_corrupt_file_is_an_error() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("preferences.json");
        fs::write(&path, "{not json").unwrap();

        let file: JsonFile<Preferences> = JsonFile::at(path);
        assert!(matches!(
            file.load_or_default(),
            Err(TrackerError::JsonError(_))
        ));
    }

    #[test]
    fn test_in_memory_never_touches_disk() {
        let file: JsonFile<Preferences> = JsonFile::in_memory();
        file.save(&Preferences::default()).unwrap();
        assert!(file.path().is_none());
        assert_eq!(file.load_or_default().unwrap(), Preferences::default());
    }
}
