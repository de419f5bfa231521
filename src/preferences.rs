//! Goal and theme preferences

use crate::error::TrackerError;
use crate::store::JsonFile;
use crate::types::{Preferences, Theme};
use std::path::PathBuf;
use std::sync::Mutex;
use tokio::sync::watch;

/// File name of the preferences document inside the data directory
pub const PREFERENCES_FILE: &str = "preferences.json";

/// Persisted preferences with a live read handle
pub struct PreferenceStore {
    file: JsonFile<Preferences>,
    tx: watch::Sender<Preferences>,
    write_lock: Mutex<()>,
}

impl PreferenceStore {
    pub fn open(path: impl Into<PathBuf>) -> Result<Self, TrackerError> {
        let file = JsonFile::at(path);
        let initial = file.load_or_default()?;
        let (tx, _) = watch::channel(initial);
        Ok(Self {
            file,
            tx,
            write_lock: Mutex::new(()),
        })
    }

    pub fn in_memory() -> Self {
        let (tx, _) = watch::channel(Preferences::default());
        Self {
            file: JsonFile::in_memory(),
            tx,
            write_lock: Mutex::new(()),
        }
    }

    pub fn current(&self) -> Preferences {
        self.tx.borrow().clone()
    }

    pub fn goal(&self) -> u64 {
        self.tx.borrow().goal
    }

    pub fn theme(&self) -> Theme {
        self.tx.borrow().theme
    }

    pub fn subscribe(&self) -> watch::Receiver<Preferences> {
        self.tx.subscribe()
    }

    /// Set the daily step goal; zero is rejected
    pub fn save_goal(&self, goal: u64) -> Result<(), TrackerError> {
        if goal == 0 {
            return Err(TrackerError::InvalidGoal(goal));
        }
        self.update(|prefs| prefs.goal = goal)
    }

    pub fn save_theme(&self, theme: Theme) -> Result<(), TrackerError> {
        self.update(|prefs| prefs.theme = theme)
    }

    /// Replace all preferences at once
    pub fn save(&self, prefs: Preferences) -> Result<(), TrackerError> {
        if prefs.goal == 0 {
            return Err(TrackerError::InvalidGoal(prefs.goal));
        }
        self.update(|current| *current = prefs)
    }

    fn update(&self, apply: impl FnOnce(&mut Preferences)) -> Result<(), TrackerError> {
        let _guard = self
            .write_lock
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner());
        let mut next = self.current();
        apply(&mut next);
        self.file.save(&next)?;
        self.tx.send_replace(next);
        Ok(())
    }
}
