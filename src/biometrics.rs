//! Biometric profile store
//!
//! Holds the user's name, gender, height and weight. Readers get a
//! [`watch::Receiver`] that always carries the latest saved profile, so the
//! classifier picks up a new height or weight on its next pulse.

use crate::error::TrackerError;
use crate::store::JsonFile;
use crate::types::BiometricProfile;
use std::path::PathBuf;
use std::sync::Mutex;
use tokio::sync::watch;

/// File name of the biometric document inside the data directory
pub const BIOMETRICS_FILE: &str = "biometrics.json";

/// Persisted biometric profile with a live read handle
pub struct BiometricStore {
    file: JsonFile<BiometricProfile>,
    tx: watch::Sender<BiometricProfile>,
    // Serialises save so disk and channel never disagree
    write_lock: Mutex<()>,
}

impl BiometricStore {
    /// Open the store backed by `path`, loading any saved profile
    pub fn open(path: impl Into<PathBuf>) -> Result<Self, TrackerError> {
        Self::from_file(JsonFile::at(path))
    }

    /// Store that never touches disk
    pub fn in_memory() -> Self {
        let (tx, _) = watch::channel(BiometricProfile::default());
        Self {
            file: JsonFile::in_memory(),
            tx,
            write_lock: Mutex::new(()),
        }
    }

    fn from_file(file: JsonFile<BiometricProfile>) -> Result<Self, TrackerError> {
        let initial = file.load_or_default()?;
        let (tx, _) = watch::channel(initial);
        Ok(Self {
            file,
            tx,
            write_lock: Mutex::new(()),
        })
    }

    /// Current profile snapshot
    pub fn current(&self) -> BiometricProfile {
        self.tx.borrow().clone()
    }

    /// Observe the profile; the receiver starts at the current value
    pub fn subscribe(&self) -> watch::Receiver<BiometricProfile> {
        self.tx.subscribe()
    }

    /// Whether onboarding can be skipped
    pub fn has_profile(&self) -> bool {
        self.tx.borrow().is_complete()
    }

    /// Validate, persist and republish the whole profile.
    ///
    /// An incomplete profile returns [`TrackerError::InvalidProfile`] and
    /// leaves both the file and subscribers untouched.
    pub fn save(&self, profile: BiometricProfile) -> Result<(), TrackerError> {
        profile.validate()?;

        let _guard = self
            .write_lock
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner());
        self.file.save(&profile)?;
        log::info!(
            "saved biometric profile (height={}cm, weight={}kg)",
            profile.height_cm,
            profile.weight_kg
        );
        self.tx.send_replace(profile);
        Ok(())
    }
}
