//! Core types for Strider
//!
//! This module defines the data that flows from the step detector to the step
//! log: raw pulses, classified steps, and the user settings the classifier
//! reads (biometric profile and preferences).

use crate::error::ValidationError;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// Default daily step goal
pub const DEFAULT_STEP_GOAL: u64 = 10_000;

/// Walking cadence category
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum WalkSpeed {
    /// Not walking. Older logs spell this `STOPPED`.
    #[default]
    #[serde(alias = "STOPPED")]
    Still,
    Slow,
    Medium,
    Fast,
}

impl WalkSpeed {
    pub fn as_str(&self) -> &'static str {
        match self {
            WalkSpeed::Still => "STILL",
            WalkSpeed::Slow => "SLOW",
            WalkSpeed::Medium => "MEDIUM",
            WalkSpeed::Fast => "FAST",
        }
    }

    /// Whether this category describes a moving user
    pub fn is_moving(&self) -> bool {
        !matches!(self, WalkSpeed::Still)
    }
}

impl fmt::Display for WalkSpeed {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Gender used to select MET regression coefficients
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum Gender {
    Male,
    Female,
    Unspecified,
}

impl Gender {
    pub fn as_str(&self) -> &'static str {
        match self {
            Gender::Male => "MALE",
            Gender::Female => "FEMALE",
            Gender::Unspecified => "UNSPECIFIED",
        }
    }
}

impl FromStr for Gender {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "male" | "m" => Ok(Gender::Male),
            "female" | "f" => Ok(Gender::Female),
            "unspecified" | "other" | "u" => Ok(Gender::Unspecified),
            other => Err(format!("unknown gender: {}", other)),
        }
    }
}

/// Display theme preference
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum Theme {
    #[default]
    System,
    Light,
    Dark,
}

impl Theme {
    pub fn as_str(&self) -> &'static str {
        match self {
            Theme::System => "SYSTEM",
            Theme::Light => "LIGHT",
            Theme::Dark => "DARK",
        }
    }
}

impl FromStr for Theme {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "system" => Ok(Theme::System),
            "light" => Ok(Theme::Light),
            "dark" => Ok(Theme::Dark),
            other => Err(format!("unknown theme: {}", other)),
        }
    }
}

/// A single hardware-reported step detection
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Pulse {
    /// When the detector reported the step
    pub at: DateTime<Utc>,
}

impl Pulse {
    pub fn new(at: DateTime<Utc>) -> Self {
        Self { at }
    }

    pub fn now() -> Self {
        Self { at: Utc::now() }
    }
}

/// One classified step, written once to the step log and never mutated.
///
/// The instant is stored with millisecond precision and is the record key:
/// two steps in the same millisecond share a key and the later write wins.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Step {
    /// Detection time (UTC, epoch milliseconds on disk)
    #[serde(with = "chrono::serde::ts_milliseconds")]
    pub instant: DateTime<Utc>,
    /// Metabolic equivalent at this instant
    pub met: f64,
    /// User height snapshot (cm)
    pub height: f64,
    /// User weight snapshot (kg)
    pub weight: f64,
    /// Estimated walking speed (m/s)
    pub speed: f64,
    /// Cadence category at this instant
    pub walk_speed: WalkSpeed,
}

impl Step {
    /// Storage key: epoch milliseconds of the instant
    pub fn key(&self) -> i64 {
        self.instant.timestamp_millis()
    }
}

/// User biometrics used as classifier input
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct BiometricProfile {
    pub name: String,
    pub gender: Option<Gender>,
    /// Height (cm)
    pub height_cm: f64,
    /// Weight (kg)
    pub weight_kg: f64,
}

impl BiometricProfile {
    pub fn new(name: impl Into<String>, gender: Gender, height_cm: f64, weight_kg: f64) -> Self {
        Self {
            name: name.into(),
            gender: Some(gender),
            height_cm,
            weight_kg,
        }
    }

    /// Check the profile is complete enough to leave onboarding
    pub fn validate(&self) -> Result<(), ValidationError> {
        if self.name.trim().is_empty() {
            return Err(ValidationError::BlankName);
        }
        if self.gender.is_none() {
            return Err(ValidationError::MissingGender);
        }
        // Infinite values would serialize as null and fail to load back
        if !self.height_cm.is_finite() {
            return Err(ValidationError::NonFiniteHeight);
        }
        if !self.weight_kg.is_finite() {
            return Err(ValidationError::NonFiniteWeight);
        }
        if self.height_cm <= 0.0 {
            return Err(ValidationError::NonPositiveHeight);
        }
        if self.weight_kg <= 0.0 {
            return Err(ValidationError::NonPositiveWeight);
        }
        Ok(())
    }

    pub fn is_complete(&self) -> bool {
        self.validate().is_ok()
    }
}

/// Display and goal preferences
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Preferences {
    /// Daily step goal
    pub goal: u64,
    pub theme: Theme,
}

impl Default for Preferences {
    fn default() -> Self {
        Self {
            goal: DEFAULT_STEP_GOAL,
            theme: Theme::System,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    #[test]
    fn test_walk_speed_accepts_stopped_alias() {
        let speed: WalkSpeed = serde_json::from_str("\"STOPPED\"").unwrap();
        assert_eq!(speed, WalkSpeed::Still);

        let json = serde_json::to_string(&WalkSpeed::Still).unwrap();
        assert_eq!(json, "\"STILL\"");
    }

    #[test]
    fn test_step_instant_serialized_as_millis() {
        let step = Step {
            instant: Utc.timestamp_millis_opt(1_705_312_800_123).unwrap(),
            met: 3.1,
            height: 170.0,
            weight: 65.0,
            speed: 1.2,
            walk_speed: WalkSpeed::Medium,
        };

        let value: serde_json::Value = serde_json::to_value(&step).unwrap();
        assert_eq!(value["instant"], 1_705_312_800_123_i64);
        assert_eq!(value["walk_speed"], "MEDIUM");
        assert_eq!(step.key(), 1_705_312_800_123);
    }

    #[test]
    fn test_profile_validation() {
        let valid = BiometricProfile::new("Ada", Gender::Female, 165.0, 58.0);
        assert!(valid.is_complete());

        let blank = BiometricProfile {
            name: "   ".to_string(),
            ..valid.clone()
        };
        assert_eq!(blank.validate(), Err(ValidationError::BlankName));

        let no_gender = BiometricProfile {
            gender: None,
            ..valid.clone()
        };
        assert_eq!(no_gender.validate(), Err(ValidationError::MissingGender));

        let zero_height = BiometricProfile {
            height_cm: 0.0,
            ..valid.clone()
        };
        assert_eq!(zero_height.validate(), Err(ValidationError::NonPositiveHeight));

        let negative_weight = BiometricProfile {
            weight_kg: -1.0,
            ..valid
        };
        assert_eq!(negative_weight.validate(), Err(ValidationError::NonPositiveWeight));
    }

    #[test]
    fn test_profile_rejects_non_finite_measurements() {
        let valid = BiometricProfile::new("Ada", Gender::Female, 165.0, 58.0);

        for height in [f64::INFINITY, f64::NEG_INFINITY, f64::NAN] {
            let profile = BiometricProfile {
                height_cm: height,
                ..valid.clone()
            };
            assert_eq!(profile.validate(), Err(ValidationError::NonFiniteHeight));
        }
        for weight in [f64::INFINITY, f64::NAN] {
            let profile = BiometricProfile {
                weight_kg: weight,
                ..valid.clone()
            };
            assert_eq!(profile.validate(), Err(ValidationError::NonFiniteWeight));
        }
    }

    #[test]
    fn test_default_profile_is_incomplete() {
        assert!(!BiometricProfile::default().is_complete());
    }

    #[test]
    fn test_parse_gender_and_theme() {
        assert_eq!("Female".parse::<Gender>().unwrap(), Gender::Female);
        assert_eq!("m".parse::<Gender>().unwrap(), Gender::Male);
        assert!("robot".parse::<Gender>().is_err());
        assert_eq!("DARK".parse::<Theme>().unwrap(), Theme::Dark);
        assert_eq!(Preferences::default().goal, 10_000);
        assert_eq!(Preferences::default().theme, Theme::System);
    }
}
