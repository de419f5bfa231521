//! Gait model
//!
//! Pure functions that turn a trailing pulse count into cadence, a walk speed
//! category, a MET estimate and an instantaneous walking speed.
//!
//! References:
//! - Cadence bands: Maine DOT "How to Walk with Proper Form and Technique for
//!   Fitness" (2019), moderate walking 135 steps/min, brisk 160 steps/min.
//! - MET regression: Tudor-Locke et al. (2011), "Determination of step rate
//!   thresholds corresponding to physical activity classifications in adults".
//! - Step length: roughly 0.414 x body height.

use crate::types::{Gender, WalkSpeed};
use serde::{Deserialize, Serialize};

/// Trailing window used to count pulses (seconds)
pub const DEFAULT_WINDOW_SECS: u64 = 5;

/// Silence after which the user is reported as still (milliseconds)
pub const DEFAULT_COOLDOWN_MS: u64 = 2_000;

/// Cadence at or above which walking is MEDIUM (steps/min)
pub const MEDIUM_CADENCE_THRESHOLD: f64 = 135.0;

/// Cadence at or above which walking is FAST (steps/min)
pub const FAST_CADENCE_THRESHOLD: f64 = 160.0;

/// Step length as a fraction of body height
pub const DEFAULT_STRIDE_COEFFICIENT: f64 = 0.414;

/// MET reported while the user is still
pub const IDLE_MET: f64 = 0.0;

/// Power-law MET regression coefficients: `MET = a * cadence^b`
pub mod met_regression {
    /// Male and unspecified: scale factor
    pub const MALE_A: f64 = 0.000_080_48;
    /// Male and unspecified: exponent
    pub const MALE_B: f64 = 2.2884;
    /// Female: scale factor
    pub const FEMALE_A: f64 = 0.000_043_25;
    /// Female: exponent
    pub const FEMALE_B: f64 = 2.4528;
}

/// Extrapolate steps per minute from the number of pulses in the window
pub fn cadence(pulses: usize, window_secs: f64) -> f64 {
    if window_secs <= 0.0 {
        return 0.0;
    }
    pulses as f64 * 60.0 / window_secs
}

/// Classify a cadence into a walk speed category
pub fn classify(cadence: f64) -> WalkSpeed {
    if cadence < MEDIUM_CADENCE_THRESHOLD {
        WalkSpeed::Slow
    } else if cadence < FAST_CADENCE_THRESHOLD {
        WalkSpeed::Medium
    } else {
        WalkSpeed::Fast
    }
}

/// Estimate MET from cadence; an unset gender uses the male/unspecified branch
pub fn met(cadence: f64, gender: Option<Gender>) -> f64 {
    if cadence <= 0.0 {
        return IDLE_MET;
    }
    let (a, b) = match gender {
        Some(Gender::Female) => (met_regression::FEMALE_A, met_regression::FEMALE_B),
        Some(Gender::Male) | Some(Gender::Unspecified) | None => {
            (met_regression::MALE_A, met_regression::MALE_B)
        }
    };
    a * cadence.powf(b)
}

/// Stride-based speed and distance model
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct GaitModel {
    /// Step length as a fraction of body height
    pub stride_coefficient: f64,
}

impl Default for GaitModel {
    fn default() -> Self {
        Self::new(DEFAULT_STRIDE_COEFFICIENT)
    }
}

impl GaitModel {
    pub fn new(stride_coefficient: f64) -> Self {
        Self { stride_coefficient }
    }

    /// Step length in metres for a height in centimetres
    pub fn stride_length_m(&self, height_cm: f64) -> f64 {
        height_cm * self.stride_coefficient / 100.0
    }

    /// Instantaneous speed in m/s: `height * k * cadence / (100 * 60)`
    pub fn speed(&self, height_cm: f64, cadence: f64) -> f64 {
        height_cm * self.stride_coefficient * cadence / (100.0 * 60.0)
    }
}
