//! Strider - On-device step tracking engine
//!
//! Strider turns step detector pulses into classified, persisted steps:
//! pulse → sliding-window cadence → walk speed category, MET and speed
//! → step log → day and week summaries.
//!
//! ## Modules
//!
//! - **Classification**: [`classifier`], [`gait`], [`window`]
//! - **Storage**: [`log_store`], [`biometrics`], [`preferences`]
//! - **Runtime**: [`service`], [`sensor`], [`context`]

pub mod biometrics;
pub mod classifier;
pub mod config;
pub mod context;
pub mod error;
pub mod gait;
pub mod log_store;
pub mod preferences;
pub mod sensor;
pub mod service;
pub mod store;
pub mod summary;
pub mod types;
pub mod window;

// FFI bindings for C interop (always available for cdylib/staticlib builds)
pub mod ffi;

pub use classifier::{Classification, StepClassifier};
pub use config::TrackerConfig;
pub use context::TrackerContext;
pub use error::{TrackerError, ValidationError};
pub use log_store::{RangeWatch, StepLog, StepSink};
pub use service::{ServiceCommand, ServiceEvent, ServiceStatus, StepService};
pub use summary::{DaySummary, WeekSummary};
pub use types::{BiometricProfile, Gender, Preferences, Pulse, Step, Theme, WalkSpeed};

/// Library version
pub const STRIDER_VERSION: &str = env!("CARGO_PKG_VERSION");

/// Name reported by `doctor` and the FFI
pub const PRODUCER_NAME: &str = "strider";
