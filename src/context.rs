//! Tracker context
//!
//! One long-lived object owns the step log and the settings stores. It is
//! built once at process start and handed to whatever needs it: the
//! classifier, the foreground service, the CLI and the FFI handle.

use crate::biometrics::{BiometricStore, BIOMETRICS_FILE};
use crate::classifier::StepClassifier;
use crate::config::TrackerConfig;
use crate::error::TrackerError;
use crate::log_store::{StepLog, STEP_LOG_FILE};
use crate::preferences::{PreferenceStore, PREFERENCES_FILE};
use crate::sensor::StepDetector;
use crate::service::StepService;
use crate::summary::{DaySummary, WeekSummary};
use chrono::{NaiveDate, TimeZone};
use std::sync::Arc;

/// Shared stores plus the configuration they were opened with
#[derive(Clone)]
pub struct TrackerContext {
    config: TrackerConfig,
    steps: Arc<StepLog>,
    biometrics: Arc<BiometricStore>,
    preferences: Arc<PreferenceStore>,
}

impl TrackerContext {
    /// Open all stores inside `config.data_dir`
    pub fn open(config: TrackerConfig) -> Result<Self, TrackerError> {
        config.validate()?;
        let dir = &config.data_dir;
        let steps = StepLog::open(dir.join(STEP_LOG_FILE))?;
        let biometrics = BiometricStore::open(dir.join(BIOMETRICS_FILE))?;
        let preferences = PreferenceStore::open(dir.join(PREFERENCES_FILE))?;
        log::debug!("opened tracker data in {}", dir.display());

        Ok(Self {
            config,
            steps: Arc::new(steps),
            biometrics: Arc::new(biometrics),
            preferences: Arc::new(preferences),
        })
    }

    /// Context whose stores never touch disk
    pub fn in_memory(config: TrackerConfig) -> Self {
        Self {
            config,
            steps: Arc::new(StepLog::in_memory()),
            biometrics: Arc::new(BiometricStore::in_memory()),
            preferences: Arc::new(PreferenceStore::in_memory()),
        }
    }

    pub fn config(&self) -> &TrackerConfig {
        &self.config
    }

    pub fn steps(&self) -> &Arc<StepLog> {
        &self.steps
    }

    pub fn biometrics(&self) -> &Arc<BiometricStore> {
        &self.biometrics
    }

    pub fn preferences(&self) -> &Arc<PreferenceStore> {
        &self.preferences
    }

    /// A classifier writing to this context's log
    pub fn classifier(&self) -> StepClassifier {
        StepClassifier::new(
            self.steps.clone(),
            self.biometrics.subscribe(),
            &self.config,
        )
    }

    /// A stopped service around `detector`
    pub fn service(&self, detector: Box<dyn StepDetector>) -> StepService {
        StepService::new(
            self.config.clone(),
            self.steps.clone(),
            self.biometrics.subscribe(),
            detector,
        )
    }

    /// Progress for `date` against the saved goal
    pub fn day_summary<Tz: TimeZone>(
        &self,
        date: NaiveDate,
        tz: &Tz,
    ) -> Result<DaySummary, TrackerError> {
        DaySummary::for_day(
            &self.steps,
            date,
            tz,
            self.preferences.goal(),
            self.config.stride_coefficient,
        )
    }

    /// Seven days ending at `end` against the saved goal
    pub fn week_summary<Tz: TimeZone>(
        &self,
        end: NaiveDate,
        tz: &Tz,
    ) -> Result<WeekSummary, TrackerError> {
        WeekSummary::ending(
            &self.steps,
            end,
            tz,
            self.preferences.goal(),
            self.config.stride_coefficient,
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::{BiometricProfile, Gender};
    use chrono::{Duration, Utc};

    #[tokio::test]
    async fn test_open_persists_across_contexts() {
        let dir = tempfile::tempdir().unwrap();
        let config = TrackerConfig::with_data_dir(dir.path());

        let ctx = TrackerContext::open(config.clone()).unwrap();
        ctx.biometrics()
            .save(BiometricProfile::new("Lee", Gender::Male, 175.0, 72.0))
            .unwrap();
        ctx.preferences().save_goal(3).unwrap();

        let now = Utc::now();
        let mut classifier = ctx.classifier();
        for i in 0..3 {
            classifier
                .on_pulse_at(now + Duration::milliseconds(i * 500))
                .await;
        }
        classifier.shutdown();
        drop(ctx);

        let ctx = TrackerContext::open(config).unwrap();
        assert_eq!(ctx.steps().len(), 3);
        assert!(ctx.biometrics().has_profile());
        assert_eq!(ctx.preferences().goal(), 3);

        let latest = ctx.steps().latest().unwrap();
        assert_eq!(latest.height, 175.0);
    }

    #[tokio::test]
    async fn test_day_summary_uses_saved_goal() {
        let ctx = TrackerContext::in_memory(TrackerConfig::default());
        ctx.biometrics()
            .save(BiometricProfile::new("Lee", Gender::Male, 175.0, 72.0))
            .unwrap();
        ctx.preferences().save_goal(2).unwrap();

        let date = chrono::NaiveDate::from_ymd_opt(2024, 3, 1).unwrap();
        let noon = Utc.with_ymd_and_hms(2024, 3, 1, 12, 0, 0).unwrap();
        let mut classifier = ctx.classifier();
        classifier.on_pulse_at(noon).await;
        classifier.on_pulse_at(noon + Duration::milliseconds(400)).await;

        let summary = ctx.day_summary(date, &Utc).unwrap();
        assert_eq!(summary.steps, 2);
        assert_eq!(summary.goal, 2);
        assert!(summary.goal_reached);
        assert!(summary.calories > 0.0);

        let week = ctx.week_summary(date, &Utc).unwrap();
        assert_eq!(week.total_steps, 2);
    }

    #[test]
    fn test_open_rejects_invalid_config() {
        let dir = tempfile::tempdir().unwrap();
        let config = TrackerConfig {
            cooldown_ms: 0,
            ..TrackerConfig::with_data_dir(dir.path())
        };
        assert!(matches!(
            TrackerContext::open(config),
            Err(TrackerError::Config(_))
        ));
    }
}
