//! Step event classifier
//!
//! Turns each detector pulse into a [`Step`]:
//!
//! 1. Prune the sliding window and record the pulse
//! 2. Extrapolate cadence from the pulse count
//! 3. Classify cadence into a walk speed category
//! 4. Estimate MET (gender-specific regression) and speed (stride model)
//! 5. Publish walk speed and MET to subscribers
//! 6. Persist the step (best effort)
//! 7. Restart the cool-down timer that reports STILL after silence
//!
//! The classifier is owned by a single task; it is not shared between threads.

use crate::config::TrackerConfig;
use crate::gait::{self, GaitModel, IDLE_MET};
use crate::log_store::StepSink;
use crate::types::{BiometricProfile, Step, WalkSpeed};
use crate::window::SlidingWindow;
use chrono::{DateTime, Utc};
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;
use tokio::sync::watch;
use tokio::task::JoinHandle;

/// Result of classifying one pulse
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Classification {
    /// Pulses inside the window, including this one
    pub pulses: usize,
    /// Steps per minute
    pub cadence: f64,
    pub walk_speed: WalkSpeed,
    pub met: f64,
    /// Metres per second
    pub speed: f64,
}

/// Live classifier output, cached for late subscribers
#[derive(Clone)]
struct LiveChannels {
    walk_speed: Arc<watch::Sender<WalkSpeed>>,
    met: Arc<watch::Sender<f64>>,
}

impl LiveChannels {
    fn new() -> Self {
        let (walk_speed, _) = watch::channel(WalkSpeed::Still);
        let (met, _) = watch::channel(IDLE_MET);
        Self {
            walk_speed: Arc::new(walk_speed),
            met: Arc::new(met),
        }
    }

    // send_replace notifies even when the value is unchanged
    fn publish(&self, walk_speed: WalkSpeed, met: f64) {
        self.walk_speed.send_replace(walk_speed);
        self.met.send_replace(met);
    }
}

/// Stateful pulse handler
pub struct StepClassifier {
    window: SlidingWindow,
    gait: GaitModel,
    cooldown: Duration,
    biometrics: watch::Receiver<BiometricProfile>,
    sink: Arc<dyn StepSink>,
    live: LiveChannels,
    cooldown_task: Option<JoinHandle<()>>,
    /// Bumped by every pulse; held while publishing so the cool-down
    /// cannot interleave with a pulse
    generation: Arc<Mutex<u64>>,
}

impl StepClassifier {
    /// Create a classifier that reads biometrics from `biometrics` and
    /// writes steps to `sink`
    pub fn new(
        sink: Arc<dyn StepSink>,
        biometrics: watch::Receiver<BiometricProfile>,
        config: &TrackerConfig,
    ) -> Self {
        Self {
            window: SlidingWindow::new(config.window()),
            gait: GaitModel::new(config.stride_coefficient),
            cooldown: config.cooldown(),
            biometrics,
            sink,
            live: LiveChannels::new(),
            cooldown_task: None,
            generation: Arc::new(Mutex::new(0)),
        }
    }

    /// Observe the walk speed category (starts at STILL)
    pub fn walk_speed(&self) -> watch::Receiver<WalkSpeed> {
        self.live.walk_speed.subscribe()
    }

    /// Observe the MET estimate (starts at 0.0)
    pub fn met(&self) -> watch::Receiver<f64> {
        self.live.met.subscribe()
    }

    pub fn current_walk_speed(&self) -> WalkSpeed {
        *self.live.walk_speed.borrow()
    }

    pub fn current_met(&self) -> f64 {
        *self.live.met.borrow()
    }

    pub fn gait_model(&self) -> GaitModel {
        self.gait
    }

    /// Handle a pulse detected now
    pub async fn on_pulse(&mut self) -> Step {
        self.on_pulse_at(Utc::now()).await
    }

    /// Handle a pulse detected at `now`.
    ///
    /// Live state is published before persistence; a failed insert is logged
    /// and the step is still returned.
    pub async fn on_pulse_at(&mut self, now: DateTime<Utc>) -> Step {
        let profile = self.biometrics.borrow().clone();
        let classification = self.classify_at(now, &profile);

        log::debug!(
            "pulse at {}: pulses={} cadence={:.1} walk_speed={} met={:.3} speed={:.3}",
            now,
            classification.pulses,
            classification.cadence,
            classification.walk_speed,
            classification.met,
            classification.speed
        );

        self.restart_cooldown(classification.walk_speed, classification.met);

        let step = Step {
            instant: now,
            met: classification.met,
            height: profile.height_cm,
            weight: profile.weight_kg,
            speed: classification.speed,
            walk_speed: classification.walk_speed,
        };

        let sink = Arc::clone(&self.sink);
        let record = step.clone();
        match tokio::task::spawn_blocking(move || sink.insert(record)).await {
            Ok(Ok(())) => {}
            Ok(Err(e)) => log::warn!("failed to persist step at {}: {}", now, e),
            Err(e) => log::warn!("step persistence task failed at {}: {}", now, e),
        }

        step
    }

    /// Update the window and compute cadence, category, MET and speed
    pub fn classify_at(&mut self, now: DateTime<Utc>, profile: &BiometricProfile) -> Classification {
        let pulses = self.window.record(now);
        let cadence = gait::cadence(pulses, self.window.span_secs());
        Classification {
            pulses,
            cadence,
            walk_speed: gait::classify(cadence),
            met: gait::met(cadence, profile.gender),
            speed: self.gait.speed(profile.height_cm, cadence),
        }
    }

    /// Publish the pulse's live state, cancel any pending cool-down and
    /// schedule a fresh one
    fn restart_cooldown(&mut self, walk_speed: WalkSpeed, met: f64) {
        if let Some(task) = self.cooldown_task.take() {
            task.abort();
        }

        let generation = {
            let mut current = lock_generation(&self.generation);
            *current += 1;
            self.live.publish(walk_speed, met);
            *current
        };
        let latest = Arc::clone(&self.generation);
        let live = self.live.clone();
        let delay = self.cooldown;

        self.cooldown_task = Some(tokio::spawn(async move {
            tokio::time::sleep(delay).await;
            // A newer pulse may have raced the abort
            let current = lock_generation(&latest);
            if *current == generation {
                log::debug!("no pulse for {:?}, reporting STILL", delay);
                live.publish(WalkSpeed::Still, IDLE_MET);
            }
        }));
    }

    /// Drop any pending cool-down without publishing
    pub fn shutdown(&mut self) {
        *lock_generation(&self.generation) += 1;
        if let Some(task) = self.cooldown_task.take() {
            task.abort();
        }
        self.window.clear();
    }
}

fn lock_generation(generation: &Mutex<u64>) -> MutexGuard<'_, u64> {
    match generation.lock() {
        Ok(guard) => guard,
        // A plain counter is never left half-updated
        Err(poisoned) => poisoned.into_inner(),
    }
}

impl Drop for StepClassifier {
    fn drop(&mut self) {
        if let Some(task) = self.cooldown_task.take() {
            task.abort();
        }
    }
}
