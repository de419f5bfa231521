//! Step detector sources
//!
//! A detector turns hardware step detections into a stream of [`Pulse`]s.
//! The service opens it on START and closes it on STOP.

use crate::error::TrackerError;
use crate::types::Pulse;
use chrono::{Duration as ChronoDuration, Utc};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;

/// Source of step pulses
pub trait StepDetector: Send {
    fn name(&self) -> &str;

    /// Start listening; pulses arrive on the returned receiver until
    /// [`close`](Self::close) is called or the source ends.
    ///
    /// Hardware without a step detector returns
    /// [`TrackerError::SensorUnavailable`].
    fn open(&mut self, buffer: usize) -> Result<mpsc::Receiver<Pulse>, TrackerError>;

    fn close(&mut self);
}

type SharedSender = Arc<Mutex<Option<mpsc::Sender<Pulse>>>>;

/// Detector fed by the host (FFI, stdin, tests) through a [`PulseSender`]
pub struct ChannelDetector {
    slot: SharedSender,
}

/// Host-side handle of a [`ChannelDetector`]
#[derive(Clone)]
pub struct PulseSender {
    slot: SharedSender,
}

impl ChannelDetector {
    pub fn new() -> (Self, PulseSender) {
        let slot: SharedSender = Arc::new(Mutex::new(None));
        (
            Self {
                slot: Arc::clone(&slot),
            },
            PulseSender { slot },
        )
    }
}

impl StepDetector for ChannelDetector {
    fn name(&self) -> &str {
        "channel"
    }

    fn open(&mut self, buffer: usize) -> Result<mpsc::Receiver<Pulse>, TrackerError> {
        let (tx, rx) = mpsc::channel(buffer);
        *lock(&self.slot) = Some(tx);
        Ok(rx)
    }

    fn close(&mut self) {
        lock(&self.slot).take();
    }
}

/// Why a [`PulseSender`] dropped a pulse
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PulseRejected {
    /// The detector is closed
    NotListening,
    /// The classifier is behind and the queue has no room
    QueueFull,
}

impl From<PulseRejected> for TrackerError {
    fn from(rejected: PulseRejected) -> Self {
        match rejected {
            PulseRejected::NotListening => TrackerError::ServiceNotRunning,
            PulseRejected::QueueFull => TrackerError::Storage("pulse queue full".to_string()),
        }
    }
}

impl PulseSender {
    /// Deliver a pulse without blocking; a rejected pulse is dropped
    pub fn try_send(&self, pulse: Pulse) -> Result<(), PulseRejected> {
        match lock(&self.slot).as_ref() {
            Some(tx) => match tx.try_send(pulse) {
                Ok(()) => Ok(()),
                Err(mpsc::error::TrySendError::Full(_)) => {
                    log::warn!("pulse queue full, dropping pulse at {}", pulse.at);
                    Err(PulseRejected::QueueFull)
                }
                Err(mpsc::error::TrySendError::Closed(_)) => Err(PulseRejected::NotListening),
            },
            None => Err(PulseRejected::NotListening),
        }
    }

    /// Like [`try_send`](Self::try_send), reporting only whether the pulse
    /// was queued
    pub fn send(&self, pulse: Pulse) -> bool {
        self.try_send(pulse).is_ok()
    }

    pub fn is_listening(&self) -> bool {
        lock(&self.slot)
            .as_ref()
            .map(|tx| !tx.is_closed())
            .unwrap_or(false)
    }
}

fn lock(slot: &SharedSender) -> std::sync::MutexGuard<'_, Option<mpsc::Sender<Pulse>>> {
    slot.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}

/// Generates pulses at a fixed cadence.
///
/// Pulse timestamps advance by exactly one period from the moment the
/// detector is opened, so the classified cadence does not depend on
/// scheduler jitter.
pub struct SimulatedDetector {
    period: Duration,
    count: Option<u64>,
    task: Option<JoinHandle<()>>,
}

impl SimulatedDetector {
    /// `cadence_spm` steps per minute; `count` pulses, or forever when None
    pub fn new(cadence_spm: f64, count: Option<u64>) -> Result<Self, TrackerError> {
        if !(cadence_spm > 0.0) || !cadence_spm.is_finite() {
            return Err(TrackerError::Config(format!(
                "simulated cadence must be positive, got {}",
                cadence_spm
            )));
        }
        Ok(Self {
            period: Duration::from_secs_f64(60.0 / cadence_spm),
            count,
            task: None,
        })
    }

    pub fn period(&self) -> Duration {
        self.period
    }
}

impl StepDetector for SimulatedDetector {
    fn name(&self) -> &str {
        "simulated"
    }

    fn open(&mut self, buffer: usize) -> Result<mpsc::Receiver<Pulse>, TrackerError> {
        self.close();

        let (tx, rx) = mpsc::channel(buffer);
        let period = self.period;
        let count = self.count;
        let step = ChronoDuration::from_std(period)
            .map_err(|e| TrackerError::Config(format!("simulated period: {}", e)))?;

        self.task = Some(tokio::spawn(async move {
            let start = Utc::now();
            let mut ticker = tokio::time::interval(period);
            let mut at = start;
            let mut sent: u64 = 0;
            loop {
                if count.map_or(false, |limit| sent >= limit) {
                    break;
                }
                ticker.tick().await;
                if tx.send(Pulse::new(at)).await.is_err() {
                    break;
                }
                at += step;
                sent += 1;
            }
        }));
        Ok(rx)
    }

    fn close(&mut self) {
        if let Some(task) = self.task.take() {
            task.abort();
        }
    }
}

impl Drop for SimulatedDetector {
    fn drop(&mut self) {
        self.close();
    }
}

/// Hardware without a step detector
pub struct NoDetector;

impl StepDetector for NoDetector {
    fn name(&self) -> &str {
        "none"
    }

    fn open(&mut self, _buffer: usize) -> Result<mpsc::Receiver<Pulse>, TrackerError> {
        Err(TrackerError::SensorUnavailable(
            "device has no step detector sensor".to_string(),
        ))
    }

    fn close(&mut self) {}
}
