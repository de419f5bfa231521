//! Foreground step tracking service
//!
//! Two commands govern the detector: START opens it, shows the foreground
//! indicator and spawns the pulse pump; STOP tears all of it down. While
//! running, live walk speed and MET values are broadcast as
//! [`ServiceEvent`]s to any listener.
//!
//! The pump task is the only owner of the [`StepClassifier`], so pulses are
//! classified one at a time in arrival order.

use crate::classifier::StepClassifier;
use crate::config::TrackerConfig;
use crate::error::TrackerError;
use crate::log_store::StepSink;
use crate::sensor::StepDetector;
use crate::types::{BiometricProfile, Pulse, Step, WalkSpeed};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tokio::sync::{broadcast, mpsc, watch};
use tokio::task::JoinHandle;
use uuid::Uuid;

/// Capacity of the live event broadcast
pub const EVENT_CAPACITY: usize = 256;

/// External lifecycle command
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ServiceCommand {
    Start,
    Stop,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "state", rename_all = "snake_case")]
pub enum ServiceStatus {
    Stopped,
    Running {
        session: Uuid,
        started_at: DateTime<Utc>,
    },
}

impl ServiceStatus {
    pub fn is_running(&self) -> bool {
        matches!(self, ServiceStatus::Running { .. })
    }

    pub fn session(&self) -> Option<Uuid> {
        match self {
            ServiceStatus::Running { session, .. } => Some(*session),
            ServiceStatus::Stopped => None,
        }
    }
}

/// Fire-and-forget notification for the presentation layer
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "event", content = "value", rename_all = "snake_case")]
pub enum ServiceEvent {
    Started(Uuid),
    Stopped(Uuid),
    SensorUnavailable(String),
    WalkSpeed(WalkSpeed),
    Met(f64),
    Step(Step),
}

/// Persistent visible indicator shown while the listener is active
pub trait ForegroundIndicator: Send + Sync {
    fn show(&self, session: Uuid);
    fn dismiss(&self);
    /// Tell the user why tracking cannot run
    fn report_error(&self, message: &str);
}

/// Indicator that only writes to the log
#[derive(Debug, Default, Clone, Copy)]
pub struct LogIndicator;

impl ForegroundIndicator for LogIndicator {
    fn show(&self, session: Uuid) {
        log::info!("step tracking active (session {})", session);
    }

    fn dismiss(&self) {
        log::info!("step tracking stopped");
    }

    fn report_error(&self, message: &str) {
        log::error!("step tracking unavailable: {}", message);
    }
}

struct ActiveRun {
    session: Uuid,
    shutdown_tx: broadcast::Sender<()>,
    pump: JoinHandle<()>,
    forwarder: JoinHandle<()>,
    walk_speed: watch::Receiver<WalkSpeed>,
    met: watch::Receiver<f64>,
}

/// START/STOP lifecycle around a detector and a classifier
pub struct StepService {
    config: TrackerConfig,
    sink: Arc<dyn StepSink>,
    biometrics: watch::Receiver<BiometricProfile>,
    detector: Box<dyn StepDetector>,
    indicator: Box<dyn ForegroundIndicator>,
    events: broadcast::Sender<ServiceEvent>,
    status: watch::Sender<ServiceStatus>,
    run: Option<ActiveRun>,
}

impl StepService {
    pub fn new(
        config: TrackerConfig,
        sink: Arc<dyn StepSink>,
        biometrics: watch::Receiver<BiometricProfile>,
        detector: Box<dyn StepDetector>,
    ) -> Self {
        let (events, _) = broadcast::channel(EVENT_CAPACITY);
        let (status, _) = watch::channel(ServiceStatus::Stopped);
        Self {
            config,
            sink,
            biometrics,
            detector,
            indicator: Box::new(LogIndicator),
            events,
            status,
            run: None,
        }
    }

    pub fn with_indicator(mut self, indicator: Box<dyn ForegroundIndicator>) -> Self {
        self.indicator = indicator;
        self
    }

    pub fn status(&self) -> ServiceStatus {
        *self.status.borrow()
    }

    pub fn subscribe_status(&self) -> watch::Receiver<ServiceStatus> {
        self.status.subscribe()
    }

    /// Live events; only events sent after subscribing are received
    pub fn events(&self) -> broadcast::Receiver<ServiceEvent> {
        self.events.subscribe()
    }

    pub fn is_running(&self) -> bool {
        self.run.is_some()
    }

    /// Current walk speed (STILL when not running)
    pub fn walk_speed(&self) -> WalkSpeed {
        self.run
            .as_ref()
            .map(|run| *run.walk_speed.borrow())
            .unwrap_or_default()
    }

    /// Current MET (0.0 when not running)
    pub fn met(&self) -> f64 {
        self.run
            .as_ref()
            .map(|run| *run.met.borrow())
            .unwrap_or(crate::gait::IDLE_MET)
    }

    pub async fn handle(&mut self, command: ServiceCommand) -> Result<ServiceStatus, TrackerError> {
        match command {
            ServiceCommand::Start => self.start().await,
            ServiceCommand::Stop => self.stop().await,
        }
    }

    /// Open the detector and begin classifying pulses.
    ///
    /// Starting a running service returns its current status unchanged.
    pub async fn start(&mut self) -> Result<ServiceStatus, TrackerError> {
        if self.run.is_some() {
            log::debug!("START ignored, already running");
            return Ok(self.status());
        }

        let pulses = match self.detector.open(self.config.pulse_buffer) {
            Ok(rx) => rx,
            Err(e) => {
                let message = e.to_string();
                self.indicator.report_error(&message);
                let _ = self.events.send(ServiceEvent::SensorUnavailable(message));
                // Not retried: the session ends after the grace delay
                tokio::time::sleep(self.config.sensor_grace()).await;
                self.status.send_replace(ServiceStatus::Stopped);
                return Err(e);
            }
        };

        let session = Uuid::new_v4();
        let started_at = Utc::now();
        let classifier = StepClassifier::new(
            Arc::clone(&self.sink),
            self.biometrics.clone(),
            &self.config,
        );
        let walk_speed = classifier.walk_speed();
        let met = classifier.met();

        let (shutdown_tx, _) = broadcast::channel(1);
        let pump = tokio::spawn(pump_pulses(
            classifier,
            pulses,
            self.events.clone(),
            shutdown_tx.subscribe(),
        ));
        let forwarder = tokio::spawn(forward_live_state(
            walk_speed.clone(),
            met.clone(),
            self.events.clone(),
            shutdown_tx.subscribe(),
        ));

        self.indicator.show(session);
        self.run = Some(ActiveRun {
            session,
            shutdown_tx,
            pump,
            forwarder,
            walk_speed,
            met,
        });

        let status = ServiceStatus::Running {
            session,
            started_at,
        };
        self.status.send_replace(status);
        let _ = self.events.send(ServiceEvent::Started(session));
        log::info!(
            "service started (session {}, detector {})",
            session,
            self.detector.name()
        );
        Ok(status)
    }

    /// Stop listening. Stopping a stopped service is a no-op.
    pub async fn stop(&mut self) -> Result<ServiceStatus, TrackerError> {
        let Some(run) = self.run.take() else {
            log::debug!("STOP ignored, not running");
            return Ok(self.status());
        };

        let _ = run.shutdown_tx.send(());
        self.detector.close();

        let pumped = run.pump.await;
        let forwarded = run.forwarder.await;

        self.indicator.dismiss();
        self.status.send_replace(ServiceStatus::Stopped);
        let _ = self.events.send(ServiceEvent::Stopped(run.session));
        log::info!("service stopped (session {})", run.session);

        pumped?;
        forwarded?;
        Ok(ServiceStatus::Stopped)
    }
}

impl Drop for StepService {
    fn drop(&mut self) {
        if let Some(run) = self.run.take() {
            let _ = run.shutdown_tx.send(());
            run.pump.abort();
            run.forwarder.abort();
            self.detector.close();
        }
    }
}

/// Classify pulses until shutdown.
///
/// When the detector ends on its own the classifier stays alive so the
/// cool-down can still report STILL.
async fn pump_pulses(
    mut classifier: StepClassifier,
    mut pulses: mpsc::Receiver<Pulse>,
    events: broadcast::Sender<ServiceEvent>,
    mut shutdown: broadcast::Receiver<()>,
) {
    loop {
        tokio::select! {
            pulse = pulses.recv() => match pulse {
                Some(pulse) => {
                    let step = classifier.on_pulse_at(pulse.at).await;
                    let _ = events.send(ServiceEvent::Step(step));
                }
                None => {
                    log::debug!("detector closed its pulse stream");
                    let _ = shutdown.recv().await;
                    break;
                }
            },
            _ = shutdown.recv() => break,
        }
    }
    classifier.shutdown();
}

/// Rebroadcast every walk speed and MET publication
async fn forward_live_state(
    mut walk_speed: watch::Receiver<WalkSpeed>,
    mut met: watch::Receiver<f64>,
    events: broadcast::Sender<ServiceEvent>,
    mut shutdown: broadcast::Receiver<()>,
) {
    loop {
        tokio::select! {
            changed = walk_speed.changed() => {
                if changed.is_err() {
                    break;
                }
                let value = *walk_speed.borrow_and_update();
                let _ = events.send(ServiceEvent::WalkSpeed(value));
            }
            changed = met.changed() => {
                if changed.is_err() {
                    break;
                }
                let value = *met.borrow_and_update();
                let _ = events.send(ServiceEvent::Met(value));
            }
            _ = shutdown.recv() => break,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::biometrics::BiometricStore;
    use crate::log_store::StepLog;
    use crate::sensor::{ChannelDetector, NoDetector, PulseSender};
    use crate::types::Gender;
    use chrono::TimeZone;
    use std::sync::Mutex;
    use std::time::Duration;

    #[derive(Clone, Default)]
    struct RecordingIndicator {
        calls: Arc<Mutex<Vec<String>>>,
    }

    impl RecordingIndicator {
        fn calls(&self) -> Vec<String> {
            self.calls.lock().unwrap().clone()
        }
    }

    impl ForegroundIndicator for RecordingIndicator {
        fn show(&self, _session: Uuid) {
            self.calls.lock().unwrap().push("show".to_string());
        }

        fn dismiss(&self) {
            self.calls.lock().unwrap().push("dismiss".to_string());
        }

        fn report_error(&self, message: &str) {
            self.calls.lock().unwrap().push(format!("error: {}", message));
        }
    }

    struct Fixture {
        service: StepService,
        sender: PulseSender,
        log: Arc<StepLog>,
        indicator: RecordingIndicator,
        _biometrics: BiometricStore,
    }

    fn fixture() -> Fixture {
        let biometrics = BiometricStore::in_memory();
        biometrics
            .save(BiometricProfile::new("Ada", Gender::Female, 165.0, 60.0))
            .unwrap();
        let log = Arc::new(StepLog::in_memory());
        let (detector, sender) = ChannelDetector::new();
        let indicator = RecordingIndicator::default();
        let service = StepService::new(
            TrackerConfig::default(),
            log.clone(),
            biometrics.subscribe(),
            Box::new(detector),
        )
        .with_indicator(Box::new(indicator.clone()));
        Fixture {
            service,
            sender,
            log,
            indicator,
            _biometrics: biometrics,
        }
    }

    fn t(ms: i64) -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2024, 1, 15, 8, 0, 0).unwrap() + chrono::Duration::milliseconds(ms)
    }

    async fn next_step(events: &mut broadcast::Receiver<ServiceEvent>) -> Step {
        loop {
            if let ServiceEvent::Step(step) = events.recv().await.unwrap() {
                return step;
            }
        }
    }

    #[tokio::test(start_paused = true)]
    async fn test_start_pulse_stop() {
        let mut fx = fixture();
        let mut events = fx.service.events();

        let status = fx.service.handle(ServiceCommand::Start).await.unwrap();
        let session = status.session().unwrap();
        assert_eq!(fx.indicator.calls(), vec!["show"]);

        for i in 0..4 {
            assert!(fx.sender.send(Pulse::new(t(i * 500))));
            next_step(&mut events).await;
        }
        assert_eq!(fx.log.len(), 4);
        assert_eq!(fx.service.walk_speed(), WalkSpeed::Slow);
        assert!(fx.service.met() > 0.0);

        let status = fx.service.handle(ServiceCommand::Stop).await.unwrap();
        assert_eq!(status, ServiceStatus::Stopped);
        assert_eq!(fx.indicator.calls(), vec!["show", "dismiss"]);
        assert!(!fx.sender.send(Pulse::new(t(5000))));
        assert_eq!(fx.service.walk_speed(), WalkSpeed::Still);

        let mut saw_stopped = false;
        while let Ok(event) = events.try_recv() {
            if event == ServiceEvent::Stopped(session) {
                saw_stopped = true;
            }
        }
        assert!(saw_stopped);
    }

    #[tokio::test(start_paused = true)]
    async fn test_repeated_commands_are_noops() {
        let mut fx = fixture();

        assert_eq!(
            fx.service.handle(ServiceCommand::Stop).await.unwrap(),
            ServiceStatus::Stopped
        );

        let first = fx.service.handle(ServiceCommand::Start).await.unwrap();
        let second = fx.service.handle(ServiceCommand::Start).await.unwrap();
        assert_eq!(first, second);
        assert_eq!(fx.indicator.calls(), vec!["show"]);

        fx.service.handle(ServiceCommand::Stop).await.unwrap();
        fx.service.handle(ServiceCommand::Stop).await.unwrap();
        assert_eq!(fx.indicator.calls(), vec!["show", "dismiss"]);
    }

    #[tokio::test(start_paused = true)]
    async fn test_each_run_gets_new_session() {
        let mut fx = fixture();
        let first = fx.service.start().await.unwrap().session();
        fx.service.stop().await.unwrap();
        let second = fx.service.start().await.unwrap().session();
        assert!(first.is_some() && second.is_some());
        assert_ne!(first, second);
        fx.service.stop().await.unwrap();
    }

    #[tokio::test(start_paused = true)]
    async fn test_live_state_is_broadcast_and_cools_down() {
        let mut fx = fixture();
        let mut events = fx.service.events();
        fx.service.start().await.unwrap();

        fx.sender.send(Pulse::new(t(0)));
        next_step(&mut events).await;

        tokio::time::sleep(Duration::from_millis(2100)).await;
        assert_eq!(fx.service.walk_speed(), WalkSpeed::Still);
        assert_eq!(fx.service.met(), 0.0);

        let mut speeds = Vec::new();
        while let Ok(event) = events.try_recv() {
            if let ServiceEvent::WalkSpeed(speed) = event {
                speeds.push(speed);
            }
        }
        assert_eq!(speeds, vec![WalkSpeed::Slow, WalkSpeed::Still]);

        fx.service.stop().await.unwrap();
    }

    #[tokio::test(start_paused = true)]
    async fn test_missing_sensor_stops_after_grace() {
        let biometrics = BiometricStore::in_memory();
        let indicator = RecordingIndicator::default();
        let mut service = StepService::new(
            TrackerConfig::default(),
            Arc::new(StepLog::in_memory()),
            biometrics.subscribe(),
            Box::new(NoDetector),
        )
        .with_indicator(Box::new(indicator.clone()));
        let mut events = service.events();

        let started = tokio::time::Instant::now();
        let result = service.handle(ServiceCommand::Start).await;

        assert!(matches!(result, Err(TrackerError::SensorUnavailable(_))));
        assert!(started.elapsed() >= Duration::from_millis(1000));
        assert_eq!(service.status(), ServiceStatus::Stopped);
        assert!(!service.is_running());
        assert!(matches!(
            events.try_recv(),
            Ok(ServiceEvent::SensorUnavailable(_))
        ));

        let calls = indicator.calls();
        assert_eq!(calls.len(), 1);
        assert!(calls[0].starts_with("error:"));
    }

    #[tokio::test(start_paused = true)]
    async fn test_status_subscribers_follow_lifecycle() {
        let mut fx = fixture();
        let mut status_rx = fx.service.subscribe_status();
        assert!(!status_rx.borrow().is_running());

        fx.service.start().await.unwrap();
        assert!(status_rx.has_changed().unwrap());
        assert!(status_rx.borrow_and_update().is_running());

        fx.service.stop().await.unwrap();
        assert_eq!(*status_rx.borrow_and_update(), ServiceStatus::Stopped);
    }
}
