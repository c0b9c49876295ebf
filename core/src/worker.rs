use crate::chirp::{ChirpDetector, ChirpTemplate, DetectionEvent};
use crate::config::ChirpConfig;
use crate::error::{ModemError, Result};
use crossbeam_channel::{bounded, Receiver, Sender, TrySendError};
use log::{debug, error, info, warn};
use std::any::Any;
use std::panic::{catch_unwind, AssertUnwindSafe};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::thread::{self, JoinHandle};

const COMMAND_CAPACITY: usize = 256;
const EVENT_CAPACITY: usize = 64;

enum WorkerCommand {
    Samples(Vec<f32>),
    AddTemplate {
        name: String,
        duration_secs: f32,
        f0: f32,
        f1: f32,
    },
    SetThreshold(f32),
    Stop,
    #[cfg(test)]
    Panic,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct WorkerStats {
    pub blocks: u64,
    pub detections: u64,
    /// Events lost because the consumer was full or gone
    pub dropped_events: u64,
    pub restarts: u64,
}

#[derive(Default)]
struct Counters {
    blocks: AtomicU64,
    detections: AtomicU64,
    dropped_events: AtomicU64,
    restarts: AtomicU64,
}

impl Counters {
    fn snapshot(&self) -> WorkerStats {
        WorkerStats {
            blocks: self.blocks.load(Ordering::Relaxed),
            detections: self.detections.load(Ordering::Relaxed),
            dropped_events: self.dropped_events.load(Ordering::Relaxed),
            restarts: self.restarts.load(Ordering::Relaxed),
        }
    }
}

/// Templates and threshold needed to rebuild a detector from scratch.
struct Registry {
    config: ChirpConfig,
    templates: Vec<(String, f32, f32, f32)>,
}

impl Registry {
    fn build(&self) -> Result<ChirpDetector> {
        let mut detector = ChirpDetector::new(self.config.clone())?;
        for (name, duration_secs, f0, f1) in &self.templates {
            detector.add_template(name, *duration_secs, *f0, *f1)?;
        }
        Ok(detector)
    }
}

fn panic_message(panic: &(dyn Any + Send)) -> &str {
    panic
        .downcast_ref::<&str>()
        .copied()
        .or_else(|| panic.downcast_ref::<String>().map(|s| s.as_str()))
        .unwrap_or("unknown panic")
}

/// Owner side of a chirp detector running on its own thread.
///
/// Sample blocks and control commands go in through a bounded channel, so
/// template changes are applied in order with the audio. Detections come out
/// through [`DetectorHandle::events`]; when that channel is full, events are
/// dropped rather than stalling ingestion.
pub struct DetectorHandle {
    commands: Sender<WorkerCommand>,
    events: Receiver<DetectionEvent>,
    counters: Arc<Counters>,
    config: ChirpConfig,
    thread: Option<JoinHandle<()>>,
}

pub struct DetectorWorker;

impl DetectorWorker {
    pub fn spawn(config: ChirpConfig) -> Result<DetectorHandle> {
        config.validate()?;

        let (command_tx, command_rx) = bounded(COMMAND_CAPACITY);
        let (event_tx, event_rx) = bounded(EVENT_CAPACITY);
        let counters = Arc::new(Counters::default());

        let registry = Registry {
            config: config.clone(),
            templates: Vec::new(),
        };
        let worker_counters = counters.clone();
        let thread = thread::Builder::new()
            .name("chirp-detector".to_string())
            .spawn(move || run(registry, command_rx, event_tx, worker_counters))
            .map_err(|e| ModemError::WorkerSpawn(e.to_string()))?;

        info!("Chirp detector worker started");
        Ok(DetectorHandle {
            commands: command_tx,
            events: event_rx,
            counters,
            config,
            thread: Some(thread),
        })
    }
}

impl DetectorHandle {
    fn send(&self, command: WorkerCommand) -> Result<()> {
        self.commands.send(command).map_err(|_| ModemError::WorkerStopped)
    }

    pub fn push_samples(&self, block: Vec<f32>) -> Result<()> {
        self.send(WorkerCommand::Samples(block))
    }

    /// Validated here so a bad template fails at the caller, not on the worker.
    pub fn add_template(&self, name: &str, duration_secs: f32, f0: f32, f1: f32) -> Result<()> {
        ChirpTemplate::new(name, duration_secs, f0, f1, &self.config)?;
        self.send(WorkerCommand::AddTemplate {
            name: name.to_string(),
            duration_secs,
            f0,
            f1,
        })
    }

    pub fn set_threshold(&self, threshold: f32) -> Result<()> {
        if !(0.0..=1.0).contains(&threshold) {
            return Err(ModemError::InvalidConfig(format!(
                "detection threshold {} outside 0.0-1.0",
                threshold
            )));
        }
        self.send(WorkerCommand::SetThreshold(threshold))
    }

    pub fn events(&self) -> &Receiver<DetectionEvent> {
        &self.events
    }

    pub fn stats(&self) -> WorkerStats {
        self.counters.snapshot()
    }

    /// Halt ingestion and join the worker thread.
    pub fn stop(mut self) -> WorkerStats {
        self.shutdown();
        self.counters.snapshot()
    }

    fn shutdown(&mut self) {
        let Some(thread) = self.thread.take() else {
            return;
        };
        // The worker may already be gone; joining still reaps it
        let _ = self.commands.send(WorkerCommand::Stop);
        if let Err(panic) = thread.join() {
            error!("Chirp detector thread panicked: {}", panic_message(panic.as_ref()));
        }
        info!("Chirp detector worker stopped");
    }

    #[cfg(test)]
    fn inject_panic(&self) -> Result<()> {
        self.send(WorkerCommand::Panic)
    }
}

impl Drop for DetectorHandle {
    fn drop(&mut self) {
        self.shutdown();
    }
}

fn run(
    mut registry: Registry,
    commands: Receiver<WorkerCommand>,
    events: Sender<DetectionEvent>,
    counters: Arc<Counters>,
) {
    let mut detector = match registry.build() {
        Ok(detector) => detector,
        Err(e) => {
            error!("Chirp detector failed to start: {}", e);
            return;
        }
    };

    for command in commands.iter() {
        match command {
            WorkerCommand::Stop => break,
            WorkerCommand::AddTemplate {
                name,
                duration_secs,
                f0,
                f1,
            } => {
                match detector.add_template(&name, duration_secs, f0, f1) {
                    Ok(()) => {
                        registry.templates.retain(|(n, ..)| *n != name);
                        registry.templates.push((name, duration_secs, f0, f1));
                    }
                    Err(e) => warn!("Template rejected by worker: {}", e),
                }
                continue;
            }
            WorkerCommand::SetThreshold(threshold) => {
                match detector.set_detection_threshold(threshold) {
                    Ok(()) => registry.config.detection_threshold = threshold,
                    Err(e) => warn!("Threshold rejected by worker: {}", e),
                }
                continue;
            }
            _ => {}
        }

        let outcome = catch_unwind(AssertUnwindSafe(|| ingest(&mut detector, command)));

        match outcome {
            Ok(found) => {
                counters.blocks.fetch_add(1, Ordering::Relaxed);
                for event in found {
                    counters.detections.fetch_add(1, Ordering::Relaxed);
                    match events.try_send(event) {
                        Ok(()) => {}
                        Err(TrySendError::Full(event)) => {
                            counters.dropped_events.fetch_add(1, Ordering::Relaxed);
                            warn!("Event channel full, dropping '{}'", event.template_name);
                        }
                        Err(TrySendError::Disconnected(event)) => {
                            counters.dropped_events.fetch_add(1, Ordering::Relaxed);
                            debug!("No event consumer, dropping '{}'", event.template_name);
                        }
                    }
                }
            }
            Err(panic) => {
                error!(
                    "Chirp detector panicked ({}), reinitializing",
                    panic_message(panic.as_ref())
                );
                counters.restarts.fetch_add(1, Ordering::Relaxed);
                detector = match registry.build() {
                    Ok(detector) => detector,
                    Err(e) => {
                        error!("Chirp detector could not be rebuilt: {}", e);
                        return;
                    }
                };
            }
        }
    }
}

fn ingest(detector: &mut ChirpDetector, command: WorkerCommand) -> Vec<DetectionEvent> {
    match command {
        WorkerCommand::Samples(block) => detector.ingest(&block),
        #[cfg(test)]
        WorkerCommand::Panic => panic!("injected detector failure"),
        _ => Vec::new(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::chirp::synthesize_chirp;
    use std::time::Duration;

    fn config_8k() -> ChirpConfig {
        ChirpConfig {
            sample_rate: 8000,
            window_samples: 2048,
            ..ChirpConfig::default()
        }
    }

    /// Deterministic low-level noise so the noise estimate has a floor.
    fn hiss(len: usize, seed: usize) -> Vec<f32> {
        (0..len)
            .map(|i| {
                let x = ((i + seed) as f32 * 12.9898).sin() * 43758.547;
                (x - x.floor() - 0.5) * 0.02
            })
            .collect()
    }

    fn scenario() -> Vec<f32> {
        let mut audio = hiss(16000, 0);
        let chirp = synthesize_chirp(0.25, 500.0, 1500.0, 0.5, 8000);
        let bed = hiss(chirp.len(), 16000);
        audio.extend(chirp.iter().zip(&bed).map(|(c, n)| c + n));
        audio.extend(hiss(8000, 18000));
        audio
    }

    #[test]
    fn test_worker_reports_detection() {
        let handle = DetectorWorker::spawn(config_8k()).unwrap();
        handle.add_template("up", 0.25, 500.0, 1500.0).unwrap();
        for block in scenario().chunks(256) {
            handle.push_samples(block.to_vec()).unwrap();
        }

        let event = handle
            .events()
            .recv_timeout(Duration::from_secs(10))
            .expect("detection event");
        assert_eq!(event.template_name, "up");

        let stats = handle.stop();
        assert_eq!(stats.detections, 1);
        assert_eq!(stats.dropped_events, 0);
        assert_eq!(stats.restarts, 0);
        // 26000 samples in 256-sample blocks
        assert_eq!(stats.blocks, 102);
    }

    #[test]
    fn test_invalid_requests_fail_at_caller() {
        let handle = DetectorWorker::spawn(config_8k()).unwrap();
        assert!(matches!(
            handle.add_template("bad", 0.25, 500.0, 9000.0),
            Err(ModemError::InvalidTemplate(_))
        ));
        assert!(handle.set_threshold(2.0).is_err());
        handle.stop();
    }

    #[test]
    fn test_worker_recovers_from_panic_with_templates() {
        let handle = DetectorWorker::spawn(config_8k()).unwrap();
        handle.add_template("up", 0.25, 500.0, 1500.0).unwrap();
        handle.inject_panic().unwrap();
        for block in scenario().chunks(256) {
            handle.push_samples(block.to_vec()).unwrap();
        }

        let event = handle
            .events()
            .recv_timeout(Duration::from_secs(10))
            .expect("detection after restart");
        assert_eq!(event.template_name, "up");

        let stats = handle.stop();
        assert_eq!(stats.restarts, 1);
    }

    #[test]
    fn test_stop_rejects_further_commands() {
        let mut handle = DetectorWorker::spawn(config_8k()).unwrap();
        handle.shutdown();
        assert!(matches!(
            handle.push_samples(vec![0.0; 16]),
            Err(ModemError::WorkerStopped)
        ));
    }
}
