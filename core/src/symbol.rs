//! Symbol detection from per-carrier magnitudes
//!
//! The detector sees one [`ChannelReading`] per sampling tick and produces at
//! most one [`Detection`] per call. Two strategies share the same front end
//! (weighted smoothing and thresholding):
//!
//! - **Edge**: each carrier is tracked independently. A carrier that stays
//!   above threshold for half the minimum signal duration emits its symbol and
//!   is then latched until it is observed quiet again, so one tone never
//!   produces two symbols.
//! - **Confidence-gated**: the whole reading is classified, and a
//!   classification must persist for enough consecutive samples before it is
//!   finalized. Over-long candidates are discarded.
//!
//! In both modes all three carriers together form the start/end marker and
//! are reported as [`Detection::Resync`].

use crate::config::{DetectionMode, ModemConfig};
use crate::spectrum::ChannelReading;
use log::{debug, warn};
use std::collections::VecDeque;

/// One decoded unit of the acoustic alphabet.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Symbol {
    Bit0,
    Bit1,
    Sync,
}

impl Symbol {
    pub fn bit(self) -> Option<bool> {
        match self {
            Symbol::Bit0 => Some(false),
            Symbol::Bit1 => Some(true),
            Symbol::Sync => None,
        }
    }

    pub fn as_char(self) -> char {
        match self {
            Symbol::Bit0 => '0',
            Symbol::Bit1 => '1',
            Symbol::Sync => 'S',
        }
    }
}

/// Output of one detector tick.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Detection {
    Symbol(Symbol),
    /// Both data carriers and the sync carrier at once: transmission boundary.
    Resync,
}

/// Transient state of a gated candidate.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct SymbolCandidate {
    pub kind: Option<Detection>,
    pub start_time: u64,
    pub consecutive_samples: u32,
    pub confidence: u32,
}

impl SymbolCandidate {
    fn begin(kind: Option<Detection>, now_ms: u64) -> Self {
        match kind {
            Some(_) => Self {
                kind,
                start_time: now_ms,
                consecutive_samples: 1,
                confidence: 0,
            },
            None => Self::default(),
        }
    }
}

/// Counters for absorbed, non-fatal conditions.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct DetectorStats {
    pub symbols: u64,
    pub resyncs: u64,
    pub discarded_long: u64,
    pub discarded_low_confidence: u64,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum ChannelState {
    Idle,
    Rising(u64),
    /// Emitted; waiting for the carrier to go quiet before re-arming
    Latched,
}

#[derive(Debug, Clone, Copy)]
struct ChannelTracker {
    state: ChannelState,
}

impl ChannelTracker {
    fn new() -> Self {
        Self {
            state: ChannelState::Idle,
        }
    }

    fn update(&mut self, active: bool, now_ms: u64) {
        self.state = match (self.state, active) {
            (ChannelState::Idle, true) => ChannelState::Rising(now_ms),
            (ChannelState::Rising(_), false) | (ChannelState::Latched, false) => {
                ChannelState::Idle
            }
            (state, _) => state,
        };
    }

    fn ready(&self, now_ms: u64, hold_ms: u64) -> bool {
        matches!(self.state, ChannelState::Rising(since) if now_ms.saturating_sub(since) >= hold_ms)
    }

    fn latch(&mut self) {
        self.state = ChannelState::Latched;
    }
}

/// Weighted moving average over recent readings, newest weighted heaviest.
#[derive(Debug, Clone)]
struct ReadingSmoother {
    history: VecDeque<ChannelReading>,
    capacity: usize,
}

impl ReadingSmoother {
    fn new(capacity: usize) -> Self {
        let capacity = capacity.max(1);
        Self {
            history: VecDeque::with_capacity(capacity),
            capacity,
        }
    }

    fn push(&mut self, reading: ChannelReading) -> ChannelReading {
        if self.history.len() == self.capacity {
            self.history.pop_front();
        }
        self.history.push_back(reading);

        let len = self.history.len() as f32;
        let mut sum = ChannelReading::default();
        let mut total_weight = 0.0;
        for (i, r) in self.history.iter().enumerate() {
            let weight = (i + 1) as f32 / len;
            total_weight += weight;
            sum.zero += r.zero * weight;
            sum.one += r.one * weight;
            sum.sync += r.sync * weight;
        }

        ChannelReading {
            zero: sum.zero / total_weight,
            one: sum.one / total_weight,
            sync: sum.sync / total_weight,
        }
    }

    fn clear(&mut self) {
        self.history.clear();
    }
}

#[derive(Debug, Clone, Copy)]
struct Activity {
    zero: bool,
    one: bool,
    sync: bool,
}

impl Activity {
    fn any(&self) -> bool {
        self.zero || self.one || self.sync
    }

    fn all(&self) -> bool {
        self.zero && self.one && self.sync
    }

    fn classify(&self) -> Option<Detection> {
        match (self.zero, self.one, self.sync) {
            (true, true, true) => Some(Detection::Resync),
            (true, false, _) => Some(Detection::Symbol(Symbol::Bit0)),
            (false, true, _) => Some(Detection::Symbol(Symbol::Bit1)),
            (false, false, true) => Some(Detection::Symbol(Symbol::Sync)),
            // Both data carriers without sync, or nothing at all
            _ => None,
        }
    }
}

pub struct SymbolDetector {
    mode: DetectionMode,
    threshold: f32,
    hold_ms: u64,
    max_signal_ms: u64,
    min_samples: u32,
    high_confidence: u32,
    min_emit_confidence: u32,
    smoother: ReadingSmoother,
    zero: ChannelTracker,
    one: ChannelTracker,
    sync: ChannelTracker,
    candidate: SymbolCandidate,
    latched: Option<Detection>,
    last_silence: Option<u64>,
    quiet: bool,
    stats: DetectorStats,
}

impl SymbolDetector {
    pub fn new(config: &ModemConfig) -> Self {
        Self {
            mode: config.detection_mode,
            threshold: config.threshold,
            hold_ms: (config.min_signal_duration_ms / 2) as u64,
            max_signal_ms: config.max_signal_duration_ms as u64,
            min_samples: config.min_samples_for_bit(),
            high_confidence: config.high_confidence.max(1),
            min_emit_confidence: config.min_emit_confidence,
            smoother: ReadingSmoother::new(config.smoothing_window),
            zero: ChannelTracker::new(),
            one: ChannelTracker::new(),
            sync: ChannelTracker::new(),
            candidate: SymbolCandidate::default(),
            latched: None,
            last_silence: None,
            quiet: false,
            stats: DetectorStats::default(),
        }
    }

    /// Feed one reading taken at `now_ms`.
    pub fn observe(&mut self, reading: ChannelReading, now_ms: u64) -> Option<Detection> {
        let smoothed = self.smoother.push(reading);
        let activity = Activity {
            zero: smoothed.zero > self.threshold,
            one: smoothed.one > self.threshold,
            sync: smoothed.sync > self.threshold,
        };

        let quiet = !activity.any();
        if quiet && !self.quiet {
            self.last_silence = Some(now_ms);
        }
        self.quiet = quiet;

        let detection = match self.mode {
            DetectionMode::Edge => self.observe_edge(activity, now_ms),
            DetectionMode::ConfidenceGated => self.observe_gated(activity, now_ms),
        };

        match detection {
            Some(Detection::Resync) => self.stats.resyncs += 1,
            Some(Detection::Symbol(_)) => self.stats.symbols += 1,
            None => {}
        }
        detection
    }

    fn observe_edge(&mut self, activity: Activity, now_ms: u64) -> Option<Detection> {
        self.zero.update(activity.zero, now_ms);
        self.one.update(activity.one, now_ms);
        self.sync.update(activity.sync, now_ms);

        let hold = self.hold_ms;
        if activity.all() {
            // Marker in progress: individual carriers never emit on their own
            if self.zero.ready(now_ms, hold) && self.one.ready(now_ms, hold) && self.sync.ready(now_ms, hold) {
                self.zero.latch();
                self.one.latch();
                self.sync.latch();
                return Some(Detection::Resync);
            }
            return None;
        }

        if self.zero.ready(now_ms, hold) && !activity.one {
            self.zero.latch();
            return Some(Detection::Symbol(Symbol::Bit0));
        }
        if self.one.ready(now_ms, hold) && !activity.zero {
            self.one.latch();
            return Some(Detection::Symbol(Symbol::Bit1));
        }
        if self.sync.ready(now_ms, hold) {
            self.sync.latch();
            return Some(Detection::Symbol(Symbol::Sync));
        }
        None
    }

    fn observe_gated(&mut self, activity: Activity, now_ms: u64) -> Option<Detection> {
        let kind = activity.classify();

        if self.latched.is_some() {
            if self.latched == kind {
                return None;
            }
            self.latched = None;
        }

        if kind != self.candidate.kind {
            self.candidate = SymbolCandidate::begin(kind, now_ms);
        } else if kind.is_some() {
            self.candidate.consecutive_samples += 1;
        }

        let current = self.candidate.kind?;
        // Confidence only builds once the classification has persisted
        if self.candidate.consecutive_samples >= self.min_samples {
            self.candidate.confidence += 1;
        }
        let duration = now_ms.saturating_sub(self.candidate.start_time);

        if duration > self.max_signal_ms {
            warn!(
                "Signal too long, discarding {:?} ({}ms, {} samples)",
                current, duration, self.candidate.consecutive_samples
            );
            self.stats.discarded_long += 1;
            self.candidate = SymbolCandidate::default();
            self.latched = Some(current);
            return None;
        }

        if self.candidate.confidence < self.high_confidence {
            return None;
        }

        let confidence = self.candidate.confidence;
        self.candidate = SymbolCandidate::default();
        self.latched = Some(current);

        if confidence < self.min_emit_confidence {
            warn!("Low confidence symbol discarded: {:?} (confidence {})", current, confidence);
            self.stats.discarded_low_confidence += 1;
            return None;
        }

        debug!("Symbol {:?} finalized ({}ms, confidence {})", current, duration, confidence);
        Some(current)
    }

    /// Start of the most recent stretch with every carrier quiet. Kept while
    /// carriers are active; `None` until the first quiet reading.
    pub fn last_silence(&self) -> Option<u64> {
        self.last_silence
    }

    pub fn candidate(&self) -> &SymbolCandidate {
        &self.candidate
    }

    pub fn stats(&self) -> DetectorStats {
        self.stats
    }

    pub fn reset(&mut self) {
        self.smoother.clear();
        self.zero = ChannelTracker::new();
        self.one = ChannelTracker::new();
        self.sync = ChannelTracker::new();
        self.candidate = SymbolCandidate::default();
        self.latched = None;
        self.last_silence = None;
        self.quiet = false;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const ON: f32 = 200.0;

    fn edge_config() -> ModemConfig {
        ModemConfig {
            smoothing_window: 1,
            ..ModemConfig::default()
        }
    }

    fn gated_config() -> ModemConfig {
        ModemConfig {
            smoothing_window: 1,
            detection_mode: DetectionMode::ConfidenceGated,
            ..ModemConfig::default()
        }
    }

    /// Drive the detector with one reading every `step` ms and collect detections.
    fn run(
        detector: &mut SymbolDetector,
        reading: ChannelReading,
        from: u64,
        to: u64,
        step: u64,
    ) -> Vec<Detection> {
        let mut out = Vec::new();
        let mut t = from;
        while t < to {
            if let Some(d) = detector.observe(reading, t) {
                out.push(d);
            }
            t += step;
        }
        out
    }

    #[test]
    fn test_edge_sustained_tone_emits_once() {
        let mut detector = SymbolDetector::new(&edge_config());
        let zero = ChannelReading::new(ON, 0.0, 0.0);

        let detections = run(&mut detector, zero, 0, 120, 5);
        assert_eq!(detections, vec![Detection::Symbol(Symbol::Bit0)]);
    }

    #[test]
    fn test_edge_rearms_after_silence() {
        let mut detector = SymbolDetector::new(&edge_config());
        let one = ChannelReading::new(0.0, ON, 0.0);

        let mut detections = run(&mut detector, one, 0, 100, 5);
        detections.extend(run(&mut detector, ChannelReading::default(), 100, 150, 5));
        detections.extend(run(&mut detector, one, 150, 250, 5));

        assert_eq!(
            detections,
            vec![Detection::Symbol(Symbol::Bit1), Detection::Symbol(Symbol::Bit1)]
        );
    }

    #[test]
    fn test_edge_short_blip_is_ignored() {
        let mut detector = SymbolDetector::new(&edge_config());
        let sync = ChannelReading::new(0.0, 0.0, ON);

        // Hold time is 20ms; a 15ms blip never qualifies
        let mut detections = run(&mut detector, sync, 0, 15, 5);
        detections.extend(run(&mut detector, ChannelReading::default(), 15, 100, 5));
        assert!(detections.is_empty());
    }

    #[test]
    fn test_edge_marker_is_resync() {
        let mut detector = SymbolDetector::new(&edge_config());
        let marker = ChannelReading::new(ON, ON, ON);

        let detections = run(&mut detector, marker, 0, 240, 5);
        assert_eq!(detections, vec![Detection::Resync]);
        assert_eq!(detector.stats().resyncs, 1);
    }

    #[test]
    fn test_edge_marker_release_does_not_leak_symbols() {
        let mut detector = SymbolDetector::new(&edge_config());
        let mut detections = run(&mut detector, ChannelReading::new(ON, ON, ON), 0, 240, 5);
        // Sync drops first, data carriers linger for a while
        detections.extend(run(&mut detector, ChannelReading::new(ON, ON, 0.0), 240, 300, 5));
        detections.extend(run(&mut detector, ChannelReading::new(ON, 0.0, 0.0), 300, 340, 5));
        assert_eq!(detections, vec![Detection::Resync]);
    }

    #[test]
    fn test_edge_both_data_carriers_are_ambiguous() {
        let mut detector = SymbolDetector::new(&edge_config());
        let detections = run(&mut detector, ChannelReading::new(ON, ON, 0.0), 0, 200, 5);
        assert!(detections.is_empty());
    }

    #[test]
    fn test_below_threshold_never_detects() {
        let mut detector = SymbolDetector::new(&edge_config());
        let quiet = ChannelReading::new(49.0, 50.0, 12.0);
        assert!(run(&mut detector, quiet, 0, 5_000, 5).is_empty());

        let mut gated = SymbolDetector::new(&gated_config());
        assert!(run(&mut gated, quiet, 0, 5_000, 5).is_empty());
    }

    #[test]
    fn test_gated_requires_consecutive_samples() {
        let config = gated_config();
        let persist = config.min_samples_for_bit() as u64;
        let ticks = persist + config.high_confidence as u64 - 1;
        let mut detector = SymbolDetector::new(&config);
        let zero = ChannelReading::new(ON, 0.0, 0.0);

        for i in 0..ticks - 1 {
            assert_eq!(detector.observe(zero, i * 5), None);
            let candidate = detector.candidate();
            assert_eq!(candidate.consecutive_samples as u64, i + 1);
            // No confidence until the classification has persisted
            assert_eq!(candidate.confidence as u64, (i + 2).saturating_sub(persist));
        }
        assert_eq!(
            detector.observe(zero, (ticks - 1) * 5),
            Some(Detection::Symbol(Symbol::Bit0))
        );
        // Finalized: candidate reset, tone latched
        assert_eq!(detector.candidate().kind, None);
        assert!(run(&mut detector, zero, ticks * 5, 600, 5).is_empty());
    }

    #[test]
    fn test_gated_confidence_never_passes_high_confidence() {
        let config = gated_config();
        let mut detector = SymbolDetector::new(&config);
        let zero = ChannelReading::new(ON, 0.0, 0.0);
        let one = ChannelReading::new(0.0, ON, 0.0);
        let quiet = ChannelReading::default();

        let mut finalized = 0;
        let mut t = 0;
        for reading in [zero, quiet, one, zero, one, quiet] {
            for _ in 0..40 {
                if detector.observe(reading, t).is_some() {
                    finalized += 1;
                }
                assert!(detector.candidate().confidence < config.high_confidence);
                t += 5;
            }
        }
        assert_eq!(finalized, 4);
    }

    #[test]
    fn test_gated_change_resets_candidate() {
        let mut detector = SymbolDetector::new(&gated_config());
        run(&mut detector, ChannelReading::new(ON, 0.0, 0.0), 0, 50, 5);
        assert_eq!(detector.candidate().consecutive_samples, 10);
        assert_eq!(detector.candidate().confidence, 0);

        detector.observe(ChannelReading::new(0.0, ON, 0.0), 50);
        let candidate = detector.candidate();
        assert_eq!(candidate.kind, Some(Detection::Symbol(Symbol::Bit1)));
        assert_eq!(candidate.consecutive_samples, 1);
        assert_eq!(candidate.start_time, 50);
    }

    #[test]
    fn test_gated_short_sync_pulse_never_finalizes() {
        let mut detector = SymbolDetector::new(&gated_config());
        let mut detections = run(&mut detector, ChannelReading::new(0.0, 0.0, ON), 0, 40, 5);
        detections.extend(run(&mut detector, ChannelReading::new(ON, 0.0, 0.0), 40, 160, 5));
        assert_eq!(detections, vec![Detection::Symbol(Symbol::Bit0)]);
    }

    #[test]
    fn test_gated_discards_oversized_signal() {
        // 10 samples per bit -> 8 required, but the signal limit trips first
        let config = ModemConfig {
            smoothing_window: 1,
            detection_mode: DetectionMode::ConfidenceGated,
            bit_duration_ms: 1000,
            sample_interval_ms: 100,
            min_signal_duration_ms: 100,
            max_signal_duration_ms: 500,
            ..ModemConfig::default()
        };
        let mut detector = SymbolDetector::new(&config);
        let detections = run(&mut detector, ChannelReading::new(0.0, ON, 0.0), 0, 2_000, 100);
        assert!(detections.is_empty());
        assert_eq!(detector.stats().discarded_long, 1);
    }

    #[test]
    fn test_gated_discards_low_confidence() {
        let config = ModemConfig {
            smoothing_window: 1,
            detection_mode: DetectionMode::ConfidenceGated,
            high_confidence: 1,
            min_samples_ratio: 0.0,
            ..ModemConfig::default()
        };
        let mut detector = SymbolDetector::new(&config);
        assert_eq!(detector.observe(ChannelReading::new(ON, 0.0, 0.0), 0), None);
        assert_eq!(detector.stats().discarded_low_confidence, 1);
    }

    #[test]
    fn test_gated_marker_is_resync() {
        let mut detector = SymbolDetector::new(&gated_config());
        let detections = run(&mut detector, ChannelReading::new(ON, ON, ON), 0, 240, 5);
        assert_eq!(detections, vec![Detection::Resync]);
    }

    #[test]
    fn test_silence_tracking() {
        let mut detector = SymbolDetector::new(&edge_config());
        assert_eq!(detector.last_silence(), None);

        detector.observe(ChannelReading::default(), 10);
        detector.observe(ChannelReading::default(), 15);
        assert_eq!(detector.last_silence(), Some(10));

        // An active carrier keeps the last quiet stretch
        detector.observe(ChannelReading::new(0.0, 0.0, ON), 20);
        detector.observe(ChannelReading::new(0.0, 0.0, ON), 500);
        assert_eq!(detector.last_silence(), Some(10));

        detector.observe(ChannelReading::default(), 505);
        assert_eq!(detector.last_silence(), Some(505));
    }

    #[test]
    fn test_smoother_weights_recent_readings() {
        let mut smoother = ReadingSmoother::new(3);
        let first = smoother.push(ChannelReading::new(ON, 0.0, 0.0));
        assert_eq!(first.zero, ON);

        smoother.push(ChannelReading::new(ON, 0.0, 0.0));
        // Weights 1/3, 2/3, 1 -> newest zero reading drags the average to half
        let third = smoother.push(ChannelReading::new(0.0, 0.0, 0.0));
        assert!((third.zero - ON / 2.0).abs() < 1e-3);

        let fourth = smoother.push(ChannelReading::new(0.0, 0.0, 0.0));
        assert!((fourth.zero - ON / 6.0).abs() < 1e-3);
    }
}
