use rand::rngs::StdRng;
use rand::SeedableRng;
use rand_distr::{Distribution, Normal};
use sonicwire_core::{synthesize_chirp, ChirpConfig, ChirpDetector, DetectionEvent, DetectorWorker};
use std::time::Duration;

const SAMPLE_RATE: u32 = 8000;
const BLOCK: usize = 256;

fn config() -> ChirpConfig {
    ChirpConfig {
        sample_rate: SAMPLE_RATE,
        ..ChirpConfig::default()
    }
}

/// Short detection window so a short chirp fits in exactly one detection pass.
fn tight_config() -> ChirpConfig {
    ChirpConfig {
        window_samples: 2048,
        ..config()
    }
}

fn noise(rng: &mut StdRng, len: usize, std_dev: f32) -> Vec<f32> {
    let normal = Normal::new(0.0f32, std_dev).unwrap();
    (0..len).map(|_| normal.sample(rng)).collect()
}

/// `lead_secs` of noise, the chirp over noise, then `tail_secs` of noise.
fn scenario(lead_secs: f32, chirp: &[f32], tail_secs: f32, std_dev: f32) -> Vec<f32> {
    let mut rng = StdRng::seed_from_u64(42);
    let mut audio = noise(&mut rng, (lead_secs * SAMPLE_RATE as f32) as usize, std_dev);
    let bed = noise(&mut rng, chirp.len(), std_dev);
    audio.extend(chirp.iter().zip(&bed).map(|(c, n)| c + n));
    audio.extend(noise(&mut rng, (tail_secs * SAMPLE_RATE as f32) as usize, std_dev));
    audio
}

fn run(detector: &mut ChirpDetector, audio: &[f32]) -> Vec<DetectionEvent> {
    audio.chunks(BLOCK).flat_map(|block| detector.ingest(block)).collect()
}

#[test]
fn test_one_second_chirp_detected_once() {
    let _ = env_logger::builder().is_test(true).try_init();
    let mut detector = ChirpDetector::new(config()).unwrap();
    detector.add_template("sweep", 1.0, 1000.0, 2000.0).unwrap();

    let chirp = synthesize_chirp(1.0, 1000.0, 2000.0, 0.5, SAMPLE_RATE);
    let events = run(&mut detector, &scenario(2.0, &chirp, 1.5, 0.006));

    assert_eq!(events.len(), 1, "{:?}", events);
    let event = &events[0];
    assert_eq!(event.template_name, "sweep");
    assert!(event.correlation > 0.9, "correlation {}", event.correlation);
    assert!(event.snr >= 3.0, "snr {}", event.snr);
    assert!(event.confidence > 0.8, "confidence {}", event.confidence);
    // The chirp ends at 3.0s; the window fits it for another 0.256s
    assert!(event.timestamp_secs >= 3.0 && event.timestamp_secs <= 3.26);
}

#[test]
fn test_only_matching_template_fires() {
    let mut detector = ChirpDetector::new(tight_config()).unwrap();
    detector.add_template("up", 0.5, 1000.0, 2000.0).unwrap();
    detector.add_template("down", 0.5, 2000.0, 1000.0).unwrap();

    let chirp = synthesize_chirp(0.5, 2000.0, 1000.0, 0.5, SAMPLE_RATE);
    let events = run(&mut detector, &scenario(2.0, &chirp, 1.0, 0.006));

    let names: Vec<&str> = events.iter().map(|e| e.template_name.as_str()).collect();
    assert_eq!(names, vec!["down"]);
}

#[test]
fn test_repeated_chirps_each_detected() {
    let mut detector = ChirpDetector::new(tight_config()).unwrap();
    detector.add_template("blip", 0.25, 1200.0, 2400.0).unwrap();

    let chirp = synthesize_chirp(0.25, 1200.0, 2400.0, 0.5, SAMPLE_RATE);
    let mut audio = scenario(2.0, &chirp, 1.0, 0.006);
    audio.extend(scenario(0.0, &chirp, 1.0, 0.006));

    let events = run(&mut detector, &audio);
    assert_eq!(events.len(), 2, "{:?}", events);
    assert!(events[1].timestamp_secs - events[0].timestamp_secs >= 0.3);
}

#[test]
fn test_debounce_is_per_template() {
    let mut detector = ChirpDetector::new(tight_config()).unwrap();
    detector.add_template("up", 0.25, 1200.0, 2400.0).unwrap();
    detector.add_template("down", 0.25, 2400.0, 1200.0).unwrap();

    // down, up, up back to back: each copy ends 0.25s after the previous one
    let up = synthesize_chirp(0.25, 1200.0, 2400.0, 0.5, SAMPLE_RATE);
    let down = synthesize_chirp(0.25, 2400.0, 1200.0, 0.5, SAMPLE_RATE);
    let mut burst = down.clone();
    burst.extend(&up);
    burst.extend(&up);

    let events = run(&mut detector, &scenario(2.0, &burst, 1.0, 0.006));
    let names: Vec<&str> = events.iter().map(|e| e.template_name.as_str()).collect();
    // The second "up" falls inside its own gap; "down" does not hold "up" back
    assert_eq!(names, vec!["down", "up"], "{:?}", events);
    assert!(events[1].timestamp_secs - events[0].timestamp_secs < 0.3);
}

#[test]
fn test_chirp_in_digital_silence_is_its_own_noise_floor() {
    let mut detector = ChirpDetector::new(config()).unwrap();
    detector.add_template("sweep", 1.0, 1000.0, 2000.0).unwrap();

    // All-zero blocks never enter the noise estimate, so the chirp itself
    // sets the floor and the SNR gate stays shut
    let mut audio = vec![0.0; SAMPLE_RATE as usize * 2];
    audio.extend(synthesize_chirp(1.0, 1000.0, 2000.0, 0.5, SAMPLE_RATE));
    audio.extend(vec![0.0; SAMPLE_RATE as usize]);

    assert!(run(&mut detector, &audio).is_empty());
    assert!(detector.noise_level() > 0.1, "noise {}", detector.noise_level());
}

#[test]
fn test_noise_and_silence_never_detect() {
    let mut detector = ChirpDetector::new(config()).unwrap();
    detector.add_template("sweep", 1.0, 1000.0, 2000.0).unwrap();

    assert!(run(&mut detector, &scenario(5.0, &[], 0.0, 0.01)).is_empty());
    detector.reset();
    assert!(run(&mut detector, &vec![0.0; SAMPLE_RATE as usize * 3]).is_empty());
    assert_eq!(detector.templates().len(), 1);
}

#[test]
fn test_threshold_above_reach_suppresses_detection() {
    let mut detector = ChirpDetector::new(config()).unwrap();
    detector.add_template("sweep", 1.0, 1000.0, 2000.0).unwrap();
    detector.set_detection_threshold(1.0).unwrap();

    let chirp = synthesize_chirp(1.0, 1000.0, 2000.0, 0.5, SAMPLE_RATE);
    assert!(run(&mut detector, &scenario(2.0, &chirp, 1.0, 0.006)).is_empty());
}

#[test]
fn test_worker_detects_on_its_own_thread() {
    let handle = DetectorWorker::spawn(config()).unwrap();
    handle.add_template("sweep", 1.0, 1000.0, 2000.0).unwrap();

    let chirp = synthesize_chirp(1.0, 1000.0, 2000.0, 0.5, SAMPLE_RATE);
    for block in scenario(2.0, &chirp, 1.0, 0.006).chunks(BLOCK) {
        handle.push_samples(block.to_vec()).unwrap();
    }

    let event = handle
        .events()
        .recv_timeout(Duration::from_secs(30))
        .expect("worker detection");
    assert_eq!(event.template_name, "sweep");

    let stats = handle.stop();
    assert_eq!(stats.detections, 1);
    assert_eq!(stats.restarts, 0);
}
