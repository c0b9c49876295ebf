use clap::{Parser, Subcommand, ValueEnum};
use sonicwire_cli::settings::Settings;
use sonicwire_cli::wav::{read_wav_file, write_wav_file};
use sonicwire_cli::{server, CliError, FILE_BLOCK_SIZE};
use sonicwire_core::config::{validate_sample_rate, MAX_TEMPLATE_SECS};
use sonicwire_core::{
    decode_samples, decoded_text, synthesize_chirp, ChirpDetector, DecodePolicy, DetectionMode,
    DetectorWorker, Encoder, ReceiverEvent, ToneEmitter, ToneRenderer, TransmitOutcome,
    TransmitStatus, Transmitter, MODEM_SAMPLE_RATE,
};
use std::net::SocketAddr;
use std::path::{Path, PathBuf};
use tracing_subscriber::EnvFilter;

/// Block size for the self-test chirp at 8 kHz
const SELF_TEST_BLOCK_SIZE: usize = 256;

#[derive(Parser)]
#[command(name = "sonicwire")]
#[command(about = "Acoustic text modem and chirp detector")]
struct Cli {
    /// JSON file overriding modem and chirp settings
    #[arg(long, global = true, value_name = "CONFIG.JSON")]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Clone, Copy, ValueEnum)]
enum ModeArg {
    Edge,
    Gated,
}

#[derive(Clone, Copy, ValueEnum)]
enum PolicyArg {
    Printable,
    Unconditional,
}

#[derive(Subcommand)]
enum Commands {
    /// Encode text to a WAV file
    Encode {
        /// Text to send (ASCII, at most 50 characters by default)
        text: String,

        /// Output WAV file
        #[arg(value_name = "OUTPUT.WAV")]
        output: PathBuf,

        #[arg(long, default_value_t = MODEM_SAMPLE_RATE)]
        sample_rate: u32,
    },

    /// Decode text from a WAV file
    Decode {
        /// Input WAV file
        #[arg(value_name = "INPUT.WAV")]
        input: PathBuf,

        /// Symbol detection mode (overrides the config file)
        #[arg(long, value_enum)]
        mode: Option<ModeArg>,

        /// Byte decoding policy (overrides the config file)
        #[arg(long, value_enum)]
        policy: Option<PolicyArg>,
    },

    /// Write a linear test chirp to a WAV file
    Chirp {
        #[arg(value_name = "OUTPUT.WAV")]
        output: PathBuf,

        #[arg(long, default_value = "1.0")]
        duration: f32,

        #[arg(long, default_value = "1000")]
        f0: f32,

        #[arg(long, default_value = "2000")]
        f1: f32,

        #[arg(long, default_value = "0.3")]
        volume: f32,

        #[arg(long, default_value_t = MODEM_SAMPLE_RATE)]
        sample_rate: u32,

        /// Background before and after the chirp (seconds)
        #[arg(long, default_value = "0.5")]
        padding: f32,

        /// Peak level of the background hiss; the detector needs a noise floor
        #[arg(long, default_value = "0.005")]
        noise: f32,
    },

    /// Detect chirps in a WAV file, printing one JSON line per detection
    Detect {
        #[arg(value_name = "INPUT.WAV")]
        input: PathBuf,

        /// Template as NAME:DURATION:F0:F1 (repeatable)
        #[arg(short, long = "template", value_name = "TEMPLATE", default_value = "chirp:1.0:1000:2000")]
        templates: Vec<String>,

        /// Detection threshold (0.0-1.0)
        #[arg(long)]
        threshold: Option<f32>,

        /// Samples per ingested block; the noise estimate spans 100 blocks
        #[arg(long, default_value_t = FILE_BLOCK_SIZE)]
        block_size: usize,
    },

    /// Round-trip a message and a chirp through the full pipelines
    SelfTest,

    /// Serve the HTTP API
    Serve {
        #[arg(long, default_value = "127.0.0.1:8080")]
        addr: SocketAddr,
    },
}

fn main() -> Result<(), Box<dyn std::error::Error>> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .init();

    let cli = Cli::parse();
    let settings = Settings::load(cli.config.as_deref())?;

    match cli.command {
        Commands::Encode {
            text,
            output,
            sample_rate,
        } => encode_command(&settings, &text, &output, sample_rate)?,
        Commands::Decode { input, mode, policy } => decode_command(settings, &input, mode, policy)?,
        Commands::Chirp {
            output,
            duration,
            f0,
            f1,
            volume,
            sample_rate,
            padding,
            noise,
        } => chirp_command(&output, duration, f0, f1, volume, sample_rate, padding, noise)?,
        Commands::Detect {
            input,
            templates,
            threshold,
            block_size,
        } => detect_command(&settings, &input, &templates, threshold, block_size)?,
        Commands::SelfTest => self_test_command(&settings)?,
        Commands::Serve { addr } => {
            let runtime = tokio::runtime::Runtime::new()?;
            runtime.block_on(server::serve(addr, settings))?;
        }
    }

    Ok(())
}

fn encode_command(
    settings: &Settings,
    text: &str,
    output_path: &Path,
    sample_rate: u32,
) -> Result<(), Box<dyn std::error::Error>> {
    validate_sample_rate(sample_rate)?;
    let mut transmitter = Transmitter::new(Encoder::new(settings.modem.clone())?);
    transmitter.on_status(|status| match status {
        TransmitStatus::Character { index, character, bits } => {
            println!("  [{}] {:?} -> {}", index, character, bits)
        }
        TransmitStatus::Rejected(reason) => println!("Warning: {}", reason),
        _ => {}
    });

    let mut renderer = ToneRenderer::new(sample_rate);
    match transmitter.transmit(text, &mut renderer)? {
        TransmitOutcome::Sent {
            instructions,
            duration_ms,
        } => println!("Encoded {} tones ({} ms)", instructions, duration_ms),
        TransmitOutcome::Rejected(err) => return Err(err.into()),
        TransmitOutcome::Cancelled { .. } => return Err("transmission cancelled".into()),
    }

    let samples = renderer.into_samples();
    write_wav_file(output_path, &samples, sample_rate)?;
    println!("Wrote {} samples to {}", samples.len(), output_path.display());
    Ok(())
}

fn decode_command(
    mut settings: Settings,
    input_path: &Path,
    mode: Option<ModeArg>,
    policy: Option<PolicyArg>,
) -> Result<(), Box<dyn std::error::Error>> {
    if let Some(mode) = mode {
        settings.modem.detection_mode = match mode {
            ModeArg::Edge => DetectionMode::Edge,
            ModeArg::Gated => DetectionMode::ConfidenceGated,
        };
    }
    if let Some(policy) = policy {
        settings.modem.decode_policy = match policy {
            PolicyArg::Printable => DecodePolicy::PrintableScan,
            PolicyArg::Unconditional => DecodePolicy::Unconditional,
        };
    }

    let audio = read_wav_file(input_path)?;
    println!(
        "Read {:.2}s of audio at {} Hz",
        audio.duration_secs(),
        audio.sample_rate
    );

    let events = decode_samples(&audio.samples, audio.sample_rate, &settings.modem)?;
    for event in &events {
        if let ReceiverEvent::SessionEnded {
            start_ms,
            end_ms,
            text,
            partial_bits,
        } = event
        {
            if text.is_empty() && partial_bits.is_none() {
                continue;
            }
            println!("Session {}-{} ms: {:?}", start_ms, end_ms, text);
            if let Some(bits) = partial_bits {
                println!("  undecoded bits: {}", bits);
            }
        }
    }
    println!("Decoded: {}", decoded_text(&events));
    Ok(())
}

#[allow(clippy::too_many_arguments)]
fn chirp_command(
    output_path: &Path,
    duration: f32,
    f0: f32,
    f1: f32,
    volume: f32,
    sample_rate: u32,
    padding: f32,
    noise: f32,
) -> Result<(), Box<dyn std::error::Error>> {
    validate_sample_rate(sample_rate)?;
    if !(duration > 0.0 && duration <= MAX_TEMPLATE_SECS) {
        return Err(format!("chirp duration {}s outside (0, {}s]", duration, MAX_TEMPLATE_SECS).into());
    }
    let pad = (padding.clamp(0.0, MAX_TEMPLATE_SECS) * sample_rate as f32) as usize;
    let chirp = synthesize_chirp(duration, f0, f1, volume, sample_rate);
    let mut samples = hiss(pad * 2 + chirp.len(), noise);
    for (slot, c) in samples[pad..].iter_mut().zip(&chirp) {
        *slot += c;
    }

    write_wav_file(output_path, &samples, sample_rate)?;
    println!(
        "Wrote {}s {}-{} Hz chirp to {}",
        duration,
        f0,
        f1,
        output_path.display()
    );
    Ok(())
}

fn parse_template(spec: &str) -> Result<(String, f32, f32, f32), CliError> {
    let parts: Vec<&str> = spec.split(':').collect();
    let &[name, duration, f0, f1] = parts.as_slice() else {
        return Err(CliError::TemplateSpec(spec.to_string()));
    };
    let number = |s: &str| s.parse::<f32>().map_err(|_| CliError::TemplateSpec(spec.to_string()));
    Ok((name.to_string(), number(duration)?, number(f0)?, number(f1)?))
}

fn detect_command(
    settings: &Settings,
    input_path: &Path,
    templates: &[String],
    threshold: Option<f32>,
    block_size: usize,
) -> Result<(), Box<dyn std::error::Error>> {
    let audio = read_wav_file(input_path)?;
    let mut config = settings.chirp.clone();
    config.sample_rate = audio.sample_rate;

    let handle = DetectorWorker::spawn(config)?;
    for spec in templates {
        let (name, duration, f0, f1) = parse_template(spec)?;
        handle.add_template(&name, duration, f0, f1)?;
    }
    if let Some(threshold) = threshold {
        handle.set_threshold(threshold)?;
    }

    let events = handle.events().clone();
    let print_ready = || -> Result<(), serde_json::Error> {
        for event in events.try_iter() {
            println!("{}", serde_json::to_string(&event)?);
        }
        Ok(())
    };

    for block in audio.samples.chunks(block_size.max(1)) {
        handle.push_samples(block.to_vec())?;
        print_ready()?;
    }
    let stats = handle.stop();
    print_ready()?;

    eprintln!(
        "{} blocks, {} detections, {} dropped",
        stats.blocks, stats.detections, stats.dropped_events
    );
    Ok(())
}

/// Deterministic hiss within `[-level, level]`.
fn hiss(len: usize, level: f32) -> Vec<f32> {
    (0..len)
        .map(|i| {
            let x = (i as f32 * 12.9898).sin() * 43758.547;
            (x - x.floor() - 0.5) * 2.0 * level
        })
        .collect()
}

fn self_test_command(settings: &Settings) -> Result<(), Box<dyn std::error::Error>> {
    let mut failures = 0;

    println!("Running self-test...");
    let message = "Hi";
    let mut transmitter = Transmitter::new(Encoder::new(settings.modem.clone())?);
    let mut renderer = ToneRenderer::new(MODEM_SAMPLE_RATE);
    transmitter.transmit(message, &mut renderer)?;
    renderer.wait(500)?;
    let events = decode_samples(&renderer.into_samples(), MODEM_SAMPLE_RATE, &settings.modem)?;
    let received = decoded_text(&events);
    if received == message {
        println!("PASS modem round trip: {:?}", received);
    } else {
        println!("FAIL modem round trip: sent {:?}, received {:?}", message, received);
        failures += 1;
    }

    let sample_rate = 8000;
    let mut config = settings.chirp.clone();
    config.sample_rate = sample_rate;
    let mut detector = ChirpDetector::new(config)?;
    detector.add_template("self-test", 1.0, 1000.0, 2000.0)?;

    let lead = sample_rate as usize * 2;
    let chirp = synthesize_chirp(1.0, 1000.0, 2000.0, 0.5, sample_rate);
    let mut audio = hiss(lead + chirp.len() + sample_rate as usize, 0.005);
    for (slot, c) in audio[lead..].iter_mut().zip(&chirp) {
        *slot += c;
    }

    let detections: Vec<_> = audio
        .chunks(SELF_TEST_BLOCK_SIZE)
        .flat_map(|block| detector.ingest(block))
        .collect();
    match detections.first() {
        Some(event) => println!(
            "PASS chirp detection: confidence {:.3} at {:.2}s",
            event.confidence, event.timestamp_secs
        ),
        None => {
            println!("FAIL chirp detection: no detection");
            failures += 1;
        }
    }

    if failures > 0 {
        return Err(format!("{} self-test check(s) failed", failures).into());
    }
    println!("Self-test passed");
    Ok(())
}
