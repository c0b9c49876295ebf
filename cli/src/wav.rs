use crate::error::CliError;
use hound::{SampleFormat, WavSpec};
use sonicwire_core::ModemError;
use std::fs::File;
use std::io::{BufReader, Cursor, Read, Seek, Write};
use std::path::Path;

/// Mono audio as loaded from or written to a WAV file.
#[derive(Debug, Clone)]
pub struct Audio {
    pub samples: Vec<f32>,
    pub sample_rate: u32,
}

impl Audio {
    pub fn duration_secs(&self) -> f32 {
        self.samples.len() as f32 / self.sample_rate as f32
    }
}

/// Read a WAV stream, keeping only the first channel.
pub fn read_wav<R: Read>(reader: R) -> Result<Audio, CliError> {
    let mut reader = hound::WavReader::new(reader)?;
    let spec = reader.spec();
    let channels = spec.channels.max(1) as usize;

    // Extract samples (16-bit PCM or 32-bit float)
    let interleaved: Vec<f32> = match (spec.sample_format, spec.bits_per_sample) {
        (SampleFormat::Int, 16) => reader
            .samples::<i16>()
            .map(|s| s.map(|s| s as f32 / 32768.0))
            .collect::<Result<_, _>>()?,
        (SampleFormat::Float, 32) => reader.samples::<f32>().collect::<Result<_, _>>()?,
        (format, bits) => {
            return Err(CliError::UnsupportedFormat(format!(
                "{} bit {:?}",
                bits, format
            )))
        }
    };

    Ok(Audio {
        samples: interleaved.into_iter().step_by(channels).collect(),
        sample_rate: spec.sample_rate,
    })
}

pub fn read_wav_file(path: &Path) -> Result<Audio, CliError> {
    let file = File::open(path).map_err(|e| ModemError::from_source_io(&path.display().to_string(), e))?;
    read_wav(BufReader::new(file))
}

/// Write 16-bit mono PCM.
pub fn write_wav<W: Write + Seek>(writer: W, samples: &[f32], sample_rate: u32) -> Result<(), CliError> {
    let spec = WavSpec {
        channels: 1,
        sample_rate,
        bits_per_sample: 16,
        sample_format: SampleFormat::Int,
    };

    let mut writer = hound::WavWriter::new(writer, spec)?;
    for &sample in samples {
        // Clamp to [-1.0, 1.0] to avoid overflow, then scale to i16
        let clamped = sample.clamp(-1.0, 1.0);
        writer.write_sample((clamped * 32767.0) as i16)?;
    }
    writer.finalize()?;
    Ok(())
}

pub fn write_wav_file(path: &Path, samples: &[f32], sample_rate: u32) -> Result<(), CliError> {
    write_wav(File::create(path)?, samples, sample_rate)
}

pub fn wav_bytes(samples: &[f32], sample_rate: u32) -> Result<Vec<u8>, CliError> {
    let mut cursor = Cursor::new(Vec::new());
    write_wav(&mut cursor, samples, sample_rate)?;
    Ok(cursor.into_inner())
}
