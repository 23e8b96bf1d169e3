//! WAV encoding through hound.

use super::Audio;
use crate::error::{Result, SpeakError};
use hound::{SampleFormat, WavReader, WavSpec, WavWriter};
use std::fs;
use std::path::Path;

/// Write 16-bit PCM audio to `path`, creating parent directories.
pub fn write_wav(audio: &Audio, path: &Path) -> Result<()> {
    if let Some(parent) = path.parent()
        && !parent.as_os_str().is_empty()
    {
        fs::create_dir_all(parent).map_err(|e| {
            SpeakError::Capability(format!(
                "failed to create output directory '{}': {}",
                parent.display(),
                e
            ))
        })?;
    }

    let spec = WavSpec {
        channels: audio.channels,
        sample_rate: audio.sample_rate,
        bits_per_sample: 16,
        sample_format: SampleFormat::Int,
    };

    let wav_err = |e: hound::Error| {
        SpeakError::Capability(format!("failed to write WAV '{}': {}", path.display(), e))
    };

    let mut writer = WavWriter::create(path, spec).map_err(wav_err)?;
    for &sample in &audio.samples {
        writer.write_sample(sample).map_err(wav_err)?;
    }
    writer.finalize().map_err(wav_err)
}

/// Read a 16-bit PCM WAV file.
pub fn read_wav(path: &Path) -> Result<Audio> {
    let wav_err = |e: hound::Error| {
        SpeakError::Capability(format!("failed to read WAV '{}': {}", path.display(), e))
    };

    let mut reader = WavReader::open(path).map_err(wav_err)?;
    let spec = reader.spec();
    if spec.sample_format != SampleFormat::Int || spec.bits_per_sample != 16 {
        return Err(SpeakError::Capability(format!(
            "unsupported WAV format in '{}': {:?} {}-bit",
            path.display(),
            spec.sample_format,
            spec.bits_per_sample
        )));
    }

    let samples = reader
        .samples::<i16>()
        .collect::<std::result::Result<Vec<_>, _>>()
        .map_err(wav_err)?;

    Ok(Audio {
        samples,
        sample_rate: spec.sample_rate,
        channels: spec.channels,
    })
}
