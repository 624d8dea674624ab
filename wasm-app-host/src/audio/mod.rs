//! Audio stream configuration and sample plumbing.
//!
//! Samples are interleaved `i16`. The guest produces them through its optional `fillAudio`
//! export (see [`crate::bridge::Bridge::render_audio`]); frontends decide how many frames to
//! pull per callback and where they go (libretro upload, WAV file).

use std::path::Path;

use crate::error::{BridgeError, BridgeResult};

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct AudioConfig {
    pub sample_rate: u32,
    /// 1 (mono) or 2 (interleaved stereo).
    pub channels: u16,
    pub frames_per_callback: u32,
}

impl Default for AudioConfig {
    fn default() -> Self {
        Self {
            sample_rate: 48_000,
            channels: 2,
            frames_per_callback: 800,
        }
    }
}

impl AudioConfig {
    pub fn validate(&self) -> BridgeResult<()> {
        if self.sample_rate == 0 {
            return Err(BridgeError::config("audio sample rate must be positive"));
        }
        if !(1..=2).contains(&self.channels) {
            return Err(BridgeError::config(format!(
                "audio channel count must be 1 or 2, got {}",
                self.channels
            )));
        }
        if self.frames_per_callback == 0 {
            return Err(BridgeError::config("audio frames per callback must be positive"));
        }
        Ok(())
    }

    pub fn samples_per_callback(&self) -> usize {
        self.frames_per_callback as usize * self.channels as usize
    }
}

/// Decode little-endian `i16` samples.
pub fn samples_from_le_bytes(bytes: &[u8]) -> Vec<i16> {
    bytes
        .chunks_exact(2)
        .map(|c| i16::from_le_bytes([c[0], c[1]]))
        .collect()
}

/// Duplicate mono samples into interleaved stereo; stereo input is returned unchanged.
pub fn to_stereo(samples: Vec<i16>, channels: u16) -> Vec<i16> {
    if channels == 1 {
        samples.into_iter().flat_map(|s| [s, s]).collect()
    } else {
        samples
    }
}

/// Collects samples into a WAV file.
pub struct WavSink {
    writer: hound::WavWriter<std::io::BufWriter<std::fs::File>>,
}

impl WavSink {
    pub fn create(path: &Path, config: &AudioConfig) -> anyhow::Result<Self> {
        let spec = hound::WavSpec {
            channels: config.channels,
            sample_rate: config.sample_rate,
            bits_per_sample: 16,
            sample_format: hound::SampleFormat::Int,
        };
        Ok(Self {
            writer: hound::WavWriter::create(path, spec)?,
        })
    }

    pub fn write(&mut self, samples: &[i16]) -> anyhow::Result<()> {
        for &sample in samples {
            self.writer.write_sample(sample)?;
        }
        Ok(())
    }

    pub fn finish(self) -> anyhow::Result<()> {
        self.writer.finalize()?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_config_is_one_callback_per_tick() {
        let config = AudioConfig::default();
        config.validate().unwrap();
        assert_eq!(config.frames_per_callback, config.sample_rate / 60);
        assert_eq!(config.samples_per_callback(), 1600);
    }

    #[test]
    fn invalid_configs_are_rejected() {
        let base = AudioConfig::default();
        for bad in [
            AudioConfig { sample_rate: 0, ..base },
            AudioConfig { channels: 0, ..base },
            AudioConfig { channels: 6, ..base },
            AudioConfig { frames_per_callback: 0, ..base },
        ] {
            assert!(matches!(bad.validate(), Err(BridgeError::InvalidConfig(_))));
        }
    }

    #[test]
    fn mono_is_duplicated_to_stereo() {
        assert_eq!(to_stereo(vec![1, -2], 1), vec![1, 1, -2, -2]);
        assert_eq!(to_stereo(vec![1, -2], 2), vec![1, -2]);
    }

    #[test]
    fn samples_decode_little_endian() {
        assert_eq!(samples_from_le_bytes(&[0x01, 0x00, 0xFF, 0xFF, 0x7F]), vec![1, -1]);
    }

    #[test]
    fn wav_sink_writes_all_samples() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("out.wav");
        let config = AudioConfig {
            sample_rate: 8_000,
            channels: 2,
            frames_per_callback: 4,
        };

        let mut sink = WavSink::create(&path, &config).unwrap();
        sink.write(&[0, 1, 2, 3, 4, 5, 6, 7]).unwrap();
        sink.finish().unwrap();

        let reader = hound::WavReader::open(&path).unwrap();
        assert_eq!(reader.spec().sample_rate, 8_000);
        assert_eq!(reader.len(), 8);
    }
}
