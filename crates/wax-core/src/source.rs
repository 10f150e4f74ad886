//! Audio sources: decoded mono PCM buffers a turntable plays from
//!
//! A source is immutable once loaded. Turntables swap sources wholesale
//! on reload and never mutate the sample data while playing.

use std::path::{Path, PathBuf};

use thiserror::Error;

/// Errors from the sample loading path
///
/// All of these are non-fatal to a running engine: a failed load leaves
/// the turntable in its previous state.
#[derive(Debug, Error)]
pub enum LoadError {
    #[error("failed to open {path}: {source}")]
    Open {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("malformed audio file: {0}")]
    Malformed(#[from] hound::Error),

    #[error("unsupported sample format: {0}")]
    UnsupportedFormat(String),

    #[error("file contains no samples")]
    Empty,
}

/// A decoded mono 16-bit sample buffer and its native sample rate
#[derive(Debug, Clone)]
pub struct AudioSource {
    samples: Vec<i16>,
    sample_rate: u32,
    path: Option<PathBuf>,
}

impl AudioSource {
    /// Build a source from raw mono samples (used by tests and by
    /// applications that decode through another path)
    pub fn from_samples(samples: Vec<i16>, sample_rate: u32) -> Result<Self, LoadError> {
        if samples.is_empty() {
            return Err(LoadError::Empty);
        }
        Ok(Self {
            samples,
            sample_rate,
            path: None,
        })
    }

    /// Load a WAV file, downmixing multi-channel content to mono
    pub fn load_wav(path: &Path) -> Result<Self, LoadError> {
        let file = std::fs::File::open(path).map_err(|e| LoadError::Open {
            path: path.to_path_buf(),
            source: e,
        })?;
        let mut reader = hound::WavReader::new(std::io::BufReader::new(file))?;
        let spec = reader.spec();
        let channels = spec.channels as usize;

        if channels == 0 {
            return Err(LoadError::UnsupportedFormat("zero channels".to_string()));
        }

        let interleaved: Vec<i16> = match (spec.sample_format, spec.bits_per_sample) {
            (hound::SampleFormat::Int, 16) => {
                reader.samples::<i16>().collect::<Result<_, _>>()?
            }
            (hound::SampleFormat::Int, bits @ (24 | 32)) => {
                let shift = bits - 16;
                reader
                    .samples::<i32>()
                    .map(|s| s.map(|v| (v >> shift) as i16))
                    .collect::<Result<_, _>>()?
            }
            (hound::SampleFormat::Float, 32) => reader
                .samples::<f32>()
                .map(|s| s.map(|v| (v.clamp(-1.0, 1.0) * i16::MAX as f32) as i16))
                .collect::<Result<_, _>>()?,
            (format, bits) => {
                return Err(LoadError::UnsupportedFormat(format!(
                    "{:?} {} bit",
                    format, bits
                )))
            }
        };

        let samples: Vec<i16> = if channels == 1 {
            interleaved
        } else {
            interleaved
                .chunks_exact(channels)
                .map(|frame| {
                    let sum: i32 = frame.iter().map(|&s| s as i32).sum();
                    (sum / channels as i32) as i16
                })
                .collect()
        };

        if samples.is_empty() {
            return Err(LoadError::Empty);
        }

        log::info!(
            "Loaded {:?}: {} samples, {} Hz, {} channel(s)",
            path,
            samples.len(),
            spec.sample_rate,
            channels
        );

        Ok(Self {
            samples,
            sample_rate: spec.sample_rate,
            path: Some(path.to_path_buf()),
        })
    }

    pub fn samples(&self) -> &[i16] {
        &self.samples
    }

    pub fn len(&self) -> usize {
        self.samples.len()
    }

    pub fn is_empty(&self) -> bool {
        self.samples.is_empty()
    }

    pub fn sample_rate(&self) -> u32 {
        self.sample_rate
    }

    pub fn path(&self) -> Option<&Path> {
        self.path.as_deref()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn write_wav(path: &Path, channels: u16, rate: u32, frames: &[i16]) {
        let spec = hound::WavSpec {
            channels,
            sample_rate: rate,
            bits_per_sample: 16,
            sample_format: hound::SampleFormat::Int,
        };
        let mut writer = hound::WavWriter::create(path, spec).unwrap();
        for &s in frames {
            writer.write_sample(s).unwrap();
        }
        writer.finalize().unwrap();
    }

    #[test]
    fn test_empty_rejected() {
        assert!(matches!(
            AudioSource::from_samples(vec![], 44100),
            Err(LoadError::Empty)
        ));
    }

    #[test]
    fn test_load_mono_wav() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("mono.wav");
        write_wav(&path, 1, 22050, &[0, 100, -100, 32000]);

        let source = AudioSource::load_wav(&path).unwrap();
        assert_eq!(source.sample_rate(), 22050);
        assert_eq!(source.samples(), &[0, 100, -100, 32000]);
    }

    #[test]
    fn test_stereo_downmix_averages() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("stereo.wav");
        // frames: (100, 300), (-200, 0)
        write_wav(&path, 2, 44100, &[100, 300, -200, 0]);

        let source = AudioSource::load_wav(&path).unwrap();
        assert_eq!(source.samples(), &[200, -100]);
    }

    #[test]
    fn test_missing_file() {
        let err = AudioSource::load_wav(Path::new("/no/such/file.wav"));
        assert!(matches!(err, Err(LoadError::Open { .. })));
    }
}
