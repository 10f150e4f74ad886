//! cpal-backed output device
//!
//! The callback owns a `BlockCursor` and pulls rendered blocks on demand;
//! the engine's 1 ms blocks are re-chunked to whatever callback size the
//! backend settles on. The device's native channel layout is adapted from
//! the engine's stereo: mono gets a downmix, extra channels get silence.

use std::time::Duration;

use cpal::traits::{DeviceTrait, HostTrait, StreamTrait};

use crate::engine::{BlockCursor, RenderFeed};
use crate::types::DEFAULT_SAMPLE_RATE;

use super::device::AudioDevice;
use super::error::{AudioError, AudioResult};

pub struct CpalDevice {
    preferred: Option<String>,
    buffer_size: Option<u32>,
    device: Option<cpal::Device>,
    config: Option<cpal::SupportedStreamConfig>,
}

impl CpalDevice {
    pub fn new(preferred: Option<String>, buffer_size: Option<u32>) -> Self {
        Self {
            preferred,
            buffer_size,
            device: None,
            config: None,
        }
    }

    pub fn from_config(config: &crate::config::EngineConfig) -> Self {
        Self::new(config.output_device.clone(), config.buffer_size)
    }
}

fn stream_error(err: cpal::StreamError) {
    log::error!("audio: stream error: {}", err);
}

/// Distribute interleaved stereo frames into the device's channel layout
fn spread_frames<T: Copy + Default>(
    data: &mut [T],
    stereo: &[T],
    channels: usize,
    mono_mix: impl Fn(T, T) -> T,
) {
    for (frame, src) in data.chunks_mut(channels).zip(stereo.chunks(2)) {
        if channels == 1 {
            frame[0] = mono_mix(src[0], src[1]);
        } else {
            frame[0] = src[0];
            frame[1] = src[1];
            for extra in frame[2..].iter_mut() {
                *extra = T::default();
            }
        }
    }
}

impl AudioDevice for CpalDevice {
    fn open(&mut self) -> AudioResult<()> {
        let host = cpal::default_host();

        let device = match &self.preferred {
            Some(name) => {
                let mut devices = host
                    .output_devices()
                    .map_err(|e| AudioError::ConfigError(e.to_string()))?;
                devices
                    .find(|d| d.name().map(|n| n == *name).unwrap_or(false))
                    .ok_or_else(|| AudioError::DeviceNotFound(name.clone()))?
            }
            None => host
                .default_output_device()
                .ok_or(AudioError::NoDefaultDevice)?,
        };

        let config = device
            .default_output_config()
            .map_err(|e| AudioError::ConfigError(e.to_string()))?;

        log::info!(
            "audio: opened '{}' at {} Hz, {} channels, {:?}",
            device.name().unwrap_or_else(|_| "<unknown>".to_string()),
            config.sample_rate().0,
            config.channels(),
            config.sample_format()
        );

        self.device = Some(device);
        self.config = Some(config);
        Ok(())
    }

    fn close(&mut self) {
        self.device = None;
        self.config = None;
    }

    fn is_open(&self) -> bool {
        self.device.is_some()
    }

    fn sample_rate(&self) -> u32 {
        self.config
            .as_ref()
            .map_or(DEFAULT_SAMPLE_RATE, |c| c.sample_rate().0)
    }

    fn buffer_frames(&self) -> Option<u32> {
        self.buffer_size
    }

    fn run(&mut self, feed: RenderFeed) -> AudioResult<()> {
        let device = self.device.as_ref().ok_or(AudioError::NotOpen)?;
        let supported = self.config.clone().ok_or(AudioError::NotOpen)?;

        let channels = supported.channels() as usize;
        let mut config: cpal::StreamConfig = supported.config();
        if let Some(frames) = self.buffer_size {
            config.buffer_size = cpal::BufferSize::Fixed(frames);
        }

        let stream = match supported.sample_format() {
            cpal::SampleFormat::F32 => {
                let mut cursor = BlockCursor::new(feed.clone());
                let mut stereo: Vec<f32> = Vec::new();
                device.build_output_stream(
                    &config,
                    move |data: &mut [f32], _: &cpal::OutputCallbackInfo| {
                        let frames = data.len() / channels;
                        stereo.resize(frames * 2, 0.0);
                        cursor.fill_f32(&mut stereo);
                        spread_frames(data, &stereo, channels, |l, r| (l + r) * 0.5);
                    },
                    stream_error,
                    None,
                )?
            }
            cpal::SampleFormat::I16 => {
                let mut cursor = BlockCursor::new(feed.clone());
                let mut stereo: Vec<i16> = Vec::new();
                device.build_output_stream(
                    &config,
                    move |data: &mut [i16], _: &cpal::OutputCallbackInfo| {
                        let frames = data.len() / channels;
                        stereo.resize(frames * 2, 0);
                        cursor.fill(&mut stereo);
                        spread_frames(data, &stereo, channels, |l, r| {
                            ((l as i32 + r as i32) / 2) as i16
                        });
                    },
                    stream_error,
                    None,
                )?
            }
            other => {
                log::error!("audio: unsupported sample format {:?}", other);
                return Err(AudioError::UnsupportedFormat);
            }
        };

        stream.play()?;

        while !feed.should_stop() {
            std::thread::sleep(Duration::from_millis(10));
        }
        drop(stream);
        Ok(())
    }
}
