//! Audio output backends

mod cpal_backend;
mod device;
mod error;

pub use cpal_backend::CpalDevice;
pub use device::AudioDevice;
pub use error::{AudioError, AudioResult};
