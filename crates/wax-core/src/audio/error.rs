use thiserror::Error;

#[derive(Debug, Error)]
pub enum AudioError {
    #[error("no audio output devices available")]
    NoDevices,

    #[error("no default audio output device")]
    NoDefaultDevice,

    #[error("audio output device not found: {0}")]
    DeviceNotFound(String),

    #[error("failed to query device configuration: {0}")]
    ConfigError(String),

    #[error("no supported output configuration")]
    UnsupportedFormat,

    #[error("failed to build audio stream: {0}")]
    StreamBuild(#[from] cpal::BuildStreamError),

    #[error("failed to start audio stream: {0}")]
    StreamPlay(#[from] cpal::PlayStreamError),

    #[error("audio device is not open")]
    NotOpen,

    #[error("engine is already running")]
    AlreadyRunning,
}

pub type AudioResult<T> = Result<T, AudioError>;
