//! Output device abstraction
//!
//! The engine thread hands control to the device: `run` owns the calling
//! thread until the feed signals stop, pulling rendered blocks on the
//! device's schedule. This keeps the render path pull-driven regardless of
//! how the underlying backend delivers its callbacks.

use crate::engine::RenderFeed;

use super::error::AudioResult;

pub trait AudioDevice: Send {
    /// Negotiate and claim the output device
    fn open(&mut self) -> AudioResult<()>;

    fn close(&mut self);

    fn is_open(&self) -> bool;

    /// Negotiated output rate; only meaningful after `open`
    fn sample_rate(&self) -> u32;

    /// Requested callback period in frames, if the backend honors one
    fn buffer_frames(&self) -> Option<u32> {
        None
    }

    /// Stream audio until `feed.should_stop()`; returns when playback has
    /// been torn down
    fn run(&mut self, feed: RenderFeed) -> AudioResult<()>;
}
