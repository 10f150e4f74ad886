//! Engine core: turntables, the mixer, and the render runtime

#[allow(clippy::module_inception)]
mod engine;
mod mixer;
mod turntable;

pub use engine::{BlockCursor, Engine, RenderFeed, Session, SharedSession};
pub use mixer::{ControlError, Mixer};
pub use turntable::{SyncPulse, Turntable};
