//! Wax Core - Real-time virtual turntable ("scratching") engine

pub mod audio;
pub mod config;
pub mod types;
pub mod source;
pub mod fx;
pub mod param;
pub mod engine;

pub use types::*;
