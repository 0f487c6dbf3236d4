//! buildkit-state - persist BuildKit builder state across CI runs
//!
//! Streams a builder container's state directory through zstd into a
//! key-addressed store after a build, and back into the container before
//! the next one.

pub mod cache;
pub mod cli;
pub mod compression;
pub mod config;
pub mod error;
pub mod orchestration;
pub mod pipeline;
pub mod session;
pub mod transfer;
pub mod ui;

pub use error::{StateError, StateResult};
