//! Streaming compression stages
//!
//! The compressor is an external `zstd` process placed in the middle of a
//! pipeline. Orchestration only sees the [`StreamCodec`] trait, so tests can
//! swap in a pass-through transform.

pub mod install;
pub mod probe;

pub use probe::{CompressorInfo, CompressorProbe, MIN_LONG_WINDOW_VERSION};

use crate::error::{StateError, StateResult};
use crate::pipeline::{ByteTransform, StageCommand};
use std::fmt;

/// Log2 size of the long-distance-matching window
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub struct CompressionWindow(u32);

impl CompressionWindow {
    /// Smallest window zstd accepts
    pub const MIN: u32 = 10;
    /// Largest window zstd accepts
    pub const MAX: u32 = 31;

    /// Validate a log2 window size
    pub fn new(log2: u32) -> StateResult<Self> {
        if (Self::MIN..=Self::MAX).contains(&log2) {
            Ok(Self(log2))
        } else {
            Err(StateError::InvalidWindow(log2))
        }
    }

    /// Log2 of the window size
    pub fn log2(self) -> u32 {
        self.0
    }
}

impl fmt::Display for CompressionWindow {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Builds the encode and decode transforms of a pipeline
pub trait StreamCodec: Send + Sync {
    /// Transform compressing stdin to stdout
    fn encode(&self, window: Option<CompressionWindow>) -> ByteTransform;

    /// Transform decompressing stdin to stdout
    fn decode(&self, window: Option<CompressionWindow>) -> ByteTransform;
}

/// The `zstd` command line compressor
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Zstd {
    program: String,
    level: i32,
    threads: u32,
}

impl Zstd {
    /// Highest level zstd accepts without `--ultra`
    pub const MAX_REGULAR_LEVEL: i32 = 19;
    /// Highest level zstd accepts at all
    pub const MAX_LEVEL: i32 = 22;

    /// Create a zstd codec. `threads == 0` lets zstd use every core.
    pub fn new(program: impl Into<String>, level: i32, threads: u32) -> StateResult<Self> {
        if !(1..=Self::MAX_LEVEL).contains(&level) {
            return Err(StateError::InvalidCompressionLevel(level));
        }
        Ok(Self {
            program: program.into(),
            level,
            threads,
        })
    }

    /// Program invoked for every stage
    pub fn program(&self) -> &str {
        &self.program
    }

    /// Configured compression level
    pub fn level(&self) -> i32 {
        self.level
    }
}

impl StreamCodec for Zstd {
    fn encode(&self, window: Option<CompressionWindow>) -> ByteTransform {
        let mut cmd = StageCommand::new("encode", &self.program).arg(format!("-{}", self.level));
        if self.level > Self::MAX_REGULAR_LEVEL {
            cmd = cmd.arg("--ultra");
        }
        cmd = cmd.arg(format!("-T{}", self.threads));
        if let Some(window) = window {
            cmd = cmd.arg(format!("--long={}", window));
        }
        ByteTransform(cmd.args(["-c", "-q"]))
    }

    fn decode(&self, window: Option<CompressionWindow>) -> ByteTransform {
        let mut cmd = StageCommand::new("decode", &self.program).arg("-d");
        if let Some(window) = window {
            cmd = cmd.arg(format!("--long={}", window));
        }
        ByteTransform(cmd.args(["-c", "-q"]))
    }
}
