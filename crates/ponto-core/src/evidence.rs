use crate::types::{FrameSnapshot, Timestamp};
use std::path::PathBuf;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum EvidenceError {
    #[error("frame buffer is {got} bytes, expected {expected} for {width}x{height} RGB")]
    InvalidFrame {
        width: u32,
        height: u32,
        expected: usize,
        got: usize,
    },
    #[error("io: {0}")]
    Io(#[from] std::io::Error),
    #[error("encode: {0}")]
    Encode(String),
}

/// Destination for frames of unresolved faces.
///
/// Called off the decision path; failures are logged by the caller.
pub trait EvidenceSink: Send + Sync {
    fn save(&self, frame: &FrameSnapshot, at: Timestamp) -> Result<PathBuf, EvidenceError>;
}
