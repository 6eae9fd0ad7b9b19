//! Structured output coding for a large vocabulary.
//!
//! `CodeTable` assigns each word a frequency-weighted prefix-free bit
//! pattern; `ErrorCorrectingCode` wraps it with redundancy so noisy bit
//! probabilities still decode to the intended word. `StructuralState`
//! persists both in one versioned record, separate from any learned
//! scorer weights.

pub mod ecc;
pub mod huffman;
mod model_io;

#[cfg(test)]
mod tests;

pub use ecc::{EccSpec, ErrorCorrectingCode, IdentityCode, RepetitionCode};
pub use huffman::{CodeTable, CodeTableState, INVALID_ID};
pub use model_io::StructuralState;

/// Unified error type for code construction and structural-state I/O.
#[derive(Debug, thiserror::Error)]
pub enum CodingError {
    #[error("invalid configuration: {0}")]
    Config(String),

    #[error("unknown word id: {0}")]
    UnknownId(u32),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("invalid header (too short)")]
    InvalidHeader,

    #[error("invalid magic bytes (expected TRLC)")]
    InvalidMagic,

    #[error("unsupported version: {0}")]
    UnsupportedVersion(u8),

    #[error("corrupted structural state: {0}")]
    Corrupted(String),

    #[error("serialization error: {0}")]
    Serialize(bincode::Error),

    #[error("deserialization error: {0}")]
    Deserialize(bincode::Error),
}
