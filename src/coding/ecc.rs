use std::sync::Arc;

use serde::{Deserialize, Serialize};

use super::CodingError;

/// Redundancy layer between a code table and a bit-probability scorer.
///
/// `encode` expands an original code into the redundant pattern the scorer
/// is trained against; `decode` collapses a noisy probability vector of
/// encoded length back to original length. Decoding is soft and total: it
/// never fails, it only degrades.
pub trait ErrorCorrectingCode: Send + Sync {
    /// Encoded width for a given original width.
    fn encoded_bits(&self, original_bits: usize) -> usize;

    fn encode(&self, bits: &[bool]) -> Vec<bool>;

    /// Combine per-bit probability estimates (each in `[0, 1]`, the
    /// probability that the encoded bit is 1) into original-width estimates.
    /// Stable at the boundary values 0.0 and 1.0.
    fn decode(&self, probs: &[f32]) -> Vec<f32>;

    /// Self-describing parameters for the persisted structural record.
    fn spec(&self) -> EccSpec;
}

/// Pass-through codec: no redundancy, decode is the identity.
pub struct IdentityCode;

impl ErrorCorrectingCode for IdentityCode {
    fn encoded_bits(&self, original_bits: usize) -> usize {
        original_bits
    }

    fn encode(&self, bits: &[bool]) -> Vec<bool> {
        bits.to_vec()
    }

    fn decode(&self, probs: &[f32]) -> Vec<f32> {
        probs.to_vec()
    }

    fn spec(&self) -> EccSpec {
        EccSpec::Identity
    }
}

/// Repetition codec: each original bit is written `factor` times in a row,
/// and decoded as the arithmetic mean of its `factor` probability estimates.
/// Mean-combining needs no logarithms, so probabilities of exactly 0.0 or
/// 1.0 are handled as-is.
pub struct RepetitionCode {
    factor: usize,
}

impl RepetitionCode {
    pub fn new(factor: usize) -> Result<Self, CodingError> {
        if factor == 0 {
            return Err(CodingError::Config(
                "repetition factor must be at least 1".into(),
            ));
        }
        Ok(Self { factor })
    }

    pub fn factor(&self) -> usize {
        self.factor
    }
}

impl ErrorCorrectingCode for RepetitionCode {
    fn encoded_bits(&self, original_bits: usize) -> usize {
        original_bits * self.factor
    }

    fn encode(&self, bits: &[bool]) -> Vec<bool> {
        let mut out = Vec::with_capacity(bits.len() * self.factor);
        for &bit in bits {
            out.extend(std::iter::repeat(bit).take(self.factor));
        }
        out
    }

    fn decode(&self, probs: &[f32]) -> Vec<f32> {
        probs
            .chunks_exact(self.factor)
            .map(|chunk| chunk.iter().sum::<f32>() / self.factor as f32)
            .collect()
    }

    fn spec(&self) -> EccSpec {
        EccSpec::Repetition {
            factor: self.factor as u32,
        }
    }
}

/// Serializable description of a codec, sufficient to rebuild it.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum EccSpec {
    Identity,
    Repetition { factor: u32 },
}

impl EccSpec {
    pub fn build(&self) -> Result<Arc<dyn ErrorCorrectingCode>, CodingError> {
        match *self {
            EccSpec::Identity => Ok(Arc::new(IdentityCode)),
            EccSpec::Repetition { factor } => {
                Ok(Arc::new(RepetitionCode::new(factor as usize)?))
            }
        }
    }
}
