//! Word prediction over structured output codes.
//!
//! A predictor turns a hidden vector into ranked word candidates by asking
//! a caller-supplied [`Scorer`] for bit probabilities, denoising them
//! through the error-correcting codec, and looking the result up in the
//! code table. Two variants: a pure binary-code path and a hybrid that
//! scores a small closed vocabulary directly.

pub mod binary;
pub mod hybrid;

#[cfg(test)]
pub(crate) mod testutil;
#[cfg(test)]
mod tests;

pub use binary::BinaryCodePredictor;
pub use hybrid::HybridPredictor;

use rand::rngs::StdRng;
use rand::Rng;

use crate::coding::CodingError;

/// Floor used instead of `ln(0)` when scoring an impossible bit value.
pub const LOG_PROB_FLOOR: f32 = -1e10;

/// Clamp bound keeping cross-entropy finite at saturated probabilities.
const PROB_EPS: f32 = 1e-7;

/// One ranked candidate. A plain value, no identity.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Prediction {
    pub word_id: u32,
    pub log_prob: f32,
}

/// Loss applied per bit during training.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LossKind {
    /// Binary cross-entropy with clamped probabilities.
    CrossEntropy,
    /// Squared difference between probability and target bit.
    Squared,
}

#[derive(Debug, thiserror::Error)]
pub enum PredictorError {
    #[error("invalid configuration: {0}")]
    Config(String),

    #[error("dimension mismatch: expected {expected}, got {actual}")]
    DimensionMismatch { expected: usize, actual: usize },

    #[error(transparent)]
    Coding(#[from] CodingError),
}

/// External scoring capability: a stateful collaborator turning a hidden
/// vector into probabilities. Calls are non-reentrant and strictly ordered;
/// the core never invokes a scorer concurrently.
pub trait Scorer {
    /// Reset per-batch precomputed state. Default is a no-op.
    fn prepare(&mut self) {}

    /// Probability that each encoded bit is 1, one entry per encoded bit.
    fn score(&mut self, hidden: &[f32]) -> Vec<f32>;

    /// Direct-vocabulary distribution for the hybrid predictor: one entry
    /// per direct class plus the leading "outside" bucket. Scorers without
    /// a direct channel keep the default.
    fn score_direct(&mut self, hidden: &[f32]) -> Vec<f32> {
        let _ = hidden;
        Vec::new()
    }
}

/// The five-operation prediction capability shared by all variants.
pub trait Predictor {
    /// Reset per-step cached state before a new batch or sentence.
    fn prepare(&mut self);

    /// Summed loss over a batch of `(hidden vector, target id)` pairs.
    fn compute_loss(
        &mut self,
        hiddens: &[Vec<f32>],
        target_ids: &[u32],
    ) -> Result<f32, PredictorError>;

    /// Up to `k` candidates, best first.
    fn predict_k_best(&mut self, hidden: &[f32], k: usize) -> Vec<Prediction>;

    /// Score a fixed candidate set without enumerating the vocabulary.
    fn predict_by_ids(
        &mut self,
        hidden: &[f32],
        word_ids: &[u32],
    ) -> Result<Vec<Prediction>, PredictorError>;

    /// Draw one candidate from the predicted distribution.
    fn sample(&mut self, hidden: &[f32]) -> Prediction;
}

/// `ln(p)` with the nmt-style floor for zero probabilities.
pub(crate) fn floored_ln(p: f32) -> f32 {
    if p > 0.0 {
        p.ln()
    } else {
        LOG_PROB_FLOOR
    }
}

pub(crate) fn bit_loss(kind: LossKind, prob: f32, target: f32) -> f32 {
    match kind {
        LossKind::CrossEntropy => {
            let p = prob.clamp(PROB_EPS, 1.0 - PROB_EPS);
            -(target * p.ln() + (1.0 - target) * (1.0 - p).ln())
        }
        LossKind::Squared => (prob - target) * (prob - target),
    }
}

/// Pick the more likely value of each bit; returns the bit pattern and the
/// summed log-probability of the choices. Both branches stay away from
/// `ln(0)`: the chosen probability is always at least 0.5.
pub(crate) fn threshold_best(decoded: &[f32]) -> (Vec<bool>, f32) {
    let mut bits = vec![false; decoded.len()];
    let mut log_prob = 0.0;
    for (i, &x) in decoded.iter().enumerate() {
        if x >= 0.5 {
            bits[i] = true;
            log_prob += x.ln();
        } else {
            log_prob += (1.0 - x).ln();
        }
    }
    (bits, log_prob)
}

/// Per-bit log-probability table `[P(bit=0), P(bit=1)]` with impossible
/// values floored, mirroring the saturation handling of the original
/// binary-code predictor.
pub(crate) fn bit_log_prob_table(decoded: &[f32]) -> Vec<[f32; 2]> {
    let mut table = vec![[LOG_PROB_FLOOR; 2]; decoded.len()];
    for (i, &x) in decoded.iter().enumerate() {
        if x >= 0.5 {
            table[i][1] = x.ln();
            if x < 1.0 {
                table[i][0] = (1.0 - x).ln();
            }
        } else {
            table[i][0] = (1.0 - x).ln();
            if x > 0.0 {
                table[i][1] = x.ln();
            }
        }
    }
    table
}

/// Draw each bit independently from its decoded probability. The chosen
/// branch always has positive probability, so the log is finite.
pub(crate) fn sample_bits(rng: &mut StdRng, decoded: &[f32]) -> (Vec<bool>, f32) {
    let mut bits = vec![false; decoded.len()];
    let mut log_prob = 0.0;
    for (i, &x) in decoded.iter().enumerate() {
        let p = x.clamp(0.0, 1.0);
        if rng.gen_bool(f64::from(p)) {
            bits[i] = true;
            log_prob += p.ln();
        } else {
            log_prob += (1.0 - p).ln();
        }
    }
    (bits, log_prob)
}
