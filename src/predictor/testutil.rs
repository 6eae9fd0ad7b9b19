use std::sync::Arc;

use crate::coding::{CodeTable, CodeTableState, ErrorCorrectingCode, IdentityCode};

use super::Scorer;

/// Scorer returning the same canned probabilities on every call.
pub(crate) struct FixedScorer {
    pub bit_probs: Vec<f32>,
    pub direct_probs: Vec<f32>,
}

impl FixedScorer {
    pub fn bits(bit_probs: &[f32]) -> Self {
        Self {
            bit_probs: bit_probs.to_vec(),
            direct_probs: Vec::new(),
        }
    }

    pub fn with_direct(bit_probs: &[f32], direct_probs: &[f32]) -> Self {
        Self {
            bit_probs: bit_probs.to_vec(),
            direct_probs: direct_probs.to_vec(),
        }
    }
}

impl Scorer for FixedScorer {
    fn score(&mut self, _hidden: &[f32]) -> Vec<f32> {
        self.bit_probs.clone()
    }

    fn score_direct(&mut self, _hidden: &[f32]) -> Vec<f32> {
        self.direct_probs.clone()
    }
}

/// 5-word table with depths 1, 2, 3, 4, 4: codes 0000, 1000, 1100, 1110,
/// 1111 (zero-padded to 4 bits).
pub(crate) fn spine_table() -> Arc<CodeTable> {
    Arc::new(
        CodeTable::from_frequencies(&[(0, 8), (1, 4), (2, 2), (3, 1), (4, 1)]).unwrap(),
    )
}

/// 4-word uniform table: codes 00, 01, 10, 11.
pub(crate) fn uniform_table() -> Arc<CodeTable> {
    Arc::new(CodeTable::from_frequencies(&[(0, 1), (1, 1), (2, 1), (3, 1)]).unwrap())
}

/// 3-word table restored from a pruned code set {00, 01, 10}; the 11
/// branch decodes to `INVALID_ID`.
pub(crate) fn pruned_table() -> Arc<CodeTable> {
    let bits = [false, false, false, true, true, false];
    let mut packed = vec![0u8; 1];
    for (i, &bit) in bits.iter().enumerate() {
        if bit {
            packed[i / 8] |= 1 << (i % 8);
        }
    }
    let state = CodeTableState {
        vocab_size: 3,
        num_bits: 2,
        code_lens: vec![2, 2, 2],
        packed_bits: packed,
    };
    Arc::new(CodeTable::from_state(&state).unwrap())
}

pub(crate) fn identity() -> Arc<dyn ErrorCorrectingCode> {
    Arc::new(IdentityCode)
}
