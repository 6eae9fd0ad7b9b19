use std::sync::Arc;

use rand::rngs::StdRng;
use rand::SeedableRng;
use tracing::debug_span;

use crate::coding::{CodeTable, ErrorCorrectingCode, INVALID_ID};

use super::{
    bit_log_prob_table, bit_loss, sample_bits, threshold_best, LossKind, Prediction, Predictor,
    PredictorError, Scorer,
};

/// Predicts words purely through their error-corrected binary codes.
///
/// The scorer emits one probability per encoded bit; decoding denoises
/// them back to original-code width, and the best bit pattern is looked up
/// in the shared code table. An unresolvable pattern maps to the
/// configured fallback id, never an error: a single bad pattern must not
/// abort a whole beam search.
pub struct BinaryCodePredictor {
    code: Arc<CodeTable>,
    ecc: Arc<dyn ErrorCorrectingCode>,
    scorer: Box<dyn Scorer>,
    fallback_id: u32,
    loss_kind: LossKind,
    num_original_bits: usize,
    num_encoded_bits: usize,
    rng: StdRng,
}

impl BinaryCodePredictor {
    pub fn new(
        code: Arc<CodeTable>,
        ecc: Arc<dyn ErrorCorrectingCode>,
        scorer: Box<dyn Scorer>,
        fallback_id: u32,
        loss_kind: LossKind,
    ) -> Result<Self, PredictorError> {
        if (fallback_id as usize) >= code.vocab_size() {
            return Err(PredictorError::Config(format!(
                "fallback id {fallback_id} is outside the vocabulary of {}",
                code.vocab_size()
            )));
        }
        let num_original_bits = code.num_bits();
        let num_encoded_bits = ecc.encoded_bits(num_original_bits);
        Ok(Self {
            code,
            ecc,
            scorer,
            fallback_id,
            loss_kind,
            num_original_bits,
            num_encoded_bits,
            rng: StdRng::from_entropy(),
        })
    }

    /// Fixed RNG seed for reproducible sampling.
    pub fn with_rng_seed(mut self, seed: u64) -> Self {
        self.rng = StdRng::seed_from_u64(seed);
        self
    }

    pub fn num_original_bits(&self) -> usize {
        self.num_original_bits
    }

    pub fn num_encoded_bits(&self) -> usize {
        self.num_encoded_bits
    }

    /// Score one hidden vector and denoise to original-code width.
    fn decoded_probs(&mut self, hidden: &[f32]) -> Vec<f32> {
        let probs = self.scorer.score(hidden);
        assert_eq!(
            probs.len(),
            self.num_encoded_bits,
            "scorer returned {} bit probabilities, expected {}",
            probs.len(),
            self.num_encoded_bits
        );
        self.ecc.decode(&probs)
    }

    fn resolve(&self, word_id: u32) -> u32 {
        if word_id == INVALID_ID {
            self.fallback_id
        } else {
            word_id
        }
    }
}

impl Predictor for BinaryCodePredictor {
    fn prepare(&mut self) {
        self.scorer.prepare();
    }

    fn compute_loss(
        &mut self,
        hiddens: &[Vec<f32>],
        target_ids: &[u32],
    ) -> Result<f32, PredictorError> {
        if hiddens.len() != target_ids.len() {
            return Err(PredictorError::DimensionMismatch {
                expected: hiddens.len(),
                actual: target_ids.len(),
            });
        }

        let mut loss = 0.0;
        for (hidden, &target) in hiddens.iter().zip(target_ids) {
            let encoded = self.ecc.encode(self.code.get_code(target)?);
            let probs = self.scorer.score(hidden);
            if probs.len() != self.num_encoded_bits {
                return Err(PredictorError::DimensionMismatch {
                    expected: self.num_encoded_bits,
                    actual: probs.len(),
                });
            }
            for (&p, &bit) in probs.iter().zip(&encoded) {
                loss += bit_loss(self.loss_kind, p, f32::from(u8::from(bit)));
            }
        }
        Ok(loss)
    }

    /// The binary channel yields exactly one candidate: the bitwise argmax.
    /// Enumerating runners-up would require a vocabulary-wide search, which
    /// is what this predictor exists to avoid.
    fn predict_k_best(&mut self, hidden: &[f32], k: usize) -> Vec<Prediction> {
        if k == 0 {
            return Vec::new();
        }
        let _span = debug_span!("predict_k_best", k).entered();
        let decoded = self.decoded_probs(hidden);
        let (bits, log_prob) = threshold_best(&decoded);
        vec![Prediction {
            word_id: self.resolve(self.code.get_id(&bits)),
            log_prob,
        }]
    }

    fn predict_by_ids(
        &mut self,
        hidden: &[f32],
        word_ids: &[u32],
    ) -> Result<Vec<Prediction>, PredictorError> {
        let decoded = self.decoded_probs(hidden);
        let table = bit_log_prob_table(&decoded);

        let mut results = Vec::with_capacity(word_ids.len());
        for &word_id in word_ids {
            let code = self.code.get_code(word_id)?;
            let log_prob = code
                .iter()
                .enumerate()
                .map(|(i, &bit)| table[i][usize::from(bit)])
                .sum();
            results.push(Prediction { word_id, log_prob });
        }
        Ok(results)
    }

    fn sample(&mut self, hidden: &[f32]) -> Prediction {
        let decoded = self.decoded_probs(hidden);
        let (bits, log_prob) = sample_bits(&mut self.rng, &decoded);
        Prediction {
            word_id: self.resolve(self.code.get_id(&bits)),
            log_prob,
        }
    }
}
