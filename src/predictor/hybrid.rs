use std::cmp::Ordering;
use std::sync::Arc;

use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use tracing::{debug, debug_span};

use crate::coding::{CodeTable, CodingError, ErrorCorrectingCode, INVALID_ID};

use super::{
    bit_log_prob_table, bit_loss, floored_ln, sample_bits, threshold_best, LossKind, Prediction,
    Predictor, PredictorError, Scorer,
};

/// Predicts frequent words through a small direct distribution and the
/// long tail through binary codes.
///
/// Word ids below `softmax_size` belong to the direct channel; every other
/// id is shifted down by `softmax_size` and coded. The direct distribution
/// has `softmax_size + 1` entries, its leading bucket meaning "the word is
/// on the binary channel", so a tail word's probability is the joint of
/// that bucket and its bit pattern.
pub struct HybridPredictor {
    softmax_size: usize,
    /// Code table over the tail vocabulary (ids shifted by `softmax_size`).
    code: Arc<CodeTable>,
    ecc: Arc<dyn ErrorCorrectingCode>,
    scorer: Box<dyn Scorer>,
    fallback_id: u32,
    loss_kind: LossKind,
    softmax_weight: f32,
    binary_weight: f32,
    num_encoded_bits: usize,
    rng: StdRng,
}

impl HybridPredictor {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        softmax_size: usize,
        code: Arc<CodeTable>,
        ecc: Arc<dyn ErrorCorrectingCode>,
        scorer: Box<dyn Scorer>,
        fallback_id: u32,
        loss_kind: LossKind,
        softmax_weight: f32,
        binary_weight: f32,
    ) -> Result<Self, PredictorError> {
        if softmax_size == 0 {
            return Err(PredictorError::Config(
                "softmax_size must be at least 1; use BinaryCodePredictor instead".into(),
            ));
        }
        if softmax_weight < 0.0 || binary_weight < 0.0 {
            return Err(PredictorError::Config(
                "channel weights must be non-negative".into(),
            ));
        }
        if softmax_weight == 0.0 && binary_weight == 0.0 {
            return Err(PredictorError::Config(
                "at least one channel weight must be positive".into(),
            ));
        }
        let vocab_size = softmax_size + code.vocab_size();
        if (fallback_id as usize) >= vocab_size {
            return Err(PredictorError::Config(format!(
                "fallback id {fallback_id} is outside the vocabulary of {vocab_size}"
            )));
        }
        let num_encoded_bits = ecc.encoded_bits(code.num_bits());
        Ok(Self {
            softmax_size,
            code,
            ecc,
            scorer,
            fallback_id,
            loss_kind,
            softmax_weight,
            binary_weight,
            num_encoded_bits,
            rng: StdRng::from_entropy(),
        })
    }

    /// Fixed RNG seed for reproducible sampling.
    pub fn with_rng_seed(mut self, seed: u64) -> Self {
        self.rng = StdRng::seed_from_u64(seed);
        self
    }

    /// Total vocabulary covered by both channels.
    pub fn vocab_size(&self) -> usize {
        self.softmax_size + self.code.vocab_size()
    }

    fn direct_probs(&mut self, hidden: &[f32]) -> Vec<f32> {
        let probs = self.scorer.score_direct(hidden);
        assert_eq!(
            probs.len(),
            self.softmax_size + 1,
            "scorer returned {} direct probabilities, expected {}",
            probs.len(),
            self.softmax_size + 1
        );
        probs
    }

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

    /// Code of a tail word, reported against the unshifted id on error.
    fn tail_code(&self, word_id: u32) -> Result<&[bool], PredictorError> {
        self.code
            .get_code(word_id - self.softmax_size as u32)
            .map_err(|_| PredictorError::Coding(CodingError::UnknownId(word_id)))
    }

    fn resolve_tail(&self, tail_id: u32) -> u32 {
        if tail_id == INVALID_ID {
            self.fallback_id
        } else {
            self.softmax_size as u32 + tail_id
        }
    }
}

impl Predictor for HybridPredictor {
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
            // Direct channel: negative log-likelihood of the target class,
            // bucket 0 standing in for any tail word.
            let direct = self.direct_probs(hidden);
            let class = if (target as usize) < self.softmax_size {
                target as usize + 1
            } else {
                0
            };
            loss -= self.softmax_weight * floored_ln(direct[class]);

            // Binary channel contributes only for tail words.
            if (target as usize) >= self.softmax_size {
                let encoded = self.ecc.encode(self.tail_code(target)?);
                let probs = self.scorer.score(hidden);
                if probs.len() != self.num_encoded_bits {
                    return Err(PredictorError::DimensionMismatch {
                        expected: self.num_encoded_bits,
                        actual: probs.len(),
                    });
                }
                let mut bits_loss = 0.0;
                for (&p, &bit) in probs.iter().zip(&encoded) {
                    bits_loss += bit_loss(self.loss_kind, p, f32::from(u8::from(bit)));
                }
                loss += self.binary_weight * bits_loss;
            }
        }
        Ok(loss)
    }

    fn predict_k_best(&mut self, hidden: &[f32], k: usize) -> Vec<Prediction> {
        if k == 0 {
            return Vec::new();
        }
        let _span = debug_span!("hybrid_k_best", k).entered();

        let direct = self.direct_probs(hidden);
        let decoded = self.decoded_probs(hidden);

        let mut results: Vec<Prediction> = (0..self.softmax_size)
            .map(|id| Prediction {
                word_id: id as u32,
                log_prob: floored_ln(direct[id + 1]),
            })
            .collect();

        // Best tail candidate rides the joint probability of the "tail"
        // bucket and its bit pattern.
        let (bits, bit_log_prob) = threshold_best(&decoded);
        results.push(Prediction {
            word_id: self.resolve_tail(self.code.get_id(&bits)),
            log_prob: floored_ln(direct[0]) + bit_log_prob,
        });

        results.sort_by(|a, b| {
            b.log_prob
                .partial_cmp(&a.log_prob)
                .unwrap_or(Ordering::Equal)
        });
        results.truncate(k);
        debug!(candidates = results.len());
        results
    }

    fn predict_by_ids(
        &mut self,
        hidden: &[f32],
        word_ids: &[u32],
    ) -> Result<Vec<Prediction>, PredictorError> {
        let direct = self.direct_probs(hidden);
        let decoded = self.decoded_probs(hidden);
        let table = bit_log_prob_table(&decoded);

        let mut results = Vec::with_capacity(word_ids.len());
        for &word_id in word_ids {
            let log_prob = if (word_id as usize) < self.softmax_size {
                floored_ln(direct[word_id as usize + 1])
            } else {
                let code = self.tail_code(word_id)?;
                let bits_log_prob: f32 = code
                    .iter()
                    .enumerate()
                    .map(|(i, &bit)| table[i][usize::from(bit)])
                    .sum();
                floored_ln(direct[0]) + bits_log_prob
            };
            results.push(Prediction { word_id, log_prob });
        }
        Ok(results)
    }

    fn sample(&mut self, hidden: &[f32]) -> Prediction {
        let direct = self.direct_probs(hidden);

        // Draw a direct class by cumulative probability; running off the
        // end of an under-normalized distribution lands in the tail bucket.
        let draw: f32 = self.rng.gen();
        let mut acc = 0.0;
        let mut class = 0;
        for (j, &p) in direct.iter().enumerate().skip(1) {
            acc += p;
            if draw < acc {
                class = j;
                break;
            }
        }

        if class > 0 {
            return Prediction {
                word_id: class as u32 - 1,
                log_prob: floored_ln(direct[class]),
            };
        }

        let decoded = self.decoded_probs(hidden);
        let (bits, bit_log_prob) = sample_bits(&mut self.rng, &decoded);
        Prediction {
            word_id: self.resolve_tail(self.code.get_id(&bits)),
            log_prob: floored_ln(direct[0]) + bit_log_prob,
        }
    }
}
