//! A candle-backed bit scorer.
//!
//! One concrete [`Scorer`] implementation: a small MLP projecting a hidden
//! vector onto encoded-bit probabilities, with an optional direct-channel
//! head for the hybrid predictor. Training the weights is out of scope;
//! this exists so the predictor stack can be exercised against a real
//! model rather than canned probabilities.

use candle_core::{DType, Device, Tensor};
use candle_nn::{linear, Linear, Module, VarBuilder, VarMap};
use std::path::Path;
use tracing::debug;

use crate::predictor::Scorer;

pub struct MlpScorer {
    hidden: Linear,
    output: Linear,
    direct: Option<Linear>,
    input_size: usize,
    encoded_bits: usize,
    direct_classes: usize,
    device: Device,
    varmap: VarMap,
}

impl MlpScorer {
    /// Fresh scorer with randomly initialized weights and no direct head.
    pub fn new(input_size: usize, proj_size: usize, encoded_bits: usize) -> anyhow::Result<Self> {
        Self::build(input_size, proj_size, encoded_bits, 0)
    }

    /// Fresh scorer that also produces a direct distribution of
    /// `direct_classes` entries (the hybrid predictor expects
    /// `softmax_size + 1`).
    pub fn with_direct_channel(
        input_size: usize,
        proj_size: usize,
        encoded_bits: usize,
        direct_classes: usize,
    ) -> anyhow::Result<Self> {
        anyhow::ensure!(direct_classes >= 2, "direct channel needs at least 2 classes");
        Self::build(input_size, proj_size, encoded_bits, direct_classes)
    }

    fn build(
        input_size: usize,
        proj_size: usize,
        encoded_bits: usize,
        direct_classes: usize,
    ) -> anyhow::Result<Self> {
        anyhow::ensure!(input_size > 0, "input_size must be positive");
        anyhow::ensure!(proj_size > 0, "proj_size must be positive");
        anyhow::ensure!(encoded_bits > 0, "encoded_bits must be positive");

        let device = Device::Cpu;
        let varmap = VarMap::new();
        let vb = VarBuilder::from_varmap(&varmap, DType::F32, &device);
        let hidden = linear(input_size, proj_size, vb.pp("hidden"))?;
        let output = linear(proj_size, encoded_bits, vb.pp("output"))?;
        let direct = if direct_classes > 0 {
            Some(linear(proj_size, direct_classes, vb.pp("direct"))?)
        } else {
            None
        };

        Ok(Self {
            hidden,
            output,
            direct,
            input_size,
            encoded_bits,
            direct_classes,
            device,
            varmap,
        })
    }

    /// Overwrite the weights from a safetensors file.
    pub fn load_weights(&mut self, path: &Path) -> anyhow::Result<()> {
        self.varmap.load(path)?;
        Ok(())
    }

    pub fn save_weights(&self, path: &Path) -> anyhow::Result<()> {
        self.varmap.save(path)?;
        Ok(())
    }

    pub fn encoded_bits(&self) -> usize {
        self.encoded_bits
    }

    fn project(&self, hidden: &[f32]) -> anyhow::Result<Tensor> {
        anyhow::ensure!(
            hidden.len() == self.input_size,
            "hidden vector has {} entries, model expects {}",
            hidden.len(),
            self.input_size
        );
        let x = Tensor::from_vec(hidden.to_vec(), (1, hidden.len()), &self.device)?;
        Ok(self.hidden.forward(&x)?.tanh()?)
    }

    fn bit_probs(&self, hidden: &[f32]) -> anyhow::Result<Vec<f32>> {
        let h = self.project(hidden)?;
        let logits = self.output.forward(&h)?;
        let probs = candle_nn::ops::sigmoid(&logits)?;
        Ok(probs.squeeze(0)?.to_vec1::<f32>()?)
    }

    fn direct_probs(&self, hidden: &[f32]) -> anyhow::Result<Vec<f32>> {
        let Some(direct) = &self.direct else {
            return Ok(Vec::new());
        };
        let h = self.project(hidden)?;
        let logits = direct.forward(&h)?;
        let probs = candle_nn::ops::softmax(&logits, 1)?;
        Ok(probs.squeeze(0)?.to_vec1::<f32>()?)
    }
}

impl Scorer for MlpScorer {
    /// Scoring never fails upward: on a model error the bits degrade to
    /// maximum uncertainty and the failure is traced, the same policy as
    /// falling back from a broken neural reranker.
    fn score(&mut self, hidden: &[f32]) -> Vec<f32> {
        match self.bit_probs(hidden) {
            Ok(probs) => probs,
            Err(e) => {
                debug!("bit scoring failed, degrading to uniform: {e}");
                vec![0.5; self.encoded_bits]
            }
        }
    }

    fn score_direct(&mut self, hidden: &[f32]) -> Vec<f32> {
        match self.direct_probs(hidden) {
            Ok(probs) => probs,
            Err(e) => {
                debug!("direct scoring failed, degrading to uniform: {e}");
                vec![1.0 / self.direct_classes as f32; self.direct_classes]
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn bit_probabilities_are_well_formed() {
        let mut scorer = MlpScorer::new(8, 16, 12).unwrap();
        let probs = scorer.score(&vec![0.1; 8]);
        assert_eq!(probs.len(), 12);
        assert!(probs.iter().all(|&p| (0.0..=1.0).contains(&p)));
    }

    #[test]
    fn direct_head_produces_a_distribution() {
        let mut scorer = MlpScorer::with_direct_channel(8, 16, 12, 5).unwrap();
        let probs = scorer.score_direct(&vec![0.1; 8]);
        assert_eq!(probs.len(), 5);
        let total: f32 = probs.iter().sum();
        assert!((total - 1.0).abs() < 1e-4);
    }

    #[test]
    fn scorer_without_direct_head_returns_empty() {
        let mut scorer = MlpScorer::new(8, 16, 12).unwrap();
        assert!(scorer.score_direct(&vec![0.1; 8]).is_empty());
    }

    #[test]
    fn weights_round_trip_through_safetensors() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("scorer.safetensors");

        let mut scorer = MlpScorer::new(4, 8, 6).unwrap();
        let before = scorer.score(&vec![0.3; 4]);
        scorer.save_weights(&path).unwrap();

        let mut fresh = MlpScorer::new(4, 8, 6).unwrap();
        fresh.load_weights(&path).unwrap();
        let after = fresh.score(&vec![0.3; 4]);

        for (a, b) in before.iter().zip(&after) {
            assert!((a - b).abs() < 1e-6);
        }
    }
}
