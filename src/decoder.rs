//! Beam-search decoding: repeated predictor calls materializing a lattice.
//!
//! The decoder owns no model state. A [`StateModel`] advances the hidden
//! representation one word at a time and a [`Predictor`](crate::predictor::Predictor)
//! ranks continuation candidates; both are external, stateful
//! collaborators whose calls this loop keeps strictly ordered. All
//! lattice mutation happens on the calling thread.

use std::cmp::Ordering;

use tracing::{debug, debug_span};

use crate::lattice::{Label, Lattice};
use crate::predictor::{Predictor, PredictorError};
use crate::settings::settings;

/// One state transition of the external sequence model.
pub struct StepOutput {
    /// Hidden state after consuming the word; input to the next prediction.
    pub state: Vec<f32>,
    /// Attention weights of this transition, recorded on child labels.
    pub atten_probs: Vec<f32>,
}

/// The contract a sequence model must satisfy to be pluggable into the
/// decode loop. Calls are non-reentrant and strictly ordered.
pub trait StateModel {
    /// Hidden state before any word has been consumed.
    fn initial_state(&mut self) -> Vec<f32>;

    /// Consume one word and produce the next hidden state.
    fn advance(&mut self, prev: &[f32], word_id: u32) -> StepOutput;
}

#[derive(Debug, Clone)]
pub struct BeamSearchConfig {
    /// Hypotheses kept alive per step.
    pub beam_width: usize,
    /// Hard cap on output length; open hypotheses are closed with the end
    /// symbol once it is reached.
    pub max_length: usize,
    /// Added to the accumulated score of every expansion; positive values
    /// reward longer outputs.
    pub word_penalty: f32,
    pub bos_id: u32,
    pub eos_id: u32,
}

impl Default for BeamSearchConfig {
    fn default() -> Self {
        let beam = &settings().beam;
        Self {
            beam_width: beam.beam_width,
            max_length: beam.max_length,
            word_penalty: beam.word_penalty,
            bos_id: beam.bos_id,
            eos_id: beam.eos_id,
        }
    }
}

#[derive(Debug, thiserror::Error)]
pub enum DecodeError {
    #[error("invalid configuration: {0}")]
    Config(String),

    #[error(transparent)]
    Predictor(#[from] PredictorError),
}

/// An open hypothesis: its lattice node, its last word, and the model
/// state in which that word has not yet been consumed.
struct Hypothesis {
    node: usize,
    word_id: u32,
    state: Vec<f32>,
}

pub struct BeamSearchDecoder {
    config: BeamSearchConfig,
}

impl BeamSearchDecoder {
    pub fn new(config: BeamSearchConfig) -> Result<Self, DecodeError> {
        if config.beam_width == 0 {
            return Err(DecodeError::Config("beam_width must be at least 1".into()));
        }
        if config.max_length == 0 {
            return Err(DecodeError::Config("max_length must be at least 1".into()));
        }
        if config.bos_id == config.eos_id {
            return Err(DecodeError::Config(
                "start and end symbols must differ".into(),
            ));
        }
        Ok(Self { config })
    }

    pub fn config(&self) -> &BeamSearchConfig {
        &self.config
    }

    /// Materialize the search space for one input.
    ///
    /// Every candidate returned by the predictor becomes a lattice node
    /// connected from its parent, pruned or not; only the best
    /// `beam_width` open children survive to the next step. Hypotheses
    /// reaching the end symbol close; at the length cap the remaining
    /// open hypotheses are closed with the end symbol scored by
    /// `predict_by_ids`.
    pub fn decode(
        &self,
        model: &mut dyn StateModel,
        predictor: &mut dyn Predictor,
    ) -> Result<Lattice, DecodeError> {
        let cfg = &self.config;
        let _span = debug_span!(
            "beam_search",
            beam_width = cfg.beam_width,
            max_length = cfg.max_length
        )
        .entered();

        predictor.prepare();

        let mut lattice = Lattice::new();
        let root = lattice.add_node(Label {
            word_id: cfg.bos_id,
            ..Label::default()
        });
        let mut open = vec![Hypothesis {
            node: root,
            word_id: cfg.bos_id,
            state: model.initial_state(),
        }];

        for step in 0..cfg.max_length {
            if open.is_empty() {
                break;
            }
            let closing_step = step + 1 == cfg.max_length;

            let mut children = Vec::new();
            for hyp in &open {
                let out = model.advance(&hyp.state, hyp.word_id);
                let parent_accum = lattice.node(hyp.node).label().accum_log_prob;

                let predictions = if closing_step {
                    predictor.predict_by_ids(&out.state, &[cfg.eos_id])?
                } else {
                    predictor.predict_k_best(&out.state, cfg.beam_width)
                };

                for pred in predictions {
                    let accum = parent_accum + pred.log_prob + cfg.word_penalty;
                    let child = lattice.add_node(Label {
                        word_id: pred.word_id,
                        word_log_prob: pred.log_prob,
                        accum_log_prob: accum,
                        atten_probs: out.atten_probs.clone(),
                    });
                    lattice.connect(hyp.node, child);
                    if pred.word_id != cfg.eos_id {
                        children.push(Hypothesis {
                            node: child,
                            word_id: pred.word_id,
                            state: out.state.clone(),
                        });
                    }
                }
            }

            children.sort_by(|a, b| {
                lattice
                    .node(b.node)
                    .label()
                    .accum_log_prob
                    .partial_cmp(&lattice.node(a.node).label().accum_log_prob)
                    .unwrap_or(Ordering::Equal)
            });
            children.truncate(cfg.beam_width);
            open = children;
        }

        debug!(nodes = lattice.size(), "beam search finished");
        Ok(lattice)
    }
}

/// Word ids along a one-best path, start and end symbols stripped.
pub fn extract_words(lattice: &Lattice, path: &[usize]) -> Vec<u32> {
    if path.len() <= 2 {
        return Vec::new();
    }
    path[1..path.len() - 1]
        .iter()
        .map(|&index| lattice.node(index).label().word_id)
        .collect()
}
