//! The decoding lattice: a directed graph of partial hypotheses.
//!
//! Built incrementally during beam search, queried afterwards for the
//! best-scoring complete path. Nodes live in an index-stable arena;
//! edges are insertion-ordered adjacency lists. The only destructive
//! operation is [`Lattice::clear`]: a lattice is built fresh per input
//! and discarded as a whole.

use tracing::debug;

/// Per-node payload.
///
/// `accum_log_prob` is the score of the whole hypothesis prefix ending at
/// this node; `word_log_prob` is this word's own contribution.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Label {
    pub word_id: u32,
    pub word_log_prob: f32,
    pub accum_log_prob: f32,
    pub atten_probs: Vec<f32>,
}

#[derive(Debug)]
pub struct Node {
    label: Label,
    prev: Vec<usize>,
    next: Vec<usize>,
}

impl Node {
    pub fn label(&self) -> &Label {
        &self.label
    }

    /// Incoming neighbors in edge insertion order.
    pub fn prev(&self) -> &[usize] {
        &self.prev
    }

    /// Outgoing neighbors in edge insertion order.
    pub fn next(&self) -> &[usize] {
        &self.next
    }
}

#[derive(Debug, Default)]
pub struct Lattice {
    nodes: Vec<Node>,
}

impl Lattice {
    pub fn new() -> Self {
        Self::default()
    }

    /// Append a node with no edges; returns its index, stable until
    /// [`clear`](Self::clear).
    pub fn add_node(&mut self, label: Label) -> usize {
        self.nodes.push(Node {
            label,
            prev: Vec::new(),
            next: Vec::new(),
        });
        self.nodes.len() - 1
    }

    /// Insert the directed edge `from → to` if absent. Idempotent;
    /// self-loops are permitted.
    pub fn connect(&mut self, from: usize, to: usize) {
        if !self.nodes[from].next.contains(&to) {
            self.nodes[from].next.push(to);
            self.nodes[to].prev.push(from);
        }
    }

    pub fn node(&self, index: usize) -> &Node {
        &self.nodes[index]
    }

    pub fn size(&self) -> usize {
        self.nodes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.nodes.is_empty()
    }

    /// Drop all nodes and edges; indices restart at zero.
    pub fn clear(&mut self) {
        debug!(discarded = self.nodes.len(), "lattice cleared");
        self.nodes.clear();
    }

    /// Indices of all nodes satisfying `pred`, in insertion order.
    pub fn find_nodes<F>(&self, pred: F) -> Vec<usize>
    where
        F: Fn(&Node) -> bool,
    {
        self.nodes
            .iter()
            .enumerate()
            .filter(|(_, node)| pred(node))
            .map(|(index, _)| index)
            .collect()
    }

    /// The best-scoring path from a start-word node to an end-word node.
    ///
    /// Picks the end-word node with the highest accumulated log-probability
    /// (ties broken by earliest insertion), then backtracks through each
    /// node's best-scoring predecessor (ties broken by smallest index)
    /// until it reaches a root whose word is `start_word_id`. Returns node
    /// indices in path order, or an empty vector when no end-word node
    /// exists.
    pub fn find_one_best_path(&self, start_word_id: u32, end_word_id: u32) -> Vec<usize> {
        let mut best_end: Option<usize> = None;
        for (index, node) in self.nodes.iter().enumerate() {
            if node.label.word_id != end_word_id {
                continue;
            }
            match best_end {
                Some(cur) if self.nodes[cur].label.accum_log_prob >= node.label.accum_log_prob => {}
                _ => best_end = Some(index),
            }
        }
        let Some(end) = best_end else {
            return Vec::new();
        };

        let mut path = vec![end];
        let mut cur = end;
        loop {
            let node = &self.nodes[cur];
            if node.prev.is_empty() {
                break;
            }
            let mut best = node.prev[0];
            for &cand in &node.prev[1..] {
                // Strict comparison keeps the smallest index on ties.
                if self.nodes[cand].label.accum_log_prob
                    > self.nodes[best].label.accum_log_prob
                    || (self.nodes[cand].label.accum_log_prob
                        == self.nodes[best].label.accum_log_prob
                        && cand < best)
                {
                    best = cand;
                }
            }
            path.push(best);
            cur = best;
        }
        debug_assert_eq!(self.nodes[cur].label.word_id, start_word_id);
        path.reverse();
        path
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn label(word_id: u32, word_log_prob: f32, accum_log_prob: f32) -> Label {
        Label {
            word_id,
            word_log_prob,
            accum_log_prob,
            atten_probs: Vec::new(),
        }
    }

    #[test]
    fn empty_label_defaults() {
        let mut lattice = Lattice::new();
        let idx = lattice.add_node(Label::default());
        let node = lattice.node(idx);
        assert_eq!(node.label().word_id, 0);
        assert_eq!(node.label().word_log_prob, 0.0);
        assert_eq!(node.label().accum_log_prob, 0.0);
        assert!(node.label().atten_probs.is_empty());
        assert!(node.prev().is_empty());
        assert!(node.next().is_empty());
    }

    #[test]
    fn labels_are_stored_verbatim() {
        let mut lattice = Lattice::new();
        let idx = lattice.add_node(Label {
            word_id: 1,
            word_log_prob: 2.0,
            accum_log_prob: 20.0,
            atten_probs: vec![3.0, 4.0, 5.0],
        });
        let stored = lattice.node(idx).label();
        assert_eq!(stored.word_id, 1);
        assert_eq!(stored.word_log_prob, 2.0);
        assert_eq!(stored.accum_log_prob, 20.0);
        assert_eq!(stored.atten_probs, vec![3.0, 4.0, 5.0]);
    }

    #[test]
    fn clear_resets_indices() {
        let mut lattice = Lattice::new();
        for i in 0..7 {
            assert_eq!(lattice.add_node(label(i, 0.0, 0.0)), i as usize);
        }
        assert_eq!(lattice.size(), 7);

        lattice.clear();
        assert_eq!(lattice.size(), 0);
        assert!(lattice.is_empty());
        assert_eq!(lattice.add_node(Label::default()), 0);
        assert_eq!(lattice.size(), 1);
    }

    #[test]
    fn connect_is_idempotent() {
        let mut lattice = Lattice::new();
        let a = lattice.add_node(Label::default());
        let b = lattice.add_node(Label::default());

        lattice.connect(a, b);
        assert_eq!(lattice.node(a).next(), &[b]);
        assert_eq!(lattice.node(b).prev(), &[a]);

        lattice.connect(a, b);
        assert_eq!(lattice.node(a).next().len(), 1);
        assert_eq!(lattice.node(b).prev().len(), 1);
    }

    #[test]
    fn self_loops_are_permitted() {
        let mut lattice = Lattice::new();
        let a = lattice.add_node(Label::default());
        lattice.connect(a, a);
        assert_eq!(lattice.node(a).next(), &[a]);
        assert_eq!(lattice.node(a).prev(), &[a]);
    }

    #[test]
    fn edges_keep_insertion_order() {
        let mut lattice = Lattice::new();
        let nodes: Vec<usize> = (0..4).map(|_| lattice.add_node(Label::default())).collect();

        lattice.connect(nodes[3], nodes[0]);
        lattice.connect(nodes[1], nodes[0]);
        lattice.connect(nodes[2], nodes[0]);
        assert_eq!(lattice.node(nodes[0]).prev(), &[nodes[3], nodes[1], nodes[2]]);

        lattice.connect(nodes[3], nodes[2]);
        lattice.connect(nodes[3], nodes[1]);
        assert_eq!(
            lattice.node(nodes[3]).next(),
            &[nodes[0], nodes[2], nodes[1]]
        );
    }

    #[test]
    fn find_nodes_matches_in_insertion_order() {
        let mut lattice = Lattice::new();
        let n0 = lattice.add_node(label(0, 0.0, 10.0));
        let n1 = lattice.add_node(label(0, 0.0, 20.0));
        let n2 = lattice.add_node(label(1, 1.0, 30.0));
        let n3 = lattice.add_node(label(2, 2.0, 40.0));
        lattice.connect(n0, n2);
        lattice.connect(n1, n2);
        lattice.connect(n2, n3);

        assert_eq!(
            lattice.find_nodes(|node| node.label().word_id == 0),
            vec![n0, n1]
        );
        assert_eq!(
            lattice.find_nodes(|node| node.label().word_log_prob == 2.0),
            vec![n3]
        );
        assert_eq!(
            lattice.find_nodes(|node| node.prev().len() == 2 && node.next().len() == 1),
            vec![n2]
        );
        assert!(lattice.find_nodes(|node| node.label().word_id == 100).is_empty());

        lattice.clear();
        assert!(lattice.find_nodes(|node| node.label().word_id == 0).is_empty());
    }

    #[test]
    fn one_best_path_follows_accumulated_scores() {
        let mut lattice = Lattice::new();
        let nodes = [
            lattice.add_node(label(1, 0.0, 0.0)),
            lattice.add_node(label(10, -1.0, -1.0)),
            lattice.add_node(label(20, -2.0, -2.0)),
            lattice.add_node(label(2, -10.0, -11.0)),
            lattice.add_node(label(2, -1.0, -3.0)),
            lattice.add_node(label(2, -20.0, -22.0)),
        ];
        lattice.connect(nodes[0], nodes[1]);
        lattice.connect(nodes[0], nodes[2]);
        lattice.connect(nodes[1], nodes[3]);
        lattice.connect(nodes[2], nodes[4]);
        lattice.connect(nodes[2], nodes[5]);

        assert_eq!(
            lattice.find_one_best_path(1, 2),
            vec![nodes[0], nodes[2], nodes[4]]
        );
    }

    #[test]
    fn one_best_path_breaks_end_ties_by_insertion() {
        let mut lattice = Lattice::new();
        let root = lattice.add_node(label(1, 0.0, 0.0));
        let first = lattice.add_node(label(2, -1.0, -1.0));
        let second = lattice.add_node(label(2, -1.0, -1.0));
        lattice.connect(root, first);
        lattice.connect(root, second);

        assert_eq!(lattice.find_one_best_path(1, 2), vec![root, first]);
    }

    #[test]
    fn one_best_path_without_end_node_is_empty() {
        let mut lattice = Lattice::new();
        lattice.add_node(label(1, 0.0, 0.0));
        assert!(lattice.find_one_best_path(1, 2).is_empty());
    }
}
