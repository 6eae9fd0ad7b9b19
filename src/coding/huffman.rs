use std::cmp::Reverse;
use std::collections::BinaryHeap;

use serde::{Deserialize, Serialize};

use super::CodingError;

/// Sentinel id returned when a bit pattern matches no code.
///
/// Never a valid vocabulary id; callers substitute their configured
/// fallback id instead of treating this as an error.
pub const INVALID_ID: u32 = u32::MAX;

const NO_CHILD: usize = usize::MAX;

/// One node of the construction tree. Leaves carry a word id; internal
/// nodes carry `INVALID_ID` and two children.
#[derive(Debug, Clone)]
struct TreeNode {
    children: [usize; 2],
    word_id: u32,
}

impl TreeNode {
    fn leaf(word_id: u32) -> Self {
        Self {
            children: [NO_CHILD; 2],
            word_id,
        }
    }

    fn internal() -> Self {
        Self {
            children: [NO_CHILD; 2],
            word_id: INVALID_ID,
        }
    }

    fn is_leaf(&self) -> bool {
        self.word_id != INVALID_ID
    }
}

/// A frequency-weighted prefix-free code over a dense vocabulary.
///
/// Codes are stored as a flat row-major bit matrix with `num_bits` columns;
/// codes shorter than `num_bits` are right-padded with zeros. The padding is
/// never read when decoding: `get_id` walks the construction tree and stops
/// at the first leaf it reaches.
///
/// Immutable after construction; share between predictors via `Arc`.
pub struct CodeTable {
    /// `vocab_size * num_bits` bits, row-major, zero-padded per row.
    bits: Vec<bool>,
    /// True (unpadded) code length per word id.
    code_lens: Vec<u16>,
    num_bits: usize,
    vocab_size: usize,
    /// Arena of tree nodes; index-based, no pointers.
    tree: Vec<TreeNode>,
    root: usize,
}

impl CodeTable {
    /// Build a code table from `(id, frequency)` pairs.
    ///
    /// Ids must be unique and dense in `0..N`; frequencies must be positive.
    /// Construction is the classic two-smallest merge with a deterministic
    /// tie-break (equal-frequency fragments merge in creation order), so the
    /// same input always yields the same table.
    pub fn from_frequencies(frequencies: &[(u32, u64)]) -> Result<Self, CodingError> {
        let vocab_size = frequencies.len();
        if vocab_size == 0 {
            return Err(CodingError::Config("vocabulary is empty".into()));
        }

        let mut freq_by_id = vec![None; vocab_size];
        for &(id, freq) in frequencies {
            if freq == 0 {
                return Err(CodingError::Config(format!(
                    "frequency of word {id} must be positive"
                )));
            }
            let slot = freq_by_id
                .get_mut(id as usize)
                .ok_or_else(|| CodingError::Config(format!("word id {id} is out of range")))?;
            if slot.replace(freq).is_some() {
                return Err(CodingError::Config(format!("duplicate word id {id}")));
            }
        }

        // Leaves occupy indices 0..vocab_size in id order; merged fragments
        // are appended after, so a tree index doubles as creation order and
        // the heap key (freq, index) is a total, reproducible order.
        let mut tree: Vec<TreeNode> = (0..vocab_size as u32).map(TreeNode::leaf).collect();
        let mut parent: Vec<(usize, bool)> = vec![(NO_CHILD, false); vocab_size];
        let mut heap: BinaryHeap<Reverse<(u64, usize)>> = freq_by_id
            .iter()
            .enumerate()
            .map(|(idx, freq)| Reverse((freq.unwrap(), idx)))
            .collect();

        while heap.len() > 1 {
            let Reverse((freq_a, a)) = heap.pop().unwrap();
            let Reverse((freq_b, b)) = heap.pop().unwrap();
            let merged = tree.len();
            let mut node = TreeNode::internal();
            node.children = [a, b];
            tree.push(node);
            parent.push((NO_CHILD, false));
            parent[a] = (merged, false);
            parent[b] = (merged, true);
            heap.push(Reverse((freq_a + freq_b, merged)));
        }
        let Reverse((_, root)) = heap.pop().unwrap();

        // Each leaf's code is its root-to-leaf path, read by walking up.
        let mut code_lens = vec![0u16; vocab_size];
        let mut paths: Vec<Vec<bool>> = Vec::with_capacity(vocab_size);
        let mut num_bits = 0;
        for id in 0..vocab_size {
            let mut path = Vec::new();
            let mut cur = id;
            while cur != root {
                let (up, bit) = parent[cur];
                path.push(bit);
                cur = up;
            }
            path.reverse();
            num_bits = num_bits.max(path.len());
            code_lens[id] = path.len() as u16;
            paths.push(path);
        }

        let mut bits = vec![false; vocab_size * num_bits];
        for (id, path) in paths.iter().enumerate() {
            bits[id * num_bits..id * num_bits + path.len()].copy_from_slice(path);
        }

        Ok(Self {
            bits,
            code_lens,
            num_bits,
            vocab_size,
            tree,
            root,
        })
    }

    /// The fixed stored width of every code.
    pub fn num_bits(&self) -> usize {
        self.num_bits
    }

    pub fn vocab_size(&self) -> usize {
        self.vocab_size
    }

    /// The zero-padded code of a word id.
    pub fn get_code(&self, id: u32) -> Result<&[bool], CodingError> {
        let idx = id as usize;
        if idx >= self.vocab_size {
            return Err(CodingError::UnknownId(id));
        }
        Ok(&self.bits[idx * self.num_bits..(idx + 1) * self.num_bits])
    }

    /// Decode a bit pattern by tree traversal.
    ///
    /// Walks from the root, one bit per step, and returns the word id of the
    /// first leaf reached; bits beyond that point are padding and ignored.
    /// Returns [`INVALID_ID`] when the walk is still at an internal node
    /// after consuming every input bit.
    pub fn get_id(&self, bits: &[bool]) -> u32 {
        let mut cur = self.root;
        if self.tree[cur].is_leaf() {
            return self.tree[cur].word_id;
        }
        for &bit in bits {
            let next = self.tree[cur].children[usize::from(bit)];
            if next == NO_CHILD {
                // Reachable on tables restored from an incomplete code set.
                return INVALID_ID;
            }
            cur = next;
            if self.tree[cur].is_leaf() {
                return self.tree[cur].word_id;
            }
        }
        INVALID_ID
    }

    /// Snapshot for persistence. Codes and true lengths fully determine
    /// decode behavior; frequencies are not retained.
    pub fn state(&self) -> CodeTableState {
        CodeTableState {
            vocab_size: self.vocab_size as u32,
            num_bits: self.num_bits as u32,
            code_lens: self.code_lens.clone(),
            packed_bits: pack_bits(&self.bits),
        }
    }

    /// Rebuild a table from a persisted snapshot, re-deriving the traversal
    /// tree by trie insertion of each code's true-length prefix.
    pub fn from_state(state: &CodeTableState) -> Result<Self, CodingError> {
        let vocab_size = state.vocab_size as usize;
        let num_bits = state.num_bits as usize;
        if vocab_size == 0 {
            return Err(CodingError::Corrupted("vocabulary is empty".into()));
        }
        if state.code_lens.len() != vocab_size {
            return Err(CodingError::Corrupted(format!(
                "code length table has {} entries, expected {vocab_size}",
                state.code_lens.len()
            )));
        }
        let total_bits = vocab_size * num_bits;
        if state.packed_bits.len() != packed_len(total_bits) {
            return Err(CodingError::Corrupted(format!(
                "bit matrix has {} bytes, expected {}",
                state.packed_bits.len(),
                packed_len(total_bits)
            )));
        }
        let bits = unpack_bits(&state.packed_bits, total_bits);

        let mut deepest = 0;
        for (id, &len) in state.code_lens.iter().enumerate() {
            let len = len as usize;
            if len > num_bits {
                return Err(CodingError::Corrupted(format!(
                    "code length {len} of word {id} exceeds num_bits {num_bits}"
                )));
            }
            deepest = deepest.max(len);
            // Padding must be all-zero or the lengths and matrix disagree.
            let row = &bits[id * num_bits..(id + 1) * num_bits];
            if row[len..].iter().any(|&b| b) {
                return Err(CodingError::Corrupted(format!(
                    "word {id} has set bits beyond its code length"
                )));
            }
        }
        if deepest != num_bits {
            return Err(CodingError::Corrupted(format!(
                "deepest code is {deepest} bits, expected num_bits {num_bits}"
            )));
        }

        let (tree, root) = rebuild_tree(&bits, &state.code_lens, num_bits)?;

        Ok(Self {
            bits,
            code_lens: state.code_lens.clone(),
            num_bits,
            vocab_size,
            tree,
            root,
        })
    }
}

/// Rebuild the traversal trie from stored codes. Any conflict (a code
/// passing through another code's leaf, or two codes ending at the same
/// node) means the stored set is not prefix-free.
fn rebuild_tree(
    bits: &[bool],
    code_lens: &[u16],
    num_bits: usize,
) -> Result<(Vec<TreeNode>, usize), CodingError> {
    let mut tree = vec![TreeNode::internal()];
    let root = 0;
    for (id, &len) in code_lens.iter().enumerate() {
        let row = &bits[id * num_bits..id * num_bits + len as usize];
        let mut cur = root;
        for &bit in row {
            if tree[cur].is_leaf() {
                return Err(CodingError::Corrupted(format!(
                    "code of word {id} passes through another code"
                )));
            }
            let slot = tree[cur].children[usize::from(bit)];
            cur = if slot == NO_CHILD {
                let next = tree.len();
                tree.push(TreeNode::internal());
                tree[cur].children[usize::from(bit)] = next;
                next
            } else {
                slot
            };
        }
        let node = &mut tree[cur];
        if node.is_leaf() || node.children != [NO_CHILD; 2] {
            return Err(CodingError::Corrupted(format!(
                "code of word {id} collides with another code"
            )));
        }
        node.word_id = id as u32;
    }
    Ok((tree, root))
}

/// Persisted form of a [`CodeTable`]: the bit matrix packed eight bits per
/// byte plus the true length of each code.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CodeTableState {
    pub vocab_size: u32,
    pub num_bits: u32,
    pub code_lens: Vec<u16>,
    pub packed_bits: Vec<u8>,
}

fn packed_len(total_bits: usize) -> usize {
    total_bits.div_ceil(8)
}

fn pack_bits(bits: &[bool]) -> Vec<u8> {
    let mut packed = vec![0u8; packed_len(bits.len())];
    for (i, &bit) in bits.iter().enumerate() {
        if bit {
            packed[i / 8] |= 1 << (i % 8);
        }
    }
    packed
}

fn unpack_bits(packed: &[u8], total_bits: usize) -> Vec<bool> {
    (0..total_bits)
        .map(|i| packed[i / 8] & (1 << (i % 8)) != 0)
        .collect()
}
