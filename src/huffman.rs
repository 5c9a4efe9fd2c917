//! Huffman coding of the vocabulary, for hierarchical softmax.

use crate::progress::{CancelToken, ProgressListener, Stage};
use crate::vocab::Vocabulary;
use crate::Result;

/// How often (in merges) the encoder checks for cancellation and reports progress.
const CHECK_INTERVAL: usize = 1 << 14;

/// Position of one word in the Huffman tree.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct HuffmanNode {
    /// Which child (0 or 1) is taken at each step from the root down to the word.
    pub code: Vec<u8>,
    /// Internal node visited at each step, root first. `point[d]` is the
    /// predictor that decides `code[d]`; it indexes a row of the output
    /// weight matrix. Same length as `code`.
    pub point: Vec<u32>,
}

/// Huffman codes for every word in a vocabulary, indexed by word id.
///
/// Frequent words have short codes. A tree over N words has N - 1 internal
/// nodes, numbered in the order they were created; the root is N - 2.
#[derive(Debug, Clone)]
pub struct HuffmanTree {
    nodes: Vec<HuffmanNode>,
}

impl HuffmanTree {
    pub fn new(vocab: &Vocabulary) -> Self {
        let counts: Vec<u64> = vocab.iter().map(|vw| vw.count).collect();
        match Self::encode(&counts, &(), &CancelToken::new()) {
            Ok(tree) => tree,
            Err(_) => unreachable!("a fresh token is never canceled"),
        }
    }

    /// Builds the tree for `counts`, which must be sorted in decreasing order
    /// (the order [`Vocabulary`] keeps its words in).
    ///
    /// Fails with `Interrupted` if `cancel` fires before the tree is complete.
    pub fn encode(
        counts: &[u64],
        listener: &dyn ProgressListener,
        cancel: &CancelToken,
    ) -> Result<Self> {
        debug_assert!(counts.windows(2).all(|w| w[0] >= w[1]));
        listener.update(Stage::BuildHuffman, 0.0);
        cancel.check()?;

        let vocab_size = counts.len();
        if vocab_size <= 1 {
            // A lone word needs no decisions at all.
            listener.update(Stage::BuildHuffman, 1.0);
            return Ok(HuffmanTree {
                nodes: vec![HuffmanNode::default(); vocab_size],
            });
        }

        // Nodes 0..vocab_size are the leaves, vocab_size.. the internal
        // nodes in creation order.
        let mut count = vec![u64::MAX; vocab_size * 2];
        count[..vocab_size].copy_from_slice(counts);
        let mut binary = vec![0u8; vocab_size * 2]; // which child a node is of its parent (0 or 1)
        let mut parent_node = vec![0usize; vocab_size * 2];

        // Leaves are consumed from the rarest end (pos1 walks down), internal
        // nodes in creation order (pos2 walks up). Both sequences are sorted,
        // so the two smallest nodes are always at one of the two cursors.
        let mut pos1 = vocab_size;
        let mut pos2 = vocab_size;
        let mut take_min = |count: &[u64]| {
            if pos1 > 0 && count[pos1 - 1] < count[pos2] {
                pos1 -= 1;
                pos1
            } else {
                pos2 += 1;
                pos2 - 1
            }
        };
        for a in 0..(vocab_size - 1) {
            let min1i = take_min(&count);
            let min2i = take_min(&count);

            count[vocab_size + a] = count[min1i].saturating_add(count[min2i]);
            parent_node[min1i] = vocab_size + a;
            parent_node[min2i] = vocab_size + a;
            binary[min2i] = 1;

            if a % CHECK_INTERVAL == CHECK_INTERVAL - 1 {
                cancel.check()?;
                listener.update(Stage::BuildHuffman, a as f64 / vocab_size as f64);
            }
        }

        let root = vocab_size * 2 - 2;
        let nodes = (0..vocab_size)
            .map(|a| {
                let mut code = vec![];
                let mut point = vec![];
                let mut b = a;
                while b != root {
                    code.push(binary[b]);
                    b = parent_node[b];
                    point.push((b - vocab_size) as u32);
                }
                code.reverse();
                point.reverse();
                HuffmanNode { code, point }
            })
            .collect();

        cancel.check()?;
        listener.update(Stage::BuildHuffman, 1.0);
        Ok(HuffmanTree { nodes })
    }

    pub fn num_leaves(&self) -> usize {
        self.nodes.len()
    }

    pub fn num_internal_nodes(&self) -> usize {
        self.nodes.len().saturating_sub(1)
    }

    /// Returns the code for word `id`. Panics if `id` is out of range.
    pub fn node(&self, id: usize) -> &HuffmanNode {
        &self.nodes[id]
    }

    pub fn iter(&self) -> impl Iterator<Item = &HuffmanNode> + '_ {
        self.nodes.iter()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::Error;

    fn tree(counts: &[u64]) -> HuffmanTree {
        HuffmanTree::encode(counts, &(), &CancelToken::new()).unwrap()
    }

    #[test]
    fn three_words() {
        let t = tree(&[5, 3, 1]);
        assert_eq!(t.num_internal_nodes(), 2);
        assert_eq!(t.node(0), &HuffmanNode { code: vec![1], point: vec![1] });
        assert_eq!(t.node(1), &HuffmanNode { code: vec![0, 1], point: vec![1, 0] });
        assert_eq!(t.node(2), &HuffmanNode { code: vec![0, 0], point: vec![1, 0] });
    }

    #[test]
    fn frequent_words_get_shorter_codes() {
        let t = tree(&[1000, 500, 100, 50, 10, 5, 1, 1]);
        for a in 1..t.num_leaves() {
            assert!(t.node(a - 1).code.len() <= t.node(a).code.len());
        }
        // every path starts at the root
        for node in t.iter() {
            assert_eq!(node.point[0] as usize, t.num_leaves() - 2);
            assert_eq!(node.point.len(), node.code.len());
        }
    }

    #[test]
    fn single_word() {
        let t = tree(&[42]);
        assert_eq!(t.num_leaves(), 1);
        assert_eq!(t.num_internal_nodes(), 0);
        assert!(t.node(0).code.is_empty());
    }

    #[test]
    fn deterministic() {
        let counts = [9, 9, 7, 7, 7, 3, 3, 2, 1, 1, 1];
        let a = tree(&counts);
        let b = tree(&counts);
        for (x, y) in a.iter().zip(b.iter()) {
            assert_eq!(x, y);
        }
    }

    #[test]
    fn canceled_before_start() {
        let cancel = CancelToken::new();
        cancel.cancel();
        let result = HuffmanTree::encode(&[3, 2, 1], &(), &cancel);
        assert!(matches!(result, Err(Error::Interrupted)));
    }

    #[test]
    fn listener_can_cancel() {
        let cancel = CancelToken::new();
        let c = cancel.clone();
        let listener = move |stage: Stage, _progress: f64| {
            if stage == Stage::BuildHuffman {
                c.cancel();
            }
        };
        let result = HuffmanTree::encode(&[3, 2, 1], &listener, &cancel);
        assert!(matches!(result, Err(Error::Interrupted)));
    }
}
