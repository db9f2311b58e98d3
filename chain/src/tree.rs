//! The in-memory header tree: insertion, the materialized longest chain,
//! invalid-block quarantine, locators and branch pruning.
//!
//! Parent references are logical (`prev_blockhash` lookups into `by_hash`),
//! never physical pointers — this keeps [`HeaderNode`] free of
//! back-references and makes pruning a matter of removing map entries
//! rather than unwinding an ownership graph.

use std::collections::{HashMap, HashSet};

use tracing::{debug, warn};

use headers_common::{BlockHeader, Hash, Height};

use crate::node::HeaderNode;

/// The result of [`HeaderGraph::add_headers`].
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Changeset {
    /// Nodes appended to the longest chain, in ascending height order.
    pub added: Vec<HeaderNode>,
    /// Nodes spliced off the tail of the (old) longest chain, in ascending
    /// height order (the order they sat in the chain, not the order they
    /// were detached).
    pub removed: Vec<HeaderNode>,
    /// Hashes rejected because they equal, or descend from, a
    /// known-invalid hash.
    pub invalidated: Vec<Hash>,
}

impl Changeset {
    /// Whether this changeset left the longest chain unchanged.
    pub fn is_noop(&self) -> bool {
        self.added.is_empty() && self.removed.is_empty()
    }
}

/// The header tree. Owns every [`HeaderNode`] it has accepted.
#[derive(Debug)]
pub struct HeaderGraph {
    by_hash: HashMap<Hash, HeaderNode>,
    children: HashMap<Hash, HashSet<Hash>>,
    leaves: HashSet<Hash>,
    longest_chain: Vec<Hash>,
    longest_chain_index: HashMap<Hash, usize>,
    invalid_hashes: HashSet<Hash>,
    genesis_hash: Hash,
}

impl HeaderGraph {
    /// Construct a graph seeded with `genesis` at height 0, plus the
    /// chain's built-in and configured invalid-block hashes.
    pub fn new(genesis: BlockHeader, invalid_hashes: impl IntoIterator<Item = Hash>) -> Self {
        let node = HeaderNode::genesis(genesis);
        let hash = node.hash;

        let mut by_hash = HashMap::new();
        by_hash.insert(hash, node);

        let mut children = HashMap::new();
        children.insert(hash, HashSet::new());

        let mut leaves = HashSet::new();
        leaves.insert(hash);

        let longest_chain = vec![hash];
        let mut longest_chain_index = HashMap::new();
        longest_chain_index.insert(hash, 0);

        HeaderGraph {
            by_hash,
            children,
            leaves,
            longest_chain,
            longest_chain_index,
            invalid_hashes: invalid_hashes.into_iter().collect(),
            genesis_hash: hash,
        }
    }

    /// The current tip of the longest chain.
    pub fn tip(&self) -> &HeaderNode {
        let tip_hash = self.longest_chain.last().expect("genesis is always present");
        &self.by_hash[tip_hash]
    }

    /// Look up a node by hash.
    pub fn get_by_hash(&self, hash: &Hash) -> Option<&HeaderNode> {
        self.by_hash.get(hash)
    }

    /// Look up the node at a given height on the longest chain.
    pub fn get_by_height(&self, height: Height) -> Option<&HeaderNode> {
        self.longest_chain
            .get(height as usize)
            .map(|h| &self.by_hash[h])
    }

    /// Whether `hash` is known to be invalid.
    pub fn is_invalid(&self, hash: &Hash) -> bool {
        self.invalid_hashes.contains(hash)
    }

    /// Number of headers currently retained (including pruned-but-not-yet
    /// collected branches).
    pub fn len(&self) -> usize {
        self.by_hash.len()
    }

    /// Whether the graph holds nothing beyond genesis.
    pub fn is_empty(&self) -> bool {
        self.by_hash.len() == 1
    }

    /// The set of current leaf hashes (hashes with no children).
    pub fn leaves(&self) -> impl Iterator<Item = &Hash> {
        self.leaves.iter()
    }

    /// Whether `hash` currently sits on the longest chain.
    pub fn contains_in_longest_chain(&self, hash: &Hash) -> bool {
        self.longest_chain_index.contains_key(hash)
    }

    /// Accept a batch of headers. See module docs for the algorithm; in
    /// short: headers are linked while their parent is known and not
    /// invalid, scanning stops at the first broken link or invalid hash,
    /// and if the resulting best leaf strictly exceeds the current tip's
    /// work, the longest chain is re-spliced from their common ancestor.
    pub fn add_headers(&mut self, batch: &[BlockHeader]) -> Changeset {
        let mut invalidated = Vec::new();

        // Headers already known are dropped before scanning so a header we
        // already computed height/work_total for is never relinked.
        let fresh: Vec<BlockHeader> = batch
            .iter()
            .copied()
            .filter(|h| !self.by_hash.contains_key(&h.hash()))
            .collect();

        let mut i = 0usize;
        while i < fresh.len() {
            let header = fresh[i];
            let Some(parent) = self.by_hash.get(&header.prev_blockhash).copied() else {
                break;
            };
            let hash = header.hash();

            if self.invalid_hashes.contains(&hash) {
                invalidated.push(hash);
                let mut last = hash;
                let mut j = i + 1;
                while j < fresh.len() && fresh[j].prev_blockhash == last {
                    last = fresh[j].hash();
                    invalidated.push(last);
                    j += 1;
                }
                warn!(hash = %hash, count = invalidated.len(), "quarantined header batch descending from invalid hash");
                break;
            }

            let node = HeaderNode::link(header, &parent);
            self.by_hash.insert(hash, node);
            self.children.entry(parent.hash).or_default().insert(hash);
            self.leaves.remove(&parent.hash);
            self.children.insert(hash, HashSet::new());
            self.leaves.insert(hash);

            i += 1;
        }

        let changeset = self.reconcile_tip();
        Changeset {
            invalidated,
            ..changeset
        }
    }

    /// Recompute the longest chain after insertion, splicing in a new
    /// suffix if some leaf now strictly exceeds the current tip's work.
    fn reconcile_tip(&mut self) -> Changeset {
        let best_leaf = self
            .leaves
            .iter()
            .map(|h| self.by_hash[h])
            .max_by_key(|n| n.work_total)
            .expect("genesis is always a leaf or an ancestor of one");

        let tip = *self.tip();
        if best_leaf.work_total <= tip.work_total {
            return Changeset::default();
        }

        // Walk back from the new best leaf until we hit a node already on
        // the longest chain — the common ancestor.
        let mut walked = Vec::new();
        let mut current = best_leaf;
        while !self.longest_chain_index.contains_key(&current.hash) {
            walked.push(current);
            current = self.by_hash[&current.header.prev_blockhash];
        }
        walked.reverse();

        let ancestor = current;
        let split_height = (ancestor.height + 1) as usize;

        let removed_hashes = self.longest_chain.split_off(split_height);
        let removed: Vec<HeaderNode> = removed_hashes.iter().map(|h| self.by_hash[h]).collect();
        for hash in &removed_hashes {
            self.longest_chain_index.remove(hash);
        }

        for node in &walked {
            self.longest_chain_index.insert(node.hash, self.longest_chain.len());
            self.longest_chain.push(node.hash);
        }

        debug!(
            old_tip = %tip.hash,
            new_tip = %best_leaf.hash,
            removed = removed.len(),
            added = walked.len(),
            "reorg spliced in a new longest-chain suffix",
        );

        Changeset {
            added: walked,
            removed,
            invalidated: Vec::new(),
        }
    }

    /// The block locator for requesting forward headers from peers: the
    /// tip and the nine headers below it, then exponentially sparser
    /// hashes back to genesis, which is always the final element.
    pub fn block_locator(&self) -> Vec<Hash> {
        let tip_index = self.longest_chain.len() - 1;
        let mut idx = tip_index as i64;
        let mut step = 1i64;
        let mut count = 0u32;
        let mut indices = Vec::new();

        while idx >= 0 {
            indices.push(idx as usize);
            if count < 9 {
                count += 1;
                idx -= 1;
            } else {
                idx -= step;
                step *= 2;
            }
        }

        let mut hashes: Vec<Hash> = indices.into_iter().map(|i| self.longest_chain[i]).collect();
        if hashes.last() != Some(&self.genesis_hash) {
            hashes.push(self.genesis_hash);
        }
        hashes
    }

    /// Remove every branch that has fallen off the longest chain. Must not
    /// be called while any peer session's header-sync loop is running, or
    /// a branch about to be extended could be deleted out from under it.
    ///
    /// Idempotent: a second call with nothing to prune removes nothing.
    pub fn prune_branches(&mut self) -> usize {
        let tip_hash = *self.longest_chain.last().expect("genesis is always present");
        let stale_leaves: Vec<Hash> = self.leaves.iter().copied().filter(|h| *h != tip_hash).collect();
        let mut removed = 0usize;

        for leaf in stale_leaves {
            let mut current = leaf;
            let mut chain_to_remove = Vec::new();

            while self.by_hash.contains_key(&current) && !self.longest_chain_index.contains_key(&current) {
                chain_to_remove.push(current);
                current = self.by_hash[&current].header.prev_blockhash;
            }

            if let Some(&deepest) = chain_to_remove.last() {
                if let Some(siblings) = self.children.get_mut(&current) {
                    siblings.remove(&deepest);
                }
            }

            for hash in chain_to_remove {
                self.children.remove(&hash);
                self.by_hash.remove(&hash);
                self.leaves.remove(&hash);
                removed += 1;
            }
        }

        self.leaves.clear();
        self.leaves.insert(tip_hash);
        if removed > 0 {
            debug!(removed, tip = %tip_hash, "pruned stale branches");
        }
        removed
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use headers_common::header::{Bits, HEADER_SIZE};

    /// Build a chain of headers with trivial, PoW-bypassed linkage, each
    /// carrying the minimum-difficulty bits used throughout these tests so
    /// `work()` is the same constant (4295032833) for every header.
    fn chain_of(genesis: BlockHeader, n: usize) -> Vec<BlockHeader> {
        let mut out = Vec::with_capacity(n);
        let mut prev = genesis;
        for i in 0..n {
            let header = BlockHeader {
                version: 1,
                prev_blockhash: prev.hash(),
                merkle_root: prev.merkle_root,
                time: genesis.time + i as u32 + 1,
                bits: Bits(0x1d00_ffff),
                nonce: i as u32,
            };
            out.push(header);
            prev = header;
        }
        out
    }

    fn test_genesis() -> BlockHeader {
        BlockHeader {
            version: 1,
            prev_blockhash: Hash([0; 32]),
            merkle_root: Hash([1; 32]),
            time: 1_000_000,
            bits: Bits(0x1d00_ffff),
            nonce: 0,
        }
    }

    #[test]
    fn adding_genesis_again_is_a_noop() {
        let genesis = test_genesis();
        let mut graph = HeaderGraph::new(genesis, []);
        let changeset = graph.add_headers(&[genesis]);
        assert!(changeset.is_noop());
        assert_eq!(graph.len(), 1);
    }

    #[test]
    fn linear_extension_advances_tip_and_work() {
        let genesis = test_genesis();
        let mut graph = HeaderGraph::new(genesis, []);
        let headers = chain_of(genesis, 9);

        let changeset = graph.add_headers(&headers);
        assert_eq!(changeset.added.len(), 9);
        assert_eq!(graph.tip().height, 9);
        assert_eq!(graph.leaves().count(), 1);
        assert_eq!(
            graph.tip().work_total.0,
            headers_common::U256::from_u64(10 * 4_295_032_833)
        );
    }

    #[test]
    fn duplicate_header_is_ignored_the_second_time() {
        let genesis = test_genesis();
        let mut graph = HeaderGraph::new(genesis, []);
        let headers = chain_of(genesis, 1);
        assert_eq!(graph.add_headers(&headers).added.len(), 1);
        assert_eq!(graph.add_headers(&headers).added.len(), 0);
    }

    #[test]
    fn header_with_missing_parent_drops_remainder_of_batch() {
        let genesis = test_genesis();
        let mut graph = HeaderGraph::new(genesis, []);
        let mut headers = chain_of(genesis, 3);
        // Break the link between height 1 and height 2.
        headers[2].prev_blockhash = Hash([0xff; 32]);
        let changeset = graph.add_headers(&headers);
        assert_eq!(changeset.added.len(), 1);
        assert_eq!(graph.tip().height, 1);
    }

    #[test]
    fn reorg_replaces_suffix_when_new_branch_has_more_work() {
        let genesis = test_genesis();
        let mut graph = HeaderGraph::new(genesis, []);
        let main = chain_of(genesis, 9);
        graph.add_headers(&main);
        assert_eq!(graph.tip().height, 9);

        // Fork from height 7 with three headers (new tip height 10).
        let fork_parent = main[6]; // height 7
        let fork = chain_of(fork_parent, 3);
        let changeset = graph.add_headers(&fork);

        assert_eq!(changeset.removed.len(), 2);
        assert_eq!(changeset.added.len(), 3);
        assert_eq!(graph.tip().height, 10);
        assert_eq!(graph.tip().hash, fork[2].hash());
    }

    #[test]
    fn tie_in_work_does_not_reorg() {
        let genesis = test_genesis();
        let mut graph = HeaderGraph::new(genesis, []);
        let main = chain_of(genesis, 1);
        graph.add_headers(&main);
        let original_tip = graph.tip().hash;

        // An alternate height-1 header has identical work (same bits) but
        // must not unseat the existing tip on a tie.
        let mut alt = chain_of(genesis, 1);
        alt[0].nonce = alt[0].nonce.wrapping_add(1);
        graph.add_headers(&alt);

        assert_eq!(graph.tip().hash, original_tip);
    }

    #[test]
    fn invalid_header_and_its_descendants_are_quarantined() {
        let genesis = test_genesis();
        let main = chain_of(genesis, 9);
        let fork_parent = main[6];
        let fork = chain_of(fork_parent, 3);
        let invalid_hash = fork[1].hash(); // height 9 of the new branch

        let mut graph = HeaderGraph::new(genesis, [invalid_hash]);
        graph.add_headers(&main);
        let tip_before = graph.tip().hash;

        let changeset = graph.add_headers(&fork);
        assert!(changeset.added.is_empty());
        assert_eq!(changeset.invalidated, vec![fork[1].hash(), fork[2].hash()]);
        assert_eq!(graph.tip().hash, tip_before);
    }

    #[test]
    fn prune_leaves_exactly_the_tip_and_is_idempotent() {
        let genesis = test_genesis();
        let mut graph = HeaderGraph::new(genesis, []);
        let main = chain_of(genesis, 9);
        graph.add_headers(&main);

        let fork_parent = main[6];
        let fork = chain_of(fork_parent, 3);
        graph.add_headers(&fork);

        let old_branch_hash = main[7].hash();
        assert!(graph.get_by_hash(&old_branch_hash).is_some());

        let removed = graph.prune_branches();
        assert_eq!(removed, 2);
        assert!(graph.get_by_hash(&old_branch_hash).is_none());
        assert_eq!(graph.leaves().count(), 1);
        assert_eq!(graph.leaves().next(), Some(&graph.tip().hash));

        assert_eq!(graph.prune_branches(), 0);
    }

    #[test]
    fn block_locator_always_ends_in_genesis() {
        let genesis = test_genesis();
        let mut graph = HeaderGraph::new(genesis, []);
        let main = chain_of(genesis, 20);
        graph.add_headers(&main);

        let locator = graph.block_locator();
        assert_eq!(*locator.last().unwrap(), genesis.hash());
        assert_eq!(locator[0], graph.tip().hash);
    }

    #[test]
    fn header_size_constant_matches_fixed_layout() {
        assert_eq!(HEADER_SIZE, 80);
    }
}
