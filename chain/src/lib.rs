//! The header graph: a tree of all known headers with a materialized
//! longest chain, re-org handling, invalid-block quarantine, and pruning.
//! The headers-only analogue of `nakamoto_common::block::tree`.

pub mod node;
pub mod tree;

pub use node::HeaderNode;
pub use tree::{Changeset, HeaderGraph};
