//! A single vertex of the header graph.

use headers_common::{BlockHeader, Hash, Height, Work};

/// A header, as stored in the graph, together with its derived position.
///
/// Created once when a header is linked into the graph; `height` and
/// `work_total` are computed at that point and never change afterwards.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct HeaderNode {
    /// The header itself.
    pub header: BlockHeader,
    /// This header's hash, cached to avoid recomputing it.
    pub hash: Hash,
    /// Height above genesis (genesis is height 0).
    pub height: Height,
    /// Cumulative proof-of-work from genesis to this header, inclusive.
    pub work_total: Work,
}

impl HeaderNode {
    /// Construct the genesis node.
    pub fn genesis(header: BlockHeader) -> Self {
        let hash = header.hash();
        let work_total = header.work();
        HeaderNode {
            header,
            hash,
            height: 0,
            work_total,
        }
    }

    /// Construct a non-genesis node, linked onto `parent`.
    pub fn link(header: BlockHeader, parent: &HeaderNode) -> Self {
        let hash = header.hash();
        HeaderNode {
            header,
            hash,
            height: parent.height + 1,
            work_total: parent.work_total + header.work(),
        }
    }
}
