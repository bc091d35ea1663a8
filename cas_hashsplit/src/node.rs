//! The hashsplit node blob record (spec §3, §6).

use cas_core::Ref;
use minicbor::{CborLen, Decode, Encode};

/// A child pointer inside a hashsplit node: the child's ref plus the byte
/// offset (absolute, within the whole reconstructed stream) at which the
/// child's range begins. The child's length is derivable from the next
/// child's offset (or the parent node's `size` for the last child), so it
/// is not duplicated here.
#[derive(Encode, Decode, CborLen, Clone, Copy, Debug, PartialEq, Eq)]
#[cbor(map)]
pub struct ChildRef {
    #[n(0)]
    #[cbor(with = "minicbor::bytes")]
    ref_bytes: [u8; 32],
    #[n(1)]
    pub offset: u64,
}

impl ChildRef {
    pub fn new(ref_: Ref, offset: u64) -> Self {
        Self {
            ref_bytes: (*ref_.as_bytes()),
            offset,
        }
    }

    pub fn ref_(&self) -> Ref {
        Ref::from_bytes(self.ref_bytes)
    }
}

/// A hashsplit node blob: describes a sub-range `[offset, offset+size)` of
/// a reconstructable byte stream, either as a list of raw leaf blobs
/// (`leaves`, non-empty, `nodes` empty) or a list of child node blobs
/// (`nodes`, non-empty, `leaves` empty). Exactly one list is non-empty,
/// except for the degenerate empty-stream root where both are empty and
/// `size == 0`.
#[derive(Encode, Decode, CborLen, Clone, Debug, PartialEq, Eq)]
#[cbor(map)]
pub struct HashsplitNode {
    #[n(0)]
    pub offset: u64,
    #[n(1)]
    pub size: u64,
    #[n(2)]
    pub leaves: Vec<ChildRef>,
    #[n(3)]
    pub nodes: Vec<ChildRef>,
}

impl HashsplitNode {
    pub fn is_leaf_level(&self) -> bool {
        self.nodes.is_empty()
    }

    pub fn children(&self) -> &[ChildRef] {
        if self.is_leaf_level() {
            &self.leaves
        } else {
            &self.nodes
        }
    }

    pub fn to_bytes(&self) -> bytes::Bytes {
        bytes::Bytes::from(minicbor::to_vec(self).expect("HashsplitNode encoding is infallible"))
    }

    pub fn from_bytes(bytes: &[u8]) -> Result<Self, minicbor::decode::Error> {
        minicbor::decode(bytes)
    }

    /// The byte length of the child starting at index `i`.
    pub fn child_len(&self, i: usize) -> u64 {
        let children = self.children();
        let start = children[i].offset;
        let end = children
            .get(i + 1)
            .map(|c| c.offset)
            .unwrap_or(self.offset + self.size);
        end - start
    }

    /// Index of the child whose range contains `target_offset`, via binary
    /// search over ascending child offsets.
    pub fn child_containing(&self, target_offset: u64) -> Option<usize> {
        let children = self.children();
        if children.is_empty() {
            return None;
        }
        let idx = children.partition_point(|c| c.offset <= target_offset);
        if idx == 0 { None } else { Some(idx - 1) }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn encode_decode_round_trip() {
        let node = HashsplitNode {
            offset: 0,
            size: 42,
            leaves: vec![ChildRef::new(Ref::of(b"a"), 0), ChildRef::new(Ref::of(b"b"), 20)],
            nodes: vec![],
        };
        let bytes = node.to_bytes();
        let decoded = HashsplitNode::from_bytes(&bytes).unwrap();
        assert_eq!(decoded, node);
    }

    #[test]
    fn child_containing_binary_search() {
        let node = HashsplitNode {
            offset: 0,
            size: 30,
            leaves: vec![
                ChildRef::new(Ref::of(b"a"), 0),
                ChildRef::new(Ref::of(b"b"), 10),
                ChildRef::new(Ref::of(b"c"), 20),
            ],
            nodes: vec![],
        };
        assert_eq!(node.child_containing(0), Some(0));
        assert_eq!(node.child_containing(9), Some(0));
        assert_eq!(node.child_containing(10), Some(1));
        assert_eq!(node.child_containing(25), Some(2));
        assert_eq!(node.child_len(0), 10);
        assert_eq!(node.child_len(2), 10);
    }
}
