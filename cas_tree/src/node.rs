//! The tree-substrate node blob record (spec §3, §6): a persistent,
//! order-insensitive binary tree shared by the `Map` and `Set` façades.

use cas_core::Ref;
use minicbor::{CborLen, Decode, Encode};

/// Fixed leaf capacity: a leaf node holds at most this many members before
/// it splits (spec invariant 3).
pub const MAX_NODE: usize = 128;

/// A child pointer in an internal node: the child's ref plus its member
/// count, so ancestors can maintain `size` without re-fetching children.
#[derive(Encode, Decode, CborLen, Clone, Copy, Debug, PartialEq, Eq)]
#[cbor(map)]
pub struct ChildPtr {
    #[n(0)]
    #[cbor(with = "minicbor::bytes")]
    ref_bytes: [u8; 32],
    #[n(1)]
    pub size: u32,
}

impl ChildPtr {
    pub fn new(ref_: Ref, size: u32) -> Self {
        Self {
            ref_bytes: *ref_.as_bytes(),
            size,
        }
    }

    pub fn ref_(&self) -> Ref {
        Ref::from_bytes(self.ref_bytes)
    }
}

/// One member stored directly in a leaf: a key-hash-sorted `(key, payload)`
/// pair for a Map leaf, or a bare ref for a Set leaf. Both shapes reduce to
/// "sort key bytes" + "payload bytes" at the wire level — a Set member's
/// payload is simply empty and its sort key *is* its 32-byte ref.
#[derive(Encode, Decode, CborLen, Clone, Debug, PartialEq, Eq)]
#[cbor(map)]
pub struct Member {
    #[n(0)]
    pub key: Vec<u8>,
    #[n(1)]
    pub payload: Vec<u8>,
}

/// A tree-substrate node blob. Exactly one of `members` (leaf) or
/// `left`/`right` (internal) is populated, per spec invariant 2 (no
/// single-child internal nodes) and invariant 3 (no direct members on an
/// internal node).
#[derive(Encode, Decode, CborLen, Clone, Debug, PartialEq, Eq)]
#[cbor(map)]
pub struct TreeNode {
    #[n(0)]
    pub depth: u32,
    #[n(1)]
    pub size: u32,
    #[n(2)]
    pub left: Option<ChildPtr>,
    #[n(3)]
    pub right: Option<ChildPtr>,
    #[n(4)]
    pub members: Vec<Member>,
}

impl TreeNode {
    pub fn empty_leaf(depth: u32) -> Self {
        Self {
            depth,
            size: 0,
            left: None,
            right: None,
            members: Vec::new(),
        }
    }

    pub fn is_leaf(&self) -> bool {
        self.left.is_none() && self.right.is_none()
    }

    pub fn to_bytes(&self) -> bytes::Bytes {
        bytes::Bytes::from(minicbor::to_vec(self).expect("TreeNode encoding is infallible"))
    }

    pub fn from_bytes(bytes: &[u8]) -> Result<Self, minicbor::decode::Error> {
        minicbor::decode(bytes)
    }
}
