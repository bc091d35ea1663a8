//! The `Shape` split called out in spec §9 "Design Notes": one generic
//! tree algorithm parameterized by a zero-sized "member kind" rather than
//! a runtime-reflection trick. `MapShape` and `SetShape` are the two
//! implementations; both drive the same `algo` module.

use cas_core::Ref;
use sha2::{Digest, Sha256};

use crate::node::Member;

/// What the tree algorithm needs from a member kind: how to derive the
/// 32-byte sort key (from either a not-yet-inserted entry or an
/// already-encoded wire `Member`), and how to convert between the two.
pub trait Shape: Send + Sync + 'static {
    /// The logical value callers insert, look up, and iterate: a
    /// `(key, payload)` pair for `Map`, a bare `Ref` for `Set`.
    type Entry: Clone + Send + Sync;

    fn entry_sort_key(entry: &Self::Entry) -> [u8; 32];
    fn member_sort_key(member: &Member) -> [u8; 32];
    fn entry_to_member(entry: &Self::Entry) -> Member;
    fn member_to_entry(member: &Member) -> Self::Entry;
}

/// `Map`'s member kind: sort key is `SHA-256(key)` (spec §3's "key hash"),
/// not the key itself — two keys with adjacent bytes can land anywhere in
/// the tree relative to each other.
pub struct MapShape;

impl Shape for MapShape {
    type Entry = (Vec<u8>, Vec<u8>);

    fn entry_sort_key((key, _payload): &Self::Entry) -> [u8; 32] {
        Sha256::digest(key).into()
    }

    fn member_sort_key(member: &Member) -> [u8; 32] {
        Sha256::digest(&member.key).into()
    }

    fn entry_to_member((key, payload): &Self::Entry) -> Member {
        Member {
            key: key.clone(),
            payload: payload.clone(),
        }
    }

    fn member_to_entry(member: &Member) -> Self::Entry {
        (member.key.clone(), member.payload.clone())
    }
}

/// `Set`'s member kind: the member *is* its own sort key, and carries no
/// payload — `entry_to_member`/`member_to_entry` round-trip a bare `Ref`
/// through `Member.key`, leaving `payload` always empty.
pub struct SetShape;

impl Shape for SetShape {
    type Entry = Ref;

    fn entry_sort_key(entry: &Self::Entry) -> [u8; 32] {
        *entry.as_bytes()
    }

    fn member_sort_key(member: &Member) -> [u8; 32] {
        let mut out = [0u8; 32];
        out.copy_from_slice(&member.key);
        out
    }

    fn entry_to_member(entry: &Self::Entry) -> Member {
        Member {
            key: entry.as_bytes().to_vec(),
            payload: Vec::new(),
        }
    }

    fn member_to_entry(member: &Member) -> Self::Entry {
        let mut bytes = [0u8; 32];
        bytes.copy_from_slice(&member.key);
        Ref::from_bytes(bytes)
    }
}
