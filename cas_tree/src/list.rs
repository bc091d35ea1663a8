//! List blob (spec §3): a flat sequence of refs, with no tree structure,
//! for the cases where insertion order matters and the order-insensitive
//! Map/Set substrate doesn't apply (e.g. an anchor history snapshot or a
//! directory's change log).

use cas_core::{CancellationToken, Ref, Result, Store};
use minicbor::{CborLen, Decode, Encode};

/// One entry in a list blob: a bare ref, wrapped only so the CBOR field
/// can carry it as a byte string via `minicbor::bytes` (the same pattern
/// `cas_hashsplit::ChildRef` uses for its ref field).
#[derive(Encode, Decode, CborLen, Clone, Copy, Debug, PartialEq, Eq)]
#[cbor(map)]
struct ListEntry {
    #[n(0)]
    #[cbor(with = "minicbor::bytes")]
    ref_bytes: [u8; 32],
}

#[derive(Encode, Decode, CborLen, Clone, Debug, PartialEq, Eq, Default)]
#[cbor(map)]
pub struct ListBlob {
    #[n(0)]
    entries: Vec<ListEntry>,
}

impl ListBlob {
    pub fn new(refs: Vec<Ref>) -> Self {
        Self {
            entries: refs
                .into_iter()
                .map(|r| ListEntry { ref_bytes: *r.as_bytes() })
                .collect(),
        }
    }

    pub fn refs(&self) -> Vec<Ref> {
        self.entries.iter().map(|e| Ref::from_bytes(e.ref_bytes)).collect()
    }

    pub fn to_bytes(&self) -> bytes::Bytes {
        bytes::Bytes::from(minicbor::to_vec(self).expect("ListBlob encoding is infallible"))
    }

    pub fn from_bytes(bytes: &[u8]) -> Result<Self, minicbor::decode::Error> {
        minicbor::decode(bytes)
    }
}

/// Writes `refs` as a list blob and returns its ref.
pub async fn write<S: Store + ?Sized>(
    store: &S,
    refs: Vec<Ref>,
    cancel: &CancellationToken,
) -> Result<Ref> {
    let blob = ListBlob::new(refs);
    let (r, _added) = store.put(blob.to_bytes(), cancel).await?;
    Ok(r)
}

/// Reads back the ref sequence stored at `root`.
pub async fn read<S: Store + ?Sized>(
    store: &S,
    root: Ref,
    cancel: &CancellationToken,
) -> Result<Vec<Ref>> {
    let bytes = store.get(root, cancel).await?;
    let blob = ListBlob::from_bytes(&bytes)
        .map_err(|e| cas_core::Error::corrupt(root, format!("list blob decode: {e}")))?;
    Ok(blob.refs())
}

/// Appends `r` to the list at `root`, writing a new list blob (the
/// original stays valid, per spec §3's immutability lifecycle).
pub async fn push<S: Store + ?Sized>(
    store: &S,
    root: Ref,
    r: Ref,
    cancel: &CancellationToken,
) -> Result<Ref> {
    let mut refs = read(store, root, cancel).await?;
    refs.push(r);
    write(store, refs, cancel).await
}
