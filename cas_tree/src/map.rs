//! Typed façade over the tree substrate (spec §4.3) for `bytes -> bytes`
//! maps. The root ref is a pure function of the map's logical contents —
//! not of the sequence of `set`/`remove` calls that produced it.

use cas_core::{CancellationToken, Ref, Result, Store};
use sha2::{Digest, Sha256};

use crate::algo::{self, Outcome};
use crate::shape::MapShape;

/// Writes the canonical empty map and returns its root ref.
pub async fn empty<S: Store + ?Sized>(store: &S, cancel: &CancellationToken) -> Result<Ref> {
    algo::empty(store, cancel).await
}

/// Inserts or updates `key -> payload`. Returns the new root and whether
/// the key was newly added, its payload changed, or nothing changed.
pub async fn set<S: Store + ?Sized>(
    store: &S,
    root: Ref,
    key: &[u8],
    payload: Vec<u8>,
    cancel: &CancellationToken,
) -> Result<(Ref, Outcome)> {
    let entry = (key.to_vec(), payload);
    algo::set::<S, MapShape>(store, root, &entry, cancel).await
}

/// Removes `key`, returning the new root and whether it was present.
pub async fn remove<S: Store + ?Sized>(
    store: &S,
    root: Ref,
    key: &[u8],
    cancel: &CancellationToken,
) -> Result<(Ref, bool)> {
    let hash: [u8; 32] = Sha256::digest(key).into();
    algo::remove::<S, MapShape>(store, root, hash, cancel).await
}

/// Looks up `key`'s payload.
pub async fn get<S: Store + ?Sized>(
    store: &S,
    root: Ref,
    key: &[u8],
    cancel: &CancellationToken,
) -> Result<Option<Vec<u8>>> {
    let hash: [u8; 32] = Sha256::digest(key).into();
    let entry = algo::lookup::<S, MapShape>(store, root, hash, cancel).await?;
    Ok(entry.map(|(_, payload)| payload))
}

/// Visits every `(key, payload)` pair exactly once.
pub async fn each<S: Store + ?Sized>(
    store: &S,
    root: Ref,
    cancel: &CancellationToken,
    mut callback: impl FnMut(Vec<u8>, Vec<u8>) -> Result<()> + Send,
) -> Result<()> {
    let mut cb = move |(key, payload): (Vec<u8>, Vec<u8>)| callback(key, payload);
    algo::each::<S, MapShape>(store, root, cancel, &mut cb).await
}

/// Bulk-constructs a map from a complete `key -> payload` set; produces
/// blobs bit-identical to inserting the same entries one at a time.
pub async fn bulk_build<S: Store + ?Sized>(
    store: &S,
    entries: impl IntoIterator<Item = (Vec<u8>, Vec<u8>)>,
    cancel: &CancellationToken,
) -> Result<Ref> {
    algo::bulk_build::<S, MapShape>(store, entries, cancel).await
}

/// Total number of keys reachable from `root`.
pub async fn len<S: Store + ?Sized>(
    store: &S,
    root: Ref,
    cancel: &CancellationToken,
) -> Result<u32> {
    algo::len(store, root, cancel).await
}

#[cfg(test)]
mod tests {
    use super::*;
    use cas_core::testutil::MemoryStoreStub;

    fn key(i: usize) -> Vec<u8> {
        format!("key{i}").into_bytes()
    }

    fn payload(i: usize) -> Vec<u8> {
        format!("payload{i}").into_bytes()
    }

    #[tokio::test]
    async fn set_then_get_round_trips() {
        let store = MemoryStoreStub::new();
        let cancel = CancellationToken::new();
        let root = empty(&store, &cancel).await.unwrap();
        let (root, outcome) = set(&store, root, b"a", b"1".to_vec(), &cancel).await.unwrap();
        assert_eq!(outcome, Outcome::Added);
        assert_eq!(get(&store, root, b"a", &cancel).await.unwrap(), Some(b"1".to_vec()));
        assert_eq!(get(&store, root, b"missing", &cancel).await.unwrap(), None);
    }

    #[tokio::test]
    async fn set_is_idempotent() {
        let store = MemoryStoreStub::new();
        let cancel = CancellationToken::new();
        let root = empty(&store, &cancel).await.unwrap();
        let (root1, o1) = set(&store, root, b"a", b"1".to_vec(), &cancel).await.unwrap();
        let (root2, o2) = set(&store, root1, b"a", b"1".to_vec(), &cancel).await.unwrap();
        assert_eq!(o1, Outcome::Added);
        assert_eq!(o2, Outcome::None);
        assert_eq!(root1, root2);
    }

    #[tokio::test]
    async fn set_with_different_payload_updates() {
        let store = MemoryStoreStub::new();
        let cancel = CancellationToken::new();
        let root = empty(&store, &cancel).await.unwrap();
        let (root, _) = set(&store, root, b"a", b"1".to_vec(), &cancel).await.unwrap();
        let (root, outcome) = set(&store, root, b"a", b"2".to_vec(), &cancel).await.unwrap();
        assert_eq!(outcome, Outcome::Updated);
        assert_eq!(get(&store, root, b"a", &cancel).await.unwrap(), Some(b"2".to_vec()));
    }

    #[tokio::test]
    async fn order_insensitivity_across_inserts_updates_and_deletes() {
        let store = MemoryStoreStub::new();
        let cancel = CancellationToken::new();

        let mut root_a = empty(&store, &cancel).await.unwrap();
        for i in 0..1000 {
            (root_a, _) = set(&store, root_a, &key(i), payload(i), &cancel).await.unwrap();
        }

        // Remove the first 200, then re-add them in reverse order: the
        // final logical content is identical, only history differs.
        let mut root_b = root_a;
        for i in 0..200 {
            (root_b, _) = remove(&store, root_b, &key(i), &cancel).await.unwrap();
        }
        for i in (0..200).rev() {
            (root_b, _) = set(&store, root_b, &key(i), payload(i), &cancel).await.unwrap();
        }

        assert_eq!(root_a, root_b);
    }

    #[tokio::test]
    async fn bulk_build_matches_incremental_insert() {
        let store = MemoryStoreStub::new();
        let cancel = CancellationToken::new();

        let mut incremental = empty(&store, &cancel).await.unwrap();
        let mut entries = Vec::new();
        for i in 0..500 {
            (incremental, _) = set(&store, incremental, &key(i), payload(i), &cancel)
                .await
                .unwrap();
            entries.push((key(i), payload(i)));
        }

        let bulk = bulk_build(&store, entries, &cancel).await.unwrap();
        assert_eq!(incremental, bulk);
    }

    #[tokio::test]
    async fn each_visits_every_member_exactly_once() {
        let store = MemoryStoreStub::new();
        let cancel = CancellationToken::new();
        let mut root = empty(&store, &cancel).await.unwrap();
        for i in 0..300 {
            (root, _) = set(&store, root, &key(i), payload(i), &cancel).await.unwrap();
        }
        let mut seen = std::collections::HashSet::new();
        each(&store, root, &cancel, |k, v| {
            assert!(seen.insert(k.clone()));
            assert_eq!(v, payload(String::from_utf8(k[3..].to_vec()).unwrap().parse().unwrap()));
            Ok(())
        })
        .await
        .unwrap();
        assert_eq!(seen.len(), 300);
        assert_eq!(len(&store, root, &cancel).await.unwrap(), 300);
    }

    #[tokio::test]
    async fn remove_then_reinsert_restores_original_root() {
        let store = MemoryStoreStub::new();
        let cancel = CancellationToken::new();
        let mut root = empty(&store, &cancel).await.unwrap();
        for i in 0..400 {
            (root, _) = set(&store, root, &key(i), payload(i), &cancel).await.unwrap();
        }
        let original = root;

        let mut after_remove = root;
        for i in 0..400 {
            (after_remove, _) = remove(&store, after_remove, &key(i), &cancel).await.unwrap();
        }
        assert_eq!(len(&store, after_remove, &cancel).await.unwrap(), 0);

        let mut restored = after_remove;
        for i in 0..400 {
            (restored, _) = set(&store, restored, &key(i), payload(i), &cancel).await.unwrap();
        }
        assert_eq!(restored, original);
    }
}
