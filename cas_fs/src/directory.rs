//! Directory blob (spec §3): a Map from filename bytes to a serialized
//! [`Dirent`]. Built directly on `cas_tree::map` — a directory is simply a
//! `Map` whose payloads happen to be `Dirent` CBOR.

use cas_core::{CancellationToken, Error, Ref, Result, Store};
use cas_tree::Outcome;

use crate::dirent::Dirent;

/// Writes and returns the canonical empty directory's ref.
pub async fn empty<S: Store + ?Sized>(store: &S, cancel: &CancellationToken) -> Result<Ref> {
    cas_tree::map::empty(store, cancel).await
}

/// Adds or replaces the entry for `name`.
pub async fn put<S: Store + ?Sized>(
    store: &S,
    dir: Ref,
    name: &str,
    entry: &Dirent,
    cancel: &CancellationToken,
) -> Result<(Ref, Outcome)> {
    cas_tree::map::set(store, dir, name.as_bytes(), entry.to_bytes().to_vec(), cancel).await
}

/// Removes the entry for `name`, if present.
pub async fn remove<S: Store + ?Sized>(
    store: &S,
    dir: Ref,
    name: &str,
    cancel: &CancellationToken,
) -> Result<(Ref, bool)> {
    cas_tree::map::remove(store, dir, name.as_bytes(), cancel).await
}

/// Looks up a single entry by name.
pub async fn get<S: Store + ?Sized>(
    store: &S,
    dir: Ref,
    name: &str,
    cancel: &CancellationToken,
) -> Result<Option<Dirent>> {
    let Some(bytes) = cas_tree::map::get(store, dir, name.as_bytes(), cancel).await? else {
        return Ok(None);
    };
    let dirent = Dirent::from_bytes(&bytes)
        .map_err(|e| Error::corrupt(dir, format!("dirent decode for {name:?}: {e}")))?;
    Ok(Some(dirent))
}

/// Lists every `(name, Dirent)` pair in the directory. Order follows the
/// underlying tree's traversal order, not filename sort order — callers
/// that need sorted output should sort the returned vec themselves.
pub async fn list<S: Store + ?Sized>(
    store: &S,
    dir: Ref,
    cancel: &CancellationToken,
) -> Result<Vec<(String, Dirent)>> {
    let mut out = Vec::new();
    let mut decode_err = None;
    cas_tree::map::each(store, dir, cancel, |key, payload| {
        let name = match String::from_utf8(key) {
            Ok(n) => n,
            Err(e) => {
                decode_err = Some(Error::corrupt(dir, format!("non-UTF-8 filename: {e}")));
                return Ok(());
            }
        };
        match Dirent::from_bytes(&payload) {
            Ok(dirent) => out.push((name, dirent)),
            Err(e) => decode_err = Some(Error::corrupt(dir, format!("dirent decode for {name:?}: {e}"))),
        }
        Ok(())
    })
    .await?;
    if let Some(e) = decode_err {
        return Err(e);
    }
    Ok(out)
}

#[cfg(test)]
mod tests {
    use super::*;
    use cas_core::testutil::MemoryStoreStub;
    use crate::dirent::DEFAULT_FILE_PERM;

    #[tokio::test]
    async fn put_get_remove_round_trip() {
        let store = MemoryStoreStub::new();
        let cancel = CancellationToken::new();
        let dir = empty(&store, &cancel).await.unwrap();
        let dirent = Dirent::file(Ref::of(b"hello"), DEFAULT_FILE_PERM);
        let (dir, _) = put(&store, dir, "a.txt", &dirent, &cancel).await.unwrap();

        assert_eq!(get(&store, dir, "a.txt", &cancel).await.unwrap(), Some(dirent));
        assert_eq!(get(&store, dir, "missing", &cancel).await.unwrap(), None);

        let (dir, removed) = remove(&store, dir, "a.txt", &cancel).await.unwrap();
        assert!(removed);
        assert_eq!(get(&store, dir, "a.txt", &cancel).await.unwrap(), None);
    }

    #[tokio::test]
    async fn list_returns_every_entry() {
        let store = MemoryStoreStub::new();
        let cancel = CancellationToken::new();
        let mut dir = empty(&store, &cancel).await.unwrap();
        for name in ["a", "b", "c"] {
            let dirent = Dirent::file(Ref::of(name.as_bytes()), DEFAULT_FILE_PERM);
            (dir, _) = put(&store, dir, name, &dirent, &cancel).await.unwrap();
        }
        let mut names: Vec<String> = list(&store, dir, &cancel).await.unwrap().into_iter().map(|(n, _)| n).collect();
        names.sort();
        assert_eq!(names, vec!["a".to_string(), "b".to_string(), "c".to_string()]);
    }
}
