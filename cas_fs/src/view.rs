//! Read-only filesystem façade over a directory tree (spec §4.5's "FS
//! view"): resolve a `/`-separated path through nested directory Maps and
//! open a hashsplit reader onto a regular file's contents.

use std::sync::Arc;

use cas_core::{Error, Ref, Result, Store};
use cas_hashsplit::Reader;
use tokio_util::sync::CancellationToken;

use crate::dirent::Dirent;
use crate::directory;

/// Resolves `path` (its components joined by `/`, leading/trailing
/// slashes ignored) from `root` down to the dirent naming the final
/// component. Each intermediate component must itself be a directory.
pub async fn resolve<S: Store + ?Sized>(
    store: &S,
    root: Ref,
    path: &str,
    cancel: &CancellationToken,
) -> Result<Dirent> {
    let components: Vec<&str> = path.split('/').filter(|c| !c.is_empty()).collect();
    if components.is_empty() {
        return Err(Error::InvalidArgument("empty path".into()));
    }

    let mut current_dir = root;
    for (i, name) in components.iter().enumerate() {
        let entry = directory::get(store, current_dir, name, cancel)
            .await?
            .ok_or_else(|| Error::NotFound(path.to_string()))?;

        let is_last = i == components.len() - 1;
        if is_last {
            return Ok(entry);
        }
        if !entry.is_dir() {
            return Err(Error::InvalidArgument(format!(
                "{path:?}: {name:?} is not a directory"
            )));
        }
        current_dir = entry.item_ref()?;
    }
    unreachable!("components is non-empty, loop always returns")
}

/// Opens a random-access reader over a regular file's dirent.
pub async fn open_file<S: Store + ?Sized>(
    store: Arc<S>,
    entry: &Dirent,
    cancel: &CancellationToken,
) -> Result<Reader<S>> {
    if !entry.is_file() {
        return Err(Error::InvalidArgument("dirent is not a regular file".into()));
    }
    let root = entry.item_ref()?;
    Reader::open(store, root, cancel).await
}

/// Lists the directory named by `path` relative to `root` (`""` or `"/"`
/// lists `root` itself).
pub async fn list_dir<S: Store + ?Sized>(
    store: &S,
    root: Ref,
    path: &str,
    cancel: &CancellationToken,
) -> Result<Vec<(String, Dirent)>> {
    let dir_ref = if path.trim_matches('/').is_empty() {
        root
    } else {
        let entry = resolve(store, root, path, cancel).await?;
        if !entry.is_dir() {
            return Err(Error::InvalidArgument(format!("{path:?} is not a directory")));
        }
        entry.item_ref()?
    };
    directory::list(store, dir_ref, cancel).await
}

#[cfg(test)]
mod tests {
    use super::*;
    use cas_core::testutil::MemoryStoreStub;
    use cas_hashsplit::{write_stream, ChunkerConfig};
    use crate::dirent::{DEFAULT_DIR_PERM, DEFAULT_FILE_PERM};
    use std::io::Cursor;

    #[tokio::test]
    async fn resolve_walks_nested_directories() {
        let store = Arc::new(MemoryStoreStub::new());
        let cancel = CancellationToken::new();

        let file_root = write_stream(&*store, Cursor::new(b"hello from b/c".to_vec()), ChunkerConfig::default(), &cancel)
            .await
            .unwrap();
        let file_dirent = Dirent::file(file_root, DEFAULT_FILE_PERM);

        let mut inner_dir = directory::empty(&*store, &cancel).await.unwrap();
        (inner_dir, _) = directory::put(&*store, inner_dir, "c", &file_dirent, &cancel).await.unwrap();

        let mut outer_dir = directory::empty(&*store, &cancel).await.unwrap();
        let b_dirent = Dirent::directory(inner_dir, DEFAULT_DIR_PERM);
        (outer_dir, _) = directory::put(&*store, outer_dir, "b", &b_dirent, &cancel).await.unwrap();

        let resolved = resolve(&*store, outer_dir, "b/c", &cancel).await.unwrap();
        assert_eq!(resolved, file_dirent);

        let mut reader = open_file(store.clone(), &resolved, &cancel).await.unwrap();
        let contents = reader.read_to_end(&cancel).await.unwrap();
        assert_eq!(contents.as_ref(), b"hello from b/c");
    }

    #[tokio::test]
    async fn resolve_through_a_file_component_fails() {
        let store = Arc::new(MemoryStoreStub::new());
        let cancel = CancellationToken::new();
        let file_root = write_stream(&*store, Cursor::new(b"leaf".to_vec()), ChunkerConfig::default(), &cancel)
            .await
            .unwrap();
        let mut dir = directory::empty(&*store, &cancel).await.unwrap();
        (dir, _) = directory::put(&*store, dir, "a", &Dirent::file(file_root, DEFAULT_FILE_PERM), &cancel)
            .await
            .unwrap();

        let err = resolve(&*store, dir, "a/b", &cancel).await.unwrap_err();
        assert!(matches!(err, Error::InvalidArgument(_)));
    }

    #[tokio::test]
    async fn list_dir_lists_the_root_for_an_empty_path() {
        let store = Arc::new(MemoryStoreStub::new());
        let cancel = CancellationToken::new();
        let file_root = write_stream(&*store, Cursor::new(b"x".to_vec()), ChunkerConfig::default(), &cancel)
            .await
            .unwrap();
        let mut dir = directory::empty(&*store, &cancel).await.unwrap();
        (dir, _) = directory::put(&*store, dir, "a", &Dirent::file(file_root, DEFAULT_FILE_PERM), &cancel)
            .await
            .unwrap();

        let listed = list_dir(&*store, dir, "", &cancel).await.unwrap();
        assert_eq!(listed.len(), 1);
        assert_eq!(listed[0].0, "a");
    }
}
