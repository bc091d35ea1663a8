//! Replica reconstitution (spec §4.5): apply an anchor event to a
//! filesystem replica, after first draining every ref the primary has
//! written so far (the ordering constraint — "all blobs referenced by an
//! anchor must be present at the replica before the anchor is applied").

use std::future::Future;
use std::path::{Path, PathBuf};
use std::pin::Pin;
use std::sync::Arc;

use cas_core::{CancellationToken, Error, Ref, Result, Store};
use cas_fs::{directory, Dirent};
use cas_hashsplit::Reader;
use tokio::io::AsyncWriteExt;
use tokio::sync::mpsc;

use crate::streamer::AnchorEvent;

fn io_err(op: impl Into<String>, path: &Path, source: std::io::Error) -> Error {
    Error::io(format!("{} ({})", op.into(), path.display()), source)
}

/// Applies anchor events from a primary onto a filesystem tree rooted at
/// `replica_root`.
pub struct Replicator<S: Store + ?Sized> {
    store: Arc<S>,
    replica_root: PathBuf,
}

impl<S: Store + ?Sized> Replicator<S> {
    pub fn new(store: Arc<S>, replica_root: PathBuf) -> Self {
        Self { store, replica_root }
    }

    /// Drains every ref event already queued, non-blocking, then applies
    /// `event`. Callers that stream many anchors should call this for each
    /// one in turn — the pre-select must happen per anchor, not just once.
    pub async fn apply_anchor(
        &self,
        refs_rx: &mut mpsc::UnboundedReceiver<Ref>,
        event: &AnchorEvent,
        cancel: &CancellationToken,
    ) -> Result<()> {
        while refs_rx.try_recv().is_ok() {}

        let rel = event.name.trim_start_matches('/');
        if event.name.ends_with('/') {
            let rel = rel.trim_end_matches('/');
            let path = if rel.is_empty() { self.replica_root.clone() } else { self.replica_root.join(rel) };
            reconstitute_dir(&self.store, &path, event.ref_, cancel).await
        } else {
            let path = self.replica_root.join(rel);
            reconstitute_file(&self.store, &path, event.ref_, None, cancel).await
        }
    }
}

async fn reconstitute_file<S: Store + ?Sized>(
    store: &Arc<S>,
    path: &Path,
    ref_: Ref,
    mode: Option<u32>,
    cancel: &CancellationToken,
) -> Result<()> {
    if let Some(parent) = path.parent() {
        tokio::fs::create_dir_all(parent).await.map_err(|e| io_err("mkdir -p", parent, e))?;
    }
    let mut reader = Reader::open(store.clone(), ref_, cancel).await?;
    let contents = reader.read_to_end(cancel).await?;
    let mut file = tokio::fs::File::create(path).await.map_err(|e| io_err("create", path, e))?;
    file.write_all(&contents).await.map_err(|e| io_err("write", path, e))?;
    if let Some(mode) = mode {
        set_mode(path, mode).await?;
    }
    Ok(())
}

#[cfg(unix)]
async fn set_mode(path: &Path, mode: u32) -> Result<()> {
    use std::os::unix::fs::PermissionsExt;
    tokio::fs::set_permissions(path, std::fs::Permissions::from_mode(mode))
        .await
        .map_err(|e| io_err("chmod", path, e))
}

#[cfg(not(unix))]
async fn set_mode(_path: &Path, _mode: u32) -> Result<()> {
    Ok(())
}

/// Merge-diffs `primary_ref`'s directory blob against `path`'s on-disk
/// contents: extra entries are removed, missing or file-type-mismatched
/// entries are (re)created, and subdirectories are recursed into.
fn reconstitute_dir<'a, S: Store + ?Sized>(
    store: &'a Arc<S>,
    path: &'a Path,
    primary_ref: Ref,
    cancel: &'a CancellationToken,
) -> Pin<Box<dyn Future<Output = Result<()>> + Send + 'a>> {
    Box::pin(async move {
        if cancel.is_cancelled() {
            return Err(Error::Cancelled);
        }
        tokio::fs::create_dir_all(path).await.map_err(|e| io_err("mkdir -p", path, e))?;

        let wanted = directory::list(store.as_ref(), primary_ref, cancel).await?;
        let wanted_names: std::collections::HashSet<&str> = wanted.iter().map(|(n, _)| n.as_str()).collect();

        let mut read_dir = tokio::fs::read_dir(path).await.map_err(|e| io_err("read_dir", path, e))?;
        while let Some(entry) = read_dir.next_entry().await.map_err(|e| io_err("read_dir entry", path, e))? {
            let name = entry.file_name().to_string_lossy().into_owned();
            if wanted_names.contains(name.as_str()) {
                continue;
            }
            let extra = entry.path();
            let file_type = entry.file_type().await.map_err(|e| io_err("stat", &extra, e))?;
            if file_type.is_dir() {
                tokio::fs::remove_dir_all(&extra).await.map_err(|e| io_err("rm -r", &extra, e))?;
            } else {
                tokio::fs::remove_file(&extra).await.map_err(|e| io_err("rm", &extra, e))?;
            }
        }

        for (name, dirent) in &wanted {
            let child_path = path.join(name);
            reconstitute_entry(store, &child_path, dirent, cancel).await?;
        }
        Ok(())
    })
}

async fn reconstitute_entry<S: Store + ?Sized>(
    store: &Arc<S>,
    path: &Path,
    dirent: &Dirent,
    cancel: &CancellationToken,
) -> Result<()> {
    if dirent.is_dir() {
        reconstitute_dir(store, path, dirent.item_ref()?, cancel).await
    } else if dirent.is_symlink() {
        reconstitute_symlink(path, &dirent.item).await
    } else {
        reconstitute_file(store, path, dirent.item_ref()?, Some(dirent.mode & 0o7777), cancel).await
    }
}

#[cfg(unix)]
async fn reconstitute_symlink(path: &Path, target: &str) -> Result<()> {
    match tokio::fs::symlink_metadata(path).await {
        Ok(meta) if meta.file_type().is_symlink() => {
            if tokio::fs::read_link(path).await.map_err(|e| io_err("readlink", path, e))? == Path::new(target) {
                return Ok(());
            }
            tokio::fs::remove_file(path).await.map_err(|e| io_err("rm", path, e))?;
        }
        Ok(_) => {
            tokio::fs::remove_file(path).await.map_err(|e| io_err("rm", path, e))?;
        }
        Err(_) => {}
    }
    tokio::fs::symlink(target, path).await.map_err(|e| io_err("symlink", path, e))
}

#[cfg(not(unix))]
async fn reconstitute_symlink(_path: &Path, _target: &str) -> Result<()> {
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ingest::ingest;
    use crate::streamer::Streamer;
    use cas_core::testutil::MemoryStoreStub;

    #[tokio::test]
    async fn apply_anchor_materializes_a_directory_tree() {
        let primary = tempfile::tempdir().unwrap();
        std::fs::create_dir(primary.path().join("sub")).unwrap();
        std::fs::write(primary.path().join("a.txt"), b"alpha").unwrap();
        std::fs::write(primary.path().join("sub/b.txt"), b"beta").unwrap();

        let store = Arc::new(MemoryStoreStub::new());
        let cancel = CancellationToken::new();
        let at: chrono::DateTime<chrono::Utc> = "2024-01-01T00:00:00Z".parse().unwrap();
        let (streamer, mut events) = Streamer::new();
        let root_ref = ingest(&*store, primary.path(), at, Some(&streamer), &cancel).await.unwrap();

        let replica_dir = tempfile::tempdir().unwrap();
        let replicator = Replicator::new(store.clone(), replica_dir.path().to_path_buf());
        let root_event = AnchorEvent { name: "/".to_string(), ref_: root_ref, at };
        replicator.apply_anchor(&mut events.refs_rx, &root_event, &cancel).await.unwrap();

        assert_eq!(std::fs::read(replica_dir.path().join("a.txt")).unwrap(), b"alpha");
        assert_eq!(std::fs::read(replica_dir.path().join("sub/b.txt")).unwrap(), b"beta");
    }

    #[tokio::test]
    async fn apply_anchor_removes_stale_entries() {
        let store = Arc::new(MemoryStoreStub::new());
        let cancel = CancellationToken::new();
        let at: chrono::DateTime<chrono::Utc> = "2024-01-01T00:00:00Z".parse().unwrap();

        let replica_dir = tempfile::tempdir().unwrap();
        std::fs::write(replica_dir.path().join("stale.txt"), b"old").unwrap();

        let empty_root = directory::empty(&*store, &cancel).await.unwrap();
        let (streamer, mut events) = Streamer::new();
        streamer.notify_put(empty_root);
        let replicator = Replicator::new(store.clone(), replica_dir.path().to_path_buf());
        let event = AnchorEvent { name: "/".to_string(), ref_: empty_root, at };
        replicator.apply_anchor(&mut events.refs_rx, &event, &cancel).await.unwrap();

        assert!(!replica_dir.path().join("stale.txt").exists());
    }
}
