//! Recursive filesystem ingestion (spec §4.5): hashsplit every regular
//! file, build one directory Map per directory, and publish an anchor for
//! every file and every directory along the way.

use std::future::Future;
use std::path::Path;
use std::pin::Pin;

use anyhow::Context as _;
use cas_core::{CancellationToken, Error, Ref, Result, Store};
use cas_fs::dirent::{DEFAULT_DIR_PERM, DEFAULT_FILE_PERM};
use cas_fs::{directory, Dirent};
use cas_hashsplit::{write_stream, ChunkerConfig};
use chrono::{DateTime, Utc};

use crate::streamer::Streamer;

fn io_err(op: impl Into<String>, path: &Path, source: std::io::Error) -> Error {
    Error::io(format!("{} ({})", op.into(), path.display()), source)
}

/// Anchor name for a directory at `rel` ("" for the ingestion root, whose
/// anchor is just `/`), conventionally suffixed with `/` per spec §4.5.
fn dir_anchor_name(rel: &str) -> String {
    if rel.is_empty() {
        "/".to_string()
    } else {
        format!("/{rel}/")
    }
}

fn file_anchor_name(rel: &str) -> String {
    format!("/{rel}")
}

/// Walks `root_path` into `store`, publishing one anchor per file
/// (`/relative/path`) and one per directory (`/relative/path/`, the root
/// itself anchored as `/`), and returns the root directory's Map ref.
/// `streamer`, if given, is notified of every blob and anchor written so a
/// concurrent replicator can stream along behind the walk.
pub async fn ingest<S: Store + ?Sized>(
    store: &S,
    root_path: &Path,
    at: DateTime<Utc>,
    streamer: Option<&Streamer>,
    cancel: &CancellationToken,
) -> anyhow::Result<Ref> {
    let root_ref = ingest_dir(store, root_path, "", at, streamer, cancel)
        .await
        .with_context(|| format!("ingesting {}", root_path.display()))?;
    let name = dir_anchor_name("");
    cas_anchor::put(store, &name, root_ref, at, cancel).await?;
    if let Some(s) = streamer {
        s.notify_anchor(name, root_ref, at);
    }
    Ok(root_ref)
}

fn ingest_dir<'a, S: Store + ?Sized>(
    store: &'a S,
    path: &'a Path,
    rel: &'a str,
    at: DateTime<Utc>,
    streamer: Option<&'a Streamer>,
    cancel: &'a CancellationToken,
) -> Pin<Box<dyn Future<Output = Result<Ref>> + Send + 'a>> {
    Box::pin(async move {
        if cancel.is_cancelled() {
            return Err(Error::Cancelled);
        }
        let mut read_dir = tokio::fs::read_dir(path)
            .await
            .map_err(|e| io_err("read_dir", path, e))?;

        let mut dir_ref = directory::empty(store, cancel).await?;
        while let Some(entry) = read_dir
            .next_entry()
            .await
            .map_err(|e| io_err("read_dir entry", path, e))?
        {
            let name = entry
                .file_name()
                .into_string()
                .map_err(|_| Error::InvalidArgument(format!("non-UTF-8 filename under {}", path.display())))?;
            let child_rel = if rel.is_empty() { name.clone() } else { format!("{rel}/{name}") };
            let file_type = entry
                .file_type()
                .await
                .map_err(|e| io_err("stat", &entry.path(), e))?;

            let dirent = if file_type.is_dir() {
                let sub_ref = ingest_dir(store, &entry.path(), &child_rel, at, streamer, cancel).await?;
                let anchor_name = dir_anchor_name(&child_rel);
                cas_anchor::put(store, &anchor_name, sub_ref, at, cancel).await?;
                if let Some(s) = streamer {
                    s.notify_anchor(anchor_name, sub_ref, at);
                }
                Dirent::directory(sub_ref, perm_bits(&entry, DEFAULT_DIR_PERM).await?)
            } else if file_type.is_symlink() {
                let target = tokio::fs::read_link(entry.path())
                    .await
                    .map_err(|e| io_err("readlink", &entry.path(), e))?;
                Dirent::symlink(target.to_string_lossy().into_owned())
            } else {
                let file = tokio::fs::File::open(entry.path())
                    .await
                    .map_err(|e| io_err("open", &entry.path(), e))?;
                let file_ref = write_stream(store, file, ChunkerConfig::default(), cancel).await?;
                if let Some(s) = streamer {
                    s.notify_put(file_ref);
                }
                let anchor_name = file_anchor_name(&child_rel);
                cas_anchor::put(store, &anchor_name, file_ref, at, cancel).await?;
                if let Some(s) = streamer {
                    s.notify_anchor(anchor_name, file_ref, at);
                }
                Dirent::file(file_ref, perm_bits(&entry, DEFAULT_FILE_PERM).await?)
            };

            (dir_ref, _) = directory::put(store, dir_ref, &name, &dirent, cancel).await?;
        }
        if let Some(s) = streamer {
            s.notify_put(dir_ref);
        }
        Ok(dir_ref)
    })
}

#[cfg(unix)]
async fn perm_bits(entry: &tokio::fs::DirEntry, _default: u32) -> Result<u32> {
    use std::os::unix::fs::PermissionsExt;
    let meta = entry
        .metadata()
        .await
        .map_err(|e| io_err("stat", &entry.path(), e))?;
    Ok(meta.permissions().mode() & 0o7777)
}

#[cfg(not(unix))]
async fn perm_bits(_entry: &tokio::fs::DirEntry, default: u32) -> Result<u32> {
    Ok(default)
}

#[cfg(test)]
mod tests {
    use super::*;
    use cas_core::testutil::MemoryStoreStub;

    #[tokio::test]
    async fn ingest_builds_a_readable_directory_tree() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::create_dir(dir.path().join("sub")).unwrap();
        std::fs::write(dir.path().join("a.txt"), b"hello").unwrap();
        std::fs::write(dir.path().join("sub/b.txt"), b"world").unwrap();

        let store = MemoryStoreStub::new();
        let cancel = CancellationToken::new();
        let at: DateTime<Utc> = "2024-01-01T00:00:00Z".parse().unwrap();
        let root_ref = ingest(&store, dir.path(), at, None, &cancel).await.unwrap();

        let entries = directory::list(&store, root_ref, &cancel).await.unwrap();
        let mut names: Vec<&str> = entries.iter().map(|(n, _)| n.as_str()).collect();
        names.sort();
        assert_eq!(names, vec!["a.txt", "sub"]);

        let a = entries.iter().find(|(n, _)| n == "a.txt").unwrap().1.clone();
        assert!(a.is_file());
        assert_eq!(cas_anchor::get(&store, "/", at, &cancel).await.unwrap(), root_ref);
        assert_eq!(cas_anchor::get(&store, "/a.txt", at, &cancel).await.unwrap(), a.item_ref().unwrap());
    }
}
