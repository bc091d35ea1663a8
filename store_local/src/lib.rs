//! A filesystem [`Store`](cas_core::Store) backend implementing the
//! on-disk layout from spec §6 exactly: blobs sharded by the first two
//! bytes of their hex ref, anchors sharded by an Adler-32 checksum of
//! their (percent-escaped) name.
//!
//! Grounded in the teacher's `s5_blob_stores_local::LocalStore` for the
//! overall shape (a `{base_path}`-relative config struct, `tokio::fs`
//! throughout); the sharded directory layout and anchor history handling
//! are new, since spec §6 pins down a layout the teacher does not use.

use std::path::{Path, PathBuf};

use async_trait::async_trait;
use bytes::Bytes;
use cas_core::store::{AnchorRecord, Blob, Store};
use cas_core::{CancellationToken, Error, Ref, Result};
use chrono::{DateTime, SecondsFormat, Utc};
use percent_encoding::{percent_decode_str, utf8_percent_encode, NON_ALPHANUMERIC};

#[derive(Debug, Clone)]
pub struct LocalStoreConfig {
    pub root: PathBuf,
}

#[derive(Debug, Clone)]
pub struct LocalStore {
    root: PathBuf,
}

impl LocalStore {
    pub fn create(config: LocalStoreConfig) -> Self {
        LocalStore { root: config.root }
    }

    fn blob_path(&self, r: Ref) -> PathBuf {
        let hex = r.to_hex();
        self.root
            .join("blobs")
            .join(&hex[0..2])
            .join(&hex[0..4])
            .join(hex)
    }

    /// `root/anchors/AA/AAAAAAAA/<escaped-name>`: the directory holding
    /// one timestamp-named file per history entry for `name`.
    fn anchor_dir(&self, name: &str) -> PathBuf {
        let checksum = adler2::adler32_slice(name.as_bytes());
        let hex = format!("{checksum:08x}");
        let escaped = utf8_percent_encode(name, NON_ALPHANUMERIC).to_string();
        self.root
            .join("anchors")
            .join(&hex[0..2])
            .join(hex)
            .join(escaped)
    }

    fn timestamp_filename(at: DateTime<Utc>) -> String {
        at.to_rfc3339_opts(SecondsFormat::Nanos, true)
    }
}

fn io_err(op: &str, e: std::io::Error) -> Error {
    if e.kind() == std::io::ErrorKind::NotFound {
        Error::NotFound(op.to_string())
    } else {
        Error::io(op, e)
    }
}

/// Reads and parses every history entry under `dir` (a directory of
/// `RFC3339Nano`-named files, each containing a hex ref), sorted by time.
async fn read_history(dir: &Path) -> Result<Vec<(DateTime<Utc>, Ref, PathBuf)>> {
    let mut entries = match tokio::fs::read_dir(dir).await {
        Ok(entries) => entries,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(Vec::new()),
        Err(e) => return Err(Error::io("read anchor history dir", e)),
    };

    let mut out = Vec::new();
    while let Some(entry) = entries
        .next_entry()
        .await
        .map_err(|e| Error::io("read anchor history entry", e))?
    {
        let name = entry.file_name();
        let Some(name) = name.to_str() else { continue };
        let Ok(at) = DateTime::parse_from_rfc3339(name) else {
            continue;
        };
        let path = entry.path();
        let hex = tokio::fs::read_to_string(&path)
            .await
            .map_err(|e| Error::io("read anchor timestamp file", e))?;
        let Ok(r) = Ref::parse(hex.trim()) else {
            continue;
        };
        out.push((at.with_timezone(&Utc), r, path));
    }
    out.sort_by_key(|(t, _, _)| *t);
    Ok(out)
}

#[async_trait]
impl Store for LocalStore {
    async fn get(&self, r: Ref, _cancel: &CancellationToken) -> Result<Blob> {
        let path = self.blob_path(r);
        let bytes = tokio::fs::read(&path)
            .await
            .map_err(|e| io_err(&r.to_hex(), e))?;
        Ok(Bytes::from(bytes))
    }

    async fn put(&self, blob: Blob, _cancel: &CancellationToken) -> Result<(Ref, bool)> {
        let r = Ref::of(&blob);
        let path = self.blob_path(r);
        let exists = tokio::fs::try_exists(&path)
            .await
            .map_err(|e| Error::io("stat blob", e))?;
        let added = !exists;
        if added {
            if let Some(parent) = path.parent() {
                tokio::fs::create_dir_all(parent)
                    .await
                    .map_err(|e| Error::io("create blob dir", e))?;
            }
            tokio::fs::write(&path, &blob)
                .await
                .map_err(|e| Error::io("write blob", e))?;
        }
        Ok((r, added))
    }

    async fn list_refs(
        &self,
        after: Ref,
        callback: &mut (dyn FnMut(Ref) -> Result<()> + Send),
        _cancel: &CancellationToken,
    ) -> Result<()> {
        let blobs_dir = self.root.join("blobs");
        let mut refs = Vec::new();
        let mut shard1 = match tokio::fs::read_dir(&blobs_dir).await {
            Ok(d) => d,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(()),
            Err(e) => return Err(Error::io("list blob shard", e)),
        };
        while let Some(e1) = shard1
            .next_entry()
            .await
            .map_err(|e| Error::io("list blob shard", e))?
        {
            let mut shard2 = tokio::fs::read_dir(e1.path())
                .await
                .map_err(|e| Error::io("list blob shard", e))?;
            while let Some(e2) = shard2
                .next_entry()
                .await
                .map_err(|e| Error::io("list blob shard", e))?
            {
                let mut files = tokio::fs::read_dir(e2.path())
                    .await
                    .map_err(|e| Error::io("list blob files", e))?;
                while let Some(f) = files
                    .next_entry()
                    .await
                    .map_err(|e| Error::io("list blob files", e))?
                {
                    if let Some(name) = f.file_name().to_str() {
                        if let Ok(r) = Ref::parse(name) {
                            refs.push(r);
                        }
                    }
                }
            }
        }
        refs.sort();
        for r in refs.into_iter().filter(|r| *r > after) {
            callback(r)?;
        }
        Ok(())
    }

    async fn list_anchors(
        &self,
        after: Option<&str>,
        callback: &mut (dyn FnMut(AnchorRecord) -> Result<()> + Send),
        _cancel: &CancellationToken,
    ) -> Result<()> {
        let anchors_dir = self.root.join("anchors");
        let mut names = Vec::new();
        let mut shard1 = match tokio::fs::read_dir(&anchors_dir).await {
            Ok(d) => d,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(()),
            Err(e) => return Err(Error::io("list anchor shard", e)),
        };
        while let Some(e1) = shard1
            .next_entry()
            .await
            .map_err(|e| Error::io("list anchor shard", e))?
        {
            let mut shard2 = tokio::fs::read_dir(e1.path())
                .await
                .map_err(|e| Error::io("list anchor shard", e))?;
            while let Some(e2) = shard2
                .next_entry()
                .await
                .map_err(|e| Error::io("list anchor shard", e))?
            {
                let mut name_dirs = tokio::fs::read_dir(e2.path())
                    .await
                    .map_err(|e| Error::io("list anchor names", e))?;
                while let Some(nd) = name_dirs
                    .next_entry()
                    .await
                    .map_err(|e| Error::io("list anchor names", e))?
                {
                    let Some(escaped) = nd.file_name().to_str().map(str::to_string) else {
                        continue;
                    };
                    let Ok(name) = percent_decode_str(&escaped).decode_utf8() else {
                        continue;
                    };
                    names.push(name.into_owned());
                }
            }
        }
        names.sort();
        for name in names {
            if after.is_some_and(|after| name.as_str() <= after) {
                continue;
            }
            let dir = self.anchor_dir(&name);
            for (at, r, _path) in read_history(&dir).await? {
                callback(AnchorRecord {
                    name: name.clone(),
                    ref_: r,
                    at,
                })?;
            }
        }
        Ok(())
    }

    async fn get_anchor(
        &self,
        name: &str,
        at: DateTime<Utc>,
        _cancel: &CancellationToken,
    ) -> Result<Ref> {
        let dir = self.anchor_dir(name);
        let history = read_history(&dir).await?;
        let idx = history.partition_point(|(t, _, _)| *t <= at);
        if idx == 0 {
            Err(Error::NotFound(name.to_string()))
        } else {
            Ok(history[idx - 1].1)
        }
    }

    async fn put_anchor(
        &self,
        name: &str,
        r: Ref,
        at: DateTime<Utc>,
        _cancel: &CancellationToken,
    ) -> Result<()> {
        let dir = self.anchor_dir(name);
        let history = read_history(&dir).await?;
        let pos = history.partition_point(|(t, _, _)| *t <= at);
        if pos > 0 && history[pos - 1].1 == r {
            // Adjacent predecessor already covers this ref (spec §3
            // invariant 6); the new entry would be the later duplicate.
            return Ok(());
        }

        tokio::fs::create_dir_all(&dir)
            .await
            .map_err(|e| Error::io("create anchor dir", e))?;
        let path = dir.join(LocalStore::timestamp_filename(at));
        tokio::fs::write(&path, r.to_hex())
            .await
            .map_err(|e| Error::io("write anchor", e))?;

        if pos < history.len() && history[pos].1 == r {
            // The entry that was our immediate successor is now the
            // later duplicate; drop its file, keeping ours.
            let _ = tokio::fs::remove_file(&history[pos].2).await;
        }
        tracing::trace!(name, ref_ = %r, %at, "anchor recorded");
        Ok(())
    }
}

#[async_trait]
impl cas_anchor::AnchorPruning for LocalStore {
    async fn prune_anchor(
        &self,
        name: &str,
        before: DateTime<Utc>,
        min_keep: usize,
        _cancel: &CancellationToken,
    ) -> Result<usize> {
        let dir = self.anchor_dir(name);
        let history = read_history(&dir).await?;
        if history.len() <= min_keep {
            return Ok(0);
        }
        let max_droppable = history.len() - min_keep;
        let droppable: Vec<_> = history
            .iter()
            .take(max_droppable)
            .take_while(|(t, _, _)| *t < before)
            .collect();
        let removed = droppable.len();
        for (_, _, path) in &droppable {
            tokio::fs::remove_file(path)
                .await
                .map_err(|e| Error::io("remove expired anchor entry", e))?;
        }
        Ok(removed)
    }
}
