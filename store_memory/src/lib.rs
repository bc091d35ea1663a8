//! An in-memory [`Store`](cas_core::Store) backend.
//!
//! Grounded in the teacher's `s5_blob_stores_memory::MemoryStore`: a
//! `DashMap` guarding blob bytes behind a key, per spec §5's "Shared
//! resources" guidance (a single lock, never held across other blocking
//! I/O — there is none here). This is intentionally thin: a correctness
//! harness and a worked example of the `Store` contract, not a
//! production deployment target (spec §1).

use std::collections::HashMap;
use std::sync::Mutex;

use async_trait::async_trait;
use bytes::Bytes;
use cas_core::store::{AnchorRecord, Blob, Store};
use cas_core::{CancellationToken, Error, Ref, Result};
use chrono::{DateTime, Utc};
use dashmap::DashMap;

/// Named history kept for one anchor: time-sorted `(timestamp, ref)`
/// pairs, deduplicated per spec §3 invariant 6.
type History = Vec<(DateTime<Utc>, Ref)>;

#[derive(Debug, Default)]
pub struct MemoryStore {
    blobs: DashMap<Ref, Blob>,
    anchors: Mutex<HashMap<String, History>>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }
}

/// Inserts `(at, r)` into a sorted history, applying spec §3 invariant 6's
/// dedup policy: if the new entry would land immediately adjacent to an
/// existing entry with an identical ref, the later of the two is dropped
/// and the earlier is kept.
fn insert_deduped(history: &mut History, at: DateTime<Utc>, r: Ref) {
    let pos = history.partition_point(|(t, _)| *t <= at);
    let dup_before = pos > 0 && history[pos - 1].1 == r;
    let dup_after = pos < history.len() && history[pos].1 == r;
    if dup_before {
        // An identical-ref predecessor already covers this instant; the
        // new (later) entry is the duplicate, so it is simply not added.
        return;
    }
    history.insert(pos, (at, r));
    if dup_after {
        // The entry that used to be at `pos` (now `pos + 1`) is the later
        // duplicate of the one we just inserted; drop it, keeping ours
        // (the earlier one).
        history.remove(pos + 1);
    }
}

fn lookup(history: &History, at: DateTime<Utc>) -> Option<Ref> {
    let idx = history.partition_point(|(t, _)| *t <= at);
    if idx == 0 {
        None
    } else {
        Some(history[idx - 1].1)
    }
}

#[async_trait]
impl Store for MemoryStore {
    async fn get(&self, r: Ref, _cancel: &CancellationToken) -> Result<Blob> {
        self.blobs
            .get(&r)
            .map(|entry| entry.value().clone())
            .ok_or_else(|| Error::NotFound(r.to_hex()))
    }

    async fn put(&self, blob: Blob, _cancel: &CancellationToken) -> Result<(Ref, bool)> {
        let r = Ref::of(&blob);
        let added = self.blobs.insert(r, blob).is_none();
        Ok((r, added))
    }

    async fn list_refs(
        &self,
        after: Ref,
        callback: &mut (dyn FnMut(Ref) -> Result<()> + Send),
        _cancel: &CancellationToken,
    ) -> Result<()> {
        let mut refs: Vec<Ref> = self.blobs.iter().map(|e| *e.key()).collect();
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
        let anchors = self.anchors.lock().unwrap();
        let mut names: Vec<&String> = anchors.keys().collect();
        names.sort();
        for name in names {
            if after.is_some_and(|after| name.as_str() <= after) {
                continue;
            }
            for (at, r) in &anchors[name] {
                callback(AnchorRecord {
                    name: name.clone(),
                    ref_: *r,
                    at: *at,
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
        let anchors = self.anchors.lock().unwrap();
        let history = anchors
            .get(name)
            .ok_or_else(|| Error::NotFound(name.to_string()))?;
        lookup(history, at).ok_or_else(|| Error::NotFound(name.to_string()))
    }

    async fn put_anchor(
        &self,
        name: &str,
        r: Ref,
        at: DateTime<Utc>,
        _cancel: &CancellationToken,
    ) -> Result<()> {
        let mut anchors = self.anchors.lock().unwrap();
        let history = anchors.entry(name.to_string()).or_default();
        insert_deduped(history, at, r);
        tracing::trace!(name, ref_ = %r, %at, "anchor recorded");
        Ok(())
    }
}

#[async_trait]
impl cas_anchor::AnchorPruning for MemoryStore {
    async fn prune_anchor(
        &self,
        name: &str,
        before: DateTime<Utc>,
        min_keep: usize,
        _cancel: &CancellationToken,
    ) -> Result<usize> {
        let mut anchors = self.anchors.lock().unwrap();
        let Some(history) = anchors.get_mut(name) else {
            return Ok(0);
        };
        let before_len = history.len();
        *history = cas_anchor::retain_after_expire(history, before, min_keep);
        Ok(before_len - history.len())
    }
}
