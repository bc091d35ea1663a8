//! Test utilities for `Store` implementations.
//!
//! `StoreTests` runs a conformance suite against any `Store` backend,
//! mirroring the shape of the teacher repo's own `StoreTests` harness:
//! each backend crate adds a `#[tokio::test]` that constructs its backend
//! and calls `StoreTests::new(&store).run_all()`.
//!
//! `MemoryStoreStub` is a minimal in-memory `Store` used by `cas_core`'s
//! own unit tests (the real backend lives in the separate `store_memory`
//! crate, which depends on `cas_core` and so can't be depended on here).

use std::collections::HashMap;
use std::sync::Mutex;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use tokio_util::sync::CancellationToken;

use crate::error::{Error, Result};
use crate::reference::Ref;
use crate::store::{AnchorRecord, Blob, Store};

#[derive(Debug, Default)]
pub struct MemoryStoreStub {
    blobs: Mutex<HashMap<Ref, Blob>>,
    anchors: Mutex<HashMap<String, Vec<(DateTime<Utc>, Ref)>>>,
}

impl MemoryStoreStub {
    pub fn new() -> Self {
        Self::default()
    }

    /// Synchronous convenience used by tests that don't want to spin up a
    /// runtime just to seed a blob.
    pub fn put_sync(&self, blob: Blob) -> Ref {
        let r = Ref::of(&blob);
        self.blobs.lock().unwrap().insert(r, blob);
        r
    }
}

#[async_trait]
impl Store for MemoryStoreStub {
    async fn get(&self, r: Ref, _cancel: &CancellationToken) -> Result<Blob> {
        self.blobs
            .lock()
            .unwrap()
            .get(&r)
            .cloned()
            .ok_or_else(|| Error::NotFound(r.to_hex()))
    }

    async fn put(&self, blob: Blob, _cancel: &CancellationToken) -> Result<(Ref, bool)> {
        let r = Ref::of(&blob);
        let added = self.blobs.lock().unwrap().insert(r, blob).is_none();
        Ok((r, added))
    }

    async fn list_refs(
        &self,
        after: Ref,
        callback: &mut (dyn FnMut(Ref) -> Result<()> + Send),
        _cancel: &CancellationToken,
    ) -> Result<()> {
        let mut refs: Vec<Ref> = self.blobs.lock().unwrap().keys().copied().collect();
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
            if let Some(after) = after {
                if name.as_str() <= after {
                    continue;
                }
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
        cas_anchor_lookup(history, at).ok_or_else(|| Error::NotFound(name.to_string()))
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
        history.push((at, r));
        history.sort_by_key(|(t, _)| *t);
        Ok(())
    }
}

/// Binary search for the latest entry with timestamp `<= at`. Shared logic
/// duplicated (rather than depending on `cas_anchor`) to keep `cas_core`
/// free of a dependency edge back onto a crate that depends on it.
fn cas_anchor_lookup(history: &[(DateTime<Utc>, Ref)], at: DateTime<Utc>) -> Option<Ref> {
    let idx = history.partition_point(|(t, _)| *t <= at);
    if idx == 0 {
        None
    } else {
        Some(history[idx - 1].1)
    }
}

/// Conformance suite exercised against any `Store` implementation.
pub struct StoreTests<'a, S> {
    store: &'a S,
}

impl<'a, S: Store> StoreTests<'a, S> {
    pub fn new(store: &'a S) -> Self {
        Self { store }
    }

    pub async fn run_all(&self) {
        self.put_get_round_trip().await;
        self.put_is_idempotent().await;
        self.get_missing_is_not_found().await;
        self.anchor_temporal_ordering().await;
    }

    pub async fn put_get_round_trip(&self) {
        let cancel = CancellationToken::new();
        let data = Blob::from_static(b"round trip me");
        let (r, added) = self.store.put(data.clone(), &cancel).await.unwrap();
        assert!(added);
        assert_eq!(r, Ref::of(&data));
        let back = self.store.get(r, &cancel).await.unwrap();
        assert_eq!(back, data);
    }

    pub async fn put_is_idempotent(&self) {
        let cancel = CancellationToken::new();
        let data = Blob::from_static(b"idempotent");
        let (r1, added1) = self.store.put(data.clone(), &cancel).await.unwrap();
        let (r2, added2) = self.store.put(data.clone(), &cancel).await.unwrap();
        assert_eq!(r1, r2);
        assert!(added1);
        assert!(!added2);
    }

    pub async fn get_missing_is_not_found(&self) {
        let cancel = CancellationToken::new();
        let err = self
            .store
            .get(Ref::of(b"never written"), &cancel)
            .await
            .unwrap_err();
        assert!(err.is_not_found());
    }

    pub async fn anchor_temporal_ordering(&self) {
        let cancel = CancellationToken::new();
        let name = format!("_test_anchor_{}", rand::random::<u32>());
        let t1: DateTime<Utc> = "1977-08-05T17:00:00Z".parse().unwrap();
        let t2 = t1 + chrono::Duration::hours(1);
        let r1 = Ref::of(b"r1");
        let r2 = Ref::of(b"r2");

        self.store
            .put_anchor(&name, r1, t1, &cancel)
            .await
            .unwrap();
        self.store
            .put_anchor(&name, r2, t2, &cancel)
            .await
            .unwrap();

        assert!(
            self.store
                .get_anchor(&name, t1 - chrono::Duration::minutes(1), &cancel)
                .await
                .unwrap_err()
                .is_not_found()
        );
        assert_eq!(
            self.store.get_anchor(&name, t1, &cancel).await.unwrap(),
            r1
        );
        assert_eq!(
            self.store
                .get_anchor(&name, t1 + chrono::Duration::minutes(1), &cancel)
                .await
                .unwrap(),
            r1
        );
        assert_eq!(
            self.store.get_anchor(&name, t2, &cancel).await.unwrap(),
            r2
        );
    }
}
