//! The named-anchor index (spec §4.4): mutable names over immutable
//! storage. The core read/write operations (`Put`, `Get`, `Each`/list) are
//! already part of `cas_core::Store` (`put_anchor`/`get_anchor`/
//! `list_anchors`); this crate adds the two things that sit above that
//! primitive contract:
//!
//! - a retry/backoff wrapper around `put_anchor` for backends with
//!   optimistic-concurrency conflicts (spec §4.4's "Multi-writer policy"),
//! - `Expire`, which needs to physically shrink a name's stored history —
//!   a capability not every backend exposes, so it lives behind the
//!   opt-in [`AnchorPruning`] trait rather than on `Store` itself.

use std::time::Duration;

use cas_core::{CancellationToken, Error, Ref, Result, Store};
use chrono::{DateTime, Utc};
use rand::Rng;

/// Exponential backoff with full jitter for anchor writes, per spec §4.4:
/// "retry the read-modify-write cycle with exponential backoff until it
/// commits or the context is cancelled. Retries are surfaced only as
/// latency, not as errors."
const BACKOFF_MIN: Duration = Duration::from_millis(10);
const BACKOFF_MAX: Duration = Duration::from_secs(1);

/// Writes `name -> r` at `at`, retrying on `Error::Conflict` with
/// exponential backoff (full jitter, capped at [`BACKOFF_MAX`]) until it
/// commits or `cancel` fires. Any other error is returned immediately.
pub async fn put<S: Store + ?Sized>(
    store: &S,
    name: &str,
    r: Ref,
    at: DateTime<Utc>,
    cancel: &CancellationToken,
) -> Result<()> {
    let mut backoff = BACKOFF_MIN;
    loop {
        if cancel.is_cancelled() {
            return Err(Error::Cancelled);
        }
        match store.put_anchor(name, r, at, cancel).await {
            Ok(()) => return Ok(()),
            Err(Error::Conflict { .. }) => {
                tracing::debug!(name, backoff_ms = backoff.as_millis() as u64, "anchor write conflict, retrying");
                let jittered = Duration::from_millis(rand::rng().random_range(0..=backoff.as_millis() as u64));
                tokio::select! {
                    _ = tokio::time::sleep(jittered) => {}
                    _ = cancel.cancelled() => return Err(Error::Cancelled),
                }
                backoff = (backoff * 2).min(BACKOFF_MAX);
            }
            Err(e) => return Err(e),
        }
    }
}

/// Looks up the ref bound to `name` at the latest timestamp `<= at`.
/// Thin wrapper over `Store::get_anchor` kept here so callers depend on
/// one `cas_anchor` surface for every anchor operation.
pub async fn get<S: Store + ?Sized>(
    store: &S,
    name: &str,
    at: DateTime<Utc>,
    cancel: &CancellationToken,
) -> Result<Ref> {
    store.get_anchor(name, at, cancel).await
}

/// Collects `name`'s full, time-sorted history by scanning every anchor
/// and filtering to `name`. Backends that index by name directly should
/// prefer a more targeted query; this is the reference-grade fallback
/// every backend supports by construction via `list_anchors` alone.
pub async fn history<S: Store + ?Sized>(
    store: &S,
    name: &str,
    cancel: &CancellationToken,
) -> Result<Vec<(DateTime<Utc>, Ref)>> {
    let mut out = Vec::new();
    store
        .list_anchors(
            None,
            &mut |record| {
                if record.name == name {
                    out.push((record.at, record.ref_));
                }
                Ok(())
            },
            cancel,
        )
        .await?;
    out.sort_by_key(|(t, _)| *t);
    Ok(out)
}

/// Opt-in backend capability: physically shrinking a name's stored
/// history. Not every `Store` backend can do this (some, like an
/// append-only log, can only grow); backends that can implement this
/// trait alongside `Store`.
#[async_trait::async_trait]
pub trait AnchorPruning: Store {
    /// Drops entries for `name` older than `before`, never leaving fewer
    /// than `min_keep` entries, and returns the number removed.
    async fn prune_anchor(
        &self,
        name: &str,
        before: DateTime<Utc>,
        min_keep: usize,
        cancel: &CancellationToken,
    ) -> Result<usize>;
}

/// Drops entries for `name` older than `before`, keeping at least
/// `min_keep` entries (spec §4.4's `Expire`).
pub async fn expire<S: AnchorPruning + ?Sized>(
    store: &S,
    name: &str,
    before: DateTime<Utc>,
    min_keep: usize,
    cancel: &CancellationToken,
) -> Result<usize> {
    store.prune_anchor(name, before, min_keep, cancel).await
}

/// Computes which entries `prune_anchor` implementations should keep,
/// given a full time-sorted history: drop everything older than `before`
/// except however many of the oldest entries are needed to keep at least
/// `min_keep` total. Pure function so every backend's `prune_anchor`
/// shares the exact same retention decision.
pub fn retain_after_expire(
    history: &[(DateTime<Utc>, Ref)],
    before: DateTime<Utc>,
    min_keep: usize,
) -> Vec<(DateTime<Utc>, Ref)> {
    if history.len() <= min_keep {
        return history.to_vec();
    }
    let max_droppable = history.len() - min_keep;
    let droppable = history
        .iter()
        .take(max_droppable)
        .take_while(|(t, _)| *t < before)
        .count();
    history[droppable..].to_vec()
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use cas_core::testutil::MemoryStoreStub;
    use cas_core::AnchorRecord;
    use std::sync::atomic::{AtomicU32, Ordering};

    fn t(s: &str) -> DateTime<Utc> {
        s.parse().unwrap()
    }

    #[tokio::test]
    async fn get_matches_spec_small_anchor_scenario() {
        let store = MemoryStoreStub::new();
        let cancel = CancellationToken::new();
        let t1 = t("1977-08-05T13:00:00-04:00");
        let t2 = t1 + chrono::Duration::hours(1);
        let r1 = Ref::of(b"r1");
        let r2 = Ref::of(b"r2");

        put(&store, "x", r1, t1, &cancel).await.unwrap();
        put(&store, "x", r2, t2, &cancel).await.unwrap();

        assert!(get(&store, "x", t1 - chrono::Duration::minutes(1), &cancel).await.unwrap_err().is_not_found());
        assert_eq!(get(&store, "x", t1, &cancel).await.unwrap(), r1);
        assert_eq!(get(&store, "x", t1 + chrono::Duration::minutes(1), &cancel).await.unwrap(), r1);
        assert_eq!(get(&store, "x", t2, &cancel).await.unwrap(), r2);
        assert_eq!(get(&store, "x", t2 + chrono::Duration::minutes(1), &cancel).await.unwrap(), r2);
    }

    #[tokio::test]
    async fn history_scans_only_the_requested_name() {
        let store = MemoryStoreStub::new();
        let cancel = CancellationToken::new();
        put(&store, "alpha", Ref::of(b"a1"), t("2024-01-01T00:00:00Z"), &cancel).await.unwrap();
        put(&store, "beta", Ref::of(b"b1"), t("2024-01-01T00:00:00Z"), &cancel).await.unwrap();
        put(&store, "beta", Ref::of(b"b2"), t("2024-01-02T00:00:00Z"), &cancel).await.unwrap();
        put(&store, "gamma", Ref::of(b"g1"), t("2024-01-01T00:00:00Z"), &cancel).await.unwrap();

        let beta_history = history(&store, "beta", &cancel).await.unwrap();
        assert_eq!(
            beta_history,
            vec![
                (t("2024-01-01T00:00:00Z"), Ref::of(b"b1")),
                (t("2024-01-02T00:00:00Z"), Ref::of(b"b2")),
            ]
        );
    }

    #[test]
    fn retain_after_expire_respects_min_keep() {
        let history = vec![
            (t("2024-01-01T00:00:00Z"), Ref::of(b"1")),
            (t("2024-01-02T00:00:00Z"), Ref::of(b"2")),
            (t("2024-01-03T00:00:00Z"), Ref::of(b"3")),
        ];
        // everything before 2024-01-03 is droppable, but min_keep=2 caps it.
        let kept = retain_after_expire(&history, t("2024-01-03T00:00:00Z"), 2);
        assert_eq!(kept.len(), 2);
        assert_eq!(kept[0].1, Ref::of(b"2"));
    }

    #[test]
    fn retain_after_expire_drops_only_strictly_older_entries() {
        let history = vec![
            (t("2024-01-01T00:00:00Z"), Ref::of(b"1")),
            (t("2024-01-02T00:00:00Z"), Ref::of(b"2")),
        ];
        let kept = retain_after_expire(&history, t("2024-01-01T00:00:00Z"), 0);
        assert_eq!(kept, history);
    }

    /// A `Store` wrapper that fails `put_anchor` with `Conflict` a fixed
    /// number of times before delegating, to exercise the retry loop.
    #[derive(Debug)]
    struct FlakyConflict {
        inner: MemoryStoreStub,
        remaining_conflicts: AtomicU32,
    }

    #[async_trait]
    impl Store for FlakyConflict {
        async fn get(&self, r: Ref, cancel: &CancellationToken) -> Result<bytes::Bytes> {
            self.inner.get(r, cancel).await
        }
        async fn put(&self, blob: bytes::Bytes, cancel: &CancellationToken) -> Result<(Ref, bool)> {
            self.inner.put(blob, cancel).await
        }
        async fn list_refs(
            &self,
            after: Ref,
            callback: &mut (dyn FnMut(Ref) -> Result<()> + Send),
            cancel: &CancellationToken,
        ) -> Result<()> {
            self.inner.list_refs(after, callback, cancel).await
        }
        async fn list_anchors(
            &self,
            after: Option<&str>,
            callback: &mut (dyn FnMut(AnchorRecord) -> Result<()> + Send),
            cancel: &CancellationToken,
        ) -> Result<()> {
            self.inner.list_anchors(after, callback, cancel).await
        }
        async fn get_anchor(&self, name: &str, at: DateTime<Utc>, cancel: &CancellationToken) -> Result<Ref> {
            self.inner.get_anchor(name, at, cancel).await
        }
        async fn put_anchor(&self, name: &str, r: Ref, at: DateTime<Utc>, cancel: &CancellationToken) -> Result<()> {
            if self.remaining_conflicts.fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| {
                if n == 0 { None } else { Some(n - 1) }
            }).is_ok() {
                return Err(Error::Conflict { name: name.to_string() });
            }
            self.inner.put_anchor(name, r, at, cancel).await
        }
    }

    #[tokio::test]
    async fn put_retries_through_conflicts_then_commits() {
        let store = FlakyConflict {
            inner: MemoryStoreStub::new(),
            remaining_conflicts: AtomicU32::new(3),
        };
        let cancel = CancellationToken::new();
        let r = Ref::of(b"eventually");
        put(&store, "retried", r, t("2024-01-01T00:00:00Z"), &cancel).await.unwrap();
        assert_eq!(get(&store, "retried", t("2024-01-01T00:00:00Z"), &cancel).await.unwrap(), r);
    }

    #[tokio::test]
    async fn put_aborts_promptly_on_cancellation() {
        let store = FlakyConflict {
            inner: MemoryStoreStub::new(),
            remaining_conflicts: AtomicU32::new(u32::MAX),
        };
        let cancel = CancellationToken::new();
        cancel.cancel();
        let err = put(&store, "never", Ref::of(b"x"), t("2024-01-01T00:00:00Z"), &cancel)
            .await
            .unwrap_err();
        assert!(matches!(err, Error::Cancelled));
    }
}
