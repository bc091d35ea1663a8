//! The abstract blob + anchor storage contract (spec §4.1).

use async_trait::async_trait;
use bytes::Bytes;
use chrono::{DateTime, Utc};
use tokio_util::sync::CancellationToken;

use crate::error::{Error, Result};
use crate::reference::Ref;

/// An immutable byte sequence. The store's only unit of content.
pub type Blob = Bytes;

/// One entry in an anchor's time-ordered history, as seen through
/// `list_anchors`.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct AnchorRecord {
    pub name: String,
    pub ref_: Ref,
    pub at: DateTime<Utc>,
}

/// Every backend (in-memory, filesystem, or otherwise) implements this
/// contract. All methods must be safe to call concurrently from multiple
/// tasks; `put` is idempotent (concurrent puts of the same blob produce the
/// same ref).
///
/// Every operation accepts a `CancellationToken` per spec §5: observing
/// cancellation aborts the operation promptly with `Error::Cancelled`, and
/// any blob already durably written stays written (content-addressed
/// storage makes partial writes harmless).
#[async_trait]
pub trait Store: std::fmt::Debug + Send + Sync + 'static {
    /// Fetches the bytes for `r`. `Error::NotFound` if absent.
    async fn get(&self, r: Ref, cancel: &CancellationToken) -> Result<Blob>;

    /// Stores `blob`, returning its ref and whether it was newly added
    /// (`false` iff an identical blob was already present).
    async fn put(&self, blob: Blob, cancel: &CancellationToken) -> Result<(Ref, bool)>;

    /// Enumerates every ref strictly greater than `after` in lexicographic
    /// order, calling `callback` for each. At minimum this yields the set
    /// present when the call started; concurrent mutations need not
    /// appear. A `callback` error aborts enumeration and is returned.
    async fn list_refs(
        &self,
        after: Ref,
        callback: &mut (dyn FnMut(Ref) -> Result<()> + Send),
        cancel: &CancellationToken,
    ) -> Result<()>;

    /// Enumerates `(name, ref, timestamp)` triples sorted by name then by
    /// timestamp, for names strictly greater than `after` (`None` means
    /// from the start).
    async fn list_anchors(
        &self,
        after: Option<&str>,
        callback: &mut (dyn FnMut(AnchorRecord) -> Result<()> + Send),
        cancel: &CancellationToken,
    ) -> Result<()>;

    /// Returns the ref bound to `name` at the latest timestamp `<= at`.
    /// `Error::NotFound` if `name` has no history, or if `at` precedes the
    /// earliest entry.
    async fn get_anchor(
        &self,
        name: &str,
        at: DateTime<Utc>,
        cancel: &CancellationToken,
    ) -> Result<Ref>;

    /// Records `name -> ref` at time `at`. Backends with optimistic
    /// concurrency retry internally (spec §4.4); `Error::Conflict` is only
    /// surfaced if the cancellation token fires mid-retry.
    async fn put_anchor(
        &self,
        name: &str,
        r: Ref,
        at: DateTime<Utc>,
        cancel: &CancellationToken,
    ) -> Result<()>;
}

/// Convenience: fetch a blob, treating `NotFound` as `Ok(None)`.
pub async fn get_opt(
    store: &(dyn Store),
    r: Ref,
    cancel: &CancellationToken,
) -> Result<Option<Blob>> {
    match store.get(r, cancel).await {
        Ok(b) => Ok(Some(b)),
        Err(Error::NotFound(_)) => Ok(None),
        Err(e) => Err(e),
    }
}
