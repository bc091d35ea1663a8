//! Concurrent fan-out of `Store::get`/`Store::put` over many refs.
//!
//! This is deliberately a free-function helper rather than a default
//! `Store` trait method: spawning one task per ref needs to own a
//! reference-counted handle to the store across an `.await`, which a
//! `&self` default method can't provide. Callers that want concurrent
//! multi-get/multi-put wrap their backend in an `Arc` and call these.

use std::collections::HashMap;
use std::sync::Arc;

use tokio::task::JoinSet;
use tokio_util::sync::CancellationToken;

use crate::error::{Error, Result};
use crate::reference::Ref;
use crate::store::{Blob, Store};

/// Fetches every ref in `refs` concurrently. Every input ref appears in
/// exactly one of {successful result, error} in the returned map.
pub async fn get_multi<S>(
    store: Arc<S>,
    refs: impl IntoIterator<Item = Ref>,
    cancel: &CancellationToken,
) -> HashMap<Ref, Result<Blob>>
where
    S: Store + ?Sized,
{
    let mut set = JoinSet::new();
    for r in refs {
        let store = store.clone();
        let cancel = cancel.clone();
        set.spawn(async move {
            let result = if cancel.is_cancelled() {
                Err(Error::Cancelled)
            } else {
                store.get(r, &cancel).await
            };
            (r, result)
        });
    }

    let mut out = HashMap::new();
    while let Some(joined) = set.join_next().await {
        match joined {
            Ok((r, result)) => {
                out.insert(r, result);
            }
            Err(join_err) => {
                tracing::warn!(error = %join_err, "get_multi subtask panicked");
            }
        }
    }
    out
}

/// Stores every blob in `blobs` concurrently. The returned `Vec` preserves
/// input order — position `i` holds the outcome for `blobs[i]` — even
/// though the underlying puts race and may complete in any order.
pub async fn put_multi<S>(
    store: Arc<S>,
    blobs: Vec<Blob>,
    cancel: &CancellationToken,
) -> Vec<Result<(Ref, bool)>>
where
    S: Store + ?Sized,
{
    let len = blobs.len();
    let mut set = JoinSet::new();
    for (i, blob) in blobs.into_iter().enumerate() {
        let store = store.clone();
        let cancel = cancel.clone();
        set.spawn(async move {
            let result = if cancel.is_cancelled() {
                Err(Error::Cancelled)
            } else {
                store.put(blob, &cancel).await
            };
            (i, result)
        });
    }

    let mut slots: Vec<Option<Result<(Ref, bool)>>> = (0..len).map(|_| None).collect();
    while let Some(joined) = set.join_next().await {
        match joined {
            Ok((i, result)) => slots[i] = Some(result),
            Err(join_err) => {
                tracing::warn!(error = %join_err, "put_multi subtask panicked");
            }
        }
    }

    slots
        .into_iter()
        .map(|slot| slot.unwrap_or(Err(Error::Cancelled)))
        .collect()
}
