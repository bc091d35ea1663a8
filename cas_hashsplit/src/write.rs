//! Streaming write: chunk an incoming byte source and assemble the
//! resulting leaf blobs into a hashsplit tree bottom-up (spec §4.2).

use bytes::Bytes;
use cas_core::{Blob, Error, Ref, Result, Store};
use tokio::io::{AsyncRead, AsyncReadExt};
use tokio_util::sync::CancellationToken;
use tracing::trace;

use crate::node::{ChildRef, HashsplitNode};
use crate::splitter::{ChunkerConfig, Feed, RollingHash};

/// One pending child awaiting collapse into its enclosing node, tracked
/// with its length so node `size`/`offset` can be computed without
/// re-fetching anything from the store.
#[derive(Clone, Copy)]
struct Pending {
    ref_: Ref,
    offset: u64,
    len: u64,
}

/// Writes `source` to `store` as a hashsplit tree and returns the root
/// blob's ref. Always succeeds with a real, non-zero ref, even for an
/// empty source (a node blob with `size = 0` and empty `leaves`).
pub async fn write_stream<S: Store + ?Sized>(
    store: &S,
    mut source: impl AsyncRead + Unpin,
    config: ChunkerConfig,
    cancel: &CancellationToken,
) -> Result<Ref> {
    let mut hasher = RollingHash::new(config);
    // `levels[i]` accumulates children waiting to be wrapped into a node at
    // tree level `i`. Level 0 holds refs to raw leaf blobs; level i > 0
    // holds refs to already-written internal node blobs.
    let mut levels: Vec<Vec<Pending>> = vec![Vec::new()];

    let mut chunk_buf: Vec<u8> = Vec::with_capacity(config.min_chunk.max(4096));
    let mut chunk_start: u64 = 0;
    let mut read_buf = [0u8; 64 * 1024];

    loop {
        if cancel.is_cancelled() {
            return Err(Error::Cancelled);
        }
        let n = source
            .read(&mut read_buf)
            .await
            .map_err(|e| Error::io("hashsplit write: read source", e))?;
        if n == 0 {
            break;
        }
        for &byte in &read_buf[..n] {
            let feed = hasher.feed(byte, chunk_buf.len());
            chunk_buf.push(byte);
            if let Feed::Boundary { level } = feed {
                flush_chunk(store, &mut levels, &mut chunk_buf, chunk_start, level, cancel)
                    .await?;
                chunk_start += chunk_buf.len() as u64;
                chunk_buf.clear();
            }
        }
    }
    // EOF: any trailing partial chunk is emitted, then the stack is
    // cascaded up into a single root. An empty source, or input whose last
    // byte landed exactly on a boundary, has nothing left to flush here —
    // `finalize` turns an empty stack into a correct real root on its own.
    if !chunk_buf.is_empty() {
        flush_chunk(store, &mut levels, &mut chunk_buf, chunk_start, 0, cancel).await?;
    }

    finalize(store, levels, cancel).await
}

async fn flush_chunk<S: Store + ?Sized>(
    store: &S,
    levels: &mut Vec<Vec<Pending>>,
    chunk: &mut Vec<u8>,
    offset: u64,
    level: u32,
    cancel: &CancellationToken,
) -> Result<()> {
    let len = chunk.len() as u64;
    let blob: Blob = Bytes::copy_from_slice(chunk);
    let (ref_, _) = store.put(blob, cancel).await?;
    trace!(ref_ = %ref_, offset, len, "hashsplit leaf written");
    levels[0].push(Pending { ref_, offset, len });

    for i in 0..level as usize {
        collapse_level(store, levels, i, cancel).await?;
    }
    Ok(())
}

/// Wraps `levels[i]`'s accumulated children into one node blob and pushes
/// the result onto `levels[i + 1]` (growing the stack if needed).
async fn collapse_level<S: Store + ?Sized>(
    store: &S,
    levels: &mut Vec<Vec<Pending>>,
    i: usize,
    cancel: &CancellationToken,
) -> Result<()> {
    let children = std::mem::take(&mut levels[i]);
    let offset = children.first().map(|c| c.offset).unwrap_or(0);
    let size: u64 = children.iter().map(|c| c.len).sum();
    let child_refs: Vec<ChildRef> = children
        .iter()
        .map(|c| ChildRef::new(c.ref_, c.offset))
        .collect();

    let node = if i == 0 {
        HashsplitNode {
            offset,
            size,
            leaves: child_refs,
            nodes: vec![],
        }
    } else {
        HashsplitNode {
            offset,
            size,
            leaves: vec![],
            nodes: child_refs,
        }
    };
    let (ref_, _) = store.put(node.to_bytes(), cancel).await?;
    trace!(ref_ = %ref_, level = i, offset, size, "hashsplit node written");

    if levels.len() == i + 1 {
        levels.push(Vec::new());
    }
    levels[i + 1].push(Pending { ref_, offset, len: size });
    Ok(())
}

/// Cascades every remaining level up into exactly one root node, then wraps
/// that level's (possibly single-entry) child list one final time so the
/// root is always a structured node blob, never a bare leaf ref.
async fn finalize<S: Store + ?Sized>(
    store: &S,
    mut levels: Vec<Vec<Pending>>,
    cancel: &CancellationToken,
) -> Result<Ref> {
    let top = levels
        .iter()
        .rposition(|l| !l.is_empty())
        .unwrap_or(0);
    // Only cascade levels that actually hold pending children: a level left
    // empty by an earlier collapse must stay untouched, not be wrapped into
    // a spurious empty node alongside real content further up the stack.
    for i in 0..top {
        if !levels[i].is_empty() {
            collapse_level(store, &mut levels, i, cancel).await?;
        }
    }
    collapse_level(store, &mut levels, top, cancel).await?;
    Ok(levels[top + 1]
        .first()
        .expect("collapse_level always produces exactly one entry")
        .ref_)
}
