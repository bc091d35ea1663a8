//! Random-access reading of a hashsplit tree: open a root ref, seek, and
//! read contiguous spans without fetching blobs outside the requested
//! range (spec §4.2's "random-access seekable reader").

use std::sync::Arc;

use bytes::Bytes;
use cas_core::{Error, Ref, Result, Store};
use tokio_util::sync::CancellationToken;
use tracing::trace;

use crate::node::HashsplitNode;

/// Origin for `Reader::seek`, mirroring `std::io::SeekFrom` without pulling
/// in a dependency on it for an otherwise-async API.
#[derive(Clone, Copy, Debug)]
pub enum Whence {
    Start,
    Current,
    End,
}

/// A cursor over a hashsplit tree's reconstructed byte stream.
pub struct Reader<S: Store + ?Sized> {
    store: Arc<S>,
    root_node: HashsplitNode,
    size: u64,
    pos: u64,
}

impl<S: Store + ?Sized> Reader<S> {
    pub async fn open(store: Arc<S>, root: Ref, cancel: &CancellationToken) -> Result<Self> {
        let bytes = store.get(root, cancel).await?;
        let root_node = HashsplitNode::from_bytes(&bytes)
            .map_err(|e| Error::corrupt(root, format!("hashsplit root decode: {e}")))?;
        let size = root_node.size;
        Ok(Self {
            store,
            root_node,
            size,
            pos: 0,
        })
    }

    pub fn size(&self) -> u64 {
        self.size
    }

    pub fn position(&self) -> u64 {
        self.pos
    }

    /// Seeking past the end is permitted; a subsequent `read` then returns
    /// zero bytes rather than erroring, matching ordinary file semantics.
    pub fn seek(&mut self, offset: i64, whence: Whence) -> Result<u64> {
        let base = match whence {
            Whence::Start => 0i64,
            Whence::Current => self.pos as i64,
            Whence::End => self.size as i64,
        };
        let new_pos = base
            .checked_add(offset)
            .ok_or_else(|| Error::InvalidArgument("seek overflow".into()))?;
        if new_pos < 0 {
            return Err(Error::InvalidArgument("seek before start of stream".into()));
        }
        self.pos = new_pos as u64;
        Ok(self.pos)
    }

    /// Reads up to `buf.len()` bytes starting at the current position,
    /// returning the number of bytes written to `buf` (0 at or past EOF).
    /// A single call may return fewer bytes than requested if the leaf
    /// boundary is reached first — callers loop the way `Read` callers do.
    pub async fn read(&mut self, buf: &mut [u8], cancel: &CancellationToken) -> Result<usize> {
        if self.pos >= self.size || buf.is_empty() {
            return Ok(0);
        }
        let want = buf.len().min((self.size - self.pos) as usize);
        let chunk = read_leaf_at(&self.store, &self.root_node, self.pos, cancel).await?;
        let n = want.min(chunk.len());
        buf[..n].copy_from_slice(&chunk[..n]);
        self.pos += n as u64;
        Ok(n)
    }

    /// Reads the entire stream into memory. Intended for tests and small
    /// blobs; large streams should use repeated `read` calls instead.
    pub async fn read_to_end(&mut self, cancel: &CancellationToken) -> Result<Bytes> {
        let mut out = Vec::with_capacity((self.size - self.pos) as usize);
        let mut buf = [0u8; 64 * 1024];
        loop {
            let n = self.read(&mut buf, cancel).await?;
            if n == 0 {
                break;
            }
            out.extend_from_slice(&buf[..n]);
        }
        Ok(Bytes::from(out))
    }
}

/// Descends from `node` to the single leaf blob covering `target_offset`,
/// then returns the portion of that leaf from `target_offset` to its end
/// (the caller slices further if it wants less).
fn read_leaf_at<'a, S: Store + ?Sized>(
    store: &'a Arc<S>,
    node: &'a HashsplitNode,
    target_offset: u64,
    cancel: &'a CancellationToken,
) -> std::pin::Pin<Box<dyn std::future::Future<Output = Result<Bytes>> + Send + 'a>> {
    Box::pin(async move {
        let idx = node.child_containing(target_offset).ok_or_else(|| {
            Error::corrupt(
                Ref::of(node.to_bytes()),
                format!("offset {target_offset} not covered by any child"),
            )
        })?;
        let child = &node.children()[idx];
        let child_ref = child.ref_();
        let child_start = child.offset;

        if node.is_leaf_level() {
            let leaf = store.get(child_ref, cancel).await?;
            let within = (target_offset - child_start) as usize;
            trace!(child_ref = %child_ref, within, "hashsplit leaf fetched");
            Ok(leaf.slice(within..))
        } else {
            let bytes = store.get(child_ref, cancel).await?;
            let child_node = HashsplitNode::from_bytes(&bytes)
                .map_err(|e| Error::corrupt(child_ref, format!("hashsplit node decode: {e}")))?;
            read_leaf_at(store, &child_node, target_offset, cancel).await
        }
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::splitter::ChunkerConfig;
    use crate::write::write_stream;
    use cas_core::testutil::MemoryStoreStub;
    use std::io::Cursor;

    async fn write_test_data(store: &MemoryStoreStub, data: &[u8]) -> Ref {
        let cancel = CancellationToken::new();
        write_stream(store, Cursor::new(data.to_vec()), ChunkerConfig::default(), &cancel)
            .await
            .unwrap()
    }

    #[tokio::test]
    async fn read_to_end_round_trips_arbitrary_data() {
        let store = Arc::new(MemoryStoreStub::new());
        let cancel = CancellationToken::new();
        let data: Vec<u8> = (0..3_000_000u32).map(|i| (i % 199) as u8).collect();
        let root = write_test_data(&store, &data).await;

        let mut reader = Reader::open(store, root, &cancel).await.unwrap();
        assert_eq!(reader.size(), data.len() as u64);
        let back = reader.read_to_end(&cancel).await.unwrap();
        assert_eq!(back.as_ref(), data.as_slice());
    }

    #[tokio::test]
    async fn seek_then_read_matches_direct_slice() {
        let store = Arc::new(MemoryStoreStub::new());
        let cancel = CancellationToken::new();
        let data: Vec<u8> = (0..2_000_000u32).map(|i| (i % 251) as u8).collect();
        let root = write_test_data(&store, &data).await;

        let mut reader = Reader::open(store, root, &cancel).await.unwrap();
        let offsets = [0usize, 1, 1023, 1024, 500_000, 1_999_999];
        for &off in &offsets {
            reader.seek(off as i64, Whence::Start).unwrap();
            let mut buf = [0u8; 100];
            let want = 100.min(data.len() - off);
            let n = reader.read(&mut buf[..want.max(1)], &cancel).await.unwrap();
            assert_eq!(&buf[..n], &data[off..off + n]);
        }
    }

    #[tokio::test]
    async fn read_past_end_returns_zero() {
        let store = Arc::new(MemoryStoreStub::new());
        let cancel = CancellationToken::new();
        let root = write_test_data(&store, b"short").await;
        let mut reader = Reader::open(store, root, &cancel).await.unwrap();
        reader.seek(0, Whence::End).unwrap();
        let mut buf = [0u8; 16];
        assert_eq!(reader.read(&mut buf, &cancel).await.unwrap(), 0);
    }

    #[tokio::test]
    async fn empty_stream_round_trips() {
        let store = Arc::new(MemoryStoreStub::new());
        let cancel = CancellationToken::new();
        let root = write_test_data(&store, b"").await;
        let mut reader = Reader::open(store, root, &cancel).await.unwrap();
        assert_eq!(reader.size(), 0);
        assert_eq!(reader.read_to_end(&cancel).await.unwrap().len(), 0);
    }
}
