//! Unbounded event channels a producer (the ingester, or a future watcher)
//! uses to tell a replicator which blobs and anchors have been written
//! (spec §4.5).

use cas_core::Ref;
use chrono::{DateTime, Utc};
use tokio::sync::mpsc;

/// One `put_anchor` observed by a [`Streamer`].
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct AnchorEvent {
    pub name: String,
    pub ref_: Ref,
    pub at: DateTime<Utc>,
}

/// The producer-side handle: call `notify_put`/`notify_anchor` as blobs and
/// anchors are written. Cloning shares the same pair of channels.
#[derive(Clone)]
pub struct Streamer {
    refs_tx: mpsc::UnboundedSender<Ref>,
    anchors_tx: mpsc::UnboundedSender<AnchorEvent>,
}

/// The consumer-side receivers returned alongside a fresh [`Streamer`].
pub struct StreamerEvents {
    pub refs_rx: mpsc::UnboundedReceiver<Ref>,
    pub anchors_rx: mpsc::UnboundedReceiver<AnchorEvent>,
}

impl Streamer {
    pub fn new() -> (Self, StreamerEvents) {
        let (refs_tx, refs_rx) = mpsc::unbounded_channel();
        let (anchors_tx, anchors_rx) = mpsc::unbounded_channel();
        (Streamer { refs_tx, anchors_tx }, StreamerEvents { refs_rx, anchors_rx })
    }

    /// Records that `r` was newly written. A closed receiver (no listener
    /// left) is not an error — streaming is best-effort for any consumer
    /// that has stopped listening.
    pub fn notify_put(&self, r: Ref) {
        let _ = self.refs_tx.send(r);
    }

    /// Records that `name -> ref_` was anchored at `at`.
    pub fn notify_anchor(&self, name: impl Into<String>, ref_: Ref, at: DateTime<Utc>) {
        let _ = self.anchors_tx.send(AnchorEvent { name: name.into(), ref_, at });
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn notify_put_and_anchor_are_observed_in_order() {
        let (streamer, mut events) = Streamer::new();
        streamer.notify_put(Ref::of(b"one"));
        streamer.notify_put(Ref::of(b"two"));
        streamer.notify_anchor("/a", Ref::of(b"two"), Utc::now());

        assert_eq!(events.refs_rx.try_recv().unwrap(), Ref::of(b"one"));
        assert_eq!(events.refs_rx.try_recv().unwrap(), Ref::of(b"two"));
        assert!(events.refs_rx.try_recv().is_err());
        let anchor = events.anchors_rx.try_recv().unwrap();
        assert_eq!(anchor.name, "/a");
    }

    #[test]
    fn notify_after_receivers_dropped_does_not_panic() {
        let (streamer, events) = Streamer::new();
        drop(events);
        streamer.notify_put(Ref::of(b"x"));
        streamer.notify_anchor("/x", Ref::of(b"x"), Utc::now());
    }
}
