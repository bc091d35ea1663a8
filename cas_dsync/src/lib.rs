//! Directory-tree ingestion, ref/anchor streaming, and replica
//! reconstitution (spec §4.5). Builds on `cas_fs` for directory structure,
//! `cas_hashsplit` for file content, and `cas_anchor` for the per-file and
//! per-directory publication history.

pub mod ingest;
pub mod replicate;
pub mod streamer;

pub use ingest::ingest;
pub use replicate::Replicator;
pub use streamer::{AnchorEvent, Streamer, StreamerEvents};
