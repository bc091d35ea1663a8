//! Content-defined chunking and hashsplit tree assembly/disassembly for
//! arbitrarily large byte streams (spec §4.2).

pub mod node;
pub mod read;
pub mod splitter;
pub mod write;

pub use node::{ChildRef, HashsplitNode};
pub use read::{Reader, Whence};
pub use splitter::{ChunkerConfig, DEFAULT_FANOUT_DIVISOR, DEFAULT_MAX_CHUNK, DEFAULT_MIN_CHUNK, DEFAULT_SPLIT_BITS};
pub use write::write_stream;
