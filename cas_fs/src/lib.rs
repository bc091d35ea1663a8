//! Directory trees over the blob store (spec §3's Dir/Dirent and §4.5's
//! read-only FS view), built on `cas_tree` for the directory structure
//! itself and `cas_hashsplit` for file contents.

pub mod dirent;
pub mod directory;
pub mod view;

pub use dirent::{Dirent, DEFAULT_DIR_PERM, DEFAULT_FILE_PERM, S_IFDIR, S_IFLNK, S_IFMT, S_IFREG};
