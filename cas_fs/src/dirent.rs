//! Directory entry blob (spec §3, §6): `{mode, item}`. `item`'s meaning
//! depends on the POSIX type bits in `mode` (spec's decided "ref-based"
//! variant, DESIGN.md): a file's `item` is the hex ref of its hashsplit
//! root, a directory's is the hex ref of its own Map blob, and a
//! symlink's is the literal target path.

use cas_core::{Error, Ref};
use minicbor::{CborLen, Decode, Encode};

/// POSIX file-type mask and the three type bits this crate distinguishes
/// (spec: "`mode` uses POSIX type bits to distinguish cases").
pub const S_IFMT: u32 = 0o170000;
pub const S_IFREG: u32 = 0o100000;
pub const S_IFDIR: u32 = 0o040000;
pub const S_IFLNK: u32 = 0o120000;

/// Default permission bits this crate assigns when constructing a fresh
/// dirent (no special meaning, just conventional rw-r--r-- / rwxr-xr-x).
pub const DEFAULT_FILE_PERM: u32 = 0o644;
pub const DEFAULT_DIR_PERM: u32 = 0o755;

#[derive(Encode, Decode, CborLen, Clone, Debug, PartialEq, Eq)]
#[cbor(map)]
pub struct Dirent {
    #[n(0)]
    pub mode: u32,
    #[n(1)]
    pub item: String,
}

impl Dirent {
    pub fn file(item_ref: Ref, perm: u32) -> Self {
        Self {
            mode: S_IFREG | (perm & !S_IFMT),
            item: item_ref.to_hex(),
        }
    }

    pub fn directory(item_ref: Ref, perm: u32) -> Self {
        Self {
            mode: S_IFDIR | (perm & !S_IFMT),
            item: item_ref.to_hex(),
        }
    }

    pub fn symlink(target: impl Into<String>) -> Self {
        Self {
            mode: S_IFLNK,
            item: target.into(),
        }
    }

    pub fn file_type(&self) -> u32 {
        self.mode & S_IFMT
    }

    pub fn is_file(&self) -> bool {
        self.file_type() == S_IFREG
    }

    pub fn is_dir(&self) -> bool {
        self.file_type() == S_IFDIR
    }

    pub fn is_symlink(&self) -> bool {
        self.file_type() == S_IFLNK
    }

    /// Parses `item` as a ref. Invalid for symlinks, whose `item` is a
    /// path, not a ref.
    pub fn item_ref(&self) -> cas_core::Result<Ref> {
        Ref::parse(&self.item).map_err(|e| Error::InvalidArgument(format!("dirent item {:?}: {e}", self.item)))
    }

    pub fn to_bytes(&self) -> bytes::Bytes {
        bytes::Bytes::from(minicbor::to_vec(self).expect("Dirent encoding is infallible"))
    }

    pub fn from_bytes(bytes: &[u8]) -> Result<Self, minicbor::decode::Error> {
        minicbor::decode(bytes)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn file_dirent_round_trips_through_bytes() {
        let d = Dirent::file(Ref::of(b"content"), DEFAULT_FILE_PERM);
        let bytes = d.to_bytes();
        let back = Dirent::from_bytes(&bytes).unwrap();
        assert_eq!(back, d);
        assert!(back.is_file());
        assert_eq!(back.item_ref().unwrap(), Ref::of(b"content"));
    }

    #[test]
    fn symlink_item_is_not_ref_parseable() {
        let d = Dirent::symlink("../target");
        assert!(d.is_symlink());
        assert!(d.item_ref().is_err());
    }
}
