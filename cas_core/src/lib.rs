//! Types and traits shared by every crate in the workspace: the content
//! address (`Ref`), the blob alias, the `Store` contract, the error
//! taxonomy, and concurrent multi-get/multi-put helpers.

pub mod error;
pub mod multiop;
pub mod reference;
pub mod store;

#[cfg(any(test, feature = "testutil"))]
pub mod testutil;

pub use error::{Error, MultiError, Result};
pub use reference::{Ref, RefParseError};
pub use store::{AnchorRecord, Blob, Store};

pub use tokio_util::sync::CancellationToken;
