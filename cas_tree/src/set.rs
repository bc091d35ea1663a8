//! Typed façade over the tree substrate (spec §4.3) for sets of refs.
//! Identical algorithm to [`crate::map`], specialized so the member *is*
//! its own sort key and carries no payload.

use cas_core::{CancellationToken, Ref, Result, Store};

use crate::algo::{self, Outcome};
use crate::shape::SetShape;

pub async fn empty<S: Store + ?Sized>(store: &S, cancel: &CancellationToken) -> Result<Ref> {
    algo::empty(store, cancel).await
}

/// Inserts `member`. Because a set member carries no payload, the only
/// possible outcomes are `Added` (newly inserted) and `None` (already
/// present) — `Updated` never occurs.
pub async fn insert<S: Store + ?Sized>(
    store: &S,
    root: Ref,
    member: Ref,
    cancel: &CancellationToken,
) -> Result<(Ref, Outcome)> {
    algo::set::<S, SetShape>(store, root, &member, cancel).await
}

pub async fn remove<S: Store + ?Sized>(
    store: &S,
    root: Ref,
    member: Ref,
    cancel: &CancellationToken,
) -> Result<(Ref, bool)> {
    algo::remove::<S, SetShape>(store, root, *member.as_bytes(), cancel).await
}

pub async fn contains<S: Store + ?Sized>(
    store: &S,
    root: Ref,
    member: Ref,
    cancel: &CancellationToken,
) -> Result<bool> {
    let found = algo::lookup::<S, SetShape>(store, root, *member.as_bytes(), cancel).await?;
    Ok(found.is_some())
}

pub async fn each<S: Store + ?Sized>(
    store: &S,
    root: Ref,
    cancel: &CancellationToken,
    mut callback: impl FnMut(Ref) -> Result<()> + Send,
) -> Result<()> {
    let mut cb = move |r: Ref| callback(r);
    algo::each::<S, SetShape>(store, root, cancel, &mut cb).await
}

pub async fn bulk_build<S: Store + ?Sized>(
    store: &S,
    members: impl IntoIterator<Item = Ref>,
    cancel: &CancellationToken,
) -> Result<Ref> {
    algo::bulk_build::<S, SetShape>(store, members, cancel).await
}

pub async fn len<S: Store + ?Sized>(
    store: &S,
    root: Ref,
    cancel: &CancellationToken,
) -> Result<u32> {
    algo::len(store, root, cancel).await
}
