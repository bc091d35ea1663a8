//! The order-insensitive persistent tree algorithm (spec §4.3): insert,
//! remove, lookup, in-order iteration, and bulk construction, generic over
//! a [`Shape`].
//!
//! Every mutating operation takes a root ref and returns a new root ref
//! plus an outcome — the old ref stays valid, pointing at the prior
//! version, per spec §3's "Lifecycle".

use std::future::Future;
use std::pin::Pin;

use cas_core::{CancellationToken, Error, Ref, Result, Store};

use crate::node::{ChildPtr, Member, TreeNode, MAX_NODE};
use crate::shape::Shape;

/// Result of a `set` call: whether a new member was added, an existing
/// one's payload changed, or nothing changed at all (in which case no new
/// blob is written and the root ref is returned unchanged).
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Outcome {
    Added,
    Updated,
    None,
}

type BoxFuture<'a, T> = Pin<Box<dyn Future<Output = T> + Send + 'a>>;

fn bit_set(hash: &[u8; 32], depth: u32) -> bool {
    let byte = hash[(depth / 8) as usize];
    byte & (1 << (depth % 8)) != 0
}

fn corrupt(r: Ref, reason: impl Into<String>) -> Error {
    Error::corrupt(r, reason)
}

async fn fetch_node<S: Store + ?Sized>(
    store: &S,
    r: Ref,
    cancel: &CancellationToken,
) -> Result<TreeNode> {
    let bytes = store.get(r, cancel).await?;
    TreeNode::from_bytes(&bytes).map_err(|e| corrupt(r, format!("tree node decode: {e}")))
}

async fn put_node<S: Store + ?Sized>(
    store: &S,
    node: &TreeNode,
    cancel: &CancellationToken,
) -> Result<Ref> {
    let (r, _added) = store.put(node.to_bytes(), cancel).await?;
    tracing::trace!(ref_ = %r, depth = node.depth, size = node.size, leaf = node.is_leaf(), "tree node written");
    Ok(r)
}

/// Writes the canonical empty tree (a depth-0 leaf with no members) and
/// returns its ref. Every `Map`/`Set` starts here.
pub async fn empty<S: Store + ?Sized>(store: &S, cancel: &CancellationToken) -> Result<Ref> {
    put_node(store, &TreeNode::empty_leaf(0), cancel).await
}

/// Sorts `members` by sort key and builds the subtree rooted at `depth`,
/// splitting recursively wherever a group exceeds [`MAX_NODE`]. This is
/// the single construction path shared by bulk build, incremental leaf
/// split, and post-remove collapse — so all three produce bit-identical
/// blobs for the same final content (spec §4.3's bulk-construction
/// requirement).
pub fn build_subtree<'a, S: Store + ?Sized, K: Shape>(
    store: &'a S,
    depth: u32,
    mut members: Vec<Member>,
    cancel: &'a CancellationToken,
) -> BoxFuture<'a, Result<(Ref, u32)>> {
    Box::pin(async move {
        members.sort_by(|a, b| K::member_sort_key(a).cmp(&K::member_sort_key(b)));
        build_subtree_sorted::<S, K>(store, depth, members, cancel).await
    })
}

fn build_subtree_sorted<'a, S: Store + ?Sized, K: Shape>(
    store: &'a S,
    depth: u32,
    members: Vec<Member>,
    cancel: &'a CancellationToken,
) -> BoxFuture<'a, Result<(Ref, u32)>> {
    Box::pin(async move {
        let size = members.len() as u32;
        if members.len() <= MAX_NODE {
            let node = TreeNode {
                depth,
                size,
                left: None,
                right: None,
                members,
            };
            let r = put_node(store, &node, cancel).await?;
            return Ok((r, size));
        }

        let mut left_members = Vec::new();
        let mut right_members = Vec::new();
        for m in members {
            if bit_set(&K::member_sort_key(&m), depth) {
                right_members.push(m);
            } else {
                left_members.push(m);
            }
        }
        let (left_ref, left_size) =
            build_subtree_sorted::<S, K>(store, depth + 1, left_members, cancel).await?;
        let (right_ref, right_size) =
            build_subtree_sorted::<S, K>(store, depth + 1, right_members, cancel).await?;
        let node = TreeNode {
            depth,
            size,
            left: Some(ChildPtr::new(left_ref, left_size)),
            right: Some(ChildPtr::new(right_ref, right_size)),
            members: Vec::new(),
        };
        let r = put_node(store, &node, cancel).await?;
        Ok((r, size))
    })
}

/// Bulk-constructs a tree from a complete key/payload (or ref) set. Must
/// be, and is, bit-identical to inserting the same entries one at a time.
pub async fn bulk_build<S: Store + ?Sized, K: Shape>(
    store: &S,
    entries: impl IntoIterator<Item = K::Entry>,
    cancel: &CancellationToken,
) -> Result<Ref> {
    let members: Vec<Member> = entries.into_iter().map(|e| K::entry_to_member(&e)).collect();
    if members.is_empty() {
        return empty(store, cancel).await;
    }
    let (r, _size) = build_subtree::<S, K>(store, 0, members, cancel).await?;
    Ok(r)
}

/// Inserts or updates `entry`, returning the new root ref and outcome.
pub async fn set<S: Store + ?Sized, K: Shape>(
    store: &S,
    root: Ref,
    entry: &K::Entry,
    cancel: &CancellationToken,
) -> Result<(Ref, Outcome)> {
    insert_rec::<S, K>(store, root, 0, entry, cancel).await
}

fn insert_rec<'a, S: Store + ?Sized, K: Shape>(
    store: &'a S,
    node_ref: Ref,
    depth: u32,
    entry: &'a K::Entry,
    cancel: &'a CancellationToken,
) -> BoxFuture<'a, Result<(Ref, Outcome)>> {
    Box::pin(async move {
        let mut node = fetch_node(store, node_ref, cancel).await?;
        if node.depth != depth {
            return Err(corrupt(node_ref, format!(
                "tree node depth mismatch: expected {depth}, found {}",
                node.depth
            )));
        }

        if node.is_leaf() {
            let wire = K::entry_to_member(entry);
            let sort_key = K::entry_sort_key(entry);
            match node
                .members
                .binary_search_by(|m| K::member_sort_key(m).cmp(&sort_key))
            {
                Ok(idx) => {
                    if node.members[idx] == wire {
                        return Ok((node_ref, Outcome::None));
                    }
                    node.members[idx] = wire;
                    let r = put_node(store, &node, cancel).await?;
                    Ok((r, Outcome::Updated))
                }
                Err(idx) => {
                    node.members.insert(idx, wire);
                    node.size += 1;
                    if node.members.len() > MAX_NODE {
                        let members = std::mem::take(&mut node.members);
                        let mut left_members = Vec::new();
                        let mut right_members = Vec::new();
                        for m in members {
                            if bit_set(&K::member_sort_key(&m), depth) {
                                right_members.push(m);
                            } else {
                                left_members.push(m);
                            }
                        }
                        let (left_ref, left_size) =
                            build_subtree_sorted::<S, K>(store, depth + 1, left_members, cancel)
                                .await?;
                        let (right_ref, right_size) =
                            build_subtree_sorted::<S, K>(store, depth + 1, right_members, cancel)
                                .await?;
                        node.left = Some(ChildPtr::new(left_ref, left_size));
                        node.right = Some(ChildPtr::new(right_ref, right_size));
                    }
                    let r = put_node(store, &node, cancel).await?;
                    Ok((r, Outcome::Added))
                }
            }
        } else {
            let sort_key = K::entry_sort_key(entry);
            let go_right = bit_set(&sort_key, depth);
            let ptr = if go_right { node.right } else { node.left }
                .ok_or_else(|| corrupt(node_ref, "internal node missing a child"))?;
            let (new_child_ref, outcome) =
                insert_rec::<S, K>(store, ptr.ref_(), depth + 1, entry, cancel).await?;
            if matches!(outcome, Outcome::None) {
                return Ok((node_ref, Outcome::None));
            }
            let new_size = if matches!(outcome, Outcome::Added) {
                ptr.size + 1
            } else {
                ptr.size
            };
            let new_ptr = ChildPtr::new(new_child_ref, new_size);
            if go_right {
                node.right = Some(new_ptr);
            } else {
                node.left = Some(new_ptr);
            }
            if matches!(outcome, Outcome::Added) {
                node.size += 1;
            }
            let r = put_node(store, &node, cancel).await?;
            Ok((r, outcome))
        }
    })
}

/// Removes the member with the given sort key, returning the new root ref
/// and whether anything was removed.
pub async fn remove<S: Store + ?Sized, K: Shape>(
    store: &S,
    root: Ref,
    sort_key: [u8; 32],
    cancel: &CancellationToken,
) -> Result<(Ref, bool)> {
    remove_rec::<S, K>(store, root, 0, sort_key, cancel).await
}

fn remove_rec<'a, S: Store + ?Sized, K: Shape>(
    store: &'a S,
    node_ref: Ref,
    depth: u32,
    sort_key: [u8; 32],
    cancel: &'a CancellationToken,
) -> BoxFuture<'a, Result<(Ref, bool)>> {
    Box::pin(async move {
        let mut node = fetch_node(store, node_ref, cancel).await?;

        if node.is_leaf() {
            match node
                .members
                .binary_search_by(|m| K::member_sort_key(m).cmp(&sort_key))
            {
                Err(_) => Ok((node_ref, false)),
                Ok(idx) => {
                    node.members.remove(idx);
                    node.size -= 1;
                    let r = put_node(store, &node, cancel).await?;
                    Ok((r, true))
                }
            }
        } else {
            let go_right = bit_set(&sort_key, depth);
            let ptr = if go_right { node.right } else { node.left }
                .ok_or_else(|| corrupt(node_ref, "internal node missing a child"))?;
            let (new_child_ref, removed) =
                remove_rec::<S, K>(store, ptr.ref_(), depth + 1, sort_key, cancel).await?;
            if !removed {
                return Ok((node_ref, false));
            }
            let new_size = ptr.size - 1;
            if go_right {
                node.right = Some(ChildPtr::new(new_child_ref, new_size));
            } else {
                node.left = Some(ChildPtr::new(new_child_ref, new_size));
            }
            node.size -= 1;

            if node.size <= MAX_NODE as u32 {
                let left_ref = node
                    .left
                    .ok_or_else(|| corrupt(node_ref, "internal node missing left child"))?
                    .ref_();
                let right_ref = node
                    .right
                    .ok_or_else(|| corrupt(node_ref, "internal node missing right child"))?
                    .ref_();
                let mut members = Vec::new();
                collect_members_rec(store, left_ref, cancel, &mut members).await?;
                collect_members_rec(store, right_ref, cancel, &mut members).await?;
                members.sort_by(|a, b| K::member_sort_key(a).cmp(&K::member_sort_key(b)));
                let leaf = TreeNode {
                    depth,
                    size: node.size,
                    left: None,
                    right: None,
                    members,
                };
                let r = put_node(store, &leaf, cancel).await?;
                Ok((r, true))
            } else {
                let r = put_node(store, &node, cancel).await?;
                Ok((r, true))
            }
        }
    })
}

fn collect_members_rec<'a, S: Store + ?Sized>(
    store: &'a S,
    node_ref: Ref,
    cancel: &'a CancellationToken,
    out: &'a mut Vec<Member>,
) -> BoxFuture<'a, Result<()>> {
    Box::pin(async move {
        let node = fetch_node(store, node_ref, cancel).await?;
        if node.is_leaf() {
            out.extend(node.members);
        } else {
            let left = node
                .left
                .ok_or_else(|| corrupt(node_ref, "internal node missing left child"))?;
            let right = node
                .right
                .ok_or_else(|| corrupt(node_ref, "internal node missing right child"))?;
            collect_members_rec(store, left.ref_(), cancel, out).await?;
            collect_members_rec(store, right.ref_(), cancel, out).await?;
        }
        Ok(())
    })
}

/// Looks up the member with the given sort key.
pub async fn lookup<S: Store + ?Sized, K: Shape>(
    store: &S,
    root: Ref,
    sort_key: [u8; 32],
    cancel: &CancellationToken,
) -> Result<Option<K::Entry>> {
    lookup_rec::<S, K>(store, root, 0, sort_key, cancel).await
}

fn lookup_rec<'a, S: Store + ?Sized, K: Shape>(
    store: &'a S,
    node_ref: Ref,
    depth: u32,
    sort_key: [u8; 32],
    cancel: &'a CancellationToken,
) -> BoxFuture<'a, Result<Option<K::Entry>>> {
    Box::pin(async move {
        let node = fetch_node(store, node_ref, cancel).await?;
        if node.is_leaf() {
            match node
                .members
                .binary_search_by(|m| K::member_sort_key(m).cmp(&sort_key))
            {
                Ok(idx) => Ok(Some(K::member_to_entry(&node.members[idx]))),
                Err(_) => Ok(None),
            }
        } else {
            let go_right = bit_set(&sort_key, depth);
            let ptr = if go_right { node.right } else { node.left }
                .ok_or_else(|| corrupt(node_ref, "internal node missing a child"))?;
            lookup_rec::<S, K>(store, ptr.ref_(), depth + 1, sort_key, cancel).await
        }
    })
}

/// In-order traversal of every member, exactly once. `callback` returning
/// an error aborts iteration with that error.
pub async fn each<S: Store + ?Sized, K: Shape>(
    store: &S,
    root: Ref,
    cancel: &CancellationToken,
    callback: &mut (dyn FnMut(K::Entry) -> Result<()> + Send),
) -> Result<()> {
    each_rec::<S, K>(store, root, cancel, callback).await
}

fn each_rec<'a, S: Store + ?Sized, K: Shape>(
    store: &'a S,
    node_ref: Ref,
    cancel: &'a CancellationToken,
    callback: &'a mut (dyn FnMut(K::Entry) -> Result<()> + Send),
) -> BoxFuture<'a, Result<()>> {
    Box::pin(async move {
        let node = fetch_node(store, node_ref, cancel).await?;
        if node.is_leaf() {
            for m in &node.members {
                callback(K::member_to_entry(m))?;
            }
            Ok(())
        } else {
            let left = node
                .left
                .ok_or_else(|| corrupt(node_ref, "internal node missing left child"))?;
            let right = node
                .right
                .ok_or_else(|| corrupt(node_ref, "internal node missing right child"))?;
            each_rec::<S, K>(store, left.ref_(), cancel, callback).await?;
            each_rec::<S, K>(store, right.ref_(), cancel, callback).await
        }
    })
}

/// Total member count reachable from `root`, read directly off the root
/// node without a full traversal.
pub async fn len<S: Store + ?Sized>(
    store: &S,
    root: Ref,
    cancel: &CancellationToken,
) -> Result<u32> {
    Ok(fetch_node(store, root, cancel).await?.size)
}
