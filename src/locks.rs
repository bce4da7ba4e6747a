//! Hierarchical lock manager.
//!
//! Two independent trees of lock nodes are kept: one for the persistent
//! locks created by LOCK requests, and one for the short-lived temporary
//! locks every method executor takes while it works on a path. A lock
//! in one tree never conflicts with a lock in the other.
//!
//! Each tree is an arena keyed by normalized path. A node refers to its
//! parent by path and owns the set of its children's paths, so walking
//! to the root is O(depth) and there are no reference cycles.
//!
//! Every operation runs under one mutex per `LockManager`. Expired
//! locks are reclaimed lazily, whenever an operation touches a tree.
//!
//! This implementation has state; create it once and clone the handle.
use std::collections::{BTreeSet, HashMap};
use std::error::Error;
use std::sync::Arc;
use std::time::{Duration, SystemTime};

use parking_lot::Mutex;
use uuid::Uuid;

/// Lock depth "infinity".
pub const DEPTH_INFINITY: i32 = -1;

// number of lock/unlock calls between two full sweeps.
const CLEANUP_INTERVAL: u64 = 100_000;

/// Which tree a node lives in.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LockKind {
    /// temporary tree
    Read,
    /// persistent tree
    Write,
}

/// Raised when `lock` is called with inputs that make no sense.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum LockError {
    /// depth other than 0 or infinity
    InvalidDepth(i32),
    /// zero timeout
    InvalidTimeout,
}

impl Error for LockError {}

impl std::fmt::Display for LockError {
    fn fmt(&self, f: &mut std::fmt::Formatter) -> std::fmt::Result {
        match self {
            LockError::InvalidDepth(d) => write!(f, "invalid lock depth {}", d),
            LockError::InvalidTimeout => write!(f, "invalid lock timeout"),
        }
    }
}

/// One locked (or formerly locked) path.
#[derive(Debug, Clone)]
pub struct LockNode {
    pub path: String,
    /// Lock token, without the `opaquelocktoken:` scheme.
    pub id: String,
    pub kind: LockKind,
    pub exclusive: bool,
    /// 0, or `DEPTH_INFINITY`.
    pub depth: i32,
    pub owners: Vec<String>,
    /// When the lock lapses. Locks set below the node push it later.
    pub expires_at: SystemTime,
    parent: Option<String>,
    children: BTreeSet<String>,
}

impl LockNode {
    fn new(path: &str, parent: Option<String>, kind: LockKind, now: SystemTime) -> LockNode {
        LockNode {
            path: path.to_string(),
            id: Uuid::new_v4().to_string(),
            kind,
            exclusive: false,
            depth: 0,
            owners: Vec::new(),
            expires_at: now,
            parent,
            children: BTreeSet::new(),
        }
    }

    /// Does anybody hold this lock.
    pub fn is_locked(&self) -> bool {
        !self.owners.is_empty()
    }

    pub fn is_expired(&self, now: SystemTime) -> bool {
        now > self.expires_at
    }

    pub fn parent(&self) -> Option<&str> {
        self.parent.as_deref()
    }

    pub fn children(&self) -> impl Iterator<Item = &str> {
        self.children.iter().map(|c| c.as_str())
    }

    /// Seconds left before this lock expires.
    pub fn remaining(&self, now: SystemTime) -> u64 {
        self.expires_at
            .duration_since(now)
            .map(|d| d.as_secs())
            .unwrap_or(0)
    }
}

// parent of a normalized path.
fn parent_path(path: &str) -> Option<String> {
    match path.rfind('/') {
        _ if path == "/" => None,
        Some(0) | None => Some("/".to_string()),
        Some(pos) => Some(path[..pos].to_string()),
    }
}

// "/a/b/c" -> ["/", "/a", "/a/b"]
fn ancestors(path: &str) -> Vec<String> {
    let mut v = Vec::new();
    let mut p = parent_path(path);
    while let Some(a) = p {
        p = parent_path(&a);
        v.push(a);
    }
    v.reverse();
    v
}

#[derive(Debug)]
struct LockTree {
    kind: LockKind,
    nodes: HashMap<String, LockNode>,
    ids: HashMap<String, String>,
}

impl LockTree {
    fn new(kind: LockKind) -> LockTree {
        let mut t = LockTree {
            kind,
            nodes: HashMap::new(),
            ids: HashMap::new(),
        };
        t.insert(LockNode::new("/", None, kind, SystemTime::now()));
        t
    }

    fn insert(&mut self, node: LockNode) {
        self.ids.insert(node.id.clone(), node.path.clone());
        self.nodes.insert(node.path.clone(), node);
    }

    // create the chain of nodes from the root down to `path`.
    fn get_or_create(&mut self, path: &str, now: SystemTime) {
        let mut chain = ancestors(path);
        chain.push(path.to_string());
        for (i, p) in chain.iter().enumerate() {
            if self.nodes.contains_key(p) {
                continue;
            }
            let parent = chain[..i].last().cloned();
            if let Some(pnode) = parent.as_ref().and_then(|pp| self.nodes.get_mut(pp)) {
                pnode.children.insert(p.clone());
            }
            trace!("locks({:?}): new node {}", self.kind, p);
            self.insert(LockNode::new(p, parent, self.kind, now));
        }
    }

    fn descendants(&self, path: &str) -> Vec<&LockNode> {
        let mut v = Vec::new();
        let mut todo = vec![path];
        while let Some(p) = todo.pop() {
            if let Some(n) = self.nodes.get(p) {
                for c in &n.children {
                    if let Some(cn) = self.nodes.get(c) {
                        v.push(cn);
                        todo.push(c);
                    }
                }
            }
        }
        v
    }

    // would a new lock at `path` conflict with an existing one.
    fn conflicts(&self, path: &str, exclusive: bool, depth: i32) -> Option<&LockNode> {
        let clash = |n: &LockNode| n.is_locked() && (n.exclusive || exclusive);

        for a in ancestors(path) {
            if let Some(n) = self.nodes.get(&a) {
                if n.depth == DEPTH_INFINITY && clash(n) {
                    return Some(n);
                }
            }
        }
        if let Some(n) = self.nodes.get(path) {
            if clash(n) {
                return Some(n);
            }
            if depth == DEPTH_INFINITY {
                return self.descendants(path).into_iter().find(|&d| clash(d));
            }
        }
        None
    }

    // a lock was set: the node's ancestors must stay alive at least
    // until `expires_at`. Never lowers an ancestor.
    fn propagate_expiry(&mut self, path: &str, expires_at: SystemTime) {
        let mut p = self.nodes.get(path).and_then(|n| n.parent.clone());
        while let Some(pp) = p {
            match self.nodes.get_mut(&pp) {
                Some(n) => {
                    if n.expires_at < expires_at {
                        n.expires_at = expires_at;
                    }
                    p = n.parent.clone();
                }
                None => break,
            }
        }
    }

    // the last owner is gone. The node may stay as an interior node,
    // but under a fresh id so the old token never matches again.
    fn release(&mut self, path: &str) {
        let Some(node) = self.nodes.get_mut(path) else {
            return;
        };
        node.owners.clear();
        node.exclusive = false;
        node.depth = 0;
        let old = std::mem::replace(&mut node.id, Uuid::new_v4().to_string());
        let new = node.id.clone();
        self.ids.remove(&old);
        self.ids.insert(new, path.to_string());
    }

    // remove a node and everything below it. The root only loses its
    // children and owners.
    fn remove_subtree(&mut self, path: &str) {
        let children: Vec<String> = match self.nodes.get(path) {
            Some(n) => n.children.iter().cloned().collect(),
            None => return,
        };
        for c in children {
            self.remove_subtree(&c);
        }
        if path == "/" {
            if let Some(root) = self.nodes.get_mut("/") {
                root.owners.clear();
                root.children.clear();
            }
            return;
        }
        if let Some(node) = self.nodes.remove(path) {
            self.ids.remove(&node.id);
            if let Some(pnode) = node.parent.as_ref().and_then(|pp| self.nodes.get_mut(pp)) {
                pnode.children.remove(path);
            }
        }
    }

    // remove a node if it has no owners and no children.
    fn prune(&mut self, path: &str) -> bool {
        match self.nodes.get(path) {
            Some(n) if path != "/" && !n.is_locked() && n.children.is_empty() => {
                trace!("locks({:?}): prune {}", self.kind, path);
                self.remove_subtree(path);
                true
            }
            _ => false,
        }
    }

    // prune `path`, then its ancestors for as long as they become garbage.
    fn prune_up(&mut self, path: &str) {
        let mut cur = Some(path.to_string());
        while let Some(p) = cur {
            cur = self.nodes.get(&p).and_then(|n| n.parent.clone());
            if !self.prune(&p) {
                break;
            }
        }
    }

    // recursively remove garbage, children before their parents.
    fn sweep(&mut self, path: &str) {
        let children: Vec<String> = match self.nodes.get(path) {
            Some(n) => n.children.iter().cloned().collect(),
            None => return,
        };
        for c in children {
            self.sweep(&c);
        }
        self.prune(path);
    }

    // forcibly reclaim every expired lock. Only the lapsed lock goes;
    // a node that still has children stays behind, ownerless.
    fn expire(&mut self, now: SystemTime) {
        let mut expired: Vec<String> = self
            .nodes
            .values()
            .filter(|n| n.is_locked() && n.is_expired(now))
            .map(|n| n.path.clone())
            .collect();
        // deepest first, so parents see their children already pruned.
        expired.sort_by_key(|p| std::cmp::Reverse(p.len()));
        for p in expired {
            trace!("locks({:?}): expired {}", self.kind, p);
            self.release(&p);
            self.prune_up(&p);
        }
    }
}

#[derive(Debug)]
struct LockManagerInner {
    persistent: LockTree,
    temporary: LockTree,
    ops: u64,
}

impl LockManagerInner {
    fn tree(&mut self, temporary: bool) -> &mut LockTree {
        if temporary {
            &mut self.temporary
        } else {
            &mut self.persistent
        }
    }

    // count lock/unlock calls, sweep both trees at the interval.
    fn tick(&mut self) {
        self.ops += 1;
        if self.ops >= CLEANUP_INTERVAL {
            debug!("locks: periodic cleanup after {} operations", self.ops);
            self.ops = 0;
            self.persistent.sweep("/");
            self.temporary.sweep("/");
        }
    }
}

/// The lock manager. Cloning gives another handle to the same state.
#[derive(Debug, Clone)]
pub struct LockManager {
    inner: Arc<Mutex<LockManagerInner>>,
}

impl Default for LockManager {
    fn default() -> Self {
        LockManager::new()
    }
}

impl LockManager {
    pub fn new() -> LockManager {
        LockManager {
            inner: Arc::new(Mutex::new(LockManagerInner {
                persistent: LockTree::new(LockKind::Write),
                temporary: LockTree::new(LockKind::Read),
                ops: 0,
            })),
        }
    }

    /// Try to lock `path` for `owner`.
    ///
    /// Returns `Ok(false)` if a lock in the same tree conflicts, or if
    /// `owner` already holds this lock. Never waits.
    pub fn lock(
        &self,
        path: &str,
        owner: &str,
        exclusive: bool,
        depth: i32,
        timeout: u32,
        temporary: bool,
    ) -> Result<bool, LockError> {
        if depth != 0 && depth != DEPTH_INFINITY {
            return Err(LockError::InvalidDepth(depth));
        }
        if timeout == 0 {
            return Err(LockError::InvalidTimeout);
        }
        let now = SystemTime::now();
        let mut inner = self.inner.lock();
        inner.tick();
        let tree = inner.tree(temporary);
        tree.expire(now);

        if let Some(other) = tree.conflicts(path, exclusive, depth) {
            trace!(
                "locks({:?}): {} for {} conflicts with lock on {}",
                tree.kind, path, owner, other.path
            );
            return Ok(false);
        }

        let expires_at = now + Duration::from_secs(timeout as u64);
        tree.get_or_create(path, now);
        let Some(node) = tree.nodes.get_mut(path) else {
            return Ok(false);
        };
        if node.owners.iter().any(|o| o == owner) {
            return Ok(false);
        }
        node.owners.push(owner.to_string());
        node.exclusive = exclusive;
        node.depth = depth;
        node.expires_at = expires_at;
        trace!(
            "locks({:?}): locked {} for {} (exclusive {}, depth {})",
            tree.kind, path, owner, exclusive, depth
        );
        tree.propagate_expiry(path, expires_at);
        Ok(true)
    }

    /// `lock` with `exclusive` set, in the persistent tree.
    pub fn exclusive_lock(&self, path: &str, owner: &str, depth: i32, timeout: u32) -> Result<bool, LockError> {
        self.lock(path, owner, true, depth, timeout, false)
    }

    /// `lock` with `exclusive` cleared, in the persistent tree.
    pub fn shared_lock(&self, path: &str, owner: &str, depth: i32, timeout: u32) -> Result<bool, LockError> {
        self.lock(path, owner, false, depth, timeout, false)
    }

    /// Remove `owner` from the persistent lock with token `id`.
    ///
    /// Returns `false` if the token is unknown or `owner` does not hold it.
    pub fn unlock(&self, id: &str, owner: &str) -> bool {
        let now = SystemTime::now();
        let mut inner = self.inner.lock();
        inner.tick();
        let tree = &mut inner.persistent;
        let res = match tree.ids.get(id).cloned() {
            Some(path) => Self::remove_owner(tree, &path, owner),
            None => {
                trace!("locks: unlock of unknown token {}", id);
                false
            }
        };
        tree.expire(now);
        res
    }

    /// Release a temporary lock.
    pub fn unlock_temporary(&self, path: &str, owner: &str) -> bool {
        let now = SystemTime::now();
        let mut inner = self.inner.lock();
        inner.tick();
        let tree = &mut inner.temporary;
        let res = Self::remove_owner(tree, path, owner);
        tree.expire(now);
        res
    }

    fn remove_owner(tree: &mut LockTree, path: &str, owner: &str) -> bool {
        let node = match tree.nodes.get_mut(path) {
            Some(n) => n,
            None => return false,
        };
        let pos = match node.owners.iter().position(|o| o == owner) {
            Some(pos) => pos,
            None => return false,
        };
        node.owners.remove(pos);
        let released = node.owners.is_empty();
        trace!("locks({:?}): unlocked {} for {}", tree.kind, path, owner);
        if released {
            tree.release(path);
        }
        tree.prune(path);
        true
    }

    /// Reclaim all expired locks in one tree.
    pub fn check_expired(&self, temporary: bool) {
        let now = SystemTime::now();
        self.inner.lock().tree(temporary).expire(now);
    }

    /// Remove all ownerless, childless nodes from both trees.
    pub fn cleanup(&self) {
        let mut inner = self.inner.lock();
        inner.persistent.sweep("/");
        inner.temporary.sweep("/");
    }

    /// Re-arm the persistent lock with token `id`.
    pub fn refresh(&self, id: &str, timeout: u32) -> Option<LockNode> {
        let now = SystemTime::now();
        let mut inner = self.inner.lock();
        let tree = &mut inner.persistent;
        tree.expire(now);
        let path = tree.ids.get(id)?.clone();
        let expires_at = now + Duration::from_secs(timeout.max(1) as u64);
        let node = tree.nodes.get_mut(&path)?;
        if !node.is_locked() {
            return None;
        }
        node.expires_at = expires_at;
        let node = node.clone();
        tree.propagate_expiry(&path, expires_at);
        Some(node)
    }

    pub fn lock_by_id(&self, id: &str, temporary: bool) -> Option<LockNode> {
        let mut inner = self.inner.lock();
        let tree = inner.tree(temporary);
        let path = tree.ids.get(id)?;
        tree.nodes.get(path).cloned()
    }

    pub fn lock_by_path(&self, path: &str, temporary: bool) -> Option<LockNode> {
        self.inner.lock().tree(temporary).nodes.get(path).cloned()
    }

    /// Check if `path` may be modified by somebody who submitted `tokens`.
    ///
    /// Looks at the persistent exclusive locks on the path itself, on
    /// ancestors with infinite depth and, if `deep`, on descendants.
    /// Returns the first lock that is not covered by a submitted token.
    pub fn check(&self, path: &str, deep: bool, tokens: &[String]) -> Result<(), LockNode> {
        let now = SystemTime::now();
        let mut inner = self.inner.lock();
        let tree = &mut inner.persistent;
        tree.expire(now);

        let blocks = |n: &LockNode| n.is_locked() && n.exclusive && !tokens.iter().any(|t| *t == n.id);
        for a in ancestors(path) {
            if let Some(n) = tree.nodes.get(&a) {
                if n.depth == DEPTH_INFINITY && blocks(n) {
                    return Err(n.clone());
                }
            }
        }
        if let Some(n) = tree.nodes.get(path) {
            if blocks(n) {
                return Err(n.clone());
            }
            if deep {
                if let Some(d) = tree.descendants(path).into_iter().find(|&d| blocks(d)) {
                    return Err(d.clone());
                }
            }
        }
        Ok(())
    }

    /// All live persistent locks on `path` and its ancestors that cover it.
    pub fn discover(&self, path: &str) -> Vec<LockNode> {
        let now = SystemTime::now();
        let mut inner = self.inner.lock();
        let tree = &mut inner.persistent;
        tree.expire(now);
        let mut v = Vec::new();
        for a in ancestors(path) {
            if let Some(n) = tree.nodes.get(&a) {
                if n.is_locked() && n.depth == DEPTH_INFINITY {
                    v.push(n.clone());
                }
            }
        }
        if let Some(n) = tree.nodes.get(path) {
            if n.is_locked() {
                v.push(n.clone());
            }
        }
        v
    }

    /// Forget every persistent lock on and below `path`.
    pub fn delete(&self, path: &str) {
        self.inner.lock().persistent.remove_subtree(path);
    }

    #[cfg(test)]
    fn node_count(&self, temporary: bool) -> usize {
        self.inner.lock().tree(temporary).nodes.len()
    }
}
