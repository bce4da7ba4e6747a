use std::borrow::Borrow;
use std::collections::{BTreeMap, HashMap};
use std::fmt::Debug;

use crate::store::{StoreError, StoreResult};

#[derive(Debug)]
/// A tree contains a bunch of nodes.
pub struct Tree<K: Ord, D> {
    nodes: HashMap<u64, Node<K, D>>,
    node_id: u64,
}

/// id of the root node of the tree.
pub const ROOT_ID: u64 = 1;

#[derive(Debug)]
/// Node itself. "data" contains user-modifiable data.
pub struct Node<K: Ord, D> {
    pub data: D,
    parent_id: u64,
    children: BTreeMap<K, u64>,
}

impl<K: Ord + Debug + Clone, D: Debug> Tree<K, D> {
    /// Get new tree and initialize the root with 'data'.
    pub fn new(data: D) -> Tree<K, D> {
        let mut t = Tree {
            nodes: HashMap::new(),
            node_id: ROOT_ID,
        };
        t.new_node(0, data);
        t
    }

    fn new_node(&mut self, parent: u64, data: D) -> u64 {
        let id = self.node_id;
        self.node_id += 1;
        let node = Node {
            parent_id: parent,
            data,
            children: BTreeMap::new(),
        };
        self.nodes.insert(id, node);
        id
    }

    /// add a child node to an existing node.
    pub fn add_child(&mut self, parent: u64, key: K, data: D) -> StoreResult<u64> {
        {
            let pnode = self.nodes.get(&parent).ok_or(StoreError::NotFound)?;
            if pnode.children.contains_key(&key) {
                return Err(StoreError::Exists);
            }
        }
        let id = self.new_node(parent, data);
        let pnode = self.nodes.get_mut(&parent).ok_or(StoreError::GeneralFailure)?;
        pnode.children.insert(key, id);
        Ok(id)
    }

    /// Get a child node by key K.
    pub fn get_child<Q>(&self, parent: u64, key: &Q) -> StoreResult<u64>
    where
        K: Borrow<Q>,
        Q: Ord + ?Sized,
    {
        let pnode = self.nodes.get(&parent).ok_or(StoreError::NotFound)?;
        let id = pnode.children.get(key).ok_or(StoreError::NotFound)?;
        Ok(*id)
    }

    /// Keys of the children of this node, in key order.
    pub fn get_children(&self, parent: u64) -> StoreResult<Vec<K>> {
        let pnode = self.nodes.get(&parent).ok_or(StoreError::NotFound)?;
        Ok(pnode.children.keys().cloned().collect())
    }

    /// Get reference to a node.
    pub fn get_node(&self, id: u64) -> StoreResult<&D> {
        let n = self.nodes.get(&id).ok_or(StoreError::NotFound)?;
        Ok(&n.data)
    }

    /// Get mutable reference to a node.
    pub fn get_node_mut(&mut self, id: u64) -> StoreResult<&mut D> {
        let n = self.nodes.get_mut(&id).ok_or(StoreError::NotFound)?;
        Ok(&mut n.data)
    }

    /// Delete a node. Fails if node has children or is the root.
    pub fn delete_node(&mut self, id: u64) -> StoreResult<D> {
        if id == ROOT_ID {
            return Err(StoreError::Forbidden);
        }
        let parent_id = {
            let n = self.nodes.get(&id).ok_or(StoreError::NotFound)?;
            if !n.children.is_empty() {
                return Err(StoreError::Forbidden);
            }
            n.parent_id
        };
        if let Some(pnode) = self.nodes.get_mut(&parent_id) {
            pnode.children.retain(|_, v| *v != id);
        }
        let node = self.nodes.remove(&id).ok_or(StoreError::NotFound)?;
        Ok(node.data)
    }
}
