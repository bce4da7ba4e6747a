//! Simple in-memory resource store.
//!
//! This implementation has state, so if you create a
//! new instance in a handler(), it will be empty every time.
//!
//! This means you have to create the instance once, using `MemStore::new`, store
//! it in your handler struct, and clone() it every time you pass
//! it to the DavHandler. As a MemStore struct is just a handle, cloning is cheap.
use std::sync::Arc;
use std::time::SystemTime;

use bytes::{Bytes, BytesMut};
use futures_util::{
    future::FutureExt,
    stream::{self, StreamExt},
};
use parking_lot::Mutex;

use crate::davpath::DavPath;
use crate::store::*;
use crate::tree::{self, ROOT_ID};

type Tree = tree::Tree<String, MemNode>;

/// Ephemeral in-memory store.
#[derive(Debug, Clone)]
pub struct MemStore {
    tree: Arc<Mutex<Tree>>,
}

#[derive(Debug, Clone)]
enum MemNode {
    Folder(MemFolderNode),
    Resource(MemResourceNode),
}

#[derive(Debug, Clone)]
struct MemFolderNode {
    mtime: SystemTime,
    crtime: SystemTime,
}

#[derive(Debug, Clone)]
struct MemResourceNode {
    mtime: SystemTime,
    crtime: SystemTime,
    data: Bytes,
    mime_type: Option<String>,
    null_resource: bool,
}

impl MemStore {
    /// Create a new, empty store. Only the root folder exists.
    pub fn new() -> Box<MemStore> {
        Box::new(MemStore {
            tree: Arc::new(Mutex::new(Tree::new(MemNode::new_folder()))),
        })
    }

    fn create_node(&self, path: &DavPath, node: MemNode) -> StoreResult<()> {
        let mut tree = self.tree.lock();
        let parent_id = tree.lookup(&path.parent())?;
        if !tree.get_node(parent_id)?.is_folder() {
            return Err(StoreError::Forbidden);
        }
        tree.add_child(parent_id, path.file_name().to_string(), node)?;
        tree.get_node_mut(parent_id)?.update_mtime(SystemTime::now());
        Ok(())
    }
}

impl WebdavStore for MemStore {
    fn get_object<'a>(
        &'a self,
        _tx: &'a Transaction,
        path: &'a DavPath,
    ) -> StoreFuture<'a, Option<StoredObject>> {
        async move {
            let tree = self.tree.lock();
            match tree.lookup(path) {
                Ok(id) => Ok(Some(tree.get_node(id)?.as_stored_object())),
                Err(StoreError::NotFound) => Ok(None),
                Err(e) => Err(e),
            }
        }
        .boxed()
    }

    fn create_resource<'a>(&'a self, _tx: &'a Transaction, path: &'a DavPath) -> StoreFuture<'a, ()> {
        async move { self.create_node(path, MemNode::new_resource()) }.boxed()
    }

    fn create_folder<'a>(&'a self, _tx: &'a Transaction, path: &'a DavPath) -> StoreFuture<'a, ()> {
        async move { self.create_node(path, MemNode::new_folder()) }.boxed()
    }

    fn remove_object<'a>(&'a self, _tx: &'a Transaction, path: &'a DavPath) -> StoreFuture<'a, ()> {
        async move {
            let mut tree = self.tree.lock();
            let id = tree.lookup(path)?;
            let parent_id = tree.lookup(&path.parent())?;
            tree.delete_node(id)?;
            tree.get_node_mut(parent_id)?.update_mtime(SystemTime::now());
            Ok(())
        }
        .boxed()
    }

    fn get_children_names<'a>(
        &'a self,
        _tx: &'a Transaction,
        path: &'a DavPath,
    ) -> StoreFuture<'a, Vec<String>> {
        async move {
            let tree = self.tree.lock();
            let id = tree.lookup(path)?;
            if !tree.get_node(id)?.is_folder() {
                return Ok(Vec::new());
            }
            tree.get_children(id)
        }
        .boxed()
    }

    fn get_resource_content<'a>(
        &'a self,
        _tx: &'a Transaction,
        path: &'a DavPath,
    ) -> StoreFuture<'a, ContentStream> {
        async move {
            let tree = self.tree.lock();
            let id = tree.lookup(path)?;
            let data = tree.get_node(id)?.as_resource()?.data.clone();
            let strm: ContentStream = stream::once(async move { Ok(data) }).boxed();
            Ok(strm)
        }
        .boxed()
    }

    fn set_resource_content<'a>(
        &'a self,
        _tx: &'a Transaction,
        path: &'a DavPath,
        mut content: ContentStream,
        content_type: Option<&'a str>,
        _etag: Option<&'a str>,
    ) -> StoreFuture<'a, u64> {
        async move {
            // collect first, the tree is not locked across awaits.
            let mut buf = BytesMut::new();
            while let Some(chunk) = content.next().await {
                let chunk = chunk.map_err(|_| StoreError::GeneralFailure)?;
                buf.extend_from_slice(&chunk);
            }
            let mut tree = self.tree.lock();
            let id = tree.lookup(path)?;
            let node = tree.get_node_mut(id)?.as_resource_mut()?;
            node.data = buf.freeze();
            node.mtime = SystemTime::now();
            if let Some(ct) = content_type {
                node.mime_type = Some(ct.to_string());
            }
            Ok(node.data.len() as u64)
        }
        .boxed()
    }

    fn set_null_resource<'a>(
        &'a self,
        _tx: &'a Transaction,
        path: &'a DavPath,
        null: bool,
    ) -> StoreFuture<'a, ()> {
        async move {
            let mut tree = self.tree.lock();
            let id = tree.lookup(path)?;
            tree.get_node_mut(id)?.as_resource_mut()?.null_resource = null;
            Ok(())
        }
        .boxed()
    }
}

impl MemNode {
    fn new_folder() -> MemNode {
        let now = SystemTime::now();
        MemNode::Folder(MemFolderNode {
            crtime: now,
            mtime: now,
        })
    }

    fn new_resource() -> MemNode {
        let now = SystemTime::now();
        MemNode::Resource(MemResourceNode {
            crtime: now,
            mtime: now,
            data: Bytes::new(),
            mime_type: None,
            null_resource: false,
        })
    }

    fn as_stored_object(&self) -> StoredObject {
        match self {
            MemNode::Folder(d) => StoredObject {
                is_folder: true,
                is_null_resource: false,
                last_modified: d.mtime,
                creation_date: d.crtime,
                resource_length: 0,
                mime_type: None,
            },
            MemNode::Resource(r) => StoredObject {
                is_folder: false,
                is_null_resource: r.null_resource,
                last_modified: r.mtime,
                creation_date: r.crtime,
                resource_length: r.data.len() as u64,
                mime_type: r.mime_type.clone(),
            },
        }
    }

    fn update_mtime(&mut self, tm: SystemTime) {
        match self {
            MemNode::Folder(d) => d.mtime = tm,
            MemNode::Resource(r) => r.mtime = tm,
        }
    }

    fn is_folder(&self) -> bool {
        matches!(self, MemNode::Folder(_))
    }

    fn as_resource(&self) -> StoreResult<&MemResourceNode> {
        match self {
            MemNode::Resource(r) => Ok(r),
            _ => Err(StoreError::Forbidden),
        }
    }

    fn as_resource_mut(&mut self) -> StoreResult<&mut MemResourceNode> {
        match self {
            MemNode::Resource(r) => Ok(r),
            _ => Err(StoreError::Forbidden),
        }
    }
}

trait TreeExt {
    fn lookup(&self, path: &DavPath) -> StoreResult<u64>;
}

impl TreeExt for Tree {
    fn lookup(&self, path: &DavPath) -> StoreResult<u64> {
        let mut node_id = ROOT_ID;
        let mut is_folder = true;
        for seg in path.segments() {
            if !is_folder {
                return Err(StoreError::Forbidden);
            }
            node_id = self.get_child(node_id, seg)?;
            is_folder = self.get_node(node_id)?.is_folder();
        }
        Ok(node_id)
    }
}
