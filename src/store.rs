//! Contract for the resource store.
//!
//! The method executors never touch content themselves; every read and
//! mutation goes through a [`WebdavStore`]. A store sees one
//! [`Transaction`] per request, opened by the handler before the
//! executor runs and committed or rolled back afterwards.
//!
//! Paths handed to the store are always normalized: absolute, no
//! trailing slash, `/` for the root.
use std::error::Error;
use std::fmt::Debug;
use std::io;
use std::time::SystemTime;

use bytes::Bytes;
use futures_util::future::{self, BoxFuture, FutureExt};
use futures_util::stream::BoxStream;
use uuid::Uuid;

use crate::davpath::DavPath;

/// Errors generated by a store.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StoreError {
    /// Operation not implemented (501)
    NotImplemented,
    /// Something went wrong (500)
    GeneralFailure,
    /// Tried to create something, but it existed (405)
    Exists,
    /// File / Directory not found (404)
    NotFound,
    /// Access denied (403)
    Forbidden,
    /// Out of space (507)
    InsufficientStorage,
}

impl Error for StoreError {}

impl std::fmt::Display for StoreError {
    fn fmt(&self, f: &mut std::fmt::Formatter) -> std::fmt::Result {
        write!(f, "{:?}", self)
    }
}

/// The Result type.
pub type StoreResult<T> = std::result::Result<T, StoreError>;

/// Future returned by almost all of the `WebdavStore` methods.
pub type StoreFuture<'a, T> = BoxFuture<'a, StoreResult<T>>;

/// Resource content, read from or written to the store.
pub type ContentStream = BoxStream<'static, io::Result<Bytes>>;

/// What the store knows about one path.
#[derive(Debug, Clone, PartialEq)]
pub struct StoredObject {
    pub is_folder: bool,
    /// Placeholder created by a LOCK on an unmapped path.
    pub is_null_resource: bool,
    pub last_modified: SystemTime,
    pub creation_date: SystemTime,
    pub resource_length: u64,
    pub mime_type: Option<String>,
}

impl StoredObject {
    pub fn is_resource(&self) -> bool {
        !self.is_folder
    }
}

/// Opaque per-request transaction handle.
#[derive(Debug, Clone)]
pub struct Transaction {
    id: Uuid,
    principal: Option<String>,
}

impl Transaction {
    pub fn new(principal: Option<&str>) -> Transaction {
        Transaction {
            id: Uuid::new_v4(),
            principal: principal.map(|p| p.to_string()),
        }
    }

    pub fn id(&self) -> &Uuid {
        &self.id
    }

    pub fn principal(&self) -> Option<&str> {
        self.principal.as_deref()
    }
}

/// The resource store trait.
///
/// Only the CRUD methods are required. The transaction methods default
/// to no-ops, for stores that have no notion of a transaction.
pub trait WebdavStore: Debug + Send + Sync + dyn_clone::DynClone {
    /// Open a transaction for one request.
    fn begin<'a>(&'a self, principal: Option<&'a str>) -> StoreFuture<'a, Transaction> {
        future::ready(Ok(Transaction::new(principal))).boxed()
    }

    /// Fails with `Forbidden` when the principal may not use the store.
    fn check_authentication<'a>(&'a self, _tx: &'a Transaction) -> StoreFuture<'a, ()> {
        future::ready(Ok(())).boxed()
    }

    fn commit<'a>(&'a self, _tx: &'a Transaction) -> StoreFuture<'a, ()> {
        future::ready(Ok(())).boxed()
    }

    fn rollback<'a>(&'a self, _tx: &'a Transaction) -> StoreFuture<'a, ()> {
        future::ready(Ok(())).boxed()
    }

    /// `None` if nothing exists at `path`.
    fn get_object<'a>(
        &'a self,
        tx: &'a Transaction,
        path: &'a DavPath,
    ) -> StoreFuture<'a, Option<StoredObject>>;

    /// Create an empty resource. The parent must be a folder.
    fn create_resource<'a>(&'a self, tx: &'a Transaction, path: &'a DavPath) -> StoreFuture<'a, ()>;

    /// Create a folder. The parent must be a folder.
    fn create_folder<'a>(&'a self, tx: &'a Transaction, path: &'a DavPath) -> StoreFuture<'a, ()>;

    /// Remove a resource or an empty folder.
    fn remove_object<'a>(&'a self, tx: &'a Transaction, path: &'a DavPath) -> StoreFuture<'a, ()>;

    /// Names (not paths) of the entries of a folder, in store order.
    fn get_children_names<'a>(
        &'a self,
        tx: &'a Transaction,
        path: &'a DavPath,
    ) -> StoreFuture<'a, Vec<String>>;

    fn get_resource_content<'a>(
        &'a self,
        tx: &'a Transaction,
        path: &'a DavPath,
    ) -> StoreFuture<'a, ContentStream>;

    /// Replace the content of a resource, returns the number of bytes written.
    fn set_resource_content<'a>(
        &'a self,
        tx: &'a Transaction,
        path: &'a DavPath,
        content: ContentStream,
        content_type: Option<&'a str>,
        etag: Option<&'a str>,
    ) -> StoreFuture<'a, u64>;

    /// Flag or unflag a resource as lock-null placeholder.
    fn set_null_resource<'a>(
        &'a self,
        _tx: &'a Transaction,
        _path: &'a DavPath,
        _null: bool,
    ) -> StoreFuture<'a, ()> {
        future::ready(Err(StoreError::NotImplemented)).boxed()
    }
}

dyn_clone::clone_trait_object! {WebdavStore}

/// Store used when none is configured. Nothing exists, nothing can be created.
#[derive(Debug, Clone)]
pub(crate) struct VoidStore;

impl WebdavStore for VoidStore {
    fn get_object<'a>(&'a self, _tx: &'a Transaction, _path: &'a DavPath) -> StoreFuture<'a, Option<StoredObject>> {
        future::ready(Ok(None)).boxed()
    }

    fn create_resource<'a>(&'a self, _tx: &'a Transaction, _path: &'a DavPath) -> StoreFuture<'a, ()> {
        future::ready(Err(StoreError::Forbidden)).boxed()
    }

    fn create_folder<'a>(&'a self, _tx: &'a Transaction, _path: &'a DavPath) -> StoreFuture<'a, ()> {
        future::ready(Err(StoreError::Forbidden)).boxed()
    }

    fn remove_object<'a>(&'a self, _tx: &'a Transaction, _path: &'a DavPath) -> StoreFuture<'a, ()> {
        future::ready(Err(StoreError::NotFound)).boxed()
    }

    fn get_children_names<'a>(&'a self, _tx: &'a Transaction, _path: &'a DavPath) -> StoreFuture<'a, Vec<String>> {
        future::ready(Err(StoreError::NotFound)).boxed()
    }

    fn get_resource_content<'a>(&'a self, _tx: &'a Transaction, _path: &'a DavPath) -> StoreFuture<'a, ContentStream> {
        future::ready(Err(StoreError::NotFound)).boxed()
    }

    fn set_resource_content<'a>(
        &'a self,
        _tx: &'a Transaction,
        _path: &'a DavPath,
        _content: ContentStream,
        _content_type: Option<&'a str>,
        _etag: Option<&'a str>,
    ) -> StoreFuture<'a, u64> {
        future::ready(Err(StoreError::NotFound)).boxed()
    }
}
