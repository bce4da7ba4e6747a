//! `Webdav` (RFC4918) is HTTP (GET/HEAD/PUT/DELETE) plus a bunch of extra methods.
//!
//! This crate is the method engine of a webdav server: it takes an
//! `http::Request`, runs the verb against a resource store, and
//! produces an `http::Response`. Transport is up to you, any server that
//! speaks the `http` and `http-body` types can drive it.
//!
//! The pieces:
//!
//! - [`DavHandler`], configured through [`DavConfig`], dispatches every
//!   request to one executor per verb and runs it inside a store transaction.
//! - [`LockManager`] keeps two trees of locks, the persistent ones made by
//!   LOCK, and the short-lived ones every executor takes on the path it works on.
//! - [`WebdavStore`] is the contract for the resource store. [`MemStore`]
//!   is an in-memory implementation.
//! - [`MultistatusWriter`] and [`ErrorList`] build the 207 Multi-Status bodies.
//!
//! Tree operations (COPY, MOVE, DELETE) are best effort: entries that fail
//! are reported in a multi-status response, entries that succeeded stay done.
//!
//! Example:
//!
//! ```no_run
//! use webdav_core::{DavHandler, memstore::MemStore};
//!
//! let dav_server = DavHandler::builder()
//!     .store(MemStore::new())
//!     .lazy_folder_creation(true)
//!     .build_handler();
//! ```
//!
//! See `demos/server.rs` for a hyper based server.

#[macro_use]
extern crate log;

mod davhandler;
mod davheaders;
mod errors;
mod handle_copymove;
mod handle_delete;
mod handle_gethead;
mod handle_lock;
mod handle_mkcol;
mod handle_options;
mod handle_props;
mod handle_put;
mod tree;
mod util;
mod xmltree_ext;

pub mod body;
pub mod davpath;
pub mod locks;
#[cfg(feature = "memstore")]
pub mod memstore;
pub mod multistatus;
pub mod store;

pub(crate) use crate::davhandler::DavInner;

pub use crate::errors::DavError;

/// Result type of the handler internals and of [`MultistatusWriter`].
pub type DavResult<T> = Result<T, DavError>;

pub use crate::davhandler::{DEFAULT_LOCK_TIMEOUT, DavConfig, DavHandler};
pub use crate::davpath::DavPath;
pub use crate::locks::{DEPTH_INFINITY, LockError, LockKind, LockManager, LockNode};
pub use crate::multistatus::{ElementMode, ErrorList, MultistatusWriter};
pub use crate::store::{ContentStream, StoreError, StoreFuture, StoreResult, StoredObject, Transaction, WebdavStore};
pub use crate::util::{DavMethod, DavMethodSet, compute_etag};

#[cfg(feature = "memstore")]
pub use crate::memstore::MemStore;
