//
// This module contains the main entry point of the library,
// DavHandler.
//
use std::error::Error as StdError;
use std::io;
use std::sync::Arc;
use std::time::{SystemTime, UNIX_EPOCH};

use bytes::buf::Buf;
use futures_util::stream::{self, StreamExt};
use headers::HeaderMapExt;
use http::header::HeaderValue;
use http::{Request, Response, StatusCode};
use http_body::Body as HttpBody;
use http_body_util::BodyExt;

use crate::body::Body;
use crate::davheaders;
use crate::davpath::DavPath;
use crate::errors::DavError;
use crate::locks::LockManager;
use crate::store::{ContentStream, StoredObject, Transaction, VoidStore, WebdavStore};
use crate::util::{DavMethod, DavMethodSet, dav_method, methods_allowed};
use crate::DavResult;

/// Timeout of the temporary lock an executor holds on its path.
pub(crate) const TEMP_TIMEOUT: u32 = 10;

/// Default, and maximum, timeout of a persistent lock (one week).
pub const DEFAULT_LOCK_TIMEOUT: u32 = 604800;

// largest request body we read into memory (everything but PUT).
const MAX_XML_BODY: usize = 65536;

/// WebDAV request handler.
///
/// Create one with [`builder`](Self::builder), then call
/// [`handle`](Self::handle) for every request. Cloning is cheap.
#[derive(Clone, Default)]
pub struct DavHandler {
    pub(crate) config: Arc<DavConfig>,
}

/// Configuration of the handler.
#[derive(Clone, Default)]
pub struct DavConfig {
    // Prefix to be stripped off when handling request.
    pub(crate) prefix: Option<String>,
    // Resource store.
    pub(crate) store: Option<Box<dyn WebdavStore>>,
    // Lock manager, shared by clones of the handler.
    pub(crate) lock_manager: Option<LockManager>,
    // Set of allowed methods (None means "all methods")
    pub(crate) allow: Option<DavMethodSet>,
    // Principal is webdav speak for "user".
    pub(crate) principal: Option<String>,
    pub(crate) read_only: Option<bool>,
    pub(crate) lazy_folder_creation: Option<bool>,
    // index.html
    pub(crate) index_file: Option<String>,
    pub(crate) instead_of_404: Option<String>,
    pub(crate) content_length: Option<bool>,
    pub(crate) no_content_length_agents: Option<Vec<String>>,
    pub(crate) lock_timeout: Option<u32>,
}

impl DavConfig {
    /// Create a new configuration builder.
    pub fn new() -> DavConfig {
        DavConfig::default()
    }

    /// Use the configuration that was built to generate a [`DavHandler`].
    ///
    /// A handler built without a lock manager gets a fresh one.
    pub fn build_handler(self) -> DavHandler {
        let mut this = self;
        if this.lock_manager.is_none() {
            this.lock_manager = Some(LockManager::new());
        }
        DavHandler {
            config: Arc::new(this),
        }
    }

    /// Prefix to be stripped off before translating the rest of
    /// the request path to a store path.
    pub fn strip_prefix(self, prefix: impl Into<String>) -> Self {
        let mut this = self;
        this.prefix = Some(prefix.into());
        this
    }

    /// Set the resource store to use.
    pub fn store(self, store: Box<dyn WebdavStore>) -> Self {
        let mut this = self;
        this.store = Some(store);
        this
    }

    /// Set the lock manager to use.
    pub fn lock_manager(self, locks: LockManager) -> Self {
        let mut this = self;
        this.lock_manager = Some(locks);
        this
    }

    /// Which methods to allow (default is all methods).
    pub fn methods(self, allow: DavMethodSet) -> Self {
        let mut this = self;
        this.allow = Some(allow);
        this
    }

    /// Set the name of the "webdav principal". Passed to the store when a
    /// transaction is opened, and used as lock owner if a LOCK names none.
    pub fn principal(self, principal: impl Into<String>) -> Self {
        let mut this = self;
        this.principal = Some(principal.into());
        this
    }

    /// Refuse every method that changes something (default false).
    pub fn read_only(self, read_only: bool) -> Self {
        let mut this = self;
        this.read_only = Some(read_only);
        this
    }

    /// Let PUT create missing parent folders (default false).
    pub fn lazy_folder_creation(self, lazy: bool) -> Self {
        let mut this = self;
        this.lazy_folder_creation = Some(lazy);
        this
    }

    /// GET on a folder redirects to this file in the folder.
    pub fn index_file(self, name: impl Into<String>) -> Self {
        let mut this = self;
        this.index_file = Some(name.into());
        this
    }

    /// Resource served (with status 404) when a GET target does not exist.
    pub fn instead_of_404(self, path: impl Into<String>) -> Self {
        let mut this = self;
        this.instead_of_404 = Some(path.into());
        this
    }

    /// Send Content-Length on GET and HEAD (default true).
    pub fn content_length(self, send: bool) -> Self {
        let mut this = self;
        this.content_length = Some(send);
        this
    }

    /// User-Agent substrings for which Content-Length is never sent.
    pub fn no_content_length_agents(self, agents: Vec<String>) -> Self {
        let mut this = self;
        this.no_content_length_agents = Some(agents);
        this
    }

    /// Default and maximum timeout of a LOCK, in seconds.
    pub fn lock_timeout(self, secs: u32) -> Self {
        let mut this = self;
        this.lock_timeout = Some(secs);
        this
    }

    fn merge(&self, new: Self) -> Self {
        Self {
            prefix: new.prefix.or_else(|| self.prefix.clone()),
            store: new.store.or_else(|| self.store.clone()),
            lock_manager: new.lock_manager.or_else(|| self.lock_manager.clone()),
            allow: new.allow.or(self.allow),
            principal: new.principal.or_else(|| self.principal.clone()),
            read_only: new.read_only.or(self.read_only),
            lazy_folder_creation: new.lazy_folder_creation.or(self.lazy_folder_creation),
            index_file: new.index_file.or_else(|| self.index_file.clone()),
            instead_of_404: new.instead_of_404.or_else(|| self.instead_of_404.clone()),
            content_length: new.content_length.or(self.content_length),
            no_content_length_agents: new
                .no_content_length_agents
                .or_else(|| self.no_content_length_agents.clone()),
            lock_timeout: new.lock_timeout.or(self.lock_timeout),
        }
    }
}

// The actual inner struct.
//
// At the start of the request, DavConfig is used to generate
// a DavInner struct. DavInner::handle then handles the request.
pub(crate) struct DavInner {
    pub prefix: String,
    pub store: Box<dyn WebdavStore>,
    pub has_store: bool,
    pub locks: LockManager,
    pub allow: Option<DavMethodSet>,
    pub principal: Option<String>,
    pub read_only: bool,
    pub lazy_folder_creation: bool,
    pub index_file: Option<String>,
    pub instead_of_404: Option<String>,
    pub content_length: bool,
    pub no_content_length_agents: Vec<String>,
    pub lock_timeout: u32,
}

impl DavHandler {
    /// Return a configuration builder.
    pub fn builder() -> DavConfig {
        DavConfig::new()
    }

    /// The lock manager this handler uses.
    pub fn lock_manager(&self) -> Option<&LockManager> {
        self.config.lock_manager.as_ref()
    }

    /// Process a WebDAV request.
    pub async fn handle<ReqBody, ReqData, ReqError>(&self, req: Request<ReqBody>) -> Response<Body>
    where
        ReqData: Buf + Send + 'static,
        ReqError: StdError + Send + Sync + 'static,
        ReqBody: HttpBody<Data = ReqData, Error = ReqError> + Send + 'static,
    {
        let inner = DavInner::new(self.config.as_ref().clone());
        inner.handle(req).await
    }

    /// Handle a webdav request, overriding parts of the config.
    ///
    /// For example, the `principal` can be set for this request.
    pub async fn handle_with<ReqBody, ReqData, ReqError>(
        &self,
        config: DavConfig,
        req: Request<ReqBody>,
    ) -> Response<Body>
    where
        ReqData: Buf + Send + 'static,
        ReqError: StdError + Send + Sync + 'static,
        ReqBody: HttpBody<Data = ReqData, Error = ReqError> + Send + 'static,
    {
        let inner = DavInner::new(self.config.merge(config));
        inner.handle(req).await
    }
}

/// Temporary lock held by an executor, released on drop.
pub(crate) struct TempLock<'a> {
    locks: &'a LockManager,
    path: String,
    owner: String,
}

impl Drop for TempLock<'_> {
    fn drop(&mut self) {
        if !self.locks.unlock_temporary(&self.path, &self.owner) {
            trace!("temporary lock on {} for {} already gone", self.path, self.owner);
        }
    }
}

impl DavInner {
    pub fn new(cfg: DavConfig) -> Self {
        let DavConfig {
            prefix,
            store,
            lock_manager,
            allow,
            principal,
            read_only,
            lazy_folder_creation,
            index_file,
            instead_of_404,
            content_length,
            no_content_length_agents,
            lock_timeout,
        } = cfg;
        let has_store = store.is_some();
        Self {
            prefix: prefix.unwrap_or_default(),
            store: store.unwrap_or_else(|| Box::new(VoidStore)),
            has_store,
            locks: lock_manager.unwrap_or_default(),
            allow,
            principal,
            read_only: read_only.unwrap_or(false),
            lazy_folder_creation: lazy_folder_creation.unwrap_or(false),
            index_file,
            instead_of_404,
            content_length: content_length.unwrap_or(true),
            no_content_length_agents: no_content_length_agents.unwrap_or_default(),
            lock_timeout: lock_timeout.unwrap_or(DEFAULT_LOCK_TIMEOUT).max(1),
        }
    }

    // helper.
    pub(crate) fn path(&self, req: &Request<()>) -> DavResult<DavPath> {
        Ok(DavPath::from_uri_and_prefix(req.uri(), &self.prefix)?)
    }

    // Take a temporary depth-0 lock on `path`. Failure to get it
    // is an internal error, we never wait.
    pub(crate) fn temp_lock<'a>(
        &'a self,
        tx: &Transaction,
        path: &DavPath,
        method: DavMethod,
        exclusive: bool,
    ) -> DavResult<TempLock<'a>> {
        let millis = SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .map(|d| d.as_millis())
            .unwrap_or(0);
        let owner = format!("{:?}-{}-{}", method, millis, tx.id());
        if !self
            .locks
            .lock(path.as_str(), &owner, exclusive, 0, TEMP_TIMEOUT, true)?
        {
            debug!("{:?}: cannot get temporary lock on {}", method, path);
            return Err(StatusCode::INTERNAL_SERVER_ERROR.into());
        }
        Ok(TempLock {
            locks: &self.locks,
            path: path.as_str().to_string(),
            owner,
        })
    }

    // lock ids submitted in the If: header.
    pub(crate) fn if_tokens(req: &Request<()>) -> Vec<String> {
        req.headers()
            .typed_get::<davheaders::If>()
            .map(|i| i.lock_ids())
            .unwrap_or_default()
    }

    // 423 if somebody else holds an exclusive lock on `path`.
    pub(crate) fn check_locks(&self, req: &Request<()>, path: &DavPath, deep: bool) -> DavResult<()> {
        let tokens = Self::if_tokens(req);
        match self.locks.check(path.as_str(), deep, &tokens) {
            Ok(()) => Ok(()),
            Err(node) => {
                debug!("{} is locked by {} ({})", path, node.path, node.id);
                Err(StatusCode::LOCKED.into())
            }
        }
    }

    // Allow: header for `obj`, restricted to the configured methods.
    pub(crate) fn allow_header(&self, obj: Option<&StoredObject>) -> HeaderValue {
        let all = methods_allowed(obj);
        match self.allow {
            None => HeaderValue::from_static(all),
            Some(set) => {
                let v = all
                    .split(", ")
                    .filter(|m| {
                        http::Method::from_bytes(m.as_bytes())
                            .ok()
                            .and_then(|m| dav_method(&m).ok())
                            .is_some_and(|m| set.contains(m))
                    })
                    .collect::<Vec<_>>()
                    .join(", ");
                HeaderValue::from_str(&v).unwrap_or_else(|_| HeaderValue::from_static("OPTIONS"))
            }
        }
    }

    // 405 with an Allow: header.
    pub(crate) fn not_allowed(&self, obj: Option<&StoredObject>) -> Response<Body> {
        let mut res = Response::new(Body::empty());
        *res.status_mut() = StatusCode::METHOD_NOT_ALLOWED;
        res.headers_mut().insert("allow", self.allow_header(obj));
        res
    }

    // drain request body and return it.
    pub(crate) async fn read_request<ReqBody, ReqData, ReqError>(
        &self,
        body: ReqBody,
        max_size: usize,
    ) -> DavResult<Vec<u8>>
    where
        ReqBody: HttpBody<Data = ReqData, Error = ReqError>,
        ReqData: Buf + Send + 'static,
        ReqError: StdError + Send + Sync + 'static,
    {
        let mut data = Vec::new();
        let mut body = std::pin::pin!(body);

        while let Some(res) = body.frame().await {
            let mut data_frame = res.map_err(|_| {
                DavError::IoError(io::Error::new(io::ErrorKind::UnexpectedEof, "UnexpectedEof"))
            })?;

            let Some(buf) = data_frame.data_mut() else {
                continue;
            };

            while buf.has_remaining() {
                if data.len() + buf.remaining() > max_size {
                    return Err(StatusCode::PAYLOAD_TOO_LARGE.into());
                }
                let b = buf.chunk();
                let l = b.len();
                data.extend_from_slice(b);
                buf.advance(l);
            }
        }
        Ok(data)
    }

    // internal dispatcher.
    async fn handle<ReqBody, ReqData, ReqError>(self, req: Request<ReqBody>) -> Response<Body>
    where
        ReqBody: HttpBody<Data = ReqData, Error = ReqError> + Send + 'static,
        ReqData: Buf + Send + 'static,
        ReqError: StdError + Send + Sync + 'static,
    {
        let is_ms = req
            .headers()
            .get("user-agent")
            .and_then(|s| s.to_str().ok())
            .map(|s| s.contains("Microsoft"))
            .unwrap_or(false);

        // Turn any DavError results into a HTTP error response.
        match self.handle2(req).await {
            Ok(resp) => {
                debug!("== END REQUEST result {}", resp.status());
                resp
            }
            Err(err) => {
                debug!("== END REQUEST result {:?}", err);
                let mut resp = Response::new(Body::empty());
                *resp.status_mut() = err.statuscode();
                let h = resp.headers_mut();
                if is_ms && err.statuscode() == StatusCode::NOT_FOUND {
                    // Windows caches a 404 for a while, and it does so
                    // case-insensitively. Try to talk it out of that.
                    h.insert("cache-control", HeaderValue::from_static("no-store, no-cache, must-revalidate"));
                    h.insert("pragma", HeaderValue::from_static("no-cache"));
                    h.insert("expires", HeaderValue::from_static("0"));
                    h.insert("vary", HeaderValue::from_static("*"));
                }
                h.insert("content-length", HeaderValue::from_static("0"));
                if err.must_close() {
                    h.insert("connection", HeaderValue::from_static("close"));
                }
                resp
            }
        }
    }

    // internal dispatcher part 2.
    async fn handle2<ReqBody, ReqData, ReqError>(mut self, req: Request<ReqBody>) -> DavResult<Response<Body>>
    where
        ReqBody: HttpBody<Data = ReqData, Error = ReqError> + Send + 'static,
        ReqData: Buf + Send + 'static,
        ReqError: StdError + Send + Sync + 'static,
    {
        let (req, body) = {
            let (parts, body) = req.into_parts();
            (Request::from_parts(parts, ()), body)
        };

        // translate HTTP method to Webdav method.
        let method = match dav_method(req.method()) {
            Ok(m) => m,
            Err(_) => {
                debug!("unknown method {} request {}", req.method(), req.uri());
                return self.handle_not_implemented(&req);
            }
        };

        // Without a store, only OPTIONS makes sense.
        if !self.has_store {
            if method != DavMethod::Options {
                debug!("no store: method not allowed on request {}", req.uri());
                return Err(DavError::StatusClose(StatusCode::METHOD_NOT_ALLOWED));
            }
            if self.allow.is_none_or(|a| a.contains(DavMethod::Options)) {
                let mut a = DavMethodSet::none();
                a.add(DavMethod::Options);
                self.allow = Some(a);
            }
        }

        // see if method is allowed.
        if let Some(ref a) = self.allow {
            if !a.contains(method) {
                debug!("method {} not allowed on request {}", req.method(), req.uri());
                return Err(DavError::StatusClose(StatusCode::METHOD_NOT_ALLOWED));
            }
        }

        // make sure the request path is valid.
        let path = self.path(&req)?;

        if self.read_only && method.is_mutating() {
            debug!("read-only: refusing {:?} {}", method, path);
            return Err(StatusCode::FORBIDDEN.into());
        }

        // PUT is the only handler that reads the body itself. All the
        // other handlers either expected no body, or a pre-read Vec<u8>.
        let (body_strm, body_data) = match method {
            DavMethod::Put => (Some(body_stream(body)), Vec::new()),
            _ => (None, self.read_request(body, MAX_XML_BODY).await?),
        };

        // Not all methods accept a body.
        match method {
            DavMethod::Put | DavMethod::PropFind | DavMethod::PropPatch | DavMethod::Lock => {}
            _ => {
                if !body_data.is_empty() {
                    return Err(StatusCode::UNSUPPORTED_MEDIA_TYPE.into());
                }
            }
        }

        debug!("== START REQUEST {:?} {}", method, path);

        let tx = self.store.begin(self.principal.as_deref()).await?;
        if let Err(e) = self.store.check_authentication(&tx).await {
            debug!("{:?} {}: not authenticated: {}", method, path, e);
            self.store.rollback(&tx).await?;
            return Err(StatusCode::FORBIDDEN.into());
        }

        let res = match method {
            DavMethod::Options => self.handle_options(&tx, &req).await,
            DavMethod::PropFind => self.handle_propfind(&tx, &req, &body_data).await,
            DavMethod::PropPatch => self.handle_proppatch(&tx, &req, &body_data).await,
            DavMethod::MkCol => self.handle_mkcol(&tx, &req).await,
            DavMethod::Delete => self.handle_delete(&tx, &req).await,
            DavMethod::Lock => self.handle_lock(&tx, &req, &body_data).await,
            DavMethod::Unlock => self.handle_unlock(&tx, &req).await,
            DavMethod::Head | DavMethod::Get => self.handle_get(&tx, &req, method).await,
            DavMethod::Copy | DavMethod::Move => self.handle_copymove(&tx, &req, method).await,
            DavMethod::Put => match body_strm {
                Some(strm) => self.handle_put(&tx, &req, strm).await,
                None => Err(StatusCode::INTERNAL_SERVER_ERROR.into()),
            },
        };

        match res {
            Ok(resp) => {
                self.store.commit(&tx).await?;
                Ok(resp)
            }
            Err(e) if e.is_unexpected() => {
                error!("{:?} {}: {}, rolling back", method, path, e);
                if let Err(re) = self.store.rollback(&tx).await {
                    error!("{:?} {}: rollback failed: {}", method, path, re);
                }
                Err(e)
            }
            Err(e) => {
                self.store.commit(&tx).await?;
                Err(e)
            }
        }
    }
}

// Turn the request body into a stream of bytes for the store.
fn body_stream<ReqBody, ReqData, ReqError>(body: ReqBody) -> ContentStream
where
    ReqBody: HttpBody<Data = ReqData, Error = ReqError> + Send + 'static,
    ReqData: Buf + Send + 'static,
    ReqError: StdError + Send + Sync + 'static,
{
    stream::unfold(Box::pin(body), |mut body| async move {
        loop {
            match body.frame().await? {
                Ok(frame) => {
                    if let Ok(mut data) = frame.into_data() {
                        let chunk = data.copy_to_bytes(data.remaining());
                        return Some((Ok(chunk), body));
                    }
                }
                Err(e) => return Some((Err(io::Error::other(e)), body)),
            }
        }
    })
    .boxed()
}
