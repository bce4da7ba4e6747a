use std::sync::Arc;

use futures_util::future::{self, FutureExt};
use futures_util::StreamExt;
use http::{Request, Response, StatusCode};
use parking_lot::Mutex;

use webdav_core::body::Body;
use webdav_core::memstore::MemStore;
use webdav_core::{
    ContentStream, DavHandler, DavPath, StoreError, StoreFuture, StoredObject, Transaction, WebdavStore,
};

// MemStore that records every mutating call, in order. Mutations of
// the paths in `failing` are refused with Forbidden.
#[derive(Debug, Clone)]
struct RecordingStore {
    inner: Box<MemStore>,
    log: Arc<Mutex<Vec<String>>>,
    failing: Arc<Mutex<Vec<String>>>,
}

impl RecordingStore {
    fn new() -> RecordingStore {
        RecordingStore {
            inner: MemStore::new(),
            log: Arc::new(Mutex::new(Vec::new())),
            failing: Arc::new(Mutex::new(Vec::new())),
        }
    }

    fn record(&self, op: &str, path: &DavPath) {
        self.log.lock().push(format!("{} {}", op, path.as_str()));
    }

    fn fail_on(&self, path: &str) {
        self.failing.lock().push(path.to_string());
    }

    fn refuses(&self, path: &DavPath) -> bool {
        self.failing.lock().iter().any(|p| p == path.as_str())
    }

    fn take_log(&self) -> Vec<String> {
        std::mem::take(&mut *self.log.lock())
    }
}

impl WebdavStore for RecordingStore {
    fn get_object<'a>(&'a self, tx: &'a Transaction, path: &'a DavPath) -> StoreFuture<'a, Option<StoredObject>> {
        self.inner.get_object(tx, path)
    }

    fn create_resource<'a>(&'a self, tx: &'a Transaction, path: &'a DavPath) -> StoreFuture<'a, ()> {
        if self.refuses(path) {
            return future::ready(Err(StoreError::Forbidden)).boxed();
        }
        self.record("create_resource", path);
        self.inner.create_resource(tx, path)
    }

    fn create_folder<'a>(&'a self, tx: &'a Transaction, path: &'a DavPath) -> StoreFuture<'a, ()> {
        self.record("create_folder", path);
        self.inner.create_folder(tx, path)
    }

    fn remove_object<'a>(&'a self, tx: &'a Transaction, path: &'a DavPath) -> StoreFuture<'a, ()> {
        if self.refuses(path) {
            return future::ready(Err(StoreError::Forbidden)).boxed();
        }
        self.record("remove_object", path);
        self.inner.remove_object(tx, path)
    }

    fn get_children_names<'a>(&'a self, tx: &'a Transaction, path: &'a DavPath) -> StoreFuture<'a, Vec<String>> {
        self.inner.get_children_names(tx, path)
    }

    fn get_resource_content<'a>(&'a self, tx: &'a Transaction, path: &'a DavPath) -> StoreFuture<'a, ContentStream> {
        self.inner.get_resource_content(tx, path)
    }

    fn set_resource_content<'a>(
        &'a self,
        tx: &'a Transaction,
        path: &'a DavPath,
        content: ContentStream,
        content_type: Option<&'a str>,
        etag: Option<&'a str>,
    ) -> StoreFuture<'a, u64> {
        self.record("set_resource_content", path);
        self.inner.set_resource_content(tx, path, content, content_type, etag)
    }

    fn set_null_resource<'a>(&'a self, tx: &'a Transaction, path: &'a DavPath, null: bool) -> StoreFuture<'a, ()> {
        self.record("set_null_resource", path);
        self.inner.set_null_resource(tx, path, null)
    }
}

fn setup() -> (DavHandler, RecordingStore) {
    let store = RecordingStore::new();
    let dav = DavHandler::builder().store(Box::new(store.clone())).build_handler();
    (dav, store)
}

async fn resp_to_string(mut resp: Response<Body>) -> String {
    let mut data = Vec::new();
    let body = resp.body_mut();

    while let Some(chunk) = body.next().await {
        match chunk {
            Ok(bytes) => data.extend_from_slice(&bytes),
            Err(e) => panic!("Error reading body stream: {}", e),
        }
    }

    String::from_utf8(data).unwrap_or_else(|_| "".to_string())
}

fn request(method: &str, uri: &str) -> http::request::Builder {
    Request::builder().method(method).uri(uri)
}

async fn send(dav: &DavHandler, req: http::request::Builder, body: &str) -> Response<Body> {
    let body = if body.is_empty() { Body::empty() } else { Body::from(body) };
    dav.handle(req.body(body).unwrap()).await
}

// /docs/readme.txt, /docs/notes/todo.txt and /a.txt
async fn populate(dav: &DavHandler) {
    let resp = send(dav, request("MKCOL", "/docs"), "").await;
    assert_eq!(resp.status(), StatusCode::CREATED);
    let resp = send(dav, request("MKCOL", "/docs/notes"), "").await;
    assert_eq!(resp.status(), StatusCode::CREATED);
    for (path, data) in [("/docs/readme.txt", "read me"), ("/docs/notes/todo.txt", "todo"), ("/a.txt", "aaa")] {
        let resp = send(dav, request("PUT", path), data).await;
        assert_eq!(resp.status(), StatusCode::CREATED);
    }
}

const LOCKINFO: &str = r#"<?xml version="1.0" encoding="utf-8"?>
<D:lockinfo xmlns:D="DAV:">
  <D:lockscope><D:exclusive/></D:lockscope>
  <D:locktype><D:write/></D:locktype>
  <D:owner>alice</D:owner>
</D:lockinfo>"#;

fn lockinfo(scope: &str, owner: &str) -> String {
    format!(
        r#"<?xml version="1.0" encoding="utf-8"?>
<D:lockinfo xmlns:D="DAV:">
  <D:lockscope><D:{}/></D:lockscope>
  <D:locktype><D:write/></D:locktype>
  <D:owner>{}</D:owner>
</D:lockinfo>"#,
        scope, owner
    )
}

// every href in a multistatus body, sorted.
fn hrefs(text: &str) -> Vec<String> {
    let mut v: Vec<String> = text
        .split("<D:href>")
        .skip(1)
        .filter_map(|s| s.split("</D:href>").next())
        .map(|s| s.to_string())
        .collect();
    v.sort();
    v
}

fn lock_token(resp: &Response<Body>) -> String {
    resp.headers()
        .get("lock-token")
        .and_then(|v| v.to_str().ok())
        .map(|v| v.to_string())
        .expect("Lock-Token header")
}

#[tokio::test]
async fn put_then_get() {
    let (dav, _) = setup();
    let resp = send(&dav, request("PUT", "/hello.txt").header("content-type", "text/plain"), "hello").await;
    assert_eq!(resp.status(), StatusCode::CREATED);
    assert!(resp.headers().contains_key("etag"));

    let resp = send(&dav, request("PUT", "/hello.txt"), "hello world").await;
    assert_eq!(resp.status(), StatusCode::NO_CONTENT);

    let resp = send(&dav, request("GET", "/hello.txt"), "").await;
    assert_eq!(resp.status(), StatusCode::OK);
    assert_eq!(resp.headers().get("content-length").unwrap(), "11");
    assert_eq!(resp_to_string(resp).await, "hello world");

    let resp = send(&dav, request("HEAD", "/hello.txt"), "").await;
    assert_eq!(resp.status(), StatusCode::OK);
    assert_eq!(resp_to_string(resp).await, "");
}

#[tokio::test]
async fn get_if_none_match() {
    let (dav, _) = setup();
    let resp = send(&dav, request("PUT", "/file.txt"), "data").await;
    let etag = resp.headers().get("etag").unwrap().to_str().unwrap().to_string();

    let resp = send(&dav, request("GET", "/file.txt").header("if-none-match", etag.as_str()), "").await;
    assert_eq!(resp.status(), StatusCode::NOT_MODIFIED);

    let resp = send(&dav, request("GET", "/file.txt").header("if-none-match", "\"nope\""), "").await;
    assert_eq!(resp.status(), StatusCode::OK);
}

#[tokio::test]
async fn get_if_none_match_weak() {
    let (dav, _) = setup();
    let resp = send(&dav, request("PUT", "/file.txt"), "data").await;
    let etag = resp.headers().get("etag").unwrap().to_str().unwrap().to_string();

    let weak = format!("W/{}", etag);
    let resp = send(&dav, request("GET", "/file.txt").header("if-none-match", weak.as_str()), "").await;
    assert_eq!(resp.status(), StatusCode::NOT_MODIFIED);
}

#[tokio::test]
async fn head_sends_no_body() {
    let (dav, _) = setup();
    populate(&dav).await;

    let resp = send(&dav, request("HEAD", "/docs/readme.txt"), "").await;
    assert_eq!(resp.status(), StatusCode::OK);
    assert_eq!(resp.headers().get("content-length").unwrap(), "7");
    assert!(resp.headers().contains_key("etag"));
    assert_eq!(resp_to_string(resp).await, "");

    let resp = send(&dav, request("HEAD", "/docs"), "").await;
    assert_eq!(resp.status(), StatusCode::OK);
    assert_eq!(resp.headers().get("content-type").unwrap(), "text/html; charset=utf-8");
    assert_eq!(resp_to_string(resp).await, "");

    let resp = send(&dav, request("HEAD", "/missing.txt"), "").await;
    assert_eq!(resp.status(), StatusCode::NOT_FOUND);
}

#[tokio::test]
async fn get_instead_of_404() {
    let dav = DavHandler::builder()
        .store(MemStore::new())
        .instead_of_404("/404.html")
        .build_handler();

    // no fallback yet.
    let resp = send(&dav, request("GET", "/nothing"), "").await;
    assert_eq!(resp.status(), StatusCode::NOT_FOUND);

    let resp = send(&dav, request("PUT", "/404.html"), "gone").await;
    assert_eq!(resp.status(), StatusCode::CREATED);

    let resp = send(&dav, request("GET", "/nothing"), "").await;
    assert_eq!(resp.status(), StatusCode::NOT_FOUND);
    assert_eq!(resp.headers().get("content-type").unwrap(), "text/html");
    assert_eq!(resp_to_string(resp).await, "gone");

    let resp = send(&dav, request("HEAD", "/nothing"), "").await;
    assert_eq!(resp.status(), StatusCode::NOT_FOUND);
    assert_eq!(resp_to_string(resp).await, "");
}

#[tokio::test]
async fn get_folder_index_redirect() {
    let dav = DavHandler::builder()
        .store(MemStore::new())
        .index_file("index.html")
        .build_handler();
    populate(&dav).await;

    let resp = send(&dav, request("GET", "/docs"), "").await;
    assert_eq!(resp.status(), StatusCode::FOUND);
    assert_eq!(resp.headers().get("location").unwrap(), "/docs/index.html");
    assert_eq!(resp_to_string(resp).await, "");

    // files are served as usual.
    let resp = send(&dav, request("GET", "/docs/readme.txt"), "").await;
    assert_eq!(resp.status(), StatusCode::OK);
}

#[tokio::test]
async fn get_content_length_toggles() {
    let dav = DavHandler::builder()
        .store(MemStore::new())
        .content_length(false)
        .build_handler();
    populate(&dav).await;
    let resp = send(&dav, request("GET", "/a.txt"), "").await;
    assert_eq!(resp.status(), StatusCode::OK);
    assert!(resp.headers().get("content-length").is_none());
    assert_eq!(resp_to_string(resp).await, "aaa");

    let dav = DavHandler::builder()
        .store(MemStore::new())
        .no_content_length_agents(vec!["gvfs".to_string()])
        .build_handler();
    populate(&dav).await;
    let resp = send(&dav, request("GET", "/a.txt").header("user-agent", "gvfs/1.50"), "").await;
    assert!(resp.headers().get("content-length").is_none());
    let resp = send(&dav, request("HEAD", "/a.txt").header("user-agent", "gvfs/1.50"), "").await;
    assert!(resp.headers().get("content-length").is_none());
    let resp = send(&dav, request("GET", "/a.txt").header("user-agent", "curl/8.0"), "").await;
    assert_eq!(resp.headers().get("content-length").unwrap(), "3");
}

#[tokio::test]
async fn get_missing() {
    let (dav, _) = setup();
    let resp = send(&dav, request("GET", "/nothing.txt"), "").await;
    assert_eq!(resp.status(), StatusCode::NOT_FOUND);
}

#[tokio::test]
async fn put_missing_parent() {
    let (dav, store) = setup();
    let resp = send(&dav, request("PUT", "/a/b/c.txt"), "x").await;
    assert_eq!(resp.status(), StatusCode::MULTI_STATUS);
    let text = resp_to_string(resp).await;
    assert!(text.contains("/a/b"));
    assert!(text.contains("404"));
    assert!(store.take_log().is_empty());

    let store = RecordingStore::new();
    let dav = DavHandler::builder()
        .store(Box::new(store.clone()))
        .lazy_folder_creation(true)
        .build_handler();
    let resp = send(&dav, request("PUT", "/a/b/c.txt"), "x").await;
    assert_eq!(resp.status(), StatusCode::CREATED);
    assert_eq!(
        store.take_log(),
        vec![
            "create_folder /a",
            "create_folder /a/b",
            "create_resource /a/b/c.txt",
            "set_resource_content /a/b/c.txt",
        ]
    );
}

#[tokio::test]
async fn delete_removes_children_first() {
    let (dav, store) = setup();
    populate(&dav).await;
    store.take_log();

    let resp = send(&dav, request("DELETE", "/docs"), "").await;
    assert_eq!(resp.status(), StatusCode::NO_CONTENT);

    let log = store.take_log();
    let pos = |s: &str| log.iter().position(|l| l == s).expect(s);
    assert!(pos("remove_object /docs/notes/todo.txt") < pos("remove_object /docs/notes"));
    assert!(pos("remove_object /docs/notes") < pos("remove_object /docs"));
    assert!(pos("remove_object /docs/readme.txt") < pos("remove_object /docs"));
    assert_eq!(log.len(), 4);

    let resp = send(&dav, request("GET", "/docs/readme.txt"), "").await;
    assert_eq!(resp.status(), StatusCode::NOT_FOUND);
    let resp = send(&dav, request("DELETE", "/docs"), "").await;
    assert_eq!(resp.status(), StatusCode::NOT_FOUND);
}

#[tokio::test]
async fn delete_partial_failure() {
    let (dav, store) = setup();
    populate(&dav).await;
    store.fail_on("/docs/notes/todo.txt");
    store.take_log();

    let resp = send(&dav, request("DELETE", "/docs"), "").await;
    assert_eq!(resp.status(), StatusCode::MULTI_STATUS);
    let text = resp_to_string(resp).await;
    assert!(text.contains("<D:href>/docs/notes/todo.txt</D:href>"));
    assert!(text.contains("403"));

    // the sibling is gone, the failed branch and its parents stay.
    assert_eq!(store.take_log(), vec!["remove_object /docs/readme.txt"]);
    let resp = send(&dav, request("GET", "/docs/readme.txt"), "").await;
    assert_eq!(resp.status(), StatusCode::NOT_FOUND);
    let resp = send(&dav, request("GET", "/docs/notes/todo.txt"), "").await;
    assert_eq!(resp_to_string(resp).await, "todo");
    let resp = send(&dav, request("PROPFIND", "/docs").header("depth", "0"), "").await;
    assert_eq!(resp.status(), StatusCode::MULTI_STATUS);
}

#[tokio::test]
async fn delete_root_is_forbidden() {
    let (dav, _) = setup();
    let resp = send(&dav, request("DELETE", "/"), "").await;
    assert_eq!(resp.status(), StatusCode::FORBIDDEN);
}

#[tokio::test]
async fn mkcol() {
    let (dav, _) = setup();
    let resp = send(&dav, request("MKCOL", "/dir"), "").await;
    assert_eq!(resp.status(), StatusCode::CREATED);

    // exists
    let resp = send(&dav, request("MKCOL", "/dir"), "").await;
    assert_eq!(resp.status(), StatusCode::METHOD_NOT_ALLOWED);
    assert!(resp.headers().contains_key("allow"));

    // no parent
    let resp = send(&dav, request("MKCOL", "/x/y"), "").await;
    assert_eq!(resp.status(), StatusCode::METHOD_NOT_ALLOWED);

    // body
    let resp = send(&dav, request("MKCOL", "/other"), "<x/>").await;
    assert_eq!(resp.status(), StatusCode::UNSUPPORTED_MEDIA_TYPE);
}

#[tokio::test]
async fn copy_no_overwrite() {
    let (dav, store) = setup();
    populate(&dav).await;
    store.take_log();

    let req = request("COPY", "/a.txt")
        .header("destination", "http://localhost/docs/readme.txt")
        .header("overwrite", "F");
    let resp = send(&dav, req, "").await;
    assert_eq!(resp.status(), StatusCode::PRECONDITION_FAILED);
    assert!(store.take_log().is_empty());

    let resp = send(&dav, request("GET", "/docs/readme.txt"), "").await;
    assert_eq!(resp_to_string(resp).await, "read me");
}

#[tokio::test]
async fn copy_overwrite() {
    let (dav, _) = setup();
    populate(&dav).await;

    let req = request("COPY", "/a.txt").header("destination", "/docs/readme.txt");
    let resp = send(&dav, req, "").await;
    assert_eq!(resp.status(), StatusCode::NO_CONTENT);

    let resp = send(&dav, request("GET", "/docs/readme.txt"), "").await;
    assert_eq!(resp_to_string(resp).await, "aaa");
    let resp = send(&dav, request("GET", "/a.txt"), "").await;
    assert_eq!(resp.status(), StatusCode::OK);
}

#[tokio::test]
async fn copy_folder_shallow() {
    let (dav, _) = setup();
    populate(&dav).await;

    let req = request("COPY", "/docs").header("destination", "/copy").header("depth", "0");
    let resp = send(&dav, req, "").await;
    assert_eq!(resp.status(), StatusCode::CREATED);

    let resp = send(&dav, request("GET", "/copy/readme.txt"), "").await;
    assert_eq!(resp.status(), StatusCode::NOT_FOUND);

    let req = request("COPY", "/docs").header("destination", "/deep");
    let resp = send(&dav, req, "").await;
    assert_eq!(resp.status(), StatusCode::CREATED);
    let resp = send(&dav, request("GET", "/deep/notes/todo.txt"), "").await;
    assert_eq!(resp_to_string(resp).await, "todo");
}

#[tokio::test]
async fn copy_partial_failure() {
    let (dav, store) = setup();
    populate(&dav).await;
    store.fail_on("/copy/notes/todo.txt");

    let req = request("COPY", "/docs").header("destination", "/copy");
    let resp = send(&dav, req, "").await;
    assert_eq!(resp.status(), StatusCode::MULTI_STATUS);
    let text = resp_to_string(resp).await;
    assert!(text.contains("<D:href>/copy/notes/todo.txt</D:href>"));
    assert!(text.contains("403"));

    // what could be copied was copied.
    let resp = send(&dav, request("GET", "/copy/readme.txt"), "").await;
    assert_eq!(resp_to_string(resp).await, "read me");
    let resp = send(&dav, request("PROPFIND", "/copy/notes").header("depth", "0"), "").await;
    assert_eq!(resp.status(), StatusCode::MULTI_STATUS);
    let resp = send(&dav, request("GET", "/copy/notes/todo.txt"), "").await;
    assert_eq!(resp.status(), StatusCode::NOT_FOUND);
}

#[tokio::test]
async fn copy_into_itself() {
    let (dav, store) = setup();
    populate(&dav).await;
    store.take_log();

    let req = request("COPY", "/docs").header("destination", "/docs/notes/docs");
    let resp = send(&dav, req, "").await;
    assert_eq!(resp.status(), StatusCode::FORBIDDEN);

    let req = request("MOVE", "/docs").header("destination", "/docs");
    let resp = send(&dav, req, "").await;
    assert_eq!(resp.status(), StatusCode::FORBIDDEN);
    assert!(store.take_log().is_empty());
}

#[tokio::test]
async fn move_resource() {
    let (dav, _) = setup();
    populate(&dav).await;

    let req = request("MOVE", "/a.txt").header("destination", "/docs/b.txt");
    let resp = send(&dav, req, "").await;
    assert_eq!(resp.status(), StatusCode::CREATED);

    let resp = send(&dav, request("GET", "/a.txt"), "").await;
    assert_eq!(resp.status(), StatusCode::NOT_FOUND);
    let resp = send(&dav, request("GET", "/docs/b.txt"), "").await;
    assert_eq!(resp.status(), StatusCode::OK);
    assert_eq!(resp_to_string(resp).await, "aaa");
}

#[tokio::test]
async fn move_folder() {
    let (dav, _) = setup();
    populate(&dav).await;

    let resp = send(&dav, request("PROPFIND", "/docs"), "").await;
    let before: Vec<String> = hrefs(&resp_to_string(resp).await)
        .into_iter()
        .map(|h| h.replacen("/docs", "/moved", 1))
        .collect();
    assert_eq!(before.len(), 4);

    let req = request("MOVE", "/docs").header("destination", "/moved");
    let resp = send(&dav, req, "").await;
    assert_eq!(resp.status(), StatusCode::CREATED);

    let resp = send(&dav, request("PROPFIND", "/moved"), "").await;
    assert_eq!(hrefs(&resp_to_string(resp).await), before);
    let resp = send(&dav, request("GET", "/moved/notes/todo.txt"), "").await;
    assert_eq!(resp_to_string(resp).await, "todo");
    let resp = send(&dav, request("GET", "/moved/readme.txt"), "").await;
    assert_eq!(resp_to_string(resp).await, "read me");

    let resp = send(&dav, request("PROPFIND", "/docs"), "").await;
    assert_eq!(resp.status(), StatusCode::NOT_FOUND);
    let resp = send(&dav, request("GET", "/docs/readme.txt"), "").await;
    assert_eq!(resp.status(), StatusCode::NOT_FOUND);
}

#[tokio::test]
async fn move_partial_failure_keeps_source() {
    let (dav, store) = setup();
    populate(&dav).await;
    store.fail_on("/moved/notes/todo.txt");

    let req = request("MOVE", "/docs").header("destination", "/moved");
    let resp = send(&dav, req, "").await;
    assert_eq!(resp.status(), StatusCode::MULTI_STATUS);
    let text = resp_to_string(resp).await;
    assert!(text.contains("<D:href>/moved/notes/todo.txt</D:href>"));

    // the copy half happened, the source was never touched.
    let resp = send(&dav, request("GET", "/moved/readme.txt"), "").await;
    assert_eq!(resp_to_string(resp).await, "read me");
    let resp = send(&dav, request("GET", "/docs/readme.txt"), "").await;
    assert_eq!(resp_to_string(resp).await, "read me");
    let resp = send(&dav, request("GET", "/docs/notes/todo.txt"), "").await;
    assert_eq!(resp_to_string(resp).await, "todo");
}

#[tokio::test]
async fn move_missing_destination_header() {
    let (dav, _) = setup();
    populate(&dav).await;
    let resp = send(&dav, request("MOVE", "/a.txt"), "").await;
    assert_eq!(resp.status(), StatusCode::BAD_REQUEST);
}

#[tokio::test]
async fn lock_blocks_delete() {
    let (dav, _) = setup();
    populate(&dav).await;

    let req = request("LOCK", "/docs").header("depth", "infinity").header("timeout", "Second-10");
    let resp = send(&dav, req, LOCKINFO).await;
    assert_eq!(resp.status(), StatusCode::OK);
    let token = lock_token(&resp);
    assert!(token.starts_with("<opaquelocktoken:"));
    let text = resp_to_string(resp).await;
    assert!(text.contains("<D:lockdiscovery>"));
    assert!(text.contains("alice"));
    assert!(text.contains("Second-"));

    let resp = send(&dav, request("DELETE", "/docs/readme.txt"), "").await;
    assert_eq!(resp.status(), StatusCode::LOCKED);

    // a second exclusive lock is refused.
    let resp = send(&dav, request("LOCK", "/docs/readme.txt"), LOCKINFO).await;
    assert_eq!(resp.status(), StatusCode::LOCKED);

    let req = request("DELETE", "/docs/readme.txt").header("if", format!("({})", token));
    let resp = send(&dav, req, "").await;
    assert_eq!(resp.status(), StatusCode::NO_CONTENT);

    // unlock, then anyone may delete.
    let req = request("UNLOCK", "/docs").header("lock-token", token.as_str());
    let resp = send(&dav, req, "").await;
    assert_eq!(resp.status(), StatusCode::NO_CONTENT);
    let resp = send(&dav, request("DELETE", "/docs"), "").await;
    assert_eq!(resp.status(), StatusCode::NO_CONTENT);
}

#[tokio::test]
async fn shared_locks() {
    let (dav, _) = setup();
    populate(&dav).await;

    let resp = send(&dav, request("LOCK", "/docs"), &lockinfo("shared", "bob")).await;
    assert_eq!(resp.status(), StatusCode::OK);
    let token = lock_token(&resp);
    let resp = send(&dav, request("LOCK", "/docs"), &lockinfo("shared", "carol")).await;
    assert_eq!(resp.status(), StatusCode::OK);
    assert_eq!(lock_token(&resp), token);

    // shared and exclusive do not mix.
    let resp = send(&dav, request("LOCK", "/docs"), LOCKINFO).await;
    assert_eq!(resp.status(), StatusCode::LOCKED);

    let resp = send(&dav, request("PROPFIND", "/docs").header("depth", "0"), "").await;
    let text = resp_to_string(resp).await;
    assert!(text.contains("<D:shared"));

    // a shared lock does not protect against writes.
    let resp = send(&dav, request("DELETE", "/docs/readme.txt"), "").await;
    assert_eq!(resp.status(), StatusCode::NO_CONTENT);

    // one UNLOCK drops every owner.
    let req = request("UNLOCK", "/docs").header("lock-token", token.as_str());
    let resp = send(&dav, req, "").await;
    assert_eq!(resp.status(), StatusCode::NO_CONTENT);
    let req = request("UNLOCK", "/docs").header("lock-token", token.as_str());
    let resp = send(&dav, req, "").await;
    assert_eq!(resp.status(), StatusCode::BAD_REQUEST);
    let resp = send(&dav, request("LOCK", "/docs"), LOCKINFO).await;
    assert_eq!(resp.status(), StatusCode::OK);
}

#[tokio::test]
async fn unlock_outside_lock_scope() {
    let (dav, _) = setup();
    populate(&dav).await;

    let resp = send(&dav, request("LOCK", "/docs").header("depth", "0"), LOCKINFO).await;
    assert_eq!(resp.status(), StatusCode::OK);
    let token = lock_token(&resp);

    // a depth 0 lock does not reach the members.
    let req = request("UNLOCK", "/docs/readme.txt").header("lock-token", token.as_str());
    let resp = send(&dav, req, "").await;
    assert_eq!(resp.status(), StatusCode::BAD_REQUEST);
    let req = request("UNLOCK", "/a.txt").header("lock-token", token.as_str());
    let resp = send(&dav, req, "").await;
    assert_eq!(resp.status(), StatusCode::BAD_REQUEST);

    let req = request("UNLOCK", "/docs").header("lock-token", token.as_str());
    let resp = send(&dav, req, "").await;
    assert_eq!(resp.status(), StatusCode::NO_CONTENT);

    // a depth infinity lock does.
    let resp = send(&dav, request("LOCK", "/docs"), LOCKINFO).await;
    let token = lock_token(&resp);
    let req = request("UNLOCK", "/docs/notes/todo.txt").header("lock-token", token.as_str());
    let resp = send(&dav, req, "").await;
    assert_eq!(resp.status(), StatusCode::NO_CONTENT);
}

#[tokio::test]
async fn lock_refresh() {
    let (dav, _) = setup();
    populate(&dav).await;

    let resp = send(&dav, request("LOCK", "/a.txt").header("depth", "0"), LOCKINFO).await;
    assert_eq!(resp.status(), StatusCode::OK);
    let token = lock_token(&resp);

    let req = request("LOCK", "/a.txt").header("if", format!("({})", token)).header("timeout", "Second-60");
    let resp = send(&dav, req, "").await;
    assert_eq!(resp.status(), StatusCode::OK);
    assert!(resp.headers().get("lock-token").is_none());

    let resp = send(&dav, request("LOCK", "/a.txt"), "").await;
    assert_eq!(resp.status(), StatusCode::PRECONDITION_FAILED);
}

#[tokio::test]
async fn lock_bad_xml() {
    let (dav, _) = setup();
    let resp = send(&dav, request("LOCK", "/x.txt"), "<D:lockinfo xmlns:D=\"DAV:\">").await;
    assert_eq!(resp.status(), StatusCode::BAD_REQUEST);
}

#[tokio::test]
async fn lock_null_resource() {
    let (dav, store) = setup();

    let resp = send(&dav, request("LOCK", "/new.txt"), LOCKINFO).await;
    assert_eq!(resp.status(), StatusCode::CREATED);
    let token = lock_token(&resp);
    assert_eq!(
        store.take_log(),
        vec!["create_resource /new.txt", "set_null_resource /new.txt"]
    );

    // a placeholder can not be read.
    let resp = send(&dav, request("GET", "/new.txt"), "").await;
    assert_eq!(resp.status(), StatusCode::METHOD_NOT_ALLOWED);

    let req = request("UNLOCK", "/new.txt").header("lock-token", token.as_str());
    let resp = send(&dav, req, "").await;
    assert_eq!(resp.status(), StatusCode::NO_CONTENT);
    assert_eq!(store.take_log(), vec!["remove_object /new.txt"]);

    let resp = send(&dav, request("GET", "/new.txt"), "").await;
    assert_eq!(resp.status(), StatusCode::NOT_FOUND);

    // the token is gone.
    let req = request("UNLOCK", "/new.txt").header("lock-token", token.as_str());
    let resp = send(&dav, req, "").await;
    assert_eq!(resp.status(), StatusCode::BAD_REQUEST);
}

#[tokio::test]
async fn lock_null_then_put() {
    let (dav, _) = setup();

    let resp = send(&dav, request("LOCK", "/new.txt"), LOCKINFO).await;
    let token = lock_token(&resp);

    let req = request("PUT", "/new.txt").header("if", format!("({})", token));
    let resp = send(&dav, req, "content").await;
    assert_eq!(resp.status(), StatusCode::NO_CONTENT);

    let resp = send(&dav, request("GET", "/new.txt"), "").await;
    assert_eq!(resp_to_string(resp).await, "content");
}

#[tokio::test]
async fn propfind_depth() {
    let (dav, _) = setup();
    populate(&dav).await;

    let resp = send(&dav, request("PROPFIND", "/"), "").await;
    assert_eq!(resp.status(), StatusCode::MULTI_STATUS);
    let text = resp_to_string(resp).await;
    assert_eq!(text.matches("<D:response>").count(), 6);
    assert!(text.contains("<D:href>/docs/notes/todo.txt</D:href>"));
    assert!(text.contains("<D:collection"));
    assert!(text.contains("<D:getcontentlength>7</D:getcontentlength>"));

    let resp = send(&dav, request("PROPFIND", "/docs").header("depth", "1"), "").await;
    let text = resp_to_string(resp).await;
    assert_eq!(text.matches("<D:response>").count(), 3);
    assert!(text.contains("<D:href>/docs/</D:href>"));

    let resp = send(&dav, request("PROPFIND", "/docs").header("depth", "0"), "").await;
    let text = resp_to_string(resp).await;
    assert_eq!(text.matches("<D:response>").count(), 1);

    let resp = send(&dav, request("PROPFIND", "/missing"), "").await;
    assert_eq!(resp.status(), StatusCode::NOT_FOUND);
}

#[tokio::test]
async fn propfind_shows_locks() {
    let (dav, _) = setup();
    populate(&dav).await;

    let resp = send(&dav, request("LOCK", "/docs"), LOCKINFO).await;
    assert_eq!(resp.status(), StatusCode::OK);

    let resp = send(&dav, request("PROPFIND", "/docs/readme.txt").header("depth", "0"), "").await;
    let text = resp_to_string(resp).await;
    assert!(text.contains("<D:lockdiscovery>"));
    assert!(text.contains("<D:lockroot><D:href>/docs</D:href></D:lockroot>"));
}

#[tokio::test]
async fn proppatch_echoes_properties() {
    let (dav, store) = setup();
    populate(&dav).await;
    store.take_log();

    let body = r#"<?xml version="1.0"?>
<D:propertyupdate xmlns:D="DAV:" xmlns:Z="http://example.com/ns">
  <D:set><D:prop><Z:color>red</Z:color></D:prop></D:set>
  <D:remove><D:prop><Z:size/></D:prop></D:remove>
</D:propertyupdate>"#;
    let resp = send(&dav, request("PROPPATCH", "/a.txt"), body).await;
    assert_eq!(resp.status(), StatusCode::MULTI_STATUS);
    let text = resp_to_string(resp).await;
    assert!(text.contains("color"));
    assert!(text.contains("size"));
    assert_eq!(text.matches("HTTP/1.1 200 OK").count(), 2);
    assert!(store.take_log().is_empty());

    let resp = send(&dav, request("PROPPATCH", "/a.txt"), "").await;
    assert_eq!(resp.status(), StatusCode::INTERNAL_SERVER_ERROR);

    let resp = send(&dav, request("PROPPATCH", "/missing.txt"), body).await;
    assert_eq!(resp.status(), StatusCode::NOT_FOUND);
}

#[tokio::test]
async fn options() {
    let (dav, _) = setup();
    let resp = send(&dav, request("OPTIONS", "/"), "").await;
    assert_eq!(resp.status(), StatusCode::OK);
    let h = resp.headers();
    assert_eq!(h.get("dav").unwrap(), "1, 2");
    assert_eq!(h.get("ms-author-via").unwrap(), "DAV");
    let allow = h.get("allow").unwrap().to_str().unwrap();
    assert!(allow.contains("PROPFIND"));
    assert!(allow.contains("LOCK"));
}

#[tokio::test]
async fn no_store() {
    let dav = DavHandler::builder().build_handler();
    let resp = send(&dav, request("OPTIONS", "/"), "").await;
    assert_eq!(resp.status(), StatusCode::OK);
    assert_eq!(resp.headers().get("allow").unwrap(), "OPTIONS");

    let resp = send(&dav, request("GET", "/"), "").await;
    assert_eq!(resp.status(), StatusCode::METHOD_NOT_ALLOWED);
}

#[tokio::test]
async fn read_only() {
    let store = RecordingStore::new();
    let dav = DavHandler::builder()
        .store(Box::new(store.clone()))
        .read_only(true)
        .build_handler();

    for method in ["PUT", "DELETE", "MKCOL", "COPY", "MOVE", "LOCK", "UNLOCK", "PROPPATCH"] {
        let resp = send(&dav, request(method, "/x"), "").await;
        assert_eq!(resp.status(), StatusCode::FORBIDDEN, "{}", method);
    }
    let resp = send(&dav, request("BREW", "/x"), "").await;
    assert_eq!(resp.status(), StatusCode::FORBIDDEN);
    assert!(store.take_log().is_empty());

    let resp = send(&dav, request("PROPFIND", "/"), "").await;
    assert_eq!(resp.status(), StatusCode::MULTI_STATUS);
}

#[tokio::test]
async fn unknown_method() {
    let (dav, _) = setup();
    let resp = send(&dav, request("BREW", "/pot"), "").await;
    assert_eq!(resp.status(), StatusCode::NOT_IMPLEMENTED);
}

#[tokio::test]
async fn folder_listing() {
    let (dav, _) = setup();
    populate(&dav).await;

    let resp = send(&dav, request("GET", "/docs/"), "").await;
    assert_eq!(resp.status(), StatusCode::OK);
    let text = resp_to_string(resp).await;
    assert!(text.contains("readme.txt"));
    assert!(text.contains("notes/"));
}
