use std::io::{Cursor, Write};
use std::time::{SystemTime, UNIX_EPOCH};

use bytes::Bytes;
use chrono::{DateTime, SecondsFormat, Utc};
use http::StatusCode;
use http::method::InvalidMethod;

use crate::DavResult;
use crate::errors::DavError;
use crate::store::StoredObject;

/// HTTP Methods supported by DavHandler.
#[derive(Debug, PartialEq, Eq, Hash, Clone, Copy)]
#[repr(u32)]
pub enum DavMethod {
    Head = 0x0001,
    Get = 0x0002,
    Put = 0x0004,
    Options = 0x0010,
    PropFind = 0x0020,
    PropPatch = 0x0040,
    MkCol = 0x0080,
    Copy = 0x0100,
    Move = 0x0200,
    Delete = 0x0400,
    Lock = 0x0800,
    Unlock = 0x1000,
}

impl DavMethod {
    /// Methods that change the store or the persistent locks.
    pub fn is_mutating(self) -> bool {
        matches!(
            self,
            DavMethod::Put
                | DavMethod::PropPatch
                | DavMethod::MkCol
                | DavMethod::Copy
                | DavMethod::Move
                | DavMethod::Delete
                | DavMethod::Lock
                | DavMethod::Unlock
        )
    }
}

// translate method into our own enum that has webdav methods as well.
pub(crate) fn dav_method(m: &http::Method) -> DavResult<DavMethod> {
    let m = match *m {
        http::Method::HEAD => DavMethod::Head,
        http::Method::GET => DavMethod::Get,
        http::Method::PUT => DavMethod::Put,
        http::Method::DELETE => DavMethod::Delete,
        http::Method::OPTIONS => DavMethod::Options,
        _ => match m.as_str() {
            "PROPFIND" => DavMethod::PropFind,
            "PROPPATCH" => DavMethod::PropPatch,
            "MKCOL" => DavMethod::MkCol,
            "COPY" => DavMethod::Copy,
            "MOVE" => DavMethod::Move,
            "LOCK" => DavMethod::Lock,
            "UNLOCK" => DavMethod::Unlock,
            _ => {
                return Err(DavError::UnknownDavMethod);
            }
        },
    };
    Ok(m)
}

// for external use.
impl std::convert::TryFrom<&http::Method> for DavMethod {
    type Error = InvalidMethod;

    fn try_from(value: &http::Method) -> Result<Self, Self::Error> {
        dav_method(value).map_err(|_| invalid_method())
    }
}

// A trick to get at the value of http::method::InvalidMethod.
fn invalid_method() -> InvalidMethod {
    match http::method::Method::from_bytes(b"") {
        Err(e) => e,
        Ok(_) => unreachable!("empty method name is invalid"),
    }
}

/// A set of allowed [`DavMethod`]s.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct DavMethodSet(u32);

impl DavMethodSet {
    pub const HTTP_RO: DavMethodSet =
        DavMethodSet(DavMethod::Get as u32 | DavMethod::Head as u32 | DavMethod::Options as u32);
    pub const HTTP_RW: DavMethodSet = DavMethodSet(Self::HTTP_RO.0 | DavMethod::Put as u32);
    pub const WEBDAV_RO: DavMethodSet = DavMethodSet(Self::HTTP_RO.0 | DavMethod::PropFind as u32);
    pub const WEBDAV_RW: DavMethodSet = DavMethodSet(0xffffffff);

    /// New set, all methods allowed.
    pub fn all() -> DavMethodSet {
        DavMethodSet(0xffffffff)
    }

    /// New empty set.
    pub fn none() -> DavMethodSet {
        DavMethodSet(0)
    }

    /// Add a method.
    pub fn add(&mut self, m: DavMethod) -> &Self {
        self.0 |= m as u32;
        self
    }

    /// Remove a method.
    pub fn remove(&mut self, m: DavMethod) -> &Self {
        self.0 &= !(m as u32);
        self
    }

    /// Check if a method is in the set.
    pub fn contains(&self, m: DavMethod) -> bool {
        self.0 & (m as u32) > 0
    }

    /// Generate an DavMethodSet from a list of words.
    pub fn from_vec(v: Vec<impl AsRef<str>>) -> Result<DavMethodSet, InvalidMethod> {
        let mut m: u32 = 0;
        for w in &v {
            m |= match w.as_ref().to_lowercase().as_str() {
                "head" => DavMethod::Head as u32,
                "get" => DavMethod::Get as u32,
                "put" => DavMethod::Put as u32,
                "delete" => DavMethod::Delete as u32,
                "options" => DavMethod::Options as u32,
                "propfind" => DavMethod::PropFind as u32,
                "proppatch" => DavMethod::PropPatch as u32,
                "mkcol" => DavMethod::MkCol as u32,
                "copy" => DavMethod::Copy as u32,
                "move" => DavMethod::Move as u32,
                "lock" => DavMethod::Lock as u32,
                "unlock" => DavMethod::Unlock as u32,
                "http-ro" => Self::HTTP_RO.0,
                "http-rw" => Self::HTTP_RW.0,
                "webdav-ro" => Self::WEBDAV_RO.0,
                "webdav-rw" => Self::WEBDAV_RW.0,
                _ => return Err(invalid_method()),
            };
        }
        Ok(DavMethodSet(m))
    }
}

/// Strong entity tag for a resource, derived from its length and
/// modification time only.
pub fn compute_etag(resource_length: u64, last_modified: SystemTime) -> String {
    let millis = last_modified
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_millis())
        .unwrap_or(0);
    format!("\"{}-{}\"", resource_length, millis)
}

pub(crate) fn object_etag(obj: &StoredObject) -> String {
    compute_etag(obj.resource_length, obj.last_modified)
}

/// Value of the `Allow` header for what is (or is not) at a path.
pub(crate) fn methods_allowed(obj: Option<&StoredObject>) -> &'static str {
    const NULL_OBJECT: &str = "OPTIONS, MKCOL, PUT";
    const NULL_RESOURCE: &str = "OPTIONS, MKCOL, PUT, PROPFIND, LOCK, UNLOCK";
    const RESOURCE: &str =
        "OPTIONS, GET, HEAD, POST, DELETE, TRACE, PROPPATCH, COPY, MOVE, LOCK, UNLOCK, PROPFIND";
    const FOLDER: &str =
        "OPTIONS, GET, HEAD, POST, DELETE, TRACE, PROPPATCH, COPY, MOVE, LOCK, UNLOCK, PROPFIND, PUT";
    match obj {
        None => NULL_OBJECT,
        Some(o) if o.is_null_resource => NULL_RESOURCE,
        Some(o) if o.is_folder => FOLDER,
        Some(_) => RESOURCE,
    }
}

/// "HTTP/1.1 423 Locked"
pub(crate) fn status_line(status: StatusCode) -> String {
    format!(
        "HTTP/1.1 {} {}",
        status.as_u16(),
        status.canonical_reason().unwrap_or("")
    )
}

pub(crate) fn systemtime_to_httpdate(t: SystemTime) -> String {
    let dt: DateTime<Utc> = t.into();
    dt.format("%a, %d %b %Y %H:%M:%S GMT").to_string()
}

pub(crate) fn systemtime_to_rfc3339(t: SystemTime) -> String {
    let dt: DateTime<Utc> = t.into();
    dt.to_rfc3339_opts(SecondsFormat::Secs, true)
}

// A buffer that implements "Write".
#[derive(Clone)]
pub(crate) struct MemBuffer(Cursor<Vec<u8>>);

impl MemBuffer {
    pub fn new() -> MemBuffer {
        MemBuffer(Cursor::new(Vec::new()))
    }

    pub fn take(&mut self) -> Bytes {
        let buf = std::mem::take(self.0.get_mut());
        self.0.set_position(0);
        Bytes::from(buf)
    }
}

impl Write for MemBuffer {
    fn write(&mut self, buf: &[u8]) -> std::io::Result<usize> {
        self.0.write(buf)
    }

    fn flush(&mut self) -> std::io::Result<()> {
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    #[test]
    fn test_rfc3339() {
        let t = UNIX_EPOCH + Duration::new(1, 5_000_000);
        assert!(systemtime_to_rfc3339(t) == "1970-01-01T00:00:01Z");
        assert_eq!(systemtime_to_httpdate(t), "Thu, 01 Jan 1970 00:00:01 GMT");
    }

    #[test]
    fn etag_is_deterministic() {
        let t = UNIX_EPOCH + Duration::from_millis(1_500);
        assert_eq!(compute_etag(42, t), "\"42-1500\"");
        assert_eq!(compute_etag(42, t), compute_etag(42, t));
        assert_ne!(compute_etag(43, t), compute_etag(42, t));
    }

    #[test]
    fn method_sets() {
        let set = DavMethodSet::from_vec(vec!["webdav-ro"]).unwrap();
        assert!(set.contains(DavMethod::PropFind));
        assert!(!set.contains(DavMethod::Put));
        assert!(DavMethodSet::from_vec(vec!["frobnicate"]).is_err());
        assert_eq!(status_line(StatusCode::LOCKED), "HTTP/1.1 423 Locked");
    }
}
