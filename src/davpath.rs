//! Utility module to handle the path part of an URL as a resource path.
//!
use std::error::Error;

use percent_encoding::{self as pct, AsciiSet, NON_ALPHANUMERIC};

use crate::DavError;

/// Path information relative to a prefix.
///
/// The path is stored decoded and normalized: it always starts with a
/// slash, never ends in one (except for the root itself) and has no
/// empty, `.` or `..` segments. Whether the request URL ended in a
/// slash is kept separately.
#[derive(Clone)]
pub struct DavPath {
    path: String,
    prefix: String,
    collection: bool,
}

// Encode all non-unreserved characters, except '/'.
// See RFC3986, and https://en.wikipedia.org/wiki/Percent-encoding .
const PATH_ENCODE_SET: &AsciiSet = &NON_ALPHANUMERIC
    .remove(b'-')
    .remove(b'_')
    .remove(b'.')
    .remove(b'~')
    .remove(b'/');

impl std::fmt::Display for DavPath {
    fn fmt(&self, f: &mut std::fmt::Formatter) -> std::fmt::Result {
        f.write_str(&self.path)
    }
}

impl std::fmt::Debug for DavPath {
    fn fmt(&self, f: &mut std::fmt::Formatter) -> std::fmt::Result {
        if self.prefix.is_empty() {
            write!(f, "{:?}", self.path)
        } else {
            write!(f, "\"{}[{}]\"", self.prefix, self.path)
        }
    }
}

/// Error returned by some of the DavPath methods.
#[derive(Debug, PartialEq)]
pub enum ParseError {
    /// cannot parse
    InvalidPath,
    /// outside of prefix
    IllegalPath,
    /// too many dotdots
    ForbiddenPath,
}

impl Error for ParseError {}

impl std::fmt::Display for ParseError {
    fn fmt(&self, f: &mut std::fmt::Formatter) -> std::fmt::Result {
        write!(f, "{:?}", self)
    }
}

impl From<ParseError> for DavError {
    fn from(e: ParseError) -> Self {
        match e {
            ParseError::InvalidPath => DavError::InvalidPath,
            ParseError::IllegalPath => DavError::IllegalPath,
            ParseError::ForbiddenPath => DavError::ForbiddenPath,
        }
    }
}

// a decoded segment can contain any value except '/' or '\0'
fn decode_segment(src: &str) -> Result<String, ParseError> {
    let s = pct::percent_decode_str(src)
        .decode_utf8()
        .map_err(|_| ParseError::InvalidPath)?;
    if s.contains(['\0', '/']) {
        return Err(ParseError::InvalidPath);
    }
    Ok(s.into_owned())
}

// make path safe:
// - raw path before decoding can contain only printable ascii
// - make sure path is absolute
// - remove query part (everything after ?)
// - merge consecutive slashes
// - process . and ..
// - decode percent encoded bytes, fail on invalid encodings.
// - do not allow NUL or '/' in segments.
fn normalize_path(rp: &str) -> Result<(Vec<String>, bool), ParseError> {
    if rp.bytes().any(|x| !(32..=126).contains(&x)) {
        return Err(ParseError::InvalidPath);
    }

    // don't allow fragments. query part gets deleted.
    let mut rawpath = rp;
    if let Some(pos) = rawpath.find(['?', '#']) {
        if rawpath[pos..].starts_with('#') {
            return Err(ParseError::InvalidPath);
        }
        rawpath = &rawpath[..pos];
    }

    if !rawpath.starts_with('/') {
        return Err(ParseError::InvalidPath);
    }

    let isdir = rawpath.ends_with('/');
    let mut segs: Vec<String> = Vec::new();
    for segment in rawpath.split('/') {
        match segment {
            "." | "" => {}
            ".." => {
                if segs.pop().is_none() {
                    return Err(ParseError::ForbiddenPath);
                }
            }
            s => segs.push(decode_segment(s)?),
        }
    }
    Ok((segs, isdir))
}

fn join_segments(segs: &[String]) -> String {
    if segs.is_empty() {
        return "/".to_string();
    }
    let mut p = String::new();
    for s in segs {
        p.push('/');
        p.push_str(s);
    }
    p
}

/// Comparision ignores the trailing slash, so /foo == /foo/
impl PartialEq for DavPath {
    fn eq(&self, rhs: &DavPath) -> bool {
        self.prefix == rhs.prefix && self.path == rhs.path
    }
}

impl Eq for DavPath {}

impl DavPath {
    /// from an URL encoded path string, without prefix.
    pub fn new(src: &str) -> Result<DavPath, ParseError> {
        DavPath::from_str_and_prefix(src, "")
    }

    /// from URL encoded strings: path and prefix.
    pub fn from_str_and_prefix(src: &str, prefix: &str) -> Result<DavPath, ParseError> {
        let (segs, isdir) = normalize_path(src)?;
        let full = join_segments(&segs);

        let prefix = prefix.trim_end_matches('/');
        let path = if prefix.is_empty() {
            full
        } else if full == prefix {
            "/".to_string()
        } else if let Some(rest) = full.strip_prefix(prefix) {
            if !rest.starts_with('/') {
                return Err(ParseError::IllegalPath);
            }
            rest.to_string()
        } else {
            return Err(ParseError::IllegalPath);
        };

        let collection = isdir || path == "/";
        Ok(DavPath {
            path,
            prefix: prefix.to_string(),
            collection,
        })
    }

    /// from request.uri
    pub(crate) fn from_uri_and_prefix(uri: &http::uri::Uri, prefix: &str) -> Result<Self, ParseError> {
        match uri.path() {
            path if path.starts_with('/') => DavPath::from_str_and_prefix(path, prefix),
            _ => Err(ParseError::InvalidPath),
        }
    }

    /// The normalized path, decoded, without prefix.
    pub fn as_str(&self) -> &str {
        &self.path
    }

    /// URL encoded, with prefix. Collections get a trailing slash.
    pub fn as_url_string_with_prefix(&self) -> String {
        let mut p = String::new();
        p.push_str(&pct::utf8_percent_encode(&self.prefix, PATH_ENCODE_SET).to_string());
        p.push_str(&pct::utf8_percent_encode(&self.path, PATH_ENCODE_SET).to_string());
        if self.collection && !p.ends_with('/') {
            p.push('/');
        }
        p
    }

    /// is this a collection i.e. does the original URL path end in "/".
    pub fn is_collection(&self) -> bool {
        self.collection
    }

    pub fn is_root(&self) -> bool {
        self.path == "/"
    }

    /// return the URL prefix.
    pub fn prefix(&self) -> &str {
        &self.prefix
    }

    /// mark the path as a collection (trailing slash in hrefs).
    pub(crate) fn add_slash(&mut self) {
        self.collection = true;
    }

    // get parent. The parent of the root is the root.
    pub fn parent(&self) -> DavPath {
        let path = match self.path.rfind('/') {
            Some(0) | None => "/".to_string(),
            Some(pos) => self.path[..pos].to_string(),
        };
        DavPath {
            path,
            prefix: self.prefix.clone(),
            collection: true,
        }
    }

    /// The filename is the last segment of the path. Empty for the root.
    pub fn file_name(&self) -> &str {
        match self.path.rfind('/') {
            Some(pos) => &self.path[pos + 1..],
            None => "",
        }
    }

    /// Iterate over the (decoded) segments. The root has none.
    pub fn segments(&self) -> impl Iterator<Item = &str> {
        self.path.split('/').filter(|s| !s.is_empty())
    }

    /// A new path with one more (decoded) segment.
    pub fn join(&self, name: &str) -> DavPath {
        let mut path = self.path.clone();
        if !path.ends_with('/') {
            path.push('/');
        }
        path.push_str(name);
        DavPath {
            path,
            prefix: self.prefix.clone(),
            collection: false,
        }
    }

    /// Is `self` equal to `other` or one of its ancestors.
    pub fn is_ancestor_of(&self, other: &DavPath) -> bool {
        if self.path == other.path || self.path == "/" {
            return true;
        }
        other
            .path
            .strip_prefix(&self.path)
            .map(|rest| rest.starts_with('/'))
            .unwrap_or(false)
    }

    /// Another path under the same prefix, from an already decoded path.
    pub(crate) fn with_decoded(&self, path: &str) -> DavPath {
        DavPath {
            path: path.to_string(),
            prefix: self.prefix.clone(),
            collection: path == "/",
        }
    }

    /// `None` when the last segment has no extension.
    pub(crate) fn extension(&self) -> Option<&str> {
        let name = self.file_name();
        match name.rfind('.') {
            Some(pos) if pos + 1 < name.len() => Some(&name[pos + 1..]),
            _ => None,
        }
    }
}
