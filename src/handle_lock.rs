use std::io::Cursor;
use std::time::SystemTime;

use headers::HeaderMapExt;
use http::{Request, Response, StatusCode};
use xmltree::Element;

use crate::body::Body;
use crate::davheaders::{self, DavTimeout, Depth};
use crate::davpath::DavPath;
use crate::errors::DavError;
use crate::locks::{DEPTH_INFINITY, LockNode};
use crate::multistatus::{ElementMode, MultistatusWriter};
use crate::store::Transaction;
use crate::util::DavMethod;
use crate::xmltree_ext::ElementExt;
use crate::DavResult;

/// `<D:activelock>` for one lock. `root` is the locked path.
pub(crate) fn write_activelock(w: &mut MultistatusWriter, node: &LockNode, root: &DavPath) -> DavResult<()> {
    w.write_element("D:activelock", ElementMode::Opening)?;

    w.write_element("D:locktype", ElementMode::Opening)?;
    w.write_element("D:write", ElementMode::NoContent)?;
    w.write_element("D:locktype", ElementMode::Closing)?;

    w.write_element("D:lockscope", ElementMode::Opening)?;
    if node.exclusive {
        w.write_element("D:exclusive", ElementMode::NoContent)?;
    } else {
        w.write_element("D:shared", ElementMode::NoContent)?;
    }
    w.write_element("D:lockscope", ElementMode::Closing)?;

    let depth = if node.depth == DEPTH_INFINITY { "infinity" } else { "0" };
    w.write_property("D:depth", Some(depth))?;
    if node.is_locked() {
        w.write_property("D:owner", Some(&node.owners.join(", ")))?;
    }
    let timeout = format!("Second-{}", node.remaining(SystemTime::now()));
    w.write_property("D:timeout", Some(&timeout))?;

    w.write_element("D:locktoken", ElementMode::Opening)?;
    w.write_property("D:href", Some(&format!("opaquelocktoken:{}", node.id)))?;
    w.write_element("D:locktoken", ElementMode::Closing)?;

    w.write_element("D:lockroot", ElementMode::Opening)?;
    w.write_property("D:href", Some(&root.as_url_string_with_prefix()))?;
    w.write_element("D:lockroot", ElementMode::Closing)?;

    w.write_element("D:activelock", ElementMode::Closing)
}

// a lock covers its own path, and everything below it at depth infinity.
fn covers(node: &LockNode, path: &DavPath) -> bool {
    let root = path.with_decoded(&node.path);
    root == *path || (node.depth == DEPTH_INFINITY && root.is_ancestor_of(path))
}

impl crate::DavInner {
    // Timeout: header, capped at the configured maximum.
    fn requested_timeout(&self, req: &Request<()>) -> u32 {
        match req.headers().typed_get::<davheaders::Timeout>() {
            Some(t) => match t.0.first() {
                Some(DavTimeout::Seconds(n)) if *n > 0 => (*n).min(self.lock_timeout),
                _ => self.lock_timeout,
            },
            None => self.lock_timeout,
        }
    }

    // <D:prop><D:lockdiscovery> response.
    fn lock_response(
        &self,
        path: &DavPath,
        node: &LockNode,
        status: StatusCode,
        new_lock: bool,
    ) -> DavResult<Response<Body>> {
        let root = path.with_decoded(&node.path);
        let mut w = MultistatusWriter::dav();
        w.write_xml_header()?;
        w.write_element("D:prop", ElementMode::Opening)?;
        w.write_element("D:lockdiscovery", ElementMode::Opening)?;
        write_activelock(&mut w, node, &root)?;
        w.write_element("D:lockdiscovery", ElementMode::Closing)?;
        w.write_element("D:prop", ElementMode::Closing)?;

        let mut res = Response::new(Body::from(w.flush()));
        let h = res.headers_mut();
        h.typed_insert(davheaders::ContentType("application/xml; charset=utf-8".to_string()));
        if new_lock {
            h.typed_insert(davheaders::LockToken::from_id(&node.id));
        }
        *res.status_mut() = status;
        Ok(res)
    }

    // LOCK on an unmapped url leaves a placeholder behind.
    async fn create_null_resource(&self, tx: &Transaction, path: &DavPath) -> DavResult<()> {
        self.store.create_resource(tx, path).await?;
        if let Err(e) = self.store.set_null_resource(tx, path, true).await {
            let _ = self.store.remove_object(tx, path).await;
            return Err(e.into());
        }
        Ok(())
    }

    pub(crate) async fn handle_lock(
        &self,
        tx: &Transaction,
        req: &Request<()>,
        xmldata: &[u8],
    ) -> DavResult<Response<Body>> {
        let path = self.path(req)?;
        let _guard = self.temp_lock(tx, &path, DavMethod::Lock, true)?;
        let timeout = self.requested_timeout(req);

        // lock refresh?
        if xmldata.is_empty() {
            for id in Self::if_tokens(req) {
                let Some(node) = self.locks.lock_by_id(&id, false) else {
                    continue;
                };
                if !covers(&node, &path) {
                    continue;
                }
                if let Some(node) = self.locks.refresh(&id, timeout) {
                    debug!("LOCK {}: refreshed {} for {}s", path, id, timeout);
                    return self.lock_response(&path, &node, StatusCode::OK, false);
                }
            }
            return Err(StatusCode::PRECONDITION_FAILED.into());
        }

        let lockinfo = Element::parse2(Cursor::new(xmldata))?;
        if !lockinfo.is_dav("lockinfo") {
            return Err(DavError::XmlParseError);
        }
        let exclusive = match lockinfo.dav_child("lockscope") {
            Some(s) if s.dav_child("exclusive").is_some() => true,
            Some(s) if s.dav_child("shared").is_some() => false,
            _ => return Err(DavError::XmlParseError),
        };
        if let Some(t) = lockinfo.dav_child("locktype") {
            if t.dav_child("write").is_none() {
                return Err(DavError::XmlParseError);
            }
        }
        let owner = lockinfo
            .dav_child("owner")
            .map(|o| o.text_content())
            .filter(|o| !o.is_empty())
            .or_else(|| self.principal.clone())
            .unwrap_or_else(|| tx.id().to_string());

        let depth = match req.headers().typed_get::<Depth>() {
            Some(Depth::Zero) => 0,
            Some(Depth::One) => return Err(StatusCode::BAD_REQUEST.into()),
            Some(Depth::Infinity) | None => DEPTH_INFINITY,
        };

        let obj = self.store.get_object(tx, &path).await?;

        if !self
            .locks
            .lock(path.as_str(), &owner, exclusive, depth, timeout, false)?
        {
            debug!("LOCK {}: refused for {}", path, owner);
            return Err(StatusCode::LOCKED.into());
        }
        let node = match self.locks.lock_by_path(path.as_str(), false) {
            Some(node) => node,
            None => return Err(StatusCode::INTERNAL_SERVER_ERROR.into()),
        };

        let status = match obj {
            Some(_) => StatusCode::OK,
            None => {
                if let Err(e) = self.create_null_resource(tx, &path).await {
                    self.locks.unlock(&node.id, &owner);
                    return Err(e);
                }
                StatusCode::CREATED
            }
        };
        self.lock_response(&path, &node, status, true)
    }

    pub(crate) async fn handle_unlock(&self, tx: &Transaction, req: &Request<()>) -> DavResult<Response<Body>> {
        let path = self.path(req)?;
        let _guard = self.temp_lock(tx, &path, DavMethod::Unlock, false)?;

        let id = match req.headers().typed_get::<davheaders::LockToken>() {
            Some(t) => match t.id() {
                Some(id) => id.to_string(),
                None => return Err(StatusCode::BAD_REQUEST.into()),
            },
            None => return Err(StatusCode::BAD_REQUEST.into()),
        };
        let node = match self.locks.lock_by_id(&id, false) {
            Some(node) if node.is_locked() => node,
            _ => {
                debug!("UNLOCK {}: unknown token {}", path, id);
                return Err(StatusCode::BAD_REQUEST.into());
            }
        };
        if !covers(&node, &path) {
            debug!("UNLOCK {}: {} is not covered by {}", path, node.path, id);
            return Err(StatusCode::BAD_REQUEST.into());
        }
        let root = path.with_decoded(&node.path);

        // an exclusive lock has one owner, a shared one loses them all.
        let owners = if node.exclusive {
            node.owners.iter().take(1).cloned().collect::<Vec<_>>()
        } else {
            node.owners.clone()
        };
        for owner in &owners {
            if !self.locks.unlock(&id, owner) {
                debug!("UNLOCK {}: {} does not hold {}", path, owner, id);
                return Err(StatusCode::BAD_REQUEST.into());
            }
        }

        // the placeholder of a LOCK goes with its last lock.
        let still_locked = self
            .locks
            .lock_by_path(&node.path, false)
            .is_some_and(|n| n.is_locked());
        if !still_locked {
            if let Some(obj) = self.store.get_object(tx, &root).await? {
                if obj.is_null_resource {
                    debug!("UNLOCK {}: removing lock-null resource", root);
                    self.store.remove_object(tx, &root).await?;
                }
            }
        }

        let mut res = Response::new(Body::empty());
        *res.status_mut() = StatusCode::NO_CONTENT;
        Ok(res)
    }
}
