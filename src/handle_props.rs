use std::io::Cursor;

use futures_util::future::{BoxFuture, FutureExt};
use headers::HeaderMapExt;
use http::{Request, Response, StatusCode};
use xmltree::Element;

use crate::body::Body;
use crate::davheaders::Depth;
use crate::davpath::DavPath;
use crate::errors::DavError;
use crate::handle_gethead::content_type;
use crate::handle_lock::write_activelock;
use crate::multistatus::{ElementMode, ErrorList, MultistatusWriter, multistatus};
use crate::store::{StoredObject, Transaction};
use crate::util::{DavMethod, object_etag, status_line, systemtime_to_httpdate, systemtime_to_rfc3339};
use crate::xmltree_ext::ElementExt;
use crate::DavResult;

impl crate::DavInner {
    pub(crate) async fn handle_propfind(
        &self,
        tx: &Transaction,
        req: &Request<()>,
        xmldata: &[u8],
    ) -> DavResult<Response<Body>> {
        let mut path = self.path(req)?;
        let _guard = self.temp_lock(tx, &path, DavMethod::PropFind, false)?;

        // No body means allprop. A body is checked, but whatever it asks
        // for, all properties are returned.
        if !xmldata.is_empty() {
            let root = Element::parse2(Cursor::new(xmldata))?;
            if !root.is_dav("propfind") {
                return Err(DavError::XmlParseError);
            }
        }

        let depth = req.headers().typed_get::<Depth>().unwrap_or(Depth::Infinity);

        let obj = match self.store.get_object(tx, &path).await? {
            Some(obj) => obj,
            None => return Err(StatusCode::NOT_FOUND.into()),
        };
        if obj.is_folder {
            path.add_slash();
        }

        let mut w = MultistatusWriter::dav();
        w.write_xml_header()?;
        w.write_element("D:multistatus", ElementMode::Opening)?;
        self.propfind_entry(&mut w, &path, &obj)?;
        if obj.is_folder && depth != Depth::Zero {
            self.propfind_children(tx, &mut w, &path, depth == Depth::Infinity)
                .await?;
        }
        w.write_element("D:multistatus", ElementMode::Closing)?;

        Ok(multistatus(w.flush()))
    }

    // One <D:response> per child, in store order, recursing if `deep`.
    fn propfind_children<'a>(
        &'a self,
        tx: &'a Transaction,
        w: &'a mut MultistatusWriter,
        path: &'a DavPath,
        deep: bool,
    ) -> BoxFuture<'a, DavResult<()>> {
        async move {
            for name in self.store.get_children_names(tx, path).await? {
                let mut child = path.join(&name);
                let obj = match self.store.get_object(tx, &child).await? {
                    Some(obj) => obj,
                    None => continue,
                };
                if obj.is_folder {
                    child.add_slash();
                }
                self.propfind_entry(w, &child, &obj)?;
                if obj.is_folder && deep {
                    self.propfind_children(tx, w, &child, deep).await?;
                }
            }
            Ok(())
        }
        .boxed()
    }

    fn propfind_entry(&self, w: &mut MultistatusWriter, path: &DavPath, obj: &StoredObject) -> DavResult<()> {
        w.write_element("D:response", ElementMode::Opening)?;
        w.write_property("D:href", Some(&path.as_url_string_with_prefix()))?;
        w.write_element("D:propstat", ElementMode::Opening)?;
        w.write_element("D:prop", ElementMode::Opening)?;

        w.write_property("D:creationdate", Some(&systemtime_to_rfc3339(obj.creation_date)))?;
        w.write_element("D:displayname", ElementMode::Opening)?;
        w.write_data(path.file_name())?;
        w.write_element("D:displayname", ElementMode::Closing)?;
        w.write_property("D:getlastmodified", Some(&systemtime_to_httpdate(obj.last_modified)))?;

        if obj.is_folder {
            w.write_element("D:resourcetype", ElementMode::Opening)?;
            w.write_element("D:collection", ElementMode::NoContent)?;
            w.write_element("D:resourcetype", ElementMode::Closing)?;
        } else {
            w.write_property("D:resourcetype", None)?;
            w.write_property("D:getcontentlength", Some(&obj.resource_length.to_string()))?;
            w.write_property("D:getcontenttype", Some(&content_type(path, obj)))?;
            w.write_property("D:getetag", Some(&object_etag(obj)))?;
        }

        w.write_element("D:supportedlock", ElementMode::Opening)?;
        for scope in ["D:exclusive", "D:shared"] {
            w.write_element("D:lockentry", ElementMode::Opening)?;
            w.write_element("D:lockscope", ElementMode::Opening)?;
            w.write_element(scope, ElementMode::NoContent)?;
            w.write_element("D:lockscope", ElementMode::Closing)?;
            w.write_element("D:locktype", ElementMode::Opening)?;
            w.write_element("D:write", ElementMode::NoContent)?;
            w.write_element("D:locktype", ElementMode::Closing)?;
            w.write_element("D:lockentry", ElementMode::Closing)?;
        }
        w.write_element("D:supportedlock", ElementMode::Closing)?;

        let locks = self.locks.discover(path.as_str());
        if !locks.is_empty() {
            w.write_element("D:lockdiscovery", ElementMode::Opening)?;
            for node in &locks {
                write_activelock(w, node, &path.with_decoded(&node.path))?;
            }
            w.write_element("D:lockdiscovery", ElementMode::Closing)?;
        }

        w.write_element("D:prop", ElementMode::Closing)?;
        w.write_property("D:status", Some(&status_line(StatusCode::OK)))?;
        w.write_element("D:propstat", ElementMode::Closing)?;
        w.write_element("D:response", ElementMode::Closing)
    }

    // Nothing is stored. The request is checked, and every property
    // named in it is reported as set.
    pub(crate) async fn handle_proppatch(
        &self,
        tx: &Transaction,
        req: &Request<()>,
        xmldata: &[u8],
    ) -> DavResult<Response<Body>> {
        let mut path = self.path(req)?;
        let _guard = self.temp_lock(tx, &path, DavMethod::PropPatch, false)?;
        self.check_locks(req, &path.parent(), false)?;

        let obj = match self.store.get_object(tx, &path).await? {
            Some(obj) => obj,
            None => return Err(StatusCode::NOT_FOUND.into()),
        };
        if obj.is_null_resource {
            return Ok(self.not_allowed(Some(&obj)));
        }
        if obj.is_folder {
            path.add_slash();
        }
        if self.check_locks(req, &path, false).is_err() {
            let mut errors = ErrorList::new();
            errors.add(&path, StatusCode::LOCKED);
            return errors.into_response();
        }

        if xmldata.is_empty() {
            return Err(StatusCode::INTERNAL_SERVER_ERROR.into());
        }
        let root = match Element::parse2(Cursor::new(xmldata)) {
            Ok(root) if root.is_dav("propertyupdate") => root,
            _ => return Err(StatusCode::INTERNAL_SERVER_ERROR.into()),
        };

        // <D:set><D:prop>..</D:prop></D:set> and <D:remove>, in order.
        let mut props = Vec::new();
        for op in root.child_elements() {
            if !op.is_dav("set") && !op.is_dav("remove") {
                continue;
            }
            for prop in op.child_elements().filter(|e| e.is_dav("prop")) {
                props.extend(prop.child_elements());
            }
        }

        let mut w = MultistatusWriter::dav();
        w.write_xml_header()?;
        w.write_element("D:multistatus", ElementMode::Opening)?;
        w.write_element("D:response", ElementMode::Opening)?;
        w.write_property("D:href", Some(&path.as_url_string_with_prefix()))?;
        for prop in props {
            w.write_element("D:propstat", ElementMode::Opening)?;
            w.write_element("D:prop", ElementMode::Opening)?;
            let ns = prop.namespace.as_deref().unwrap_or("");
            w.write_element_ns(ns, &prop.name, ElementMode::NoContent)?;
            w.write_element("D:prop", ElementMode::Closing)?;
            w.write_property("D:status", Some(&status_line(StatusCode::OK)))?;
            w.write_element("D:propstat", ElementMode::Closing)?;
        }
        w.write_element("D:response", ElementMode::Closing)?;
        w.write_element("D:multistatus", ElementMode::Closing)?;

        Ok(multistatus(w.flush()))
    }
}
