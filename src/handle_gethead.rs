use headers::HeaderMapExt;
use http::header::HeaderValue;
use http::{Request, Response, StatusCode};

use crate::body::Body;
use crate::davheaders::{self, ETag};
use crate::davpath::DavPath;
use crate::store::{StoredObject, Transaction};
use crate::util::{DavMethod, systemtime_to_httpdate};
use crate::DavResult;

/// Content type of a resource: what the store recorded, else a guess
/// from the extension. Names without an extension are served as html.
pub(crate) fn content_type(path: &DavPath, obj: &StoredObject) -> String {
    if let Some(ref mt) = obj.mime_type {
        return mt.clone();
    }
    match path.extension() {
        None => "text/html".to_string(),
        Some(ext) => mime_guess::from_ext(ext)
            .first()
            .map(|m| m.to_string())
            .unwrap_or_else(|| "application/octet-stream".to_string()),
    }
}

impl crate::DavInner {
    pub(crate) async fn handle_get(
        &self,
        tx: &Transaction,
        req: &Request<()>,
        method: DavMethod,
    ) -> DavResult<Response<Body>> {
        let head = method == DavMethod::Head;
        let mut path = self.path(req)?;
        let _guard = self.temp_lock(tx, &path, method, false)?;

        let mut status = StatusCode::OK;
        let obj = match self.store.get_object(tx, &path).await? {
            Some(obj) => obj,
            None => {
                let Some(ref fallback) = self.instead_of_404 else {
                    return Err(StatusCode::NOT_FOUND.into());
                };
                let fb = DavPath::from_str_and_prefix(fallback, "")?;
                match self.store.get_object(tx, &fb).await? {
                    Some(obj) if obj.is_resource() && !obj.is_null_resource => {
                        debug!("{:?} {}: serving {} instead", method, path, fb);
                        path = fb;
                        status = StatusCode::NOT_FOUND;
                        obj
                    }
                    _ => return Err(StatusCode::NOT_FOUND.into()),
                }
            }
        };

        if obj.is_null_resource {
            return Ok(self.not_allowed(Some(&obj)));
        }
        if obj.is_folder {
            return self.handle_get_folder(tx, req, path, head).await;
        }
        // "/file.txt/" does not exist.
        if path.is_collection() {
            return Err(StatusCode::NOT_FOUND.into());
        }

        let mut res = Response::new(Body::empty());
        let etag = ETag::from_object(&obj);
        if let Some(inm) = req.headers().typed_get::<davheaders::IfNoneMatch>() {
            if inm.matches(&etag) {
                res.headers_mut().typed_insert(etag);
                *res.status_mut() = StatusCode::NOT_MODIFIED;
                return Ok(res);
            }
        }

        let h = res.headers_mut();
        h.typed_insert(etag);
        if let Ok(v) = HeaderValue::from_str(&systemtime_to_httpdate(obj.last_modified)) {
            h.insert("last-modified", v);
        }
        h.typed_insert(davheaders::ContentType(content_type(&path, &obj)));
        if obj.resource_length > 0 && self.send_content_length(req) {
            h.typed_insert(headers::ContentLength(obj.resource_length));
        }
        *res.status_mut() = status;

        if !head {
            let content = self.store.get_resource_content(tx, &path).await?;
            *res.body_mut() = Body::from(content);
        }
        Ok(res)
    }

    // some clients choke on Content-Length.
    fn send_content_length(&self, req: &Request<()>) -> bool {
        if !self.content_length {
            return false;
        }
        let agent = req
            .headers()
            .get("user-agent")
            .and_then(|s| s.to_str().ok())
            .unwrap_or("");
        !self
            .no_content_length_agents
            .iter()
            .any(|a| agent.contains(a.as_str()))
    }

    // Redirect to the index file, or list the folder.
    async fn handle_get_folder(
        &self,
        tx: &Transaction,
        req: &Request<()>,
        mut path: DavPath,
        head: bool,
    ) -> DavResult<Response<Body>> {
        path.add_slash();
        let mut res = Response::new(Body::empty());

        if let Some(ref index) = self.index_file {
            let location = format!("{}{}", path.as_url_string_with_prefix(), index);
            debug!("{} redirects to {}", req.uri(), location);
            if let Ok(v) = HeaderValue::from_str(&location) {
                res.headers_mut().insert("location", v);
            }
            *res.status_mut() = StatusCode::FOUND;
            return Ok(res);
        }

        res.headers_mut()
            .typed_insert(davheaders::ContentType("text/html; charset=utf-8".to_string()));
        *res.status_mut() = StatusCode::OK;
        if head {
            return Ok(res);
        }

        let upath = htmlescape::encode_minimal(&path.as_url_string_with_prefix());
        let mut w = String::new();
        w.push_str("<html><head>");
        w.push_str(&format!("<title>Index of {}</title>", upath));
        w.push_str("</head><body>");
        w.push_str(&format!("<h1>Index of {}</h1><ul>", upath));
        if !path.is_root() {
            w.push_str("<li><a href=\"..\">..</a></li>");
        }
        for name in self.store.get_children_names(tx, &path).await? {
            let mut child = path.join(&name);
            let is_folder = matches!(
                self.store.get_object(tx, &child).await,
                Ok(Some(ref o)) if o.is_folder
            );
            if is_folder {
                child.add_slash();
            }
            let mut label = htmlescape::encode_minimal(&name);
            if is_folder {
                label.push('/');
            }
            w.push_str(&format!(
                "<li><a href=\"{}\">{}</a></li>",
                htmlescape::encode_attribute(&child.as_url_string_with_prefix()),
                label
            ));
        }
        w.push_str("</ul></body></html>\n");
        *res.body_mut() = Body::from(w);
        Ok(res)
    }
}
