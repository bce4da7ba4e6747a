use headers::HeaderMapExt;
use http::{Request, Response, StatusCode};

use crate::body::Body;
use crate::davheaders;
use crate::store::Transaction;
use crate::util::DavMethod;
use crate::DavResult;

impl crate::DavInner {
    pub(crate) async fn handle_options(&self, tx: &Transaction, req: &Request<()>) -> DavResult<Response<Body>> {
        let path = self.path(req)?;
        let _guard = self.temp_lock(tx, &path, DavMethod::Options, false)?;

        let obj = self.store.get_object(tx, &path).await?;

        let mut res = Response::new(Body::empty());
        let h = res.headers_mut();
        h.typed_insert(davheaders::Dav("1, 2".to_string()));
        h.typed_insert(davheaders::MsAuthorVia("DAV".to_string()));
        h.insert("allow", self.allow_header(obj.as_ref()));
        h.typed_insert(headers::ContentLength(0));
        *res.status_mut() = StatusCode::OK;
        Ok(res)
    }

    // Fallback for methods we do not know.
    pub(crate) fn handle_not_implemented(&self, req: &Request<()>) -> DavResult<Response<Body>> {
        if self.read_only {
            debug!("read-only: refusing unknown method {}", req.method());
            return Err(StatusCode::FORBIDDEN.into());
        }
        Err(StatusCode::NOT_IMPLEMENTED.into())
    }
}
