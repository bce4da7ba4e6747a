use headers::HeaderMapExt;
use http::{Request, Response, StatusCode};

use crate::body::Body;
use crate::davheaders::{self, ETag};
use crate::davpath::DavPath;
use crate::multistatus::ErrorList;
use crate::store::{ContentStream, StoreError, Transaction};
use crate::util::DavMethod;
use crate::DavResult;

impl crate::DavInner {
    pub(crate) async fn handle_put(
        &self,
        tx: &Transaction,
        req: &Request<()>,
        body: ContentStream,
    ) -> DavResult<Response<Body>> {
        let path = self.path(req)?;
        if path.is_root() {
            return Err(StatusCode::METHOD_NOT_ALLOWED.into());
        }
        let _guard = self.temp_lock(tx, &path, DavMethod::Put, true)?;
        self.check_locks(req, &path, false)?;

        // the parent must be there, and be a folder.
        let parent = path.parent();
        match self.store.get_object(tx, &parent).await? {
            Some(p) if !p.is_folder => return Err(StatusCode::FORBIDDEN.into()),
            Some(_) => {}
            None if self.lazy_folder_creation => self.create_parents(tx, &parent).await?,
            None => {
                let mut errors = ErrorList::new();
                errors.add(&parent, StatusCode::NOT_FOUND);
                return errors.into_response();
            }
        }

        let status = match self.store.get_object(tx, &path).await? {
            Some(obj) if obj.is_folder => {
                return Ok(self.not_allowed(Some(&obj)));
            }
            Some(obj) if obj.is_null_resource => {
                // first PUT on a LOCKed unmapped url. The lock stays.
                self.store.set_null_resource(tx, &path, false).await?;
                StatusCode::NO_CONTENT
            }
            Some(_) => StatusCode::NO_CONTENT,
            None => {
                self.store.create_resource(tx, &path).await?;
                StatusCode::CREATED
            }
        };

        let content_type = req
            .headers()
            .typed_get::<davheaders::ContentType>()
            .map(|ct| ct.0);
        let written = self
            .store
            .set_resource_content(tx, &path, body, content_type.as_deref(), None)
            .await?;
        debug!("PUT {}: {} bytes", path, written);

        let mut res = Response::new(Body::empty());
        if let Some(obj) = self.store.get_object(tx, &path).await? {
            res.headers_mut().typed_insert(ETag::from_object(&obj));
        }
        *res.status_mut() = status;
        Ok(res)
    }

    // mkdir -p
    pub(crate) async fn create_parents(&self, tx: &Transaction, folder: &DavPath) -> DavResult<()> {
        let mut cur = DavPath::from_str_and_prefix("/", "")?;
        for seg in folder.segments() {
            cur = cur.join(seg);
            match self.store.get_object(tx, &cur).await? {
                Some(obj) if obj.is_folder => {}
                Some(_) => return Err(StoreError::Forbidden.into()),
                None => {
                    debug!("creating missing folder {}", cur);
                    self.store.create_folder(tx, &cur).await?;
                }
            }
        }
        Ok(())
    }
}
