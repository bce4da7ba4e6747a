use http::{Request, Response, StatusCode};

use crate::body::Body;
use crate::store::Transaction;
use crate::util::DavMethod;
use crate::DavResult;

impl crate::DavInner {
    pub(crate) async fn handle_mkcol(&self, tx: &Transaction, req: &Request<()>) -> DavResult<Response<Body>> {
        let path = self.path(req)?;
        let _guard = self.temp_lock(tx, &path, DavMethod::MkCol, true)?;
        self.check_locks(req, &path, false)?;

        let parent = self.store.get_object(tx, &path.parent()).await?;
        match parent {
            Some(ref p) if p.is_folder => {}
            _ => return Ok(self.not_allowed(parent.as_ref())),
        }

        match self.store.get_object(tx, &path).await? {
            None => {}
            Some(obj) if obj.is_null_resource => {
                // Replace the placeholder of a LOCK, but only for the lock holder.
                let tokens = Self::if_tokens(req);
                let node = self.locks.lock_by_path(path.as_str(), false);
                match node {
                    Some(ref n) if n.is_locked() && tokens.iter().any(|t| *t == n.id) => {}
                    _ => return Err(StatusCode::LOCKED.into()),
                }
                self.store.remove_object(tx, &path).await?;
                self.locks.delete(path.as_str());
            }
            Some(obj) => return Ok(self.not_allowed(Some(&obj))),
        }

        self.store.create_folder(tx, &path).await?;
        let mut res = Response::new(Body::empty());
        *res.status_mut() = StatusCode::CREATED;
        Ok(res)
    }
}
