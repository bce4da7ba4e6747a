use futures_util::future::{BoxFuture, FutureExt};
use http::{Request, Response, StatusCode};

use crate::body::Body;
use crate::davpath::DavPath;
use crate::errors::storeerror_to_status;
use crate::multistatus::ErrorList;
use crate::store::Transaction;
use crate::util::DavMethod;
use crate::DavResult;

impl crate::DavInner {
    // Remove everything below `path`, depth first, children before
    // their parent. Failures go into `errors`, the walk goes on.
    // Returns true if the folder is empty afterwards.
    pub(crate) fn delete_items<'a>(
        &'a self,
        tx: &'a Transaction,
        path: &'a DavPath,
        errors: &'a mut ErrorList,
    ) -> BoxFuture<'a, bool> {
        async move {
            let names = match self.store.get_children_names(tx, path).await {
                Ok(names) => names,
                Err(e) => {
                    errors.add(path, storeerror_to_status(&e));
                    return false;
                }
            };
            let mut ok = true;
            for name in names {
                let mut child = path.join(&name);
                let obj = match self.store.get_object(tx, &child).await {
                    Ok(Some(obj)) => obj,
                    Ok(None) => continue,
                    Err(e) => {
                        errors.add(&child, storeerror_to_status(&e));
                        ok = false;
                        continue;
                    }
                };
                if obj.is_folder {
                    child.add_slash();
                    if !self.delete_items(tx, &child, errors).await {
                        ok = false;
                        continue;
                    }
                }
                if let Err(e) = self.store.remove_object(tx, &child).await {
                    errors.add(&child, storeerror_to_status(&e));
                    ok = false;
                }
            }
            ok
        }
        .boxed()
    }

    pub(crate) async fn handle_delete(&self, tx: &Transaction, req: &Request<()>) -> DavResult<Response<Body>> {
        let mut path = self.path(req)?;
        if path.is_root() {
            return Err(StatusCode::FORBIDDEN.into());
        }
        let _guard = self.temp_lock(tx, &path, DavMethod::Delete, true)?;
        self.check_locks(req, &path, true)?;

        let obj = match self.store.get_object(tx, &path).await? {
            Some(obj) => obj,
            None => return Err(StatusCode::NOT_FOUND.into()),
        };

        if obj.is_folder {
            path.add_slash();
            let mut errors = ErrorList::new();
            if !self.delete_items(tx, &path, &mut errors).await {
                return errors.into_response();
            }
        }
        self.store.remove_object(tx, &path).await?;
        self.locks.delete(path.as_str());

        let mut res = Response::new(Body::empty());
        *res.status_mut() = StatusCode::NO_CONTENT;
        Ok(res)
    }
}
