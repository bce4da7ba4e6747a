use futures_util::future::{BoxFuture, FutureExt};
use headers::HeaderMapExt;
use http::{Request, Response, StatusCode};

use crate::body::Body;
use crate::davheaders::{self, Depth};
use crate::davpath::DavPath;
use crate::errors::storeerror_to_status;
use crate::multistatus::ErrorList;
use crate::store::{StoredObject, Transaction};
use crate::util::DavMethod;
use crate::DavResult;

impl crate::DavInner {
    // Copy one resource, content and content type.
    async fn copy_resource(
        &self,
        tx: &Transaction,
        source: &DavPath,
        obj: &StoredObject,
        dest: &DavPath,
    ) -> DavResult<()> {
        self.store.create_resource(tx, dest).await?;
        let content = self.store.get_resource_content(tx, source).await?;
        self.store
            .set_resource_content(tx, dest, content, obj.mime_type.as_deref(), None)
            .await?;
        Ok(())
    }

    // Copy `source` to `dest`. Failures of the top entry are returned,
    // failures below it end up in `errors`.
    fn copy_items<'a>(
        &'a self,
        tx: &'a Transaction,
        source: &'a DavPath,
        obj: &'a StoredObject,
        dest: &'a DavPath,
        deep: bool,
        errors: &'a mut ErrorList,
    ) -> BoxFuture<'a, DavResult<()>> {
        async move {
            if obj.is_resource() {
                return self.copy_resource(tx, source, obj, dest).await;
            }
            self.store.create_folder(tx, dest).await?;
            if !deep {
                return Ok(());
            }
            for name in self.store.get_children_names(tx, source).await? {
                let s = source.join(&name);
                let mut d = dest.join(&name);
                let child = match self.store.get_object(tx, &s).await {
                    Ok(Some(child)) if !child.is_null_resource => child,
                    Ok(_) => continue,
                    Err(e) => {
                        errors.add(&s, storeerror_to_status(&e));
                        continue;
                    }
                };
                if child.is_folder {
                    d.add_slash();
                }
                if let Err(e) = self.copy_items(tx, &s, &child, &d, true, errors).await {
                    errors.add(&d, e.statuscode());
                }
            }
            Ok(())
        }
        .boxed()
    }

    pub(crate) async fn handle_copymove(
        &self,
        tx: &Transaction,
        req: &Request<()>,
        method: DavMethod,
    ) -> DavResult<Response<Body>> {
        let mut path = self.path(req)?;

        // get and check the destination.
        let mut dest = match req.headers().typed_get::<davheaders::Destination>() {
            Some(d) => DavPath::from_str_and_prefix(&d.0, &self.prefix)?,
            None => return Err(StatusCode::BAD_REQUEST.into()),
        };
        if path == dest || path.is_root() {
            return Err(StatusCode::FORBIDDEN.into());
        }
        // a folder cannot go inside itself, or replace one of its parents.
        if path.is_ancestor_of(&dest) || dest.is_ancestor_of(&path) {
            debug!("{:?}: {} is below {}", method, dest, path);
            return Err(StatusCode::FORBIDDEN.into());
        }

        // Overwrite: T is the default.
        let overwrite = req
            .headers()
            .typed_get::<davheaders::Overwrite>()
            .is_none_or(|o| o.0);
        // MOVE is always deep, COPY is deep unless Depth: 0.
        let deep = match req.headers().typed_get::<Depth>() {
            Some(Depth::Zero) => method == DavMethod::Move,
            Some(Depth::One) if method == DavMethod::Copy => return Err(StatusCode::BAD_REQUEST.into()),
            _ => true,
        };

        let _src_guard = self.temp_lock(tx, &path, method, method == DavMethod::Move)?;
        let _dst_guard = self.temp_lock(tx, &dest, method, true)?;
        if method == DavMethod::Move {
            self.check_locks(req, &path, true)?;
        }
        self.check_locks(req, &dest, true)?;

        let obj = match self.store.get_object(tx, &path).await? {
            Some(obj) if !obj.is_null_resource => obj,
            _ => return Err(StatusCode::NOT_FOUND.into()),
        };
        if obj.is_folder {
            path.add_slash();
        }

        let mut errors = ErrorList::new();

        // an existing destination is removed first.
        let existed = match self.store.get_object(tx, &dest).await? {
            Some(_) if !overwrite => {
                debug!("{:?}: {} exists, no overwrite", method, dest);
                return Err(StatusCode::PRECONDITION_FAILED.into());
            }
            Some(d) => {
                if d.is_folder {
                    dest.add_slash();
                    if !self.delete_items(tx, &dest, &mut errors).await {
                        return errors.into_response();
                    }
                }
                self.store.remove_object(tx, &dest).await?;
                true
            }
            None => false,
        };
        if obj.is_folder {
            dest.add_slash();
        }

        self.copy_items(tx, &path, &obj, &dest, deep, &mut errors).await?;
        if !errors.is_empty() {
            return errors.into_response();
        }

        if method == DavMethod::Move {
            if obj.is_folder && !self.delete_items(tx, &path, &mut errors).await {
                return errors.into_response();
            }
            if let Err(e) = self.store.remove_object(tx, &path).await {
                errors.add(&path, storeerror_to_status(&e));
                return errors.into_response();
            }
            self.locks.delete(path.as_str());
        }

        let mut res = Response::new(Body::empty());
        *res.status_mut() = if existed {
            StatusCode::NO_CONTENT
        } else {
            StatusCode::CREATED
        };
        Ok(res)
    }
}
