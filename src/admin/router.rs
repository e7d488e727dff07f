use http::{Method, StatusCode};
use std::{collections::HashMap, sync::Arc};

use super::{Authorizer, HttpHandler, HttpRequest, HttpResponse};
use crate::error::*;

pub struct Router {
    routes: HashMap<String, HashMap<Method, Arc<dyn HttpHandler>>>,
    authorizer: Arc<dyn Authorizer>,
}

impl Router {
    pub fn new(authorizer: Arc<dyn Authorizer>) -> Self {
        Self {
            routes: HashMap::new(),
            authorizer,
        }
    }

    pub fn register(&mut self, method: Method, path: &str, handler: Arc<dyn HttpHandler>) {
        log::info!("Registered {} {}", method, path);
        self.routes
            .entry(path.to_string())
            .or_default()
            .insert(method, handler);
    }

    pub fn dispatch(&self, req: &HttpRequest) -> HttpResponse {
        let Some(by_method) = self.routes.get(req.path()) else {
            return HttpResponse::from_error(&Error::NotFound(format!(
                "no handler for {}",
                req.path()
            )));
        };
        let Some(handler) = by_method.get(req.method()) else {
            return HttpResponse {
                status: StatusCode::METHOD_NOT_ALLOWED,
                body: format!(
                    r#"{{"status":"Fail","msg":"method {} not allowed"}}"#,
                    req.method()
                ),
            };
        };
        if let Some(privilege) = handler.privilege() {
            if let Err(e) = self.authorizer.authorize(req, privilege) {
                log::warn!("Rejected {} {}: {}", req.method(), req.path(), e);
                return HttpResponse::from_error(&e);
            }
        }
        handler.handle(req)
    }
}
