//! Admin HTTP surface: request/response types, routing, authorization and the
//! compaction actions.

use http::{Method, StatusCode};
use serde::Serialize;
use std::{collections::HashMap, sync::Arc};

use crate::{engine::StorageEngine, error::*, exec_env::ExecEnv};

pub mod action;
mod auth;
mod router;
mod server;

pub use action::{CompactionAction, CompactionActionType};
pub use auth::{AllowAll, Authorizer, Privilege, PrivilegeHier, PrivilegeType};
pub use router::Router;
pub use server::{AdminServer, ServerConfig, ServerHandle};

#[derive(Clone, Debug)]
pub struct HttpRequest {
    method: Method,
    path: String,
    params: HashMap<String, String>,
    headers: HashMap<String, String>,
}

impl HttpRequest {
    /// `target` is the request target as it appears on the request line, query included.
    pub fn new(method: Method, target: &str) -> Self {
        let (path, query) = target.split_once('?').unwrap_or((target, ""));
        let mut req = Self {
            method,
            path: path.to_string(),
            params: HashMap::new(),
            headers: HashMap::new(),
        };
        req.add_query(query);
        req
    }

    pub fn with_header(mut self, name: &str, value: impl Into<String>) -> Self {
        self.headers.insert(name.to_ascii_lowercase(), value.into());
        self
    }

    pub fn method(&self) -> &Method {
        &self.method
    }

    pub fn path(&self) -> &str {
        &self.path
    }

    pub fn param(&self, key: &str) -> Option<&str> {
        self.params.get(key).map(String::as_str)
    }

    pub fn header(&self, name: &str) -> Option<&str> {
        self.headers
            .get(&name.to_ascii_lowercase())
            .map(String::as_str)
    }

    /// `a=1&b=2&flag`; later keys win, a key without `=` has an empty value.
    /// Keys and values are percent-decoded and `+` reads as a space.
    pub(crate) fn add_query(&mut self, query: &str) {
        for pair in query.split('&').filter(|p| !p.is_empty()) {
            let (key, value) = pair.split_once('=').unwrap_or((pair, ""));
            self.params
                .insert(decode_component(key), decode_component(value));
        }
    }
}

fn decode_component(raw: &str) -> String {
    let raw = raw.replace('+', " ");
    String::from_utf8_lossy(&urlencoding::decode_binary(raw.as_bytes())).into_owned()
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct HttpResponse {
    pub status: StatusCode,
    pub body: String,
}

#[derive(Serialize)]
struct ErrorBody<'a> {
    status: &'a str,
    kind: ErrorKind,
    msg: String,
}

impl HttpResponse {
    pub fn ok(body: String) -> Self {
        Self {
            status: StatusCode::OK,
            body,
        }
    }

    pub fn from_error(err: &Error) -> Self {
        let kind = err.kind();
        let body = ErrorBody {
            status: "Fail",
            kind,
            msg: err.message(),
        };
        Self {
            status: kind.status_code(),
            body: serde_json::to_string(&body)
                .unwrap_or_else(|_| String::from(r#"{"status":"Fail"}"#)),
        }
    }
}

impl From<Result<String>> for HttpResponse {
    fn from(result: Result<String>) -> Self {
        match result {
            Ok(body) => HttpResponse::ok(body),
            Err(e) => HttpResponse::from_error(&e),
        }
    }
}

pub trait HttpHandler: Send + Sync {
    fn handle(&self, req: &HttpRequest) -> HttpResponse;

    /// Privilege the caller needs; `None` means unauthenticated access is fine.
    fn privilege(&self) -> Option<Privilege> {
        None
    }
}

/// Router with the three compaction endpoints registered.
pub fn compaction_router(
    exec_env: Arc<ExecEnv>,
    engine: Arc<StorageEngine>,
    authorizer: Arc<dyn Authorizer>,
) -> Router {
    let privilege = Privilege::new(PrivilegeHier::Global, PrivilegeType::Admin);
    let mut router = Router::new(authorizer);
    for (method, path, kind) in [
        (Method::GET, "/api/compaction/show", CompactionActionType::ShowInfo),
        (Method::POST, "/api/compaction/run", CompactionActionType::RunCompaction),
        (
            Method::GET,
            "/api/compaction/run_status",
            CompactionActionType::RunCompactionStatus,
        ),
    ] {
        let action = CompactionAction::new(
            kind,
            Arc::clone(&exec_env),
            Arc::clone(&engine),
            privilege,
        );
        router.register(method, path, Arc::new(action));
    }
    router
}
