use serde::Serialize;

use super::HttpRequest;
use crate::error::*;

/// Scope a privilege is checked against.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum PrivilegeHier {
    Global,
    Catalog,
    Database,
    Table,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum PrivilegeType {
    Select,
    Load,
    Alter,
    Admin,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize)]
pub struct Privilege {
    pub hier: PrivilegeHier,
    pub ptype: PrivilegeType,
}

impl Privilege {
    pub fn new(hier: PrivilegeHier, ptype: PrivilegeType) -> Self {
        Self { hier, ptype }
    }
}

///
/// Gate run before a handler sees the request. How callers are identified is up to the
/// implementation.
///
pub trait Authorizer: Send + Sync {
    fn authorize(&self, req: &HttpRequest, privilege: Privilege) -> Result<()>;
}

/// Lets every request through.
#[derive(Clone, Copy, Debug, Default)]
pub struct AllowAll;

impl Authorizer for AllowAll {
    fn authorize(&self, _req: &HttpRequest, _privilege: Privilege) -> Result<()> {
        Ok(())
    }
}
