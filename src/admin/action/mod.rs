use super::HttpRequest;
use crate::{
    engine::{compaction::CompactionType, TabletId},
    error::*,
};

mod compaction;
pub use compaction::{CompactionAction, CompactionActionType};

pub const PARAM_COMPACTION_TYPE: &str = "compact_type";
pub const PARAM_COMPACTION_BASE: &str = "base";
pub const PARAM_COMPACTION_CUMULATIVE: &str = "cumulative";
pub const PARAM_COMPACTION_FULL: &str = "full";
pub const PARAM_COMPACTION_REMOTE: &str = "remote";
pub const PARAM_TABLET_ID: &str = "tablet_id";
pub const PARAM_TABLE_ID: &str = "table_id";

/// Boolean-ish parameter value. A bare flag (`?remote`) counts as set.
fn parse_bool(name: &str, value: &str) -> Result<bool> {
    match value.trim().to_ascii_lowercase().as_str() {
        "" | "true" | "1" | "yes" | "on" => Ok(true),
        "false" | "0" | "no" | "off" => Ok(false),
        other => Err(Error::InvalidArgument(format!(
            "parameter {} expects a boolean, got '{}'",
            name, other
        ))),
    }
}

///
/// `compact_type` wins when given. Otherwise exactly one of the `base`, `cumulative`,
/// `full` flags has to be set.
///
pub(crate) fn parse_compaction_type(req: &HttpRequest) -> Result<CompactionType> {
    if let Some(value) = req.param(PARAM_COMPACTION_TYPE) {
        return value.parse();
    }
    let mut selected = Vec::new();
    for (name, kind) in [
        (PARAM_COMPACTION_BASE, CompactionType::Base),
        (PARAM_COMPACTION_CUMULATIVE, CompactionType::Cumulative),
        (PARAM_COMPACTION_FULL, CompactionType::Full),
    ] {
        if let Some(value) = req.param(name) {
            if parse_bool(name, value)? {
                selected.push(kind);
            }
        }
    }
    match selected.as_slice() {
        [kind] => Ok(*kind),
        [] => Err(Error::InvalidArgument(format!(
            "missing {}, expected one of base, cumulative, full",
            PARAM_COMPACTION_TYPE
        ))),
        several => Err(Error::InvalidArgument(format!(
            "only one compaction type may be selected, got {:?}",
            several
        ))),
    }
}

pub(crate) fn parse_remote(req: &HttpRequest) -> Result<bool> {
    req.param(PARAM_COMPACTION_REMOTE)
        .map(|value| parse_bool(PARAM_COMPACTION_REMOTE, value))
        .transpose()
        .map(|remote| remote.unwrap_or(false))
}

fn parse_id(req: &HttpRequest, name: &str) -> Result<Option<i64>> {
    match req.param(name).map(str::trim) {
        None | Some("") => Ok(None),
        Some(value) => value.parse::<i64>().map(Some).map_err(|_| {
            Error::InvalidArgument(format!(
                "parameter {} expects an integer, got '{}'",
                name, value
            ))
        }),
    }
}

pub(crate) fn parse_tablet_id(req: &HttpRequest) -> Result<Option<TabletId>> {
    Ok(parse_id(req, PARAM_TABLET_ID)?.map(TabletId))
}

pub(crate) fn parse_table_id(req: &HttpRequest) -> Result<Option<i64>> {
    parse_id(req, PARAM_TABLE_ID)
}

#[cfg(test)]
mod test {
    use super::*;
    use http::Method;

    fn req(target: &str) -> HttpRequest {
        HttpRequest::new(Method::POST, target)
    }

    #[test]
    fn compact_type_takes_precedence() {
        let kind = parse_compaction_type(&req("/run?compact_type=full&base")).unwrap();
        assert_eq!(kind, CompactionType::Full);
    }

    #[test]
    fn presence_flags_select_type() {
        assert_eq!(
            parse_compaction_type(&req("/run?cumulative")).unwrap(),
            CompactionType::Cumulative
        );
        assert_eq!(
            parse_compaction_type(&req("/run?cumulative=false&base=true")).unwrap(),
            CompactionType::Base
        );
        assert!(matches!(
            parse_compaction_type(&req("/run?base&full")),
            Err(Error::InvalidArgument(_))
        ));
        assert!(matches!(
            parse_compaction_type(&req("/run")),
            Err(Error::InvalidArgument(_))
        ));
        assert!(matches!(
            parse_compaction_type(&req("/run?compact_type=major")),
            Err(Error::InvalidArgument(_))
        ));
    }

    #[test]
    fn remote_defaults_to_local() {
        assert!(!parse_remote(&req("/run")).unwrap());
        assert!(parse_remote(&req("/run?remote")).unwrap());
        assert!(parse_remote(&req("/run?remote=TRUE")).unwrap());
        assert!(!parse_remote(&req("/run?remote=0")).unwrap());
        assert!(matches!(
            parse_remote(&req("/run?remote=maybe")),
            Err(Error::InvalidArgument(_))
        ));
    }

    #[test]
    fn ids_must_be_integers() {
        assert_eq!(parse_tablet_id(&req("/run?tablet_id=42")).unwrap(), Some(TabletId(42)));
        assert_eq!(parse_tablet_id(&req("/run?tablet_id=")).unwrap(), None);
        assert_eq!(parse_table_id(&req("/run")).unwrap(), None);
        assert!(matches!(
            parse_tablet_id(&req("/run?tablet_id=abc")),
            Err(Error::InvalidArgument(_))
        ));
    }
}
