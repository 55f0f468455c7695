//! Wire token conventions.
//!
//! Type names, synthetic-id markers, and persisted-reference tokens all
//! travel as plain strings. This module is the single place that knows
//! their shapes.

use crate::error::{WireError, WireResult};

/// Prefix distinguishing semantic type names from core type names.
pub const SEMANTIC_PREFIX: &str = "@";

/// Reserved criteria key holding the ordered list of order-by columns.
pub const KEY_ORDER: &str = "__order";

/// Reserved criteria key holding the result limit.
pub const KEY_LIMIT: &str = "__limit";

/// Reserved criteria key holding the result offset.
pub const KEY_OFFSET: &str = "__offset";

const NEW_PREFIX: &str = "NEW:";
const REF_PREFIX: &str = "REF:";

/// Formats the synthetic marker for an unpersisted entity, e.g. `"NEW:3"`.
pub fn new_marker(n: u64) -> String {
    format!("{NEW_PREFIX}{n}")
}

/// Parses a synthetic marker back into its counter value.
pub fn parse_new_marker(token: &str) -> WireResult<u64> {
    token
        .strip_prefix(NEW_PREFIX)
        .and_then(|rest| rest.parse().ok())
        .ok_or_else(|| WireError::malformed_token(token))
}

/// A parsed persisted-entity reference token.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RefToken {
    /// Wire name of the referenced type.
    pub type_name: String,
    /// Primary key of the referenced record.
    pub id: i64,
}

/// Formats a persisted reference, e.g. `"REF:Dataset:42"`.
pub fn ref_token(type_name: &str, id: i64) -> String {
    format!("{REF_PREFIX}{type_name}:{id}")
}

/// Parses a persisted-reference token.
pub fn parse_ref_token(token: &str) -> WireResult<RefToken> {
    let rest = token
        .strip_prefix(REF_PREFIX)
        .ok_or_else(|| WireError::malformed_token(token))?;
    // The type name may itself start with '@'; the id is everything
    // after the last colon.
    let (type_name, id_text) = rest
        .rsplit_once(':')
        .ok_or_else(|| WireError::malformed_token(token))?;
    if type_name.is_empty() {
        return Err(WireError::malformed_token(token));
    }
    let id = id_text
        .parse()
        .map_err(|_| WireError::malformed_token(token))?;
    Ok(RefToken {
        type_name: type_name.to_string(),
        id,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn new_marker_round_trip() {
        assert_eq!(new_marker(0), "NEW:0");
        assert_eq!(new_marker(17), "NEW:17");
        assert_eq!(parse_new_marker("NEW:17").unwrap(), 17);
    }

    #[test]
    fn new_marker_rejects_garbage() {
        assert!(parse_new_marker("NEW:").is_err());
        assert!(parse_new_marker("NEW:x").is_err());
        assert!(parse_new_marker("REF:Dataset:1").is_err());
        assert!(parse_new_marker("17").is_err());
    }

    #[test]
    fn ref_token_core_type() {
        assert_eq!(ref_token("Dataset", 42), "REF:Dataset:42");
        let parsed = parse_ref_token("REF:Dataset:42").unwrap();
        assert_eq!(parsed.type_name, "Dataset");
        assert_eq!(parsed.id, 42);
    }

    #[test]
    fn ref_token_semantic_type() {
        let parsed = parse_ref_token("REF:@Pixels:7").unwrap();
        assert_eq!(parsed.type_name, "@Pixels");
        assert_eq!(parsed.id, 7);
    }

    #[test]
    fn ref_token_rejects_garbage() {
        assert!(parse_ref_token("REF:Dataset").is_err());
        assert!(parse_ref_token("REF::42").is_err());
        assert!(parse_ref_token("REF:Dataset:notanid").is_err());
        assert!(parse_ref_token("NEW:3").is_err());
    }

    mod props {
        use super::super::*;
        use proptest::prelude::*;

        proptest! {
            #[test]
            fn new_marker_round_trips(n in any::<u64>()) {
                prop_assert_eq!(parse_new_marker(&new_marker(n)).unwrap(), n);
            }

            #[test]
            fn ref_token_round_trips(
                id in any::<i64>(),
                name in "@?[A-Za-z][A-Za-z0-9]{0,12}",
            ) {
                let parsed = parse_ref_token(&ref_token(&name, id)).unwrap();
                prop_assert_eq!(parsed.type_name, name);
                prop_assert_eq!(parsed.id, id);
            }
        }
    }
}
