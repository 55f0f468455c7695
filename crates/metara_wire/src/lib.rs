//! # Metara Wire
//!
//! The decoded wire-value domain shared by every Metara crate.
//!
//! The transport decodes every server payload into [`Value`]: one of
//! `{null, bool, number, string, list, map}`. This crate also owns the
//! wire token conventions:
//!
//! - core type names travel bare (`"Dataset"`),
//! - semantic type names are prefixed (`"@Pixels"`),
//! - unpersisted entities are marked `"NEW:<n>"`,
//! - persisted references are `"REF:<type>:<id>"`,
//! - criteria maps reserve the `__order`/`__limit`/`__offset` keys.
//!
//! The wire *encoding* (HTTP, XML-RPC, ...) is deliberately out of scope;
//! everything here is already decoded.

#![deny(unsafe_code)]
#![warn(missing_docs)]

mod error;
mod token;
mod value;

pub use error::{WireError, WireResult};
pub use token::{
    new_marker, parse_new_marker, parse_ref_token, ref_token, RefToken, KEY_LIMIT, KEY_OFFSET,
    KEY_ORDER, SEMANTIC_PREFIX,
};
pub use value::Value;
