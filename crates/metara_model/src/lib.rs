//! # Metara Model
//!
//! The client-side object model: entity nodes, type registries, and
//! query criteria.
//!
//! This crate provides:
//! - [`EntityNode`]: a lazily-materializing, possibly-partial backing
//!   for one server record, with absent-vs-null field semantics
//! - [`CoreType`] / [`EntityType`]: the static core-type table and the
//!   runtime-named semantic types outside it
//! - [`SemanticRegistry`] / [`TypeResolver`]: string-keyed semantic
//!   schema resolution with a cached generic fallback
//! - [`Instantiator`]: wire map/list to node conversion
//! - [`Criteria`] / [`FieldsSpec`]: filter/order/limit/offset and
//!   fields-wanted builders
//!
//! ## Key invariants
//!
//! - A raw field is parsed at most once; later reads return the cached
//!   instance
//! - A field outside the governing projection is absent, and reading it
//!   is an error, never a null
//! - Semantic-name resolution runs at most once per name per process
//! - A node never transitions back to the new state

#![deny(unsafe_code)]
#![warn(missing_docs)]

mod criteria;
mod error;
mod instantiate;
mod node;
mod registry;

pub use criteria::{Criteria, FieldsSpec, FilterExpr};
pub use error::{ModelError, ModelResult};
pub use instantiate::Instantiator;
pub use node::{EntityNode, FactoryOrigin, FieldValue, NodeHandle, Persistence};
pub use registry::{
    CoreType, EntitySchema, EntityType, FieldKind, SemanticBinding, SemanticRegistry, TypeResolver,
};
