//! # Metara Client
//!
//! Remote data-access orchestration: the [`DataFactory`] builds requests
//! from criteria, dispatches them through a [`RemoteCaller`], and hands
//! responses to the instantiator, which returns lazily-materializing
//! entity nodes. Update flows serialize nodes back into wire maps
//! through a reference-resolution pass before anything is sent.
//!
//! ## Architecture
//!
//! - [`RemoteCaller`] is the external boundary: a blocking transport
//!   that delivers already-decoded values. Its encoding is out of scope.
//! - [`DataFactory`] owns an instantiator and a per-factory origin tag;
//!   only nodes it produced may be passed back to its update operations.
//! - [`SyntheticIds`] assigns `NEW:<n>` markers to unpersisted nodes for
//!   the duration of one update call, so cross-references among new
//!   nodes serialize consistently and reconcile after the server
//!   responds with real ids.
//!
//! ## Key invariants
//!
//! - Every operation is one synchronous round trip; no retry, no cache
//! - Serialization failures abort before anything is sent
//! - A batch response must cover every new node's synthetic id
//! - Has-many relationships are never mutated through this layer

#![deny(unsafe_code)]
#![warn(missing_docs)]

mod caller;
mod error;
mod factory;
mod serialize;

pub use caller::{procs, MockCaller, RecordedCall, RemoteCaller};
pub use error::{ClientError, ClientResult};
pub use factory::DataFactory;
pub use serialize::SyntheticIds;
