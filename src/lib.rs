//! # contactlink - Identity Reconciliation
//!
//! contactlink links customer contact records that share an email address or
//! a phone number. Linked records form a cluster headed by its oldest
//! contact (the *primary*); every other member is a *secondary*. When a
//! request carries contact points from two clusters, the clusters are merged
//! under the older primary.
//!
//! ## Core Concepts
//!
//! - **Contact**: one stored record of an email and/or phone number
//! - **ContactStore**: storage contract, with in-memory and persistent backends
//! - **IdentityResolver**: matches a query, creates or merges contacts
//! - **ContactSummary**: deduplicated view of a cluster
//!
//! ## Usage
//!
//! ```rust
//! use std::sync::Arc;
//! use contactlink::{IdentifyQuery, IdentityResolver, InMemoryContactStore};
//!
//! let resolver = IdentityResolver::new(Arc::new(InMemoryContactStore::new()));
//! let query = IdentifyQuery::new(Some("doc@hillvalley.edu".into()), Some("123456".into()))?;
//! let response = resolver.identify(&query)?;
//! assert_eq!(response.contact.emails, vec!["doc@hillvalley.edu"]);
//! # Ok::<(), contactlink::ResolveError>(())
//! ```

#![warn(missing_docs)]
#![warn(clippy::all)]
#![warn(clippy::pedantic)]
#![allow(clippy::module_name_repetitions)]

pub mod contact;
pub mod error;
pub mod request;
pub mod resolver;
pub mod storage;
pub mod summary;

/// Server configuration (feature `server`).
#[cfg(feature = "server")]
pub mod config;

/// HTTP transport (feature `transport-http`).
#[cfg(feature = "transport-http")]
pub mod transport;

pub use contact::{Contact, ContactId, LinkPrecedence, NewContact};
pub use error::{ResolveError, ResolveResult, ValidationError};
pub use request::{IdentifyQuery, IdentifyRequest};
pub use resolver::IdentityResolver;
pub use storage::{ContactStore, InMemoryContactStore, StorageError};
pub use summary::{aggregate, ContactSummary, IdentifyResponse};
