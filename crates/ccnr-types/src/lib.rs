//! Foundation types for the content-centric repository (CCNR).
//!
//! A content-centric network addresses data by hierarchical binary names
//! rather than by location. This crate holds the data shapes every other CCNR
//! crate shares: names, interests, the authenticator that travels with each
//! signed object, and the content object itself.
//!
//! # Key Types
//!
//! - [`Name`]: Ordered sequence of opaque byte-string components
//! - [`Interest`]: Name prefix plus recursion scope and optional publisher filter
//! - [`PublisherKeyId`]: Fixed-length digest of a publisher's public key
//! - [`Authenticator`]: Publisher, timestamp, type, key locator, content digest
//! - [`Signature`]: Opaque signature bytes produced by an external signer
//! - [`CompleteName`]: Name + authenticator + signature (identity without payload)
//! - [`ContentObject`]: Complete name plus payload (the unit of storage)

pub mod authenticator;
pub mod error;
pub mod interest;
pub mod name;
pub mod object;
pub mod publisher;

pub use authenticator::{Authenticator, ContentType, KeyLocator};
pub use error::TypeError;
pub use interest::Interest;
pub use name::Name;
pub use object::{CompleteName, ContentObject, Signature};
pub use publisher::PublisherKeyId;
