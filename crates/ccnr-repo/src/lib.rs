//! Content-centric repository over a hierarchical versioned store.
//!
//! Signed content objects are stored under their binary names in a generic
//! store driven through [`ccnr_store::StoreSession`]. Each name component
//! becomes one path segment; the leaf node carries the payload and the
//! authenticator as properties. Standing interests are bridged onto store
//! observers so listeners hear about content written by other sessions.
//!
//! # Modules
//!
//! - [`codec`]: Reversible mapping between name components and path segments
//! - [`query`]: Names and interests to store query statements
//! - [`metadata`]: Authenticator and signature to node properties and back
//! - [`checkout`]: Scoped checkout of a parent node during one mutation
//! - [`repository`]: The [`Repository`] engine: write protocol, reads, subscriptions
//! - [`subscription`]: Interest listeners and the observer bridge
//! - [`config`]: TOML-loadable [`RepositoryConfig`]
//! - [`error`]: Error types

pub mod checkout;
pub mod codec;
pub mod config;
pub mod error;
pub mod metadata;
pub mod query;
pub mod repository;
pub mod subscription;

pub use codec::{decode_component, encode_component, name_to_path, parse_path};
pub use config::RepositoryConfig;
pub use error::{CodecError, RepoError, RepoResult};
pub use query::{build_query, interest_query};
pub use repository::Repository;
pub use subscription::{same_listener, ChannelListener, InterestListener};

// Re-export key types
pub use ccnr_store::{InMemoryRepository, NodeId, QueryDialect, StoreError, StoreSession};
pub use ccnr_types::{Authenticator, CompleteName, ContentObject, Interest, Name, Signature};
