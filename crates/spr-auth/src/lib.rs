//! Credential and session management for the analytics platform API
//!
//! Provides the three OAuth grant exchanges, a durable multi-environment
//! credential store, and the session object that ties them together. This
//! crate has no knowledge of the REST API itself; `spr-client` builds the
//! authenticated request path on top of it.
//!
//! Credential flow:
//! 1. Caller picks a `GrantRequest` (authorization code, password, or reuse)
//! 2. `AuthSession::establish()` runs the grant via `TokenExchange`, or
//!    selects a stored record via `ReuseSelector`
//! 3. Fresh grants are written with `CredentialStore::upsert()`
//! 4. On a 401 the gateway calls `AuthSession::refresh()`
//! 5. Rotated tokens are saved via `CredentialStore::save_rotated()`

pub mod authorize;
pub mod backend;
pub mod constants;
pub mod credentials;
pub mod environment;
pub mod error;
pub mod session;
pub mod token;

pub use authorize::build_authorization_url;
pub use backend::{BackendLock, BoxFuture, FileBackend, MemoryBackend, StorageBackend};
pub use constants::*;
pub use credentials::{CredentialMap, CredentialRecord, CredentialStore, TokenUpdate};
pub use environment::Environment;
pub use error::{Error, Result};
pub use session::{AuthSession, GrantRequest, ReuseSelector};
pub use token::{ClientApp, HttpTokenExchange, TokenExchange, TokenGrant};
