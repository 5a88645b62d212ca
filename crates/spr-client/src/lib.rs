//! Authenticated REST client for the analytics platform API
//!
//! Layers the request path over `spr-auth`: `Client` establishes a session
//! and hands out a `RequestGateway`, which injects the bearer token and
//! application key, unwraps the `{data, errors}` envelope, and refreshes the
//! session once when the API answers 401.

pub mod client;
pub mod error;
pub mod gateway;
pub mod request;

pub use client::{Client, ClientSettings};
pub use error::{Error, Result};
pub use gateway::{KEY_HEADER, RequestGateway};
pub use request::ApiRequest;
