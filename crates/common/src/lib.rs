//! Types shared by the SDK crates and the `spr` CLI

mod error;
mod secret;

pub use error::{Error, Result};
pub use secret::Secret;
