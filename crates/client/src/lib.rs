//! Command execution for PC Explorer.
//!
//! [`CommandExecutor`] turns a command and payload into one request frame,
//! waits for exactly one response and maps it to a typed result. Remote file
//! operations are thin wrappers over it; see [`ops`].

pub mod error;
pub mod executor;
pub mod ops;

#[cfg(test)]
pub(crate) mod testing;

pub use error::CommandError;
pub use executor::{CommandExecutor, Exchange};
