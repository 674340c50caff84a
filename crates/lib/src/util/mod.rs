//! Shared utilities.
//!
//! Common utilities used across the crate including hashing, path helpers and
//! test fixtures.

pub mod fs;
pub mod hash;

#[cfg(test)]
pub mod testutil;
