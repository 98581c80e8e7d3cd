//! The `utils` module provides a collection of utility functions and common
//! definitions used across the `relayhub` crate.
//!
//! This module centralizes the crate error type, logging setup and the
//! serde helpers shared by the envelope codec and the broker wire types.

pub mod encoding;
pub mod error;
pub mod logging;

pub use error::{Error, Result};
