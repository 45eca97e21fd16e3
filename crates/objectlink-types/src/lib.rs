//! Shared types for the ObjectLink protocol.
//!
//! This crate holds the error taxonomy and the configuration structures used
//! by the protocol engine and the command-line front end. It contains no
//! protocol logic.

pub mod config;
pub mod error;

pub use config::{LinkConfig, WireFormat};
pub use error::{LinkError, LinkResult};
