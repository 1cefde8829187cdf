//! # vpcom-core
//!
//! Core types for the VPCOM bridge.
//!
//! This crate provides the foundational types shared by the bridge crates:
//! - Commands and events exchanged with the peer
//! - Connection lifecycle states
//! - Error taxonomy
//! - Configuration and protocol dialects

pub mod config;
pub mod dialect;
pub mod error;
pub mod message;
pub mod state;

pub use config::{BridgeConfig, WireFormat};
pub use dialect::{BRIDGE_COMMAND, Dialect, RESPONSE_SUFFIX, ops};
pub use error::{BridgeError, Result};
pub use message::{Command, Event, Params};
pub use state::ConnectionState;
