//! # vpcom-controller
//!
//! Blocking controller facade over the async VPCOM bridge.
//!
//! The host (a COM binding, a test harness, a line-oriented CLI) calls
//! [`Controller`] methods synchronously; the bridge runs on a dedicated
//! background runtime owned by the controller.

pub mod controller;

pub use controller::Controller;
pub use vpcom_core::{BridgeConfig, BridgeError, ConnectionState, Dialect, Result, WireFormat};
