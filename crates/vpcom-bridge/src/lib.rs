//! Async core of the VPCOM bridge
//!
//! This crate provides:
//! - Frame codec for MPF's BCP lines and length-prefixed JSON
//! - Transport abstractions (AsyncReader/AsyncWriter traits) and TCP framing
//! - Background reader task feeding the response correlator
//! - Connection lifecycle management (`Bridge`)

pub mod codec;
pub mod connection;
pub mod correlator;
pub mod lifecycle;
#[cfg(any(test, feature = "test-util"))]
pub mod mock_peer;
pub mod tcp;
pub mod transport;

pub use codec::Codec;
pub use connection::Connection;
pub use correlator::{Correlator, PendingWait};
pub use lifecycle::Bridge;
pub use transport::{AsyncReader, AsyncWriter, Framing, reader_task};
