//! Wire types, codec, validation, and metrics for the model worker's OTF
//! protocol.
//!
//! This crate knows nothing about models, handlers, or sockets -- it only
//! knows how to turn bytes into typed commands and typed responses back into
//! bytes. [`codec`] carries the binary framing grammar, [`validate`] turns a
//! decoded-but-unchecked payload into a request the rest of the system can
//! trust, [`error`] is the closed failure taxonomy both sides speak, and
//! [`metrics`] is the side-channel sample buffer emitted alongside responses.

pub mod codec;
pub mod error;
pub mod metrics;
pub mod validate;

pub use error::{ErrorCode, ProtocolError, Result};
