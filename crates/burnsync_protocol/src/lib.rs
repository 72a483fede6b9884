//! # burnsync Protocol
//!
//! Wire protocol types for talking to a remote script host.
//!
//! This crate provides:
//! - Typed requests (push-file, list-files, definition file, full-reload notice)
//! - JSON-RPC 2.0 request/response frames
//! - Typed decoding of replies
//!
//! This is a pure protocol crate with no I/O operations.

#![deny(unsafe_code)]
#![warn(missing_docs)]

mod error;
mod frame;
mod messages;

pub use error::{ProtocolError, ProtocolResult};
pub use frame::{Incoming, RequestFrame, ResponseFrame, JSONRPC_VERSION};
pub use messages::{
    DefinitionFile, ListFilesRequest, ListFilesResponse, PushAck, PushFile, RemoteFile,
    RemoteRequest,
};
