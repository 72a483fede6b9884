//! # burnsync Server
//!
//! WebSocket connection manager for burnsync.
//!
//! The remote script host dials in; this crate accepts it, keeps a single
//! live session and implements [`burnsync_engine::RemoteTransport`] on top
//! of it.
//!
//! # Protocol
//!
//! Every text message is one JSON-RPC 2.0 frame:
//! 1. `pushFile {filename, content, server}` answered with `"OK"`
//! 2. `getAllFiles {server}` answered with `[{filename, content}]`
//! 3. `getDefinitionFile` answered with the definition text
//! 4. `fullReload` sent as a notification, never answered
//!
//! ```rust,ignore
//! use burnsync_server::{ConnectionManager, ServerConfig};
//!
//! let manager = ConnectionManager::start(ServerConfig::default()).await?;
//! let mut events = manager.subscribe();
//! ```

#![deny(unsafe_code)]
#![warn(missing_docs)]
// Production code MUST NOT use panic!/unwrap()/expect()
#![warn(clippy::unwrap_used, clippy::expect_used, clippy::panic)]

mod config;
mod error;
mod manager;

pub use config::{ServerConfig, DEFAULT_PORT};
pub use error::{ServerError, ServerResult};
pub use manager::ConnectionManager;
