//! # burnsync Engine
//!
//! Delivery tracking and the sync state machine for burnsync.
//!
//! This crate provides:
//! - Deferred start (buffer until the build pipeline reports build start)
//! - Keyed delivery tracking with coalescing and retry budgets
//! - Source map packaging
//! - A serialized sync service driven by pipeline, connection and command events
//! - Download of remote files into the local tree
//! - Optional local copies of every built file
//!
//! ## Architecture
//!
//! The build pipeline feeds [`ChangeNotification`]s into an
//! [`EngineHandle`]. The [`SyncService`] owns a [`SyncAdapter`] and applies
//! every event in order. Pushes go out through a [`RemoteTransport`] with a
//! bounded wait for each acknowledgment.
//!
//! ## Key Invariants
//!
//! - A delivery is cleared only by a matching acknowledgment or by being
//!   given up on
//! - At most one entry per `(server, filename)` is pending
//! - Nothing is resolved or delivered before build start
//! - Connection loss never clears pending deliveries

#![deny(unsafe_code)]
#![warn(missing_docs)]

mod adapter;
mod config;
mod download;
mod dump;
mod error;
mod pipeline;
mod service;
mod sourcemap;
mod tracker;
mod transport;
mod types;

pub use adapter::{
    push_file, AdapterState, DeliveryFailure, DrainStep, FailureReason, SyncAdapter, SyncStats,
};
pub use config::{
    remote_path, DownloadConfig, EngineConfig, IgnoreRules, LocationFn, SourcemapMode,
    DEFAULT_DEFINITION_FILE, DEFAULT_MAX_ATTEMPTS,
};
pub use download::{download_all, fetch_definition, DownloadReport};
pub use dump::dump_path;
pub use error::{SyncError, SyncResult};
pub use pipeline::{BuildPipeline, ChangeSubscriber, PathResolver, RecordingPipeline};
pub use service::{Command, EngineEvent, EngineHandle, ServiceReport, SyncService, SyncStatus};
pub use sourcemap::package;
pub use tracker::{DeliveryItem, DeliveryTracker, Entries, PendingDelivery};
pub use transport::{ConnectionEvent, MockTransport, PeerId, RemoteTransport, SendOutcome};
pub use types::{ChangeNotification, DeliveryKey, Payload, PushTarget};
