//! Core data types shared by the tracker, adapter and service.

use bytes::Bytes;
use serde::Serialize;
use std::fmt;

/// A built source file ready to be synced.
///
/// Produced by the build pipeline, possibly before it has signalled that
/// its startup pass has finished.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ChangeNotification {
    /// Path of the source file, relative to the project root.
    pub source_path: String,
    /// Built (transformed) content.
    pub built_content: Bytes,
    /// Source map for the built content, if the pipeline produced one.
    pub source_map: Option<Bytes>,
    /// True if emitted by the pipeline's startup pass.
    pub is_initial: bool,
}

impl ChangeNotification {
    /// Creates a live change notification.
    pub fn new(source_path: impl Into<String>, built_content: impl Into<Bytes>) -> Self {
        Self {
            source_path: source_path.into(),
            built_content: built_content.into(),
            source_map: None,
            is_initial: false,
        }
    }

    /// Creates a notification from the pipeline's startup pass.
    pub fn initial(source_path: impl Into<String>, built_content: impl Into<Bytes>) -> Self {
        Self {
            is_initial: true,
            ..Self::new(source_path, built_content)
        }
    }

    /// Attaches a source map.
    pub fn with_source_map(mut self, source_map: impl Into<Bytes>) -> Self {
        self.source_map = Some(source_map.into());
        self
    }
}

/// Resolved destination for one change.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct PushTarget {
    /// Remote filename.
    pub filename: String,
    /// Destination server on the remote host.
    pub server: String,
}

impl PushTarget {
    /// Creates a new push target.
    pub fn new(filename: impl Into<String>, server: impl Into<String>) -> Self {
        Self {
            filename: filename.into(),
            server: server.into(),
        }
    }

    /// Returns the delivery key for this target.
    pub fn key(&self) -> DeliveryKey {
        DeliveryKey::new(self.server.clone(), self.filename.clone())
    }
}

/// Identity of a pending delivery: destination server plus filename.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize)]
pub struct DeliveryKey {
    /// Destination server.
    pub server: String,
    /// Remote filename.
    pub filename: String,
}

impl DeliveryKey {
    /// Creates a new delivery key.
    pub fn new(server: impl Into<String>, filename: impl Into<String>) -> Self {
        Self {
            server: server.into(),
            filename: filename.into(),
        }
    }
}

impl fmt::Display for DeliveryKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.server, self.filename)
    }
}

/// Content to deliver for one key.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Payload {
    /// File content.
    pub content: Bytes,
    /// True if the content is a source map.
    pub sourcemap: bool,
}

impl Payload {
    /// Creates a script payload.
    pub fn script(content: impl Into<Bytes>) -> Self {
        Self {
            content: content.into(),
            sourcemap: false,
        }
    }

    /// Creates a source map payload.
    pub fn sourcemap(content: impl Into<Bytes>) -> Self {
        Self {
            content: content.into(),
            sourcemap: true,
        }
    }

    /// Returns the content as text, replacing invalid UTF-8.
    pub fn text(&self) -> String {
        String::from_utf8_lossy(&self.content).into_owned()
    }

    /// Returns the content length in bytes.
    pub fn len(&self) -> usize {
        self.content.len()
    }

    /// Returns true if the content is empty.
    pub fn is_empty(&self) -> bool {
        self.content.is_empty()
    }
}
