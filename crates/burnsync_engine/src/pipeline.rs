//! Interfaces to the build pipeline and the path resolver.

use crate::types::{ChangeNotification, PushTarget};
use std::sync::atomic::{AtomicUsize, Ordering};

/// Receives notifications from the build pipeline.
///
/// Implemented by the engine handle; the pipeline holds one and calls it
/// from whatever thread it runs on.
pub trait ChangeSubscriber: Send + Sync {
    /// Called once per built file.
    fn on_change(&self, notification: ChangeNotification);

    /// Called once, when the pipeline has finished its startup pass.
    fn on_build_started(&self);
}

/// Commands the engine can issue to the build pipeline.
pub trait BuildPipeline: Send + Sync {
    /// Invalidates every cached module and re-emits a notification for
    /// every tracked source file.
    fn trigger_full_reload(&self);
}

/// Resolves a source path into the remote destinations it syncs to.
///
/// An empty result means the file is not synced.
pub trait PathResolver: Send {
    /// Resolves one source path.
    fn resolve(&self, source_path: &str) -> Vec<PushTarget>;
}

impl<F> PathResolver for F
where
    F: Fn(&str) -> Vec<PushTarget> + Send,
{
    fn resolve(&self, source_path: &str) -> Vec<PushTarget> {
        self(source_path)
    }
}

/// A pipeline that only counts reload requests.
#[derive(Debug, Default)]
pub struct RecordingPipeline {
    reloads: AtomicUsize,
}

impl RecordingPipeline {
    /// Creates a new recording pipeline.
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns the number of full reloads requested.
    pub fn reloads(&self) -> usize {
        self.reloads.load(Ordering::SeqCst)
    }
}

impl BuildPipeline for RecordingPipeline {
    fn trigger_full_reload(&self) {
        self.reloads.fetch_add(1, Ordering::SeqCst);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn closures_resolve() {
        let resolver = |path: &str| {
            if path.ends_with(".js") {
                vec![PushTarget::new(path, "home")]
            } else {
                Vec::new()
            }
        };
        assert_eq!(resolver.resolve("a.js").len(), 1);
        assert!(resolver.resolve("notes.md").is_empty());
    }

    #[test]
    fn recording_pipeline_counts() {
        let pipeline = RecordingPipeline::new();
        pipeline.trigger_full_reload();
        pipeline.trigger_full_reload();
        assert_eq!(pipeline.reloads(), 2);
    }
}
