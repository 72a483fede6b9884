//! Sync adapter state machine.
//!
//! The adapter starts `Deferred`: change notifications are buffered in
//! arrival order while the build pipeline runs its startup pass. The
//! build-started signal resolves the whole buffered batch at once and moves
//! the adapter to `Draining`, where every notification is resolved and
//! enqueued as it arrives. There is no way back to `Deferred`.
//!
//! The adapter performs no I/O of its own. Drain passes send over a
//! [`RemoteTransport`] and feed each [`SendOutcome`] back through
//! [`SyncAdapter::apply_outcome`], which is the only place tracker entries
//! are cleared.

use crate::config::EngineConfig;
use crate::pipeline::PathResolver;
use crate::sourcemap;
use crate::tracker::{DeliveryItem, DeliveryTracker};
use crate::transport::SendOutcome;
use crate::types::{ChangeNotification, DeliveryKey, Payload};
use burnsync_protocol::PushFile;
use serde::Serialize;
use std::fmt;
use tracing::{debug, info, warn};

/// The current state of the adapter.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum AdapterState {
    /// Buffering notifications until the pipeline reports build start.
    Deferred,
    /// Resolving and delivering notifications as they arrive.
    Draining,
}

/// Whether a drain pass should keep going after an outcome.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DrainStep {
    /// Attempt the next entry.
    Continue,
    /// The connection is gone; end the pass.
    Stop,
}

/// Why a delivery was given up on.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum FailureReason {
    /// Timed out on every attempt of the budget.
    AttemptsExhausted(u32),
    /// The remote host refused the file.
    Rejected(String),
}

impl fmt::Display for FailureReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            FailureReason::AttemptsExhausted(attempts) => {
                write!(f, "no acknowledgment after {attempts} attempt(s)")
            }
            FailureReason::Rejected(message) => write!(f, "rejected: {message}"),
        }
    }
}

/// A delivery that was removed without being acknowledged.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct DeliveryFailure {
    /// Delivery key.
    pub key: DeliveryKey,
    /// Why it failed.
    pub reason: FailureReason,
}

impl fmt::Display for DeliveryFailure {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} ({})", self.key, self.reason)
    }
}

/// Statistics about deliveries.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct SyncStats {
    /// Pushes acknowledged by the remote host.
    pub delivered: u64,
    /// Deliveries given up on.
    pub failed: u64,
    /// Timed-out attempts.
    pub timeouts: u64,
    /// Enqueues that superseded an undelivered payload.
    pub coalesced: u64,
    /// Drain passes started.
    pub drain_passes: u64,
}

/// Turns change notifications into tracked deliveries.
pub struct SyncAdapter<R: PathResolver> {
    state: AdapterState,
    deferred: Vec<ChangeNotification>,
    tracker: DeliveryTracker,
    resolver: R,
    config: EngineConfig,
    stats: SyncStats,
    failures: Vec<DeliveryFailure>,
    enqueued: Vec<(DeliveryKey, Payload)>,
}

impl<R: PathResolver> SyncAdapter<R> {
    /// Creates an adapter in the `Deferred` state.
    pub fn new(resolver: R, config: EngineConfig) -> Self {
        Self {
            state: AdapterState::Deferred,
            deferred: Vec::new(),
            tracker: DeliveryTracker::new(),
            resolver,
            config,
            stats: SyncStats::default(),
            failures: Vec::new(),
            enqueued: Vec::new(),
        }
    }

    /// Gets the current state.
    pub fn state(&self) -> AdapterState {
        self.state
    }

    /// Gets the engine configuration.
    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    /// Number of pending deliveries.
    pub fn pending_count(&self) -> usize {
        self.tracker.len()
    }

    /// Number of notifications buffered before build start.
    pub fn deferred_count(&self) -> usize {
        self.deferred.len()
    }

    /// Read access to the delivery tracker.
    pub fn tracker(&self) -> &DeliveryTracker {
        &self.tracker
    }

    /// Gets the current stats.
    pub fn stats(&self) -> SyncStats {
        self.stats.clone()
    }

    /// Takes the failures recorded since the last call.
    pub fn take_failures(&mut self) -> Vec<DeliveryFailure> {
        std::mem::take(&mut self.failures)
    }

    /// Takes the payloads enqueued since the last call, in enqueue order.
    ///
    /// Only collected when a dump directory is configured.
    pub fn take_enqueued(&mut self) -> Vec<(DeliveryKey, Payload)> {
        std::mem::take(&mut self.enqueued)
    }

    /// Handles one change notification.
    ///
    /// Returns the number of deliveries enqueued; always zero while deferred.
    pub fn handle_change(&mut self, notification: ChangeNotification) -> usize {
        match self.state {
            AdapterState::Deferred => {
                if self.config.ignore_initial && notification.is_initial {
                    debug!(path = %notification.source_path, "ignoring initial change");
                    return 0;
                }
                self.deferred.push(notification);
                0
            }
            AdapterState::Draining => self.enqueue_resolved(&notification),
        }
    }

    /// Handles the build-started signal.
    ///
    /// Resolves the whole deferred batch in arrival order and enqueues it
    /// before returning. Returns the number of deliveries enqueued.
    pub fn build_started(&mut self) -> usize {
        if self.state == AdapterState::Draining {
            warn!("build start signalled twice; ignoring");
            return 0;
        }
        self.state = AdapterState::Draining;

        let batch = std::mem::take(&mut self.deferred);
        let files = batch.len();
        let enqueued: usize = batch.iter().map(|n| self.enqueue_resolved(n)).sum();
        info!(files, enqueued, "initial batch resolved");
        enqueued
    }

    fn enqueue_resolved(&mut self, notification: &ChangeNotification) -> usize {
        let targets = self.resolver.resolve(&notification.source_path);
        if targets.is_empty() {
            debug!(path = %notification.source_path, "no push targets");
            return 0;
        }

        let mut enqueued = 0;
        for target in &targets {
            for (target, payload) in sourcemap::package(target, notification, self.config.sourcemap)
            {
                let key = target.key();
                if self.tracker.contains(&key) {
                    self.stats.coalesced += 1;
                }
                if self.config.dump_files.is_some() {
                    self.enqueued.push((key.clone(), payload.clone()));
                }
                self.tracker.enqueue(key, payload);
                enqueued += 1;
            }
        }
        enqueued
    }

    /// Snapshots every pending delivery, oldest first, for a drain pass.
    pub fn drain_plan(&mut self) -> Vec<DeliveryItem> {
        self.stats.drain_passes += 1;
        self.tracker.snapshot()
    }

    /// Applies the outcome of sending `item`.
    pub fn apply_outcome(&mut self, item: &DeliveryItem, outcome: &SendOutcome) -> DrainStep {
        match outcome {
            SendOutcome::Ack => {
                if self.tracker.remove_revision(&item.key, item.revision).is_some() {
                    self.stats.delivered += 1;
                    debug!(key = %item.key, "delivered");
                } else {
                    debug!(key = %item.key, "acknowledged superseded payload");
                }
                DrainStep::Continue
            }
            SendOutcome::Timeout => {
                self.stats.timeouts += 1;
                let Some(attempt) = self.tracker.record_timeout(&item.key, item.revision) else {
                    return DrainStep::Continue;
                };
                if attempt >= self.config.max_attempts {
                    self.tracker.remove(&item.key);
                    self.fail(item.key.clone(), FailureReason::AttemptsExhausted(attempt));
                } else {
                    warn!(key = %item.key, attempt, "push timed out; will retry on next drain");
                }
                DrainStep::Continue
            }
            SendOutcome::Rejected(message) => {
                if self
                    .tracker
                    .remove_revision(&item.key, item.revision)
                    .is_some()
                {
                    self.fail(item.key.clone(), FailureReason::Rejected(message.clone()));
                }
                DrainStep::Continue
            }
            SendOutcome::NotConnected | SendOutcome::ConnectionLost => {
                debug!(key = %item.key, ?outcome, "connection unavailable; ending drain pass");
                DrainStep::Stop
            }
        }
    }

    fn fail(&mut self, key: DeliveryKey, reason: FailureReason) {
        self.stats.failed += 1;
        match &reason {
            FailureReason::AttemptsExhausted(attempts) => {
                warn!(%key, attempts, "delivery failed: no acknowledgment")
            }
            FailureReason::Rejected(message) => {
                warn!(%key, %message, "delivery failed: rejected by remote host")
            }
        }
        self.failures.push(DeliveryFailure { key, reason });
    }
}

/// Builds the wire message for a pending delivery.
pub fn push_file(item: &DeliveryItem) -> PushFile {
    PushFile::new(
        item.key.filename.clone(),
        item.payload.text(),
        item.key.server.clone(),
    )
    .with_sourcemap(item.payload.sourcemap)
}
