// Copyright 2026 VFat Loader Contributors
// SPDX-License-Identifier: Apache-2.0

//! Run event types and broadcast channel for orchestration telemetry.
//!
//! The orchestrator emits `RunEvent`s as it moves through each target's
//! attempts. Events flow through a `tokio::sync::broadcast` channel to any
//! subscriber; when nobody is listening they are dropped.

use serde::{Deserialize, Serialize};
use tokio::sync::broadcast::error::RecvError;
use tracing::debug;
use vfat_core::Target;

/// An event emitted while a run is in progress.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RunEvent {
    /// Monotonically increasing sequence number within one run.
    pub seq: u64,
    pub event: RunEventKind,
}

/// The specific kind of run event.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type")]
pub enum RunEventKind {
    /// Navigation to a target is about to start.
    AttemptStarted { target: Target, attempt: u32 },
    /// An attempt failed at the given stage.
    AttemptFailed {
        target: Target,
        attempt: u32,
        stage: AttemptStage,
        reason: String,
        will_retry: bool,
    },
    /// The target's page finished loading.
    TargetSucceeded {
        target: Target,
        attempt: u32,
        success_count: u64,
        attempt_count: u64,
    },
    /// The page never initialized and the skip policy is active.
    TargetSkipped { target: Target },
    /// Every allowed attempt failed.
    TargetExhausted { target: Target, attempts: u32 },
    /// All targets have been processed.
    RunCompleted { succeeded: usize, failed: usize },
}

/// Where in the per-target state machine an attempt failed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum AttemptStage {
    Navigation,
    Init,
    Completion,
}

impl std::fmt::Display for AttemptStage {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Navigation => write!(f, "navigation"),
            Self::Init => write!(f, "tracker init"),
            Self::Completion => write!(f, "load completion"),
        }
    }
}

pub type RunEventSender = tokio::sync::broadcast::Sender<RunEvent>;
pub type RunEventReceiver = tokio::sync::broadcast::Receiver<RunEvent>;

/// Create a run event channel. A run produces a handful of events per
/// target, so 256 slots cover a full catalogue without lagging.
pub fn channel() -> (RunEventSender, RunEventReceiver) {
    tokio::sync::broadcast::channel(256)
}

/// Emit an event, ignoring send errors (no receivers).
pub fn emit(tx: &Option<RunEventSender>, seq: &mut u64, event: RunEventKind) {
    if let Some(ref sender) = tx {
        *seq += 1;
        let _ = sender.send(RunEvent { seq: *seq, event });
    }
}

/// Log every event at debug level until all senders are gone.
pub async fn log_events(mut rx: RunEventReceiver) {
    loop {
        match rx.recv().await {
            Ok(event) => debug!(seq = event.seq, event = ?event.event, "run event"),
            Err(RecvError::Lagged(skipped)) => debug!(skipped, "run event log fell behind"),
            Err(RecvError::Closed) => break,
        }
    }
}
