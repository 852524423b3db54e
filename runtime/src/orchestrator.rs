// Copyright 2026 VFat Loader Contributors
// SPDX-License-Identifier: Apache-2.0

//! Orchestrator: visits every target in order and waits for its page to
//! finish loading.
//!
//! Each attempt moves through three stages, each bounded by its own timeout:
//!
//! 1. **Navigation** to the target page
//! 2. **Init**: the page creates its load tracker
//! 3. **Completion**: the tracker reports every insert settled, bounded by
//!    the page's own load-wait override when it declares one
//!
//! A failed attempt is followed by a cooldown and a fresh navigation, up to
//! the retry budget. One target exhausting its budget never stops the run.

use crate::config::{InitFailurePolicy, RetryPolicy};
use crate::progress::{self, AttemptStage, RunEventKind, RunEventSender};
use crate::session::PageSession;
use serde::Serialize;
use tokio::sync::watch;
use tokio::time::{timeout, Instant};
use tracing::{error, info, warn};
use vfat_core::{LoadSnapshot, LoadTracker, Target};

/// How a target ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum TargetStatus {
    Succeeded,
    /// The page never initialized and the skip policy is active.
    Skipped,
    /// Every allowed attempt failed.
    Exhausted,
}

#[derive(Debug, Clone, Serialize)]
pub struct TargetOutcome {
    pub target: Target,
    pub status: TargetStatus,
    /// Navigations spent on the target.
    pub attempts: u32,
    /// Tracker counters of the successful attempt.
    pub snapshot: Option<LoadSnapshot>,
}

/// Per-target outcomes of one run, in visiting order.
#[derive(Debug, Clone, Serialize)]
pub struct RunReport {
    pub outcomes: Vec<TargetOutcome>,
    pub elapsed_ms: u64,
}

impl RunReport {
    pub fn succeeded(&self) -> usize {
        self.count(TargetStatus::Succeeded)
    }

    pub fn failed(&self) -> usize {
        self.outcomes.len() - self.succeeded()
    }

    fn count(&self, status: TargetStatus) -> usize {
        self.outcomes.iter().filter(|o| o.status == status).count()
    }

    /// Objects accepted by the ingestion API across all targets.
    pub fn objects_loaded(&self) -> u64 {
        self.outcomes
            .iter()
            .filter_map(|o| o.snapshot)
            .map(|s| s.success_count)
            .sum()
    }

    pub fn objects_attempted(&self) -> u64 {
        self.outcomes
            .iter()
            .filter_map(|o| o.snapshot)
            .map(|s| s.attempt_count)
            .sum()
    }
}

struct AttemptFailure {
    stage: AttemptStage,
    reason: String,
}

impl AttemptFailure {
    fn new(stage: AttemptStage, reason: impl Into<String>) -> Self {
        Self {
            stage,
            reason: reason.into(),
        }
    }
}

/// Drives one page session across the configured targets.
pub struct Orchestrator {
    policy: RetryPolicy,
    dashboard_url: String,
    events: Option<RunEventSender>,
}

impl Orchestrator {
    pub fn new(policy: RetryPolicy, dashboard_url: &str) -> Self {
        Self {
            policy,
            dashboard_url: dashboard_url.trim_end_matches('/').to_string(),
            events: None,
        }
    }

    /// Publish run events on `tx`.
    pub fn with_events(mut self, tx: RunEventSender) -> Self {
        self.events = Some(tx);
        self
    }

    pub fn target_url(&self, target: &Target) -> String {
        format!("{}{}", self.dashboard_url, target.path)
    }

    /// Visit every target in order. Never fails: per-target failures are
    /// recorded in the report.
    pub async fn run(&self, session: &mut dyn PageSession, targets: &[Target]) -> RunReport {
        let start = Instant::now();
        let mut seq = 0u64;
        let mut outcomes = Vec::with_capacity(targets.len());

        info!(
            "loading {} targets (retries={}, cooldown={:?})",
            targets.len(),
            self.policy.max_retries,
            self.policy.cooldown
        );

        for target in targets {
            outcomes.push(self.load_target(session, target, &mut seq).await);
        }

        let report = RunReport {
            outcomes,
            elapsed_ms: start.elapsed().as_millis() as u64,
        };
        progress::emit(
            &self.events,
            &mut seq,
            RunEventKind::RunCompleted {
                succeeded: report.succeeded(),
                failed: report.failed(),
            },
        );
        report
    }

    async fn load_target(
        &self,
        session: &mut dyn PageSession,
        target: &Target,
        seq: &mut u64,
    ) -> TargetOutcome {
        let url = self.target_url(target);
        let max_attempts = self.policy.max_attempts();

        for attempt in 1..=max_attempts {
            progress::emit(
                &self.events,
                seq,
                RunEventKind::AttemptStarted {
                    target: target.clone(),
                    attempt,
                },
            );
            info!(
                network = %target.network,
                protocol = %target.protocol_id,
                attempt,
                "loading {url}"
            );

            let failure = match self.attempt(session, &url).await {
                Ok(snapshot) => {
                    info!(
                        network = %target.network,
                        protocol = %target.protocol_id,
                        attempt,
                        "Successfully loaded {}, {} / {} objects loaded",
                        target.protocol_id,
                        snapshot.success_count,
                        snapshot.attempt_count
                    );
                    progress::emit(
                        &self.events,
                        seq,
                        RunEventKind::TargetSucceeded {
                            target: target.clone(),
                            attempt,
                            success_count: snapshot.success_count,
                            attempt_count: snapshot.attempt_count,
                        },
                    );
                    return TargetOutcome {
                        target: target.clone(),
                        status: TargetStatus::Succeeded,
                        attempts: attempt,
                        snapshot: Some(snapshot),
                    };
                }
                Err(failure) => failure,
            };

            let skip = failure.stage == AttemptStage::Init
                && self.policy.init_failure == InitFailurePolicy::Skip;
            let will_retry = !skip && attempt < max_attempts;

            warn!(
                network = %target.network,
                protocol = %target.protocol_id,
                attempt,
                stage = %failure.stage,
                "Failed to load {}: {}",
                target.protocol_id,
                failure.reason
            );
            progress::emit(
                &self.events,
                seq,
                RunEventKind::AttemptFailed {
                    target: target.clone(),
                    attempt,
                    stage: failure.stage,
                    reason: failure.reason,
                    will_retry,
                },
            );

            if skip {
                warn!(
                    network = %target.network,
                    protocol = %target.protocol_id,
                    "page never initialized its load tracker, skipping {}",
                    target.protocol_id
                );
                progress::emit(
                    &self.events,
                    seq,
                    RunEventKind::TargetSkipped {
                        target: target.clone(),
                    },
                );
                return TargetOutcome {
                    target: target.clone(),
                    status: TargetStatus::Skipped,
                    attempts: attempt,
                    snapshot: None,
                };
            }

            if will_retry {
                info!(
                    "retrying {} in {:?} (attempt {}/{})",
                    target.protocol_id,
                    self.policy.cooldown,
                    attempt + 1,
                    max_attempts
                );
                tokio::time::sleep(self.policy.cooldown).await;
            }
        }

        error!(
            network = %target.network,
            protocol = %target.protocol_id,
            "Giving up on {} after {} attempts",
            target.protocol_id,
            max_attempts
        );
        progress::emit(
            &self.events,
            seq,
            RunEventKind::TargetExhausted {
                target: target.clone(),
                attempts: max_attempts,
            },
        );
        TargetOutcome {
            target: target.clone(),
            status: TargetStatus::Exhausted,
            attempts: max_attempts,
            snapshot: None,
        }
    }

    /// One pass through navigation, init and completion.
    async fn attempt(
        &self,
        session: &mut dyn PageSession,
        url: &str,
    ) -> Result<LoadSnapshot, AttemptFailure> {
        let nav_timeout = self.policy.navigation_timeout;
        match timeout(nav_timeout, session.navigate(url, nav_timeout)).await {
            Ok(Ok(())) => {}
            Ok(Err(e)) => return Err(AttemptFailure::new(AttemptStage::Navigation, format!("{e:#}"))),
            Err(_) => {
                return Err(AttemptFailure::new(
                    AttemptStage::Navigation,
                    format!("navigation timed out after {nav_timeout:?}"),
                ))
            }
        }

        let tracker = self.wait_for_tracker(session.tracker()).await?;

        let load_wait = tracker
            .load_wait_override()
            .unwrap_or(self.policy.load_timeout);
        match timeout(load_wait, tracker.wait_for_completion()).await {
            Ok(snapshot) => Ok(snapshot),
            Err(_) => {
                let so_far = tracker.snapshot();
                Err(AttemptFailure::new(
                    AttemptStage::Completion,
                    format!(
                        "load did not complete within {load_wait:?} ({} / {} objects loaded so far)",
                        so_far.success_count, so_far.attempt_count
                    ),
                ))
            }
        }
    }

    async fn wait_for_tracker(
        &self,
        mut slot: watch::Receiver<Option<LoadTracker>>,
    ) -> Result<LoadTracker, AttemptFailure> {
        let init_timeout = self.policy.init_timeout;
        let found = timeout(init_timeout, async {
            slot.wait_for(Option::is_some)
                .await
                .ok()
                .and_then(|tracker| tracker.clone())
        })
        .await;

        match found {
            Ok(Some(tracker)) => Ok(tracker),
            Ok(None) => Err(AttemptFailure::new(
                AttemptStage::Init,
                "page session closed before the load tracker was initialized",
            )),
            Err(_) => Err(AttemptFailure::new(
                AttemptStage::Init,
                format!("load tracker not initialized within {init_timeout:?}"),
            )),
        }
    }
}
