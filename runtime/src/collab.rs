// Copyright 2026 VFat Loader Contributors
// SPDX-License-Identifier: Apache-2.0

//! Collaborator supervision.
//!
//! A run depends on processes it does not control: an optional dashboard
//! build, the dashboard server, and the in-process ingestion API. The build
//! must succeed before anything else starts. The long-running ones are
//! watched for the whole run; the first one to stop ends the run.

use anyhow::{bail, Context, Result};
use futures::stream::{FuturesUnordered, StreamExt};
use std::fmt;
use std::future::Future;
use std::process::Stdio;
use std::time::{Duration, Instant};
use tokio::process::{Child, Command};
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

fn shell(command: &str) -> Command {
    let mut cmd = Command::new("sh");
    cmd.arg("-c").arg(command).stdin(Stdio::null());
    cmd
}

/// Run the dashboard build to completion. Build output is discarded; a
/// non-zero exit is an error.
pub async fn run_build(command: &str) -> Result<Duration> {
    info!("Building...");
    let start = Instant::now();
    let status = shell(command)
        .stdout(Stdio::null())
        .status()
        .await
        .with_context(|| format!("failed to start build command `{command}`"))?;

    if !status.success() {
        bail!("build command `{command}` failed ({status})");
    }

    let elapsed = start.elapsed();
    info!("Build completed in {:.2} seconds", elapsed.as_secs_f64());
    Ok(elapsed)
}

/// A collaborator that stopped while the run still needed it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CollaboratorExit {
    pub name: String,
    pub detail: String,
}

impl fmt::Display for CollaboratorExit {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} unexpectedly terminated: {}", self.name, self.detail)
    }
}

impl std::error::Error for CollaboratorExit {}

enum Handle {
    Process(Child),
    Task(JoinHandle<Result<()>>),
}

struct Collaborator {
    name: String,
    handle: Handle,
}

impl Collaborator {
    async fn wait(&mut self) -> CollaboratorExit {
        let detail = match &mut self.handle {
            Handle::Process(child) => match child.wait().await {
                Ok(status) => format!("exited ({status})"),
                Err(e) => format!("could not be awaited: {e}"),
            },
            Handle::Task(task) => match task.await {
                Ok(Ok(())) => "stopped".to_string(),
                Ok(Err(e)) => format!("{e:#}"),
                Err(e) => format!("task aborted: {e}"),
            },
        };
        CollaboratorExit {
            name: self.name.clone(),
            detail,
        }
    }

    async fn stop(self) {
        match self.handle {
            Handle::Process(mut child) => {
                if let Err(e) = child.kill().await {
                    debug!("{} was already gone: {e}", self.name);
                }
            }
            Handle::Task(task) => task.abort(),
        }
        info!("Process {} stopped", self.name);
    }
}

/// The long-running collaborators of one run.
#[derive(Default)]
pub struct Collaborators {
    members: Vec<Collaborator>,
}

impl Collaborators {
    pub fn new() -> Self {
        Self::default()
    }

    /// Start `sh -c <command>`. The child is killed if the supervisor is
    /// dropped without a shutdown.
    pub fn spawn_command(&mut self, name: &str, command: &str) -> Result<()> {
        let child = shell(command)
            .kill_on_drop(true)
            .spawn()
            .with_context(|| format!("failed to start {name} (`{command}`)"))?;
        info!(pid = child.id(), "started {name}: {command}");
        self.members.push(Collaborator {
            name: name.to_string(),
            handle: Handle::Process(child),
        });
        Ok(())
    }

    /// Run an in-process service as a collaborator.
    pub fn spawn_task<F>(&mut self, name: &str, service: F)
    where
        F: Future<Output = Result<()>> + Send + 'static,
    {
        self.members.push(Collaborator {
            name: name.to_string(),
            handle: Handle::Task(tokio::spawn(service)),
        });
    }

    pub fn len(&self) -> usize {
        self.members.len()
    }

    pub fn is_empty(&self) -> bool {
        self.members.is_empty()
    }

    /// Resolve when the first collaborator stops, for whatever reason.
    /// Never resolves when there are none. Cancel safe.
    pub async fn wait_any(&mut self) -> CollaboratorExit {
        let mut waits: FuturesUnordered<_> =
            self.members.iter_mut().map(|m| m.wait()).collect();
        match waits.next().await {
            Some(exit) => {
                warn!("Process {} unexpectedly terminated", exit.name);
                exit
            }
            None => std::future::pending().await,
        }
    }

    /// Stop every collaborator, processes first killed then reaped.
    pub async fn shutdown(self) {
        for member in self.members {
            member.stop().await;
        }
    }
}
