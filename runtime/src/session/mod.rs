// Copyright 2026 VFat Loader Contributors
// SPDX-License-Identifier: Apache-2.0

//! Page sessions: one browser tab the orchestrator drives from target to
//! target, and the bridge that turns page calls into tracker operations.

pub mod bridge;
pub mod browser;

pub use bridge::{BridgeMessage, PageBridge, BINDING_NAME, BRIDGE_SCRIPT};
pub use browser::BrowserSession;

use anyhow::Result;
use async_trait::async_trait;
use std::time::Duration;
use tokio::sync::watch;
use vfat_core::LoadTracker;

/// A page the orchestrator can point at a target and observe.
#[async_trait]
pub trait PageSession: Send {
    /// Load `url`, replacing the current document. The tracker slot is
    /// cleared before the new document starts.
    async fn navigate(&mut self, url: &str, timeout: Duration) -> Result<()>;

    /// The tracker of the current document, `None` until the page creates
    /// one.
    fn tracker(&self) -> watch::Receiver<Option<LoadTracker>>;

    async fn close(self: Box<Self>) -> Result<()>;
}
