// Copyright 2026 VFat Loader Contributors
// SPDX-License-Identifier: Apache-2.0

//! [`PageSession`] backed by a real browser tab.

use super::bridge::{PageBridge, BINDING_NAME, BRIDGE_SCRIPT};
use super::PageSession;
use crate::ingest::IngestionClient;
use crate::renderer::{RenderContext, Renderer};
use anyhow::{Context, Result};
use async_trait::async_trait;
use futures::StreamExt;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tracing::debug;
use vfat_core::LoadTracker;

/// One tab with the bridge installed. Binding calls are pumped into the
/// [`PageBridge`] by a background task for the lifetime of the session.
pub struct BrowserSession {
    context: Box<dyn RenderContext>,
    bridge: Arc<Mutex<PageBridge>>,
    tracker: watch::Receiver<Option<LoadTracker>>,
    pump: JoinHandle<()>,
}

impl BrowserSession {
    pub async fn open(renderer: &dyn Renderer, client: IngestionClient) -> Result<Self> {
        let context = renderer.new_context().await?;
        let mut calls = context.add_binding(BINDING_NAME).await?;
        context
            .add_init_script(BRIDGE_SCRIPT)
            .await
            .context("failed to install the load tracker bridge")?;

        let bridge = PageBridge::new(client);
        let tracker = bridge.subscribe();
        let bridge = Arc::new(Mutex::new(bridge));

        let pump = tokio::spawn({
            let bridge = Arc::clone(&bridge);
            async move {
                while let Some(payload) = calls.next().await {
                    lock(&bridge).handle_payload(&payload);
                }
                debug!("bridge binding stream ended");
            }
        });

        Ok(Self {
            context,
            bridge,
            tracker,
            pump,
        })
    }
}

fn lock(bridge: &Mutex<PageBridge>) -> MutexGuard<'_, PageBridge> {
    bridge.lock().unwrap_or_else(PoisonError::into_inner)
}

#[async_trait]
impl PageSession for BrowserSession {
    async fn navigate(&mut self, url: &str, timeout: Duration) -> Result<()> {
        lock(&self.bridge).reset();
        let nav = self
            .context
            .navigate(url, timeout.as_millis() as u64)
            .await?;
        debug!(url = %nav.final_url, ms = nav.load_time_ms, "page loaded");
        Ok(())
    }

    fn tracker(&self) -> watch::Receiver<Option<LoadTracker>> {
        self.tracker.clone()
    }

    async fn close(self: Box<Self>) -> Result<()> {
        let Self {
            context,
            bridge,
            pump,
            ..
        } = *self;
        pump.abort();
        lock(&bridge).reset();
        context.close().await
    }
}
