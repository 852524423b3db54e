//! Renderer abstraction for browser-based page loading.
//!
//! Defines the `Renderer` and `RenderContext` traits that abstract over
//! the browser engine (currently Chromium via chromiumoxide).

pub mod chromium;

use anyhow::Result;
use async_trait::async_trait;
use futures::stream::BoxStream;
use serde::{Deserialize, Serialize};

/// Result of navigating to a URL.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NavigationResult {
    /// The final URL after any redirects.
    pub final_url: String,
    /// Time taken to load the page in milliseconds.
    pub load_time_ms: u64,
}

/// A browser engine that can create rendering contexts.
#[async_trait]
pub trait Renderer: Send + Sync {
    /// Create a new browser context (tab).
    async fn new_context(&self) -> Result<Box<dyn RenderContext>>;
    /// Close the browser.
    async fn shutdown(&self) -> Result<()>;
    /// Number of currently active contexts.
    fn active_contexts(&self) -> usize;
}

/// A single browser context (tab).
#[async_trait]
pub trait RenderContext: Send + Sync {
    /// Navigate to a URL and wait for the load event, bounded by `timeout_ms`.
    async fn navigate(&mut self, url: &str, timeout_ms: u64) -> Result<NavigationResult>;
    /// Evaluate `script` at the start of every document loaded in this context.
    async fn add_init_script(&self, script: &str) -> Result<()>;
    /// Expose `window.<name>(payload)` to pages; the returned stream yields
    /// each string payload the page passes to it, in call order.
    async fn add_binding(&self, name: &str) -> Result<BoxStream<'static, String>>;
    /// Close this context.
    async fn close(self: Box<Self>) -> Result<()>;
}
