// Copyright 2026 VFat Loader Contributors
// SPDX-License-Identifier: Apache-2.0

//! Async client for the ingestion API, wrapping reqwest.
//!
//! Every insert is registered with the page's [`LoadTracker`] before any
//! field is resolved or any request is sent, so the tracker's attempt count
//! covers inserts that are still waiting on lazy page values.

use anyhow::{Context, Result};
use std::future::Future;
use std::time::Duration;
use vfat_core::{AddressError, LoadTracker, TrackerError, YieldRecord};

/// Why a single insert did not land. Logged by the tracker and counted as a
/// failed attempt; never retried.
#[derive(thiserror::Error, Debug)]
pub enum InsertError {
    #[error("record fields did not resolve: {0}")]
    Unresolved(String),

    #[error(transparent)]
    Address(#[from] AddressError),

    #[error("request failed: {0}")]
    Http(#[from] reqwest::Error),

    #[error("ingestion API answered {status}: {body}")]
    Status { status: u16, body: String },
}

/// HTTP client for `POST /vfat_infos/create`.
#[derive(Clone)]
pub struct IngestionClient {
    client: reqwest::Client,
    create_url: String,
}

impl IngestionClient {
    /// Create a client for the API rooted at `base_url`.
    pub fn new(base_url: &str, timeout: Duration) -> Result<Self> {
        let client = reqwest::Client::builder()
            .timeout(timeout)
            .build()
            .context("failed to build ingestion HTTP client")?;

        Ok(Self {
            client,
            create_url: format!("{}/vfat_infos/create", base_url.trim_end_matches('/')),
        })
    }

    pub fn create_url(&self) -> &str {
        &self.create_url
    }

    /// Post one record. Addresses are checked first; a malformed one fails
    /// without touching the network. Any non-2xx status is an error.
    pub async fn post(&self, record: &YieldRecord) -> Result<(), InsertError> {
        record.check_addresses()?;

        let resp = self.client.post(&self.create_url).json(record).send().await?;
        let status = resp.status();
        if !status.is_success() {
            let body = resp.text().await.unwrap_or_default();
            return Err(InsertError::Status {
                status: status.as_u16(),
                body,
            });
        }
        Ok(())
    }

    /// Reserve an attempt on `tracker`, then resolve `record` and post it in
    /// the background.
    ///
    /// Returns as soon as the attempt is counted. Only fails when the tracker
    /// is already sealed, in which case nothing is counted or sent.
    pub fn insert<F>(&self, tracker: &LoadTracker, record: F) -> Result<(), TrackerError>
    where
        F: Future<Output = Result<YieldRecord>> + Send + 'static,
    {
        let client = self.clone();
        tracker.submit_insert(async move {
            let record = record
                .await
                .map_err(|e| InsertError::Unresolved(format!("{e:#}")))?;
            client.post(&record).await
        })
    }

    /// [`insert`](Self::insert) for a record whose fields are already known.
    pub fn insert_record(
        &self,
        tracker: &LoadTracker,
        record: YieldRecord,
    ) -> Result<(), TrackerError> {
        self.insert(tracker, async move { Ok(record) })
    }
}
