// Copyright 2026 VFat Loader Contributors
// SPDX-License-Identifier: Apache-2.0

//! Page↔driver bridge.
//!
//! Dashboard pages call `window.vfatLoader.initLoadTracker()` and then use
//! the returned `loadTracker` the way they always have. The shim below turns
//! each call into a JSON message on a CDP binding; [`PageBridge`] replays
//! those messages against a Rust [`LoadTracker`] and the ingestion client.
//!
//! `submit` is sent synchronously from `insert`, before the page awaits any
//! of the record's promise-valued fields, so the attempt is counted on the
//! driver side in the same order the page issued it. The record itself
//! follows later as `record` (or `abandon` when a field rejects).

use crate::ingest::IngestionClient;
use anyhow::anyhow;
use serde::Deserialize;
use serde_json::Value;
use std::collections::HashMap;
use std::time::Duration;
use tokio::sync::{oneshot, watch};
use tracing::{debug, info, warn};
use vfat_core::{LoadTracker, YieldRecord};

/// Name of the page-global function the shim calls.
pub const BINDING_NAME: &str = "__vfatBridge";

/// Installed on every new document before page scripts run.
pub const BRIDGE_SCRIPT: &str = r#"(() => {
  if (window.vfatLoader) return;
  const send = (message) => window.__vfatBridge(JSON.stringify(message));
  let nextId = 0;

  const resolveReward = async (reward) => {
    const r = await reward;
    return {
      rewardTokenAddress: await r.rewardTokenAddress,
      rewardTokenSymbol: await r.rewardTokenSymbol,
      rewardTokenName: await r.rewardTokenName,
      rewardDailyUsd: await r.rewardDailyUsd,
      rewardTokenPrice: await r.rewardTokenPrice,
      apr: await r.apr,
    };
  };

  const resolveRecord = async (fields) => {
    const poolAddress = await fields.poolAddress;
    const record = {
      stakingContractAddress: await fields.stakingContractAddress,
      stakedTokenAddress: await fields.stakedTokenAddress,
      stakedTokenSymbol: await fields.stakedTokenSymbol,
      stakedTokenName: await fields.stakedTokenName,
      stakedUsd: await fields.stakedUsd,
      stakedTokenPrice: await fields.stakedTokenPrice,
      stakedTokenTvl: await fields.stakedTokenTvl,
      rewards: await Promise.all((await fields.rewards || []).map(resolveReward)),
    };
    if (typeof poolAddress === "string") record.poolAddress = poolAddress;
    return record;
  };

  window.vfatLoader = {
    initLoadTracker(options = {}) {
      const init = { kind: "init" };
      if (typeof options.loadWait === "number") init.loadWaitSeconds = options.loadWait;
      send(init);

      const tracker = {
        mainCompleted: false,
        attemptCount: 0,
        isReadyForInserts() {
          return !this.mainCompleted;
        },
        insert(fields) {
          if (this.mainCompleted) {
            console.warn("vfat loader: insert after completeLoad ignored");
            return;
          }
          const id = nextId++;
          this.attemptCount += 1;
          send({ kind: "submit", id });
          resolveRecord(fields).then(
            (record) => send({ kind: "record", id, record }),
            (error) => send({ kind: "abandon", id, reason: String(error) }),
          );
        },
        async completeLoad() {
          if (this.mainCompleted) return;
          this.mainCompleted = true;
          send({ kind: "complete" });
        },
      };
      window.loadTracker = tracker;
      return tracker;
    },
  };
})();"#;

/// A message the shim sends over the binding.
#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(tag = "kind", rename_all = "camelCase")]
pub enum BridgeMessage {
    Init {
        #[serde(rename = "loadWaitSeconds", default)]
        load_wait_seconds: Option<f64>,
    },
    Submit {
        id: u64,
    },
    Record {
        id: u64,
        record: Value,
    },
    Abandon {
        id: u64,
        reason: String,
    },
    Complete,
}

type LazyRecord = oneshot::Sender<Result<Value, String>>;

/// Driver-side state for the current document.
pub struct PageBridge {
    client: IngestionClient,
    slot: watch::Sender<Option<LoadTracker>>,
    lazy: HashMap<u64, LazyRecord>,
}

impl PageBridge {
    pub fn new(client: IngestionClient) -> Self {
        let (slot, _) = watch::channel(None);
        Self {
            client,
            slot,
            lazy: HashMap::new(),
        }
    }

    pub fn subscribe(&self) -> watch::Receiver<Option<LoadTracker>> {
        self.slot.subscribe()
    }

    /// Forget the current document. Records it never delivered count as
    /// failed inserts on its tracker.
    pub fn reset(&mut self) {
        self.slot.send_replace(None);
        self.lazy.clear();
    }

    /// Handle one raw binding payload. Malformed payloads are logged and
    /// dropped.
    pub fn handle_payload(&mut self, payload: &str) {
        match serde_json::from_str::<BridgeMessage>(payload) {
            Ok(message) => self.handle(message),
            Err(e) => warn!("ignoring malformed bridge message: {e}"),
        }
    }

    pub fn handle(&mut self, message: BridgeMessage) {
        match message {
            BridgeMessage::Init { load_wait_seconds } => self.init(load_wait_seconds),
            BridgeMessage::Submit { id } => self.submit(id),
            BridgeMessage::Record { id, record } => self.resolve(id, Ok(record)),
            BridgeMessage::Abandon { id, reason } => self.resolve(id, Err(reason)),
            BridgeMessage::Complete => self.complete(),
        }
    }

    fn current(&self) -> Option<LoadTracker> {
        self.slot.borrow().clone()
    }

    fn init(&mut self, load_wait_seconds: Option<f64>) {
        if self.current().is_some() {
            warn!("page initialized its load tracker twice; keeping the first");
            return;
        }
        let load_wait = load_wait_seconds.and_then(|s| Duration::try_from_secs_f64(s).ok());
        debug!(?load_wait, "load tracker initialized");
        self.slot.send_replace(Some(LoadTracker::new(load_wait)));
    }

    fn submit(&mut self, id: u64) {
        let Some(tracker) = self.current() else {
            warn!(id, "insert submitted before the load tracker was initialized");
            return;
        };

        let (tx, rx) = oneshot::channel::<Result<Value, String>>();
        let record = async move {
            let value = rx
                .await
                .map_err(|_| anyhow!("page went away before the record resolved"))?
                .map_err(|reason| anyhow!("page failed to resolve the record: {reason}"))?;
            Ok(serde_json::from_value::<YieldRecord>(value)?)
        };

        match self.client.insert(&tracker, record) {
            Ok(()) => {
                self.lazy.insert(id, tx);
            }
            Err(e) => warn!(id, "insert rejected: {e}"),
        }
    }

    fn resolve(&mut self, id: u64, record: Result<Value, String>) {
        match self.lazy.remove(&id) {
            Some(tx) => {
                let _ = tx.send(record);
            }
            None => debug!(id, "record for an unknown insert dropped"),
        }
    }

    fn complete(&mut self) {
        let Some(tracker) = self.current() else {
            warn!("completeLoad called before the load tracker was initialized");
            return;
        };
        tokio::spawn(async move {
            match tracker.complete_load().await {
                Ok(snapshot) => info!(
                    attempts = snapshot.attempt_count,
                    successes = snapshot.success_count,
                    "page load settled"
                ),
                Err(e) => warn!("{e}"),
            }
        });
    }
}
