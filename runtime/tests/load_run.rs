// Copyright 2026 VFat Loader Contributors
// SPDX-License-Identifier: Apache-2.0

//! End-to-end load runs: the orchestrator drives a replayed page whose bridge
//! messages flow through the real ingestion client into an in-process
//! ingestion API backed by SQLite.

use anyhow::Result;
use async_trait::async_trait;
use serde_json::{json, Value};
use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};
use tokio::sync::watch;
use vfat_core::{Batch, LoadTracker, Network, Target};
use vfat_loader::config::{InitFailurePolicy, RetryPolicy};
use vfat_loader::ingest::{self, IngestStore, IngestionClient};
use vfat_loader::orchestrator::{Orchestrator, TargetStatus};
use vfat_loader::progress::{self, AttemptStage, RunEventKind};
use vfat_loader::session::{BridgeMessage, PageBridge, PageSession};

/// How a replayed page behaves on one navigation.
#[derive(Clone)]
enum Page {
    /// Navigation never finishes.
    Unreachable,
    /// The page initializes, submits every record, calls completeLoad, and
    /// delivers the records afterwards.
    Loads(Vec<Value>),
    /// The page initializes and submits but never completes.
    Stalls,
}

struct ReplaySession {
    bridge: Arc<Mutex<PageBridge>>,
    tracker: watch::Receiver<Option<LoadTracker>>,
    pages: HashMap<String, Vec<Page>>,
    navigations: Vec<String>,
}

impl ReplaySession {
    fn new(client: IngestionClient) -> Self {
        let bridge = PageBridge::new(client);
        let tracker = bridge.subscribe();
        Self {
            bridge: Arc::new(Mutex::new(bridge)),
            tracker,
            pages: HashMap::new(),
            navigations: Vec::new(),
        }
    }

    fn page(mut self, url: &str, pages: Vec<Page>) -> Self {
        self.pages.insert(url.to_string(), pages);
        self
    }

    fn send(&self, message: BridgeMessage) {
        self.bridge.lock().unwrap().handle(message);
    }
}

#[async_trait]
impl PageSession for ReplaySession {
    async fn navigate(&mut self, url: &str, _timeout: Duration) -> Result<()> {
        self.navigations.push(url.to_string());
        self.bridge.lock().unwrap().reset();

        let attempt = self.navigations.iter().filter(|u| *u == url).count();
        let page = self
            .pages
            .get(url)
            .and_then(|pages| pages.get(attempt - 1))
            .cloned()
            .unwrap_or(Page::Unreachable);

        match page {
            Page::Unreachable => std::future::pending::<Result<()>>().await,
            Page::Stalls => {
                self.send(BridgeMessage::Init {
                    load_wait_seconds: None,
                });
                self.send(BridgeMessage::Submit { id: 0 });
                Ok(())
            }
            Page::Loads(records) => {
                self.send(BridgeMessage::Init {
                    load_wait_seconds: None,
                });
                for id in 0..records.len() as u64 {
                    self.send(BridgeMessage::Submit { id });
                }
                self.send(BridgeMessage::Complete);

                // Lazy fields resolve after completeLoad, in reverse order.
                let bridge = Arc::clone(&self.bridge);
                tokio::spawn(async move {
                    for (id, record) in records.into_iter().enumerate().rev() {
                        tokio::time::sleep(Duration::from_millis(20)).await;
                        bridge.lock().unwrap().handle(BridgeMessage::Record {
                            id: id as u64,
                            record,
                        });
                    }
                });
                Ok(())
            }
        }
    }

    fn tracker(&self) -> watch::Receiver<Option<LoadTracker>> {
        self.tracker.clone()
    }

    async fn close(self: Box<Self>) -> Result<()> {
        Ok(())
    }
}

fn record(staking: &str, reward_token: &str) -> Value {
    json!({
        "stakingContractAddress": staking,
        "stakedTokenAddress": "0x795065dcc9f64b5614c407a6efdc400da6221fb0",
        "stakedTokenSymbol": "SLP",
        "stakedTokenName": "SUSHI-WETH",
        "stakedUsd": 1520.75,
        "stakedTokenPrice": 31.2,
        "stakedTokenTvl": 2000000.0,
        "rewards": [{
            "rewardTokenAddress": reward_token,
            "rewardTokenSymbol": "SUSHI",
            "rewardTokenName": "SushiToken",
            "rewardDailyUsd": 80.0,
            "rewardTokenPrice": 1.3,
            "apr": 19.2
        }]
    })
}

const SUSHI: &str = "0x6b3595068778dd592e39a122f4f5a5cf09c90fe2";

fn alpha_records() -> Vec<Value> {
    vec![
        record("0xc2edad668740f1aa35e4d8f227fb8e17dca888cd", SUSHI),
        record("0xef0881ec094552b2e128cf945ef17a6752b4ec5d", SUSHI),
        record("0x0000000000000000000000000000000000000001", SUSHI),
        // Never reaches the API.
        record("undefined", SUSHI),
        record("0x0000000000000000000000000000000000000002", SUSHI),
    ]
}

const DASHBOARD: &str = "http://localhost:8000";

async fn start_api() -> (Arc<IngestStore>, Batch, IngestionClient) {
    let store = Arc::new(IngestStore::open_in_memory().unwrap());
    let batch = store.create_batch().unwrap();
    let listener = ingest::bind(0).await.unwrap();
    let addr = listener.local_addr().unwrap();
    tokio::spawn(ingest::serve(listener, Arc::clone(&store), batch));

    let client =
        IngestionClient::new(&format!("http://{addr}"), Duration::from_secs(5)).unwrap();
    (store, batch, client)
}

fn policy(max_retries: u32, cooldown: Duration) -> RetryPolicy {
    RetryPolicy {
        max_retries,
        cooldown,
        navigation_timeout: Duration::from_millis(200),
        init_timeout: Duration::from_millis(200),
        load_timeout: Duration::from_millis(500),
        init_failure: InitFailurePolicy::Retry,
    }
}

#[tokio::test]
async fn test_retries_then_loads_records() {
    let (store, batch, client) = start_api().await;
    let alpha = Target::with_path(Network::Ethereum, "alpha", "/alpha");
    let mut session = ReplaySession::new(client).page(
        "http://localhost:8000/alpha",
        vec![Page::Unreachable, Page::Unreachable, Page::Loads(alpha_records())],
    );
    let (tx, mut rx) = progress::channel();

    let started = Instant::now();
    let report = Orchestrator::new(policy(2, Duration::from_secs(1)), DASHBOARD)
        .with_events(tx)
        .run(&mut session, &[alpha.clone()])
        .await;

    assert!(started.elapsed() >= Duration::from_secs(2));
    assert_eq!(session.navigations.len(), 3);

    let outcome = &report.outcomes[0];
    assert_eq!(outcome.status, TargetStatus::Succeeded);
    assert_eq!(outcome.attempts, 3);
    let snapshot = outcome.snapshot.unwrap();
    assert_eq!(snapshot.success_count, 4);
    assert_eq!(snapshot.attempt_count, 5);
    assert!(snapshot.load_completed);

    let mut retries = 0;
    while let Ok(event) = rx.try_recv() {
        if let RunEventKind::AttemptFailed {
            stage, will_retry, ..
        } = event.event
        {
            assert_eq!(stage, AttemptStage::Navigation);
            assert!(will_retry);
            retries += 1;
        }
    }
    assert_eq!(retries, 2);

    assert_eq!(store.info_count(batch).unwrap(), 4);
    // Staked token and reward token are shared by every record.
    assert_eq!(store.token_count().unwrap(), 2);
}

#[tokio::test]
async fn test_stalled_page_does_not_stop_the_run() {
    let (store, batch, client) = start_api().await;
    let stalled = Target::with_path(Network::Ethereum, "stalled", "/stalled");
    let healthy = Target::with_path(Network::Arbitrum, "healthy", "/arbitrum/healthy");
    let mut session = ReplaySession::new(client)
        .page("http://localhost:8000/stalled", vec![Page::Stalls])
        .page(
            "http://localhost:8000/arbitrum/healthy",
            vec![Page::Loads(vec![record(
                "0xc2edad668740f1aa35e4d8f227fb8e17dca888cd",
                SUSHI,
            )])],
        );

    let report = Orchestrator::new(policy(0, Duration::from_millis(10)), DASHBOARD)
        .run(&mut session, &[stalled, healthy])
        .await;

    assert_eq!(report.outcomes[0].status, TargetStatus::Exhausted);
    assert_eq!(report.outcomes[1].status, TargetStatus::Succeeded);
    assert_eq!(report.succeeded(), 1);
    assert_eq!(report.failed(), 1);
    assert_eq!(store.info_count(batch).unwrap(), 1);
}

#[tokio::test]
async fn test_record_with_missing_values_is_stored() {
    let (store, batch, client) = start_api().await;
    let gappy = Target::with_path(Network::Ethereum, "gappy", "/gappy");

    let mut nan_price = record("0xc2edad668740f1aa35e4d8f227fb8e17dca888cd", SUSHI);
    nan_price["stakedUsd"] = Value::Null;
    nan_price["rewards"][0]["apr"] = Value::Null;
    if let Some(fields) = nan_price.as_object_mut() {
        fields.remove("stakedTokenName");
    }

    let mut session = ReplaySession::new(client).page(
        "http://localhost:8000/gappy",
        vec![Page::Loads(vec![nan_price])],
    );

    let report = Orchestrator::new(policy(0, Duration::from_millis(10)), DASHBOARD)
        .run(&mut session, &[gappy])
        .await;

    let snapshot = report.outcomes[0].snapshot.unwrap();
    assert_eq!(snapshot.attempt_count, 1);
    assert_eq!(snapshot.success_count, 1);
    assert_eq!(store.info_count(batch).unwrap(), 1);
}
