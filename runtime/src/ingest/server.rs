// Copyright 2026 VFat Loader Contributors
// SPDX-License-Identifier: Apache-2.0

//! HTTP ingestion API.
//!
//! `POST /vfat_infos/create` accepts one yield record and stores it under the
//! batch the server was started for. Addresses are converted to raw bytes
//! here; any failure answers 500 with a fixed body.

use super::store::{IngestError, IngestStore, NewInfo, NewReward, NewToken};
use anyhow::Context;
use axum::body::Bytes;
use axum::extract::State;
use axum::http::StatusCode;
use axum::routing::{get, post};
use axum::Router;
use serde::Deserialize;
use serde_json::Value;
use std::net::SocketAddr;
use std::sync::Arc;
use tokio::net::TcpListener;
use tower_http::cors::{Any, CorsLayer};
use tracing::{info, warn};
use vfat_core::{decode_address, Batch};

struct AppState {
    store: Arc<IngestStore>,
    batch: Batch,
}

/// Body of `POST /vfat_infos/create`. Fields a page failed to fill arrive
/// missing or null and are rejected during conversion.
#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct CreateInfoRequest {
    staking_contract_address: Option<String>,
    staked_token_address: Option<String>,
    staked_token_symbol: Option<String>,
    staked_token_name: Option<String>,
    staked_usd: Option<f64>,
    staked_token_price: Option<f64>,
    staked_token_tvl: Option<f64>,
    /// Stored only when it is a string.
    #[serde(default)]
    pool_address: Option<Value>,
    #[serde(default)]
    rewards: Vec<CreateRewardRequest>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct CreateRewardRequest {
    reward_token_address: Option<String>,
    reward_token_symbol: Option<String>,
    reward_token_name: Option<String>,
    reward_daily_usd: Option<f64>,
    reward_token_price: Option<f64>,
    apr: Option<f64>,
}

impl CreateInfoRequest {
    fn decode(self) -> Result<NewInfo, IngestError> {
        let pool = match &self.pool_address {
            Some(Value::String(pool)) => Some(decode_address(Some(pool))?),
            _ => None,
        };
        let rewards = self
            .rewards
            .into_iter()
            .map(|r| {
                Ok(NewReward {
                    token: NewToken {
                        address: decode_address(r.reward_token_address.as_deref())?,
                        symbol: r.reward_token_symbol,
                        name: r.reward_token_name,
                    },
                    daily_usd: r.reward_daily_usd,
                    token_price: r.reward_token_price,
                    apr: r.apr,
                })
            })
            .collect::<Result<Vec<_>, IngestError>>()?;

        Ok(NewInfo {
            staking_contract: decode_address(self.staking_contract_address.as_deref())?,
            pool,
            staked_token: NewToken {
                address: decode_address(self.staked_token_address.as_deref())?,
                symbol: self.staked_token_symbol,
                name: self.staked_token_name,
            },
            staked_usd: self.staked_usd,
            staked_token_price: self.staked_token_price,
            staked_token_tvl: self.staked_token_tvl,
            rewards,
        })
    }
}

/// Build the router, with permissive CORS so dashboard pages can post.
pub fn router(store: Arc<IngestStore>, batch: Batch) -> Router {
    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods(Any)
        .allow_headers(Any);

    Router::new()
        .route("/", get(hello))
        .route("/vfat_infos/create", post(create_info))
        .layer(cors)
        .with_state(Arc::new(AppState { store, batch }))
}

/// Bind the API port on localhost.
pub async fn bind(port: u16) -> anyhow::Result<TcpListener> {
    let addr = SocketAddr::from(([127, 0, 0, 1], port));
    TcpListener::bind(addr)
        .await
        .with_context(|| format!("failed to bind ingestion API on {addr}"))
}

/// Serve the API until the listener fails. Shut down by dropping the future.
pub async fn serve(listener: TcpListener, store: Arc<IngestStore>, batch: Batch) -> anyhow::Result<()> {
    if let Ok(addr) = listener.local_addr() {
        info!("Loader listening on http://{addr} (batch {batch})");
    }
    axum::serve(listener, router(store, batch))
        .await
        .context("ingestion API stopped")
}

async fn hello() -> &'static str {
    "Hello World!"
}

async fn create_info(State(state): State<Arc<AppState>>, body: Bytes) -> (StatusCode, &'static str) {
    match store_info(&state, &body).await {
        Ok((id, rewards)) => {
            info!("Created vfat_info: {id}, {rewards} rewards added");
            (StatusCode::OK, "Created vfat_info")
        }
        Err(e) => {
            warn!("Failed to create vfat_info: {e}");
            (StatusCode::INTERNAL_SERVER_ERROR, "Failed to create vfat_info")
        }
    }
}

async fn store_info(state: &Arc<AppState>, body: &[u8]) -> Result<(i64, usize), IngestError> {
    let request: CreateInfoRequest =
        serde_json::from_slice(body).map_err(|e| IngestError::Body(e.to_string()))?;
    let info = request.decode()?;
    let rewards = info.rewards.len();

    let store = Arc::clone(&state.store);
    let batch = state.batch;
    let id = tokio::task::spawn_blocking(move || store.insert_info(batch, &info))
        .await
        .map_err(|e| IngestError::Task(e.to_string()))??;
    Ok((id, rewards))
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    async fn start(store: Arc<IngestStore>, batch: Batch) -> String {
        let listener = bind(0).await.unwrap();
        let addr = listener.local_addr().unwrap();
        tokio::spawn(serve(listener, store, batch));
        format!("http://{addr}")
    }

    fn body() -> Value {
        json!({
            "stakingContractAddress": "0xc2edad668740f1aa35e4d8f227fb8e17dca888cd",
            "stakedTokenAddress": "0x795065dcc9f64b5614c407a6efdc400da6221fb0",
            "stakedTokenSymbol": "SLP",
            "stakedTokenName": "SUSHI-WETH",
            "stakedUsd": 1520.75,
            "stakedTokenPrice": 31.2,
            "stakedTokenTvl": 2_000_000.0,
            "poolAddress": 12,
            "rewards": [{
                "rewardTokenAddress": "0x6b3595068778dd592e39a122f4f5a5cf09c90fe2",
                "rewardTokenSymbol": "SUSHI",
                "rewardTokenName": "SushiToken",
                "rewardDailyUsd": 80.0,
                "rewardTokenPrice": 1.3,
                "apr": 19.2
            }]
        })
    }

    #[tokio::test]
    async fn test_hello() {
        let store = Arc::new(IngestStore::open_in_memory().unwrap());
        let url = start(store, Batch::test()).await;
        let text = reqwest::get(&url).await.unwrap().text().await.unwrap();
        assert_eq!(text, "Hello World!");
    }

    #[tokio::test]
    async fn test_create_info() {
        let store = Arc::new(IngestStore::open_in_memory().unwrap());
        let batch = store.create_batch().unwrap();
        let url = start(Arc::clone(&store), batch).await;

        let resp = reqwest::Client::new()
            .post(format!("{url}/vfat_infos/create"))
            .json(&body())
            .send()
            .await
            .unwrap();
        assert_eq!(resp.status(), 200);
        assert_eq!(resp.text().await.unwrap(), "Created vfat_info");
        assert_eq!(store.info_count(batch).unwrap(), 1);
        assert_eq!(store.token_count().unwrap(), 2);
    }

    #[tokio::test]
    async fn test_create_info_failures_answer_500() {
        let store = Arc::new(IngestStore::open_in_memory().unwrap());
        let batch = store.ensure_test_batch().unwrap();
        let url = start(Arc::clone(&store), batch).await;
        let client = reqwest::Client::new();

        let mut missing = body();
        missing["stakedTokenAddress"] = Value::Null;
        let mut bad_reward = body();
        bad_reward["rewards"][0]["rewardTokenAddress"] = json!("0xnothex");
        let mut bad_pool = body();
        bad_pool["poolAddress"] = json!("deadbeef");

        for payload in [missing, bad_reward, bad_pool] {
            let resp = client
                .post(format!("{url}/vfat_infos/create"))
                .json(&payload)
                .send()
                .await
                .unwrap();
            assert_eq!(resp.status(), 500);
            assert_eq!(resp.text().await.unwrap(), "Failed to create vfat_info");
        }

        let resp = client
            .post(format!("{url}/vfat_infos/create"))
            .body("not json")
            .send()
            .await
            .unwrap();
        assert_eq!(resp.status(), 500);
        assert_eq!(store.info_count(batch).unwrap(), 0);
    }

    #[tokio::test]
    async fn test_unknown_batch_answers_500() {
        let store = Arc::new(IngestStore::open_in_memory().unwrap());
        let url = start(store, Batch::issued(7).unwrap()).await;
        let resp = reqwest::Client::new()
            .post(format!("{url}/vfat_infos/create"))
            .json(&body())
            .send()
            .await
            .unwrap();
        assert_eq!(resp.status(), 500);
    }

    #[test]
    fn test_pool_address_only_when_string() {
        let request: CreateInfoRequest = serde_json::from_value(body()).unwrap();
        assert_eq!(request.decode().unwrap().pool, None);

        let mut with_pool = body();
        with_pool["poolAddress"] = json!("0x0102");
        let request: CreateInfoRequest = serde_json::from_value(with_pool).unwrap();
        assert_eq!(request.decode().unwrap().pool, Some(vec![0x01, 0x02]));
    }
}
