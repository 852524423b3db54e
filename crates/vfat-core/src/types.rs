// Copyright 2026 VFat Loader Contributors
// SPDX-License-Identifier: Apache-2.0

//! Core data types for scrape targets, batches, and yield records.

use crate::address::{decode_address, AddressError};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// Chain a dashboard page reports on.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Network {
    Ethereum,
    Arbitrum,
}

impl Network {
    /// All networks, in the order a run visits them.
    pub const ALL: [Network; 2] = [Network::Ethereum, Network::Arbitrum];

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Ethereum => "ethereum",
            Self::Arbitrum => "arbitrum",
        }
    }
}

impl fmt::Display for Network {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Network {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "ethereum" | "eth" => Ok(Self::Ethereum),
            "arbitrum" | "arb" => Ok(Self::Arbitrum),
            other => Err(format!("unknown network '{other}'")),
        }
    }
}

/// One (network, protocol) dashboard page the orchestrator visits.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Target {
    pub network: Network,
    pub protocol_id: String,
    /// Path relative to the dashboard root, always starting with `/`.
    pub path: String,
}

impl Target {
    /// Build a target with the conventional dashboard path: mainnet pages
    /// live at the root, every other network under its own prefix.
    pub fn new(network: Network, protocol_id: impl Into<String>) -> Self {
        let protocol_id = protocol_id.into();
        let path = match network {
            Network::Ethereum => format!("/{protocol_id}"),
            other => format!("/{other}/{protocol_id}"),
        };
        Self {
            network,
            protocol_id,
            path,
        }
    }

    /// Build a target with an explicit page path.
    pub fn with_path(network: Network, protocol_id: impl Into<String>, path: &str) -> Self {
        let path = if path.starts_with('/') {
            path.to_string()
        } else {
            format!("/{path}")
        };
        Self {
            network,
            protocol_id: protocol_id.into(),
            path,
        }
    }
}

impl fmt::Display for Target {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}", self.network, self.protocol_id)
    }
}

/// Persistence grouping for every record produced by one run.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Batch {
    id: i64,
}

impl Batch {
    /// Sentinel id used when nothing should be persisted.
    pub const TEST_ID: i64 = -1;

    /// The test-mode batch.
    pub fn test() -> Self {
        Self { id: Self::TEST_ID }
    }

    /// A batch issued by the store. Negative ids other than the sentinel
    /// are rejected.
    pub fn issued(id: i64) -> Option<Self> {
        (id >= 0 || id == Self::TEST_ID).then_some(Self { id })
    }

    pub fn id(&self) -> i64 {
        self.id
    }

    pub fn is_test(&self) -> bool {
        self.id == Self::TEST_ID
    }
}

impl fmt::Display for Batch {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.id)
    }
}

/// One reward stream paid out by a staking pool.
///
/// Only the token address is required. Pages report `NaN` prices as `null`
/// and leave unresolved names out entirely; those records are still stored.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RewardRecord {
    pub reward_token_address: String,
    pub reward_token_symbol: Option<String>,
    pub reward_token_name: Option<String>,
    pub reward_daily_usd: Option<f64>,
    pub reward_token_price: Option<f64>,
    pub apr: Option<f64>,
}

/// A scraped staking pool, as posted to the ingestion API. Addresses are
/// the only fields a record cannot do without.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct YieldRecord {
    pub staking_contract_address: String,
    pub staked_token_address: String,
    pub staked_token_symbol: Option<String>,
    pub staked_token_name: Option<String>,
    pub staked_usd: Option<f64>,
    pub staked_token_price: Option<f64>,
    pub staked_token_tvl: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub pool_address: Option<String>,
    #[serde(default)]
    pub rewards: Vec<RewardRecord>,
}

impl YieldRecord {
    /// Decode every chain address in the record, failing on the first
    /// malformed one. Callers run this before spending a network round trip.
    pub fn check_addresses(&self) -> Result<(), AddressError> {
        decode_address(Some(&self.staking_contract_address))?;
        decode_address(Some(&self.staked_token_address))?;
        if let Some(pool) = &self.pool_address {
            decode_address(Some(pool))?;
        }
        for reward in &self.rewards {
            decode_address(Some(&reward.reward_token_address))?;
        }
        Ok(())
    }
}
