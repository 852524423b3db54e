// Copyright 2026 VFat Loader Contributors
// SPDX-License-Identifier: Apache-2.0

//! Target catalogue and selection.
//!
//! The catalogue lists every dashboard page the loader knows how to visit.
//! A [`Selection`] built from CLI flags narrows it to the targets of one run.
//! Order is stable: networks in [`Network::ALL`] order, protocols in
//! catalogue order within a network.

use crate::config::ConfigError;
use serde::Deserialize;
use std::collections::BTreeMap;
use vfat_core::{Network, Target};

/// Builtin protocol pages per network.
const BUILTIN: &[(Network, &[&str])] = &[
    (Network::Ethereum, &["sushiv2", "alcx"]),
    (Network::Arbitrum, &["sushi", "dodo"]),
];

/// Known targets, grouped by network.
#[derive(Debug, Clone, PartialEq)]
pub struct Catalogue {
    entries: Vec<Target>,
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct TargetEntry {
    network: Network,
    protocol_id: String,
    path: Option<String>,
}

impl Catalogue {
    pub fn builtin() -> Self {
        let entries = BUILTIN
            .iter()
            .flat_map(|(network, protocols)| {
                protocols.iter().map(move |p| Target::new(*network, *p))
            })
            .collect();
        Self { entries }
    }

    /// Parse a targets file: a JSON array of `{network, protocolId, path?}`.
    pub fn from_json(json: &str) -> Result<Self, ConfigError> {
        let raw: Vec<TargetEntry> =
            serde_json::from_str(json).map_err(|e| ConfigError::TargetsFile(e.to_string()))?;
        if raw.is_empty() {
            return Err(ConfigError::TargetsFile("no targets listed".to_string()));
        }

        let mut entries: Vec<Target> = raw
            .into_iter()
            .map(|e| match e.path {
                Some(path) => Target::with_path(e.network, e.protocol_id, &path),
                None => Target::new(e.network, e.protocol_id),
            })
            .collect();
        // Group by network; the sort is stable so file order survives within a network.
        entries.sort_by_key(|t| t.network);
        Ok(Self { entries })
    }

    pub fn targets(&self) -> &[Target] {
        &self.entries
    }

    fn contains(&self, network: Network, protocol: &str) -> bool {
        self.entries
            .iter()
            .any(|t| t.network == network && t.protocol_id == protocol)
    }

    /// Narrow the catalogue to the targets a selection asks for.
    pub fn select(&self, selection: &Selection) -> Result<Vec<Target>, ConfigError> {
        for (network, subset) in &selection.networks {
            for protocol in subset.iter().flatten() {
                if !self.contains(*network, protocol) {
                    return Err(ConfigError::UnknownProtocol {
                        network: *network,
                        protocol: protocol.clone(),
                    });
                }
            }
        }

        let network_selected = |target: &Target| {
            if selection.networks.is_empty() {
                return true;
            }
            match selection.networks.get(&target.network) {
                None => false,
                Some(None) => true,
                Some(Some(subset)) => subset.contains(&target.protocol_id),
            }
        };
        let mut selected: Vec<Target> = self
            .entries
            .iter()
            .filter(|t| network_selected(t))
            .cloned()
            .collect();

        if let Some(protocols) = &selection.protocols {
            for protocol in protocols {
                if !selected.iter().any(|t| &t.protocol_id == protocol) {
                    return Err(ConfigError::UnknownProtocolName(protocol.clone()));
                }
            }
            selected.retain(|t| protocols.contains(&t.protocol_id));
        }

        if selected.is_empty() {
            return Err(ConfigError::EmptySelection);
        }
        Ok(selected)
    }
}

/// Which targets a run should visit.
///
/// `networks` empty means every network. A network mapped to `None` selects
/// all of its protocols; `Some(list)` selects that subset.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Selection {
    pub networks: BTreeMap<Network, Option<Vec<String>>>,
    pub protocols: Option<Vec<String>>,
}

impl Selection {
    /// Add a per-network flag value. An empty value selects the whole network.
    pub fn network(mut self, network: Network, csv: &str) -> Self {
        let subset = parse_csv(csv);
        let entry = if subset.is_empty() { None } else { Some(subset) };
        self.networks.insert(network, entry);
        self
    }

    pub fn protocols(mut self, csv: &str) -> Self {
        self.protocols = Some(parse_csv(csv));
        self
    }
}

/// Split a comma separated list, dropping blanks.
pub fn parse_csv(csv: &str) -> Vec<String> {
    csv.split(',')
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .map(String::from)
        .collect()
}
