// Copyright 2026 VFat Loader Contributors
// SPDX-License-Identifier: Apache-2.0

//! vfat-core: yield records, chain address conversion, and the per-page
//! load tracker shared by the loader runtime and the ingestion API.

pub mod address;
pub mod tracker;
pub mod types;

pub use address::{decode_address, AddressError};
pub use tracker::{LoadSnapshot, LoadTracker, TrackerError};
pub use types::*;
