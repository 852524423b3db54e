// Copyright 2026 VFat Loader Contributors
// SPDX-License-Identifier: Apache-2.0

//! Ingestion: the client pages post yield records through, and the API
//! server plus SQLite store that receive them.

pub mod client;
pub mod server;
pub mod store;

pub use client::{IngestionClient, InsertError};
pub use server::{bind, router, serve};
pub use store::{IngestError, IngestStore, NewInfo, NewReward, NewToken};
