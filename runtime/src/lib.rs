// Copyright 2026 VFat Loader Contributors
// SPDX-License-Identifier: Apache-2.0

//! vfat-loader runtime library: drives a browser across DeFi yield
//! dashboards and ingests the pool records they report.
//!
//! This library crate exposes the core modules for integration testing.

pub mod cli;
pub mod collab;
pub mod config;
pub mod ingest;
pub mod orchestrator;
pub mod progress;
pub mod renderer;
pub mod session;
pub mod targets;
