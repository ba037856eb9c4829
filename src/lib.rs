//! # Evidence Harness
//!
//! Signed evidence ingestion and windowed metadata extraction.
//!
//! A browser extension captures page fragments and posts them in signed
//! batches. The gateway authenticates each batch, attributes it to an
//! account (trust on first use) and stores one evidence row per packet. A
//! separate scheduler process polls for new evidence, routes every row to an
//! extraction variant and deep-merges the results into one metadata
//! document per capture session.
//!
//! ## Architecture
//!
//! ```text
//! ┌───────────┐   ┌──────────┐   ┌──────────┐   ┌───────────┐
//! │  Client   │──▶│ Gateway  │──▶│  SQLite  │◀──│ Scheduler │
//! │ (signed)  │   │ (axum)   │   │ evidence │   │ dispatch  │
//! └───────────┘   └────┬─────┘   │ metadata │   │ + commit  │
//!                      │         └──────────┘   └───────────┘
//!                      ▼
//!                 mirror ring ──▶ evd mirror ──▶ second gateway
//! ```
//!
//! ## Quick Start
//!
//! ```bash
//! evd init                  # create database
//! evd serve                 # run the gateway
//! evd parse                 # run the scheduler
//! evd parse --id <META> --repeat
//! evd get <META>
//! ```
//!
//! ## Modules
//!
//! | Module | Purpose |
//! |--------|---------|
//! | [`config`] | TOML configuration parsing |
//! | [`models`] | Core data types |
//! | [`error`] | Ingestion and extraction error taxonomy |
//! | [`identity`] | Deterministic ids and account resolution |
//! | [`signature`] | Ed25519 batch signature verification |
//! | [`gateway`] | Batch ingestion and the mirror ring |
//! | [`dispatch`] | URL classification and extractor routing |
//! | [`extractors`] | Built-in extraction variants |
//! | [`persist`] | Ordered commit of extraction results |
//! | [`scheduler`] | Windowed polling loop |
//! | [`store`] | Storage trait and backends |
//! | [`server`] | HTTP gateway |
//! | [`mirror`] | Replication utility |
//! | [`get`] | Metadata lookup |
//! | [`stats`] | Database statistics |
//! | [`db`] | Database connection |
//! | [`migrate`] | Schema migrations |

pub mod config;
pub mod db;
pub mod dispatch;
pub mod error;
pub mod extractors;
pub mod gateway;
pub mod get;
pub mod identity;
pub mod migrate;
pub mod mirror;
pub mod models;
pub mod persist;
pub mod scheduler;
pub mod server;
pub mod signature;
pub mod stats;
pub mod store;
