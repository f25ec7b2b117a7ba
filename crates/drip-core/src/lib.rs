//! drip-core
//!
//! Claim-and-send engine for a cold-outreach mail queue.
//!
//! # Modules
//! - **domain**: records, identifiers, events, run summaries, errors
//! - **policy**: pure run policies (mix, window, pacing, rotation, retry, governor, suppression)
//! - **ports**: traits at the I/O seams (QueueStore, InboxRegistry, TelemetrySink, Transport, RunLock, Notifier, Clock)
//! - **impls**: in-memory and SQLite stores, file run lock, SMTP / dry-run transports, webhook notifier
//! - **app**: claim engine, eligibility filter, send orchestrator, reaper, status view
//! - **config**: `drip.toml`

pub mod app;
pub mod config;
pub mod domain;
pub mod impls;
pub mod policy;
pub mod ports;
