#![doc = "release-mirror-core: reconciliation engine for mirroring GitHub release artifacts into a bucket."]

//! This crate holds every piece of mirroring logic: configuration parsing,
//! platform classification, the version store, the release fetcher, the
//! artifact syncer, the per-repository reconciler and the run orchestrator.
//! The CLI crate only wires concrete backends to these components.
//!
//! # Usage
//! Construct a [`orchestrator::SyncOrchestrator`] from a [`config::MirrorConfig`],
//! a [`contract::ReleaseSource`] and the bucket / key-value backends, then call
//! [`orchestrator::SyncOrchestrator::run_sync`] or drive it through
//! [`schedule::ScheduledTrigger`].

pub mod artifact;
pub mod config;
pub mod contract;
pub mod error;
pub mod fs;
pub mod github;
pub mod memory;
pub mod orchestrator;
pub mod ownership;
pub mod platform;
pub mod progress;
pub mod schedule;
pub mod synchronise;
pub mod version_store;

pub use error::{MirrorError, Result, StoreError};
