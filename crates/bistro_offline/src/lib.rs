//! # Bistro Offline
//!
//! Offline-first data layer for a restaurant review app.
//!
//! This crate provides:
//! - [`OfflineClient`] - the context object the UI talks to
//! - [`EntityCache`] - typed reads and writes over the local store
//! - [`FetchOrchestrator`] - cache-first reads that fall back to the network
//!   only when the cache is empty
//! - [`OfflineQueue`] - a durable queue of unconfirmed writes, replayed in
//!   submission order
//! - [`network`] - the API trait with HTTP and scriptable implementations,
//!   plus a GET response cache
//! - [`Connectivity`] - the online/offline flag that triggers replay
//!
//! Writes never fail just because the network is down: they come back as
//! [`WriteOutcome::Deferred`] once the intent is safely queued.

#![deny(unsafe_code)]
#![warn(missing_docs)]

mod cache;
mod client;
mod config;
mod connectivity;
mod error;
mod fetch;
mod model;
pub mod network;
mod queue;
pub mod schema;

pub use cache::{Entity, EntityCache};
pub use client::{OfflineClient, WriteOutcome};
pub use config::{ClientConfig, ReplayConfig, DEFAULT_BASE_URL, DEFAULT_DB_NAME};
pub use connectivity::Connectivity;
pub use error::{FetchError, NetworkError, NetworkResult, OfflineError, OfflineResult, WriteDeferred};
pub use fetch::{FetchOrchestrator, ANY};
pub use model::{LatLng, Mutation, NewReview, QueuedMutation, Restaurant, Review};
pub use network::{HttpApi, MockApi, RestaurantApi};
pub use queue::{Confirmation, OfflineQueue, ReplayFailure, ReplayReport};
