//! Relaypool - upstream proxy pool
//!
//! Picks an upstream proxy for each automated operation and keeps the pool
//! healthy in the background.
//!
//! ## Features
//!
//! - Per-operation selection policies (protocol set, reputation floor, country preference)
//! - Selection strategies: round-robin, least-recently-used, weighted random,
//!   best reputation, fastest response, random
//! - Optional hard restriction to trusted providers
//! - TCP reachability monitoring with rolling success rates and automatic deactivation
//! - Daily rotation: stale cleanup, refresh from HTTP proxy lists, health sweep
//! - PostgreSQL or in-memory store, JSON admin API

pub mod api;
pub mod balancer;
pub mod config;
pub mod database;
pub mod error;
pub mod models;
pub mod pool;
pub mod repository;
pub mod services;

pub use config::Config;
pub use database::Database;
pub use error::{PoolError, Result};
pub use pool::ProxyPool;
