//! Admin HTTP API
//!
//! JSON endpoints over the engine operations, for operators and for
//! operation workers that are not linked against the crate.

pub mod handlers;
pub mod middleware;
pub mod routes;
pub mod server;

pub use server::{ApiServer, AppState};
