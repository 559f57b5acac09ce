//! API request handlers

pub mod health;
pub mod policy;
pub mod proxy;
pub mod rotation;
pub mod stats;
