//! Depot - Dependency-aware resource pack cache
//!
//! Loads pack images and the items inside them on demand, deduplicating
//! concurrent requests, refcounting entries across the dependency graph,
//! and keeping zero-refcount entries warm for a configurable window.

pub mod cache;
pub mod cli;
pub mod config;
pub mod driver;
pub mod error;
pub mod loader;
pub mod manifest;
pub mod registry;
pub mod telemetry;

pub use error::{DepotError, DepotResult};
pub use registry::Registry;
