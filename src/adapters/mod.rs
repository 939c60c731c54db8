//! Adapters Layer - Hexagonal Architecture Outer Ring
//!
//! Implements the port traits defined in `crate::ports` with concrete
//! external dependencies (WebSockets, HTTP clients, Prometheus).
//! Each sub-module groups adapters by infrastructure concern.
//!
//! Adapter categories:
//! - `feeds`: exchange codecs, streaming and polling connectors, price stores
//! - `metrics`: Prometheus metrics export and health checks
//! - `sinks`: downstream consumers of accepted index prices

pub mod feeds;
pub mod metrics;
pub mod sinks;
