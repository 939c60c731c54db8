//! Market Price Oracle - Library Root
//!
//! Composite index prices from multiple exchange feeds, cross-validated
//! by a per-market consensus algorithm. Re-exports all modules for the
//! binary, integration tests and benchmarks.

pub mod adapters;
pub mod config;
pub mod domain;
pub mod ports;
pub mod usecases;
