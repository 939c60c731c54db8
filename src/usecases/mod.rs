//! Use Cases Layer - Application Business Logic
//!
//! Orchestrates domain logic with port interfaces to implement
//! the oracle's core workflows. Only `crate::domain`, `crate::ports`
//! and `crate::config` are visible from here.
//!
//! Use cases:
//! - `Aggregator`: shared sampling loop over all markets
//! - `MarketPriceService`: per-market consensus and publication
//! - `PricingService`: startup wiring of sources and services

pub mod aggregator;
pub mod market_price_service;
pub mod pricing_service;

pub use aggregator::{Aggregator, AggregatorError, MarketFeedSet};
pub use market_price_service::MarketPriceService;
pub use pricing_service::PricingService;
