//! Domain layer - Core price types and the consensus algorithm.
//!
//! Pure logic for the market price oracle. No I/O and no async here
//! (hexagonal architecture inner ring); everything is testable in isolation.

pub mod consensus;
pub mod price;

// Re-export core types for convenience
pub use consensus::{Accepted, ConsensusRejection, ConsensusState};
pub use price::{ExchangeId, InstId, MarketId, PriceTime, Ticker};
