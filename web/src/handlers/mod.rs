//! HTTP request handlers.
//!
//! This module contains all HTTP handlers organized by domain.

pub mod allocations;
pub mod health;
pub mod intents;
pub mod redemptions;

// Re-export common handler utilities
pub use health::health_check;
