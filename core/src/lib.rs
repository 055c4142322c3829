//! # Voucher Core
//!
//! Domain model and services for the resource allocation and voucher
//! redemption ledger: event organizers allocate inventory items and voucher
//! quota per participant, an approval workflow gates the allocation, and
//! participants redeem against their quota either directly or through a
//! two-phase QR confirmation flow.
//!
//! ## Core Concepts
//!
//! - **Allocation**: a pool of items and/or vouchers per participant,
//!   moving through `open → pending → approved/rejected`
//! - **Redemption ledger**: append-only signed-quantity entries; balances
//!   are always derived, never cached
//! - **Pending redemption**: a single-use intent token committed only when
//!   a second actor confirms it
//!
//! ## Architecture Principles
//!
//! - State machine transitions described as data, applied as conditional
//!   writes
//! - One atomic store operation per racing concern (no check-then-act)
//! - Collaborators (catalog, notifications, clock) injected via traits
//!
//! ## Example
//!
//! ```ignore
//! use std::sync::Arc;
//! use voucher_core::clock::SystemClock;
//! use voucher_core::notify::LogDispatcher;
//! use voucher_core::catalog::StaticCatalog;
//! use voucher_core::service::{AllocationService, CreateAllocation};
//!
//! let service = AllocationService::new(
//!     store,
//!     Arc::new(StaticCatalog::new()),
//!     Arc::new(LogDispatcher),
//!     Arc::new(SystemClock),
//! );
//! let allocation = service.create(CreateAllocation { /* ... */ }).await?;
//! ```

// Re-export commonly used types
pub use chrono::{DateTime, Utc};
pub use serde::{Deserialize, Serialize};

pub mod allocation;
pub mod catalog;
pub mod clock;
pub mod error;
pub mod ledger;
pub mod notify;
pub mod service;
pub mod store;
pub mod token;
pub mod types;

// Re-export main types for convenience
pub use error::{ErrorKind, LedgerError, Result};
pub use ledger::Balance;
pub use token::IntentToken;
pub use types::{
    Allocation, AllocationId, AllocationStatus, IntentStatus, PendingRedemption, RedemptionEntry,
};
