//! `PostgreSQL` ledger store for the voucher workspace.
//!
//! This crate provides the production implementation of the `LedgerStore`
//! trait from `voucher-core`. Every operation with a check-then-act hazard
//! maps onto a single conditional statement or a short transaction holding a
//! row lock:
//!
//! - Status transitions are one conditional `UPDATE` keyed on the allowed
//!   source statuses
//! - Ledger admission locks the allocation row, sums the ledger and inserts
//!   in one transaction
//! - Intent confirmation compare-and-swaps the intent row and writes the
//!   ledger entry in one transaction, rolling back as a unit
//!
//! # Example
//!
//! ```ignore
//! use voucher_postgres::{PostgresLedgerStore, run_migrations};
//!
//! async fn example() -> Result<(), Box<dyn std::error::Error>> {
//!     let store = PostgresLedgerStore::connect("postgres://localhost/vouchers").await?;
//!     run_migrations(store.pool()).await?;
//!     Ok(())
//! }
//! ```

#![forbid(unsafe_code)]
#![warn(missing_docs)]

pub mod ledger_store;

pub use ledger_store::{PostgresLedgerStore, run_migrations};
