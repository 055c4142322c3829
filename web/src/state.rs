//! Application state for Axum handlers.

use sqlx::PgPool;
use std::sync::Arc;
use voucher_core::catalog::InventoryCatalog;
use voucher_core::clock::Clock;
use voucher_core::notify::NotificationDispatcher;
use voucher_core::service::{AllocationService, RedemptionService, RedemptionWorkflow};
use voucher_core::store::LedgerStore;

/// Application state shared across all HTTP handlers.
///
/// Holds the three domain services, all built over the same ledger store.
/// Cloning is cheap; every field is an `Arc`.
#[derive(Clone)]
pub struct AppState {
    /// Allocation lifecycle operations
    pub allocations: Arc<AllocationService>,
    /// Direct ledger reads and writes
    pub redemptions: Arc<RedemptionService>,
    /// Two-phase QR redemption workflow
    pub workflow: Arc<RedemptionWorkflow>,
    /// Pool handle for the readiness probe; absent when serving from memory
    pub db: Option<PgPool>,
}

impl AppState {
    /// Wire the domain services over a ledger store and its collaborators.
    ///
    /// `qr_link_base` is the deep-link prefix embedded in QR payloads.
    #[must_use]
    pub fn new(
        store: Arc<dyn LedgerStore>,
        catalog: Arc<dyn InventoryCatalog>,
        dispatcher: Arc<dyn NotificationDispatcher>,
        clock: Arc<dyn Clock>,
        qr_link_base: String,
    ) -> Self {
        Self {
            allocations: Arc::new(AllocationService::new(
                store.clone(),
                catalog,
                dispatcher,
                clock.clone(),
            )),
            redemptions: Arc::new(RedemptionService::new(store.clone(), clock.clone())),
            workflow: Arc::new(RedemptionWorkflow::new(store, clock, qr_link_base)),
            db: None,
        }
    }

    /// Attach a database pool so `/health/ready` can probe connectivity.
    #[must_use]
    pub fn with_db(mut self, pool: PgPool) -> Self {
        self.db = Some(pool);
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_state_is_clone() {
        // Axum requires Clone on state.
        fn assert_clone<T: Clone>() {}
        assert_clone::<AppState>();
    }
}
