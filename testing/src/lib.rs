//! # Voucher Testing
//!
//! Testing utilities and in-memory infrastructure for the voucher ledger.
//!
//! This crate provides:
//! - [`MemoryLedgerStore`]: a `LedgerStore` holding the full atomicity
//!   contract in memory
//! - [`FixedClock`]: deterministic time
//! - [`RecordingDispatcher`]: captures workflow notifications for assertions
//!
//! ## Example
//!
//! ```
//! use std::sync::Arc;
//! use voucher_core::catalog::StaticCatalog;
//! use voucher_core::service::AllocationService;
//! use voucher_testing::{MemoryLedgerStore, RecordingDispatcher, test_clock};
//!
//! let store = Arc::new(MemoryLedgerStore::new());
//! let dispatcher = Arc::new(RecordingDispatcher::new());
//! let service = AllocationService::new(
//!     store,
//!     Arc::new(StaticCatalog::new()),
//!     dispatcher.clone(),
//!     Arc::new(test_clock()),
//! );
//! assert!(dispatcher.sent().is_empty());
//! ```

use chrono::{DateTime, Utc};
use voucher_core::clock::Clock;

pub mod memory_store;

/// Mock implementations for testing.
pub mod mocks {
    #![allow(clippy::unwrap_used)] // Mock infrastructure uses unwrap for simplicity

    use super::{Clock, DateTime, Utc};
    use std::future::Future;
    use std::pin::Pin;
    use std::sync::{Arc, RwLock};
    use voucher_core::notify::{DispatchError, Notification, NotificationDispatcher};

    /// Fixed clock for deterministic tests
    ///
    /// Always returns the same time, making tests reproducible.
    ///
    /// # Example
    ///
    /// ```
    /// use voucher_testing::mocks::FixedClock;
    /// use voucher_core::clock::Clock;
    /// use chrono::Utc;
    ///
    /// let clock = FixedClock::new(Utc::now());
    /// let time1 = clock.now();
    /// let time2 = clock.now();
    /// assert_eq!(time1, time2); // Always the same!
    /// ```
    #[derive(Debug, Clone)]
    pub struct FixedClock {
        time: DateTime<Utc>,
    }

    impl FixedClock {
        /// Create a new fixed clock with the given time
        #[must_use]
        pub const fn new(time: DateTime<Utc>) -> Self {
            Self { time }
        }
    }

    impl Clock for FixedClock {
        fn now(&self) -> DateTime<Utc> {
            self.time
        }
    }

    /// Create a default fixed clock for tests (2025-01-01 00:00:00 UTC)
    ///
    /// # Panics
    ///
    /// This function will panic if the hardcoded timestamp fails to parse,
    /// which should never happen in practice.
    #[must_use]
    #[allow(clippy::expect_used)]
    pub fn test_clock() -> FixedClock {
        FixedClock::new(
            DateTime::parse_from_rfc3339("2025-01-01T00:00:00Z")
                .expect("hardcoded timestamp should always parse")
                .with_timezone(&Utc),
        )
    }

    /// Notification dispatcher that records everything it is handed.
    ///
    /// Created with [`RecordingDispatcher::failing`] it refuses every
    /// notification instead, for testing that workflow operations survive
    /// delivery failures.
    ///
    /// # Example
    ///
    /// ```
    /// use voucher_core::notify::{Notification, NotificationDispatcher};
    /// use voucher_core::types::{ActorId, AllocationId, EventId, TenantId};
    /// use voucher_testing::RecordingDispatcher;
    ///
    /// # async fn example() {
    /// let dispatcher = RecordingDispatcher::new();
    /// dispatcher
    ///     .dispatch(Notification::ApprovalRequested {
    ///         allocation_id: AllocationId::new(),
    ///         event_id: EventId::new(),
    ///         tenant_id: TenantId::new(),
    ///         submitted_by: ActorId::new(),
    ///     })
    ///     .await
    ///     .unwrap();
    /// assert_eq!(dispatcher.sent().len(), 1);
    /// # }
    /// ```
    #[derive(Clone, Debug)]
    pub struct RecordingDispatcher {
        sent: Arc<RwLock<Vec<Notification>>>,
        fail: bool,
    }

    impl RecordingDispatcher {
        /// Create a dispatcher that accepts and records every notification
        #[must_use]
        pub fn new() -> Self {
            Self {
                sent: Arc::new(RwLock::new(Vec::new())),
                fail: false,
            }
        }

        /// Create a dispatcher that refuses every notification
        #[must_use]
        pub fn failing() -> Self {
            Self {
                sent: Arc::new(RwLock::new(Vec::new())),
                fail: true,
            }
        }

        /// Notifications recorded so far, in dispatch order
        #[must_use]
        pub fn sent(&self) -> Vec<Notification> {
            self.sent.read().unwrap().clone()
        }

        /// Number of notifications recorded so far
        #[must_use]
        pub fn sent_count(&self) -> usize {
            self.sent.read().unwrap().len()
        }
    }

    impl Default for RecordingDispatcher {
        fn default() -> Self {
            Self::new()
        }
    }

    impl NotificationDispatcher for RecordingDispatcher {
        fn dispatch(
            &self,
            notification: Notification,
        ) -> Pin<Box<dyn Future<Output = Result<(), DispatchError>> + Send + '_>> {
            Box::pin(async move {
                if self.fail {
                    return Err(DispatchError::Delivery(
                        "recording dispatcher configured to fail".to_string(),
                    ));
                }
                self.sent.write().unwrap().push(notification);
                Ok(())
            })
        }
    }
}

// Re-export commonly used items
pub use memory_store::MemoryLedgerStore;
pub use mocks::{FixedClock, RecordingDispatcher, test_clock};
