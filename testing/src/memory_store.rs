//! In-memory ledger store for fast, deterministic testing.
//!
//! [`MemoryLedgerStore`] implements `LedgerStore` entirely in memory while
//! holding the same atomicity contract as the Postgres backend: every
//! conditional operation checks and writes under one lock, so concurrency
//! tests observe real admission behavior rather than a relaxed stand-in.

#![allow(clippy::unwrap_used)] // Test infrastructure uses unwrap for simplicity
#![allow(clippy::missing_panics_doc)] // Test utilities document panics where critical

use chrono::{DateTime, Utc};
use std::collections::HashMap;
use std::future::Future;
use std::pin::Pin;
use std::sync::{Arc, RwLock};

use voucher_core::allocation::{AllocationPatch, StatusChange, Transition};
use voucher_core::error::LedgerError;
use voucher_core::ledger::{validate_redeemable, validate_within_remaining, Balance};
use voucher_core::store::{ConfirmedRedemption, LedgerStore};
use voucher_core::token::IntentToken;
use voucher_core::types::{
    ActorId, Allocation, AllocationId, AllocationStatus, EntryId, EventId, IntentStatus,
    ParticipantId, PendingRedemption, RedemptionEntry,
};

/// Everything a deployment would keep in Postgres, kept in one struct so a
/// single lock covers every conditional read-modify-write.
#[derive(Debug, Default)]
struct State {
    /// Insertion order doubles as creation order for newest-first listings
    allocations: Vec<Allocation>,
    /// Append-only; never updated or deleted
    entries: Vec<RedemptionEntry>,
    intents: HashMap<IntentToken, PendingRedemption>,
}

/// In-memory [`LedgerStore`] for fast, deterministic testing.
///
/// Complements `FixedClock` and `RecordingDispatcher` to provide a complete
/// in-memory testing infrastructure for the allocation and redemption
/// services.
///
/// # Example
///
/// ```
/// use chrono::Utc;
/// use voucher_core::store::LedgerStore;
/// use voucher_core::types::{
///     ActorId, Allocation, AllocationId, AllocationStatus, EventId, TenantId,
/// };
/// use voucher_testing::MemoryLedgerStore;
///
/// # async fn example() -> Result<(), voucher_core::error::LedgerError> {
/// let store = MemoryLedgerStore::new();
///
/// let allocation = Allocation::new(
///     AllocationId::new(),
///     EventId::new(),
///     TenantId::new(),
///     vec![],
///     2,
///     None,
///     AllocationStatus::Open,
///     ActorId::new(),
///     Utc::now(),
/// );
/// let stored = store.insert_allocation(allocation).await?;
///
/// let found = store.allocation(stored.id).await?;
/// assert_eq!(found, Some(stored));
/// # Ok(())
/// # }
/// ```
#[derive(Clone, Debug)]
pub struct MemoryLedgerStore {
    state: Arc<RwLock<State>>,
}

impl MemoryLedgerStore {
    /// Create a new empty in-memory store
    #[must_use]
    pub fn new() -> Self {
        Self {
            state: Arc::new(RwLock::new(State::default())),
        }
    }

    /// Clear all stored data (for test isolation)
    ///
    /// Useful for resetting state between tests without creating a new store.
    pub fn clear(&self) {
        let mut state = self.state.write().unwrap();
        state.allocations.clear();
        state.entries.clear();
        state.intents.clear();
    }

    /// Number of stored allocations
    #[must_use]
    pub fn allocation_count(&self) -> usize {
        self.state.read().unwrap().allocations.len()
    }

    /// Number of ledger entries across all allocations
    ///
    /// Useful for asserting that a failed operation wrote nothing.
    #[must_use]
    pub fn entry_count(&self) -> usize {
        self.state.read().unwrap().entries.len()
    }

    /// Number of stored intents, regardless of status
    #[must_use]
    pub fn intent_count(&self) -> usize {
        self.state.read().unwrap().intents.len()
    }

    /// Check if the store holds no data at all
    #[must_use]
    pub fn is_empty(&self) -> bool {
        let state = self.state.read().unwrap();
        state.allocations.is_empty() && state.entries.is_empty() && state.intents.is_empty()
    }
}

impl Default for MemoryLedgerStore {
    fn default() -> Self {
        Self::new()
    }
}

/// Derive a participant's balance from the entries recorded so far.
fn derive_balance(
    entries: &[RedemptionEntry],
    quota: i64,
    allocation_id: AllocationId,
    participant_id: ParticipantId,
) -> Balance {
    Balance::compute(
        quota,
        entries
            .iter()
            .filter(|e| e.allocation_id == allocation_id && e.participant_id == participant_id)
            .map(|e| e.quantity),
    )
}

impl LedgerStore for MemoryLedgerStore {
    fn insert_allocation(
        &self,
        allocation: Allocation,
    ) -> Pin<Box<dyn Future<Output = Result<Allocation, LedgerError>> + Send + '_>> {
        Box::pin(async move {
            let mut state = self.state.write().unwrap();
            state.allocations.push(allocation.clone());
            Ok(allocation)
        })
    }

    fn allocation(
        &self,
        id: AllocationId,
    ) -> Pin<Box<dyn Future<Output = Result<Option<Allocation>, LedgerError>> + Send + '_>> {
        Box::pin(async move {
            let state = self.state.read().unwrap();
            Ok(state.allocations.iter().find(|a| a.id == id).cloned())
        })
    }

    fn allocations_for_event(
        &self,
        event_id: EventId,
        status: Option<AllocationStatus>,
    ) -> Pin<Box<dyn Future<Output = Result<Vec<Allocation>, LedgerError>> + Send + '_>> {
        Box::pin(async move {
            let state = self.state.read().unwrap();
            Ok(state
                .allocations
                .iter()
                .rev()
                .filter(|a| a.event_id == event_id)
                .filter(|a| status.is_none_or(|s| a.status == s))
                .cloned()
                .collect())
        })
    }

    fn update_allocation(
        &self,
        id: AllocationId,
        patch: AllocationPatch,
    ) -> Pin<Box<dyn Future<Output = Result<Allocation, LedgerError>> + Send + '_>> {
        Box::pin(async move {
            let mut state = self.state.write().unwrap();
            let allocation = state
                .allocations
                .iter_mut()
                .find(|a| a.id == id)
                .ok_or(LedgerError::AllocationNotFound { id })?;
            patch.check(allocation)?;
            patch.apply(allocation);
            Ok(allocation.clone())
        })
    }

    fn transition_allocation(
        &self,
        id: AllocationId,
        transition: Transition,
        change: StatusChange,
    ) -> Pin<Box<dyn Future<Output = Result<Allocation, LedgerError>> + Send + '_>> {
        Box::pin(async move {
            let mut state = self.state.write().unwrap();
            let allocation = state
                .allocations
                .iter_mut()
                .find(|a| a.id == id)
                .ok_or(LedgerError::AllocationNotFound { id })?;
            // The status check and the write happen under the same lock, so
            // of two racing transitions the loser sees the winner's status.
            transition.check(allocation.status)?;
            change.apply(allocation);
            Ok(allocation.clone())
        })
    }

    fn delete_allocation(
        &self,
        id: AllocationId,
    ) -> Pin<Box<dyn Future<Output = Result<(), LedgerError>> + Send + '_>> {
        Box::pin(async move {
            let mut state = self.state.write().unwrap();
            if !state.allocations.iter().any(|a| a.id == id) {
                return Err(LedgerError::AllocationNotFound { id });
            }
            let entries = state
                .entries
                .iter()
                .filter(|e| e.allocation_id == id)
                .count();
            if entries > 0 {
                return Err(LedgerError::LedgerNotEmpty {
                    entries: i64::try_from(entries).unwrap_or(i64::MAX),
                });
            }
            state.allocations.retain(|a| a.id != id);
            state.intents.retain(|_, intent| intent.allocation_id != id);
            Ok(())
        })
    }

    fn record_entry(
        &self,
        entry: RedemptionEntry,
    ) -> Pin<Box<dyn Future<Output = Result<Balance, LedgerError>> + Send + '_>> {
        Box::pin(async move {
            let mut guard = self.state.write().unwrap();
            let state = &mut *guard;

            let allocation = state
                .allocations
                .iter()
                .find(|a| a.id == entry.allocation_id)
                .ok_or(LedgerError::AllocationNotFound {
                    id: entry.allocation_id,
                })?;
            validate_redeemable(allocation.status)?;

            let quota = allocation.voucher_quota_per_participant;
            let current = derive_balance(
                &state.entries,
                quota,
                entry.allocation_id,
                entry.participant_id,
            );
            // Only positive quantities are capped; reassignments always fit.
            if entry.quantity > 0 {
                validate_within_remaining(&current, entry.quantity)?;
            }

            let allocation_id = entry.allocation_id;
            let participant_id = entry.participant_id;
            state.entries.push(entry);
            Ok(derive_balance(
                &state.entries,
                quota,
                allocation_id,
                participant_id,
            ))
        })
    }

    fn entries(
        &self,
        allocation_id: AllocationId,
        participant_id: ParticipantId,
    ) -> Pin<Box<dyn Future<Output = Result<Vec<RedemptionEntry>, LedgerError>> + Send + '_>> {
        Box::pin(async move {
            let state = self.state.read().unwrap();
            if !state.allocations.iter().any(|a| a.id == allocation_id) {
                return Err(LedgerError::AllocationNotFound { id: allocation_id });
            }
            Ok(state
                .entries
                .iter()
                .rev()
                .filter(|e| e.allocation_id == allocation_id && e.participant_id == participant_id)
                .cloned()
                .collect())
        })
    }

    fn balance(
        &self,
        allocation_id: AllocationId,
        participant_id: ParticipantId,
    ) -> Pin<Box<dyn Future<Output = Result<Balance, LedgerError>> + Send + '_>> {
        Box::pin(async move {
            let state = self.state.read().unwrap();
            let allocation = state
                .allocations
                .iter()
                .find(|a| a.id == allocation_id)
                .ok_or(LedgerError::AllocationNotFound { id: allocation_id })?;
            Ok(derive_balance(
                &state.entries,
                allocation.voucher_quota_per_participant,
                allocation_id,
                participant_id,
            ))
        })
    }

    fn insert_intent(
        &self,
        intent: PendingRedemption,
    ) -> Pin<Box<dyn Future<Output = Result<PendingRedemption, LedgerError>> + Send + '_>> {
        Box::pin(async move {
            let mut state = self.state.write().unwrap();
            state.intents.insert(intent.token.clone(), intent.clone());
            Ok(intent)
        })
    }

    fn intent(
        &self,
        token: &IntentToken,
    ) -> Pin<Box<dyn Future<Output = Result<Option<PendingRedemption>, LedgerError>> + Send + '_>>
    {
        let token = token.clone();
        Box::pin(async move {
            let state = self.state.read().unwrap();
            Ok(state.intents.get(&token).cloned())
        })
    }

    fn confirm_intent(
        &self,
        token: &IntentToken,
        actor: ActorId,
        now: DateTime<Utc>,
    ) -> Pin<Box<dyn Future<Output = Result<ConfirmedRedemption, LedgerError>> + Send + '_>> {
        let token = token.clone();
        Box::pin(async move {
            let mut guard = self.state.write().unwrap();
            let state = &mut *guard;

            let intent = state
                .intents
                .get_mut(&token)
                .ok_or(LedgerError::IntentNotFound)?;
            // Unknown and already-resolved tokens report identically; the
            // pending check under the lock is what makes confirm single-use.
            if intent.status != IntentStatus::Pending {
                return Err(LedgerError::IntentNotFound);
            }

            let allocation = state
                .allocations
                .iter()
                .find(|a| a.id == intent.allocation_id)
                .ok_or(LedgerError::AllocationNotFound {
                    id: intent.allocation_id,
                })?;
            validate_redeemable(allocation.status)?;

            let quota = allocation.voucher_quota_per_participant;
            let current = derive_balance(
                &state.entries,
                quota,
                intent.allocation_id,
                intent.participant_id,
            );
            // On failure the intent stays pending for a retry or cancel.
            validate_within_remaining(&current, intent.quantity)?;

            let entry = RedemptionEntry::new(
                EntryId::new(),
                intent.allocation_id,
                intent.participant_id,
                intent.quantity,
                actor,
                intent.notes.clone(),
                now,
            );
            state.entries.push(entry.clone());

            intent.status = IntentStatus::Completed;
            intent.processed_by = Some(actor);
            intent.processed_at = Some(now);

            let balance = derive_balance(
                &state.entries,
                quota,
                entry.allocation_id,
                entry.participant_id,
            );
            Ok(ConfirmedRedemption {
                intent: intent.clone(),
                entry,
                balance,
            })
        })
    }

    fn resolve_intent(
        &self,
        token: &IntentToken,
        to: IntentStatus,
        actor: ActorId,
        now: DateTime<Utc>,
    ) -> Pin<Box<dyn Future<Output = Result<PendingRedemption, LedgerError>> + Send + '_>> {
        let token = token.clone();
        Box::pin(async move {
            if !matches!(to, IntentStatus::Cancelled | IntentStatus::Expired) {
                return Err(LedgerError::Storage(format!(
                    "resolve_intent cannot target status '{to}'"
                )));
            }
            let mut state = self.state.write().unwrap();
            let intent = state
                .intents
                .get_mut(&token)
                .ok_or(LedgerError::IntentNotFound)?;
            if intent.status != IntentStatus::Pending {
                return Err(LedgerError::IntentNotFound);
            }
            intent.status = to;
            intent.processed_by = Some(actor);
            intent.processed_at = Some(now);
            Ok(intent.clone())
        })
    }

    fn expire_stale_intents(
        &self,
        cutoff: DateTime<Utc>,
        now: DateTime<Utc>,
    ) -> Pin<Box<dyn Future<Output = Result<u64, LedgerError>> + Send + '_>> {
        Box::pin(async move {
            let mut state = self.state.write().unwrap();
            let mut expired = 0u64;
            for intent in state.intents.values_mut() {
                if intent.status == IntentStatus::Pending && intent.created_at < cutoff {
                    intent.status = IntentStatus::Expired;
                    intent.processed_at = Some(now);
                    expired += 1;
                }
            }
            Ok(expired)
        })
    }
}
