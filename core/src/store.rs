//! Storage abstraction for allocations, ledger entries and redemption intents.
//!
//! The trait is deliberately shaped so that every operation with a
//! check-then-act hazard is a *single* store method: status transitions,
//! capped ledger admission and intent confirmation each re-validate current
//! persisted state inside the same atomic unit that writes. Callers never
//! read a status and write based on it in a second round trip.
//!
//! # Implementations
//!
//! - `PostgresLedgerStore` (in `voucher-postgres`): production implementation
//!   using row-level locks and conditional updates
//! - `MemoryLedgerStore` (in `voucher-testing`): deterministic in-memory
//!   implementation holding the same guarantees under one mutex
//!
//! # Example
//!
//! ```no_run
//! use chrono::Utc;
//! use voucher_core::store::LedgerStore;
//! use voucher_core::types::{ActorId, AllocationId, EntryId, ParticipantId, RedemptionEntry};
//!
//! async fn redeem_one<S: LedgerStore>(
//!     store: &S,
//!     allocation: AllocationId,
//!     participant: ParticipantId,
//!     staff: ActorId,
//! ) -> Result<(), voucher_core::error::LedgerError> {
//!     let entry =
//!         RedemptionEntry::new(EntryId::new(), allocation, participant, 1, staff, None, Utc::now());
//!     let balance = store.record_entry(entry).await?;
//!     tracing::info!(remaining = balance.remaining, "redeemed one voucher");
//!     Ok(())
//! }
//! ```

use chrono::{DateTime, Utc};
use std::future::Future;
use std::pin::Pin;

use crate::allocation::{AllocationPatch, StatusChange, Transition};
use crate::error::LedgerError;
use crate::ledger::Balance;
use crate::token::IntentToken;
use crate::types::{
    ActorId, Allocation, AllocationId, AllocationStatus, EventId, IntentStatus, ParticipantId,
    PendingRedemption, RedemptionEntry,
};

/// Result of a successful intent confirmation: the resolved intent, the
/// ledger entry written for it, and the balance after the write.
#[derive(Clone, Debug, PartialEq)]
pub struct ConfirmedRedemption {
    /// The intent, now in `Completed` status with actor and timestamp set
    pub intent: PendingRedemption,
    /// The ledger entry the confirmation produced
    pub entry: RedemptionEntry,
    /// Participant balance after the entry was admitted
    pub balance: Balance,
}

/// Storage backend for the allocation and redemption ledger.
///
/// # Thread Safety
///
/// Implementations must be `Send + Sync`; services share them behind
/// `Arc<dyn LedgerStore>`.
///
/// # Atomicity contract
///
/// `update_allocation`, `transition_allocation`, `delete_allocation`,
/// `record_entry`, `confirm_intent`, `resolve_intent` and
/// `expire_stale_intents` must each be atomic with respect to every other
/// call: two racing transitions on one allocation admit exactly one winner,
/// and N racing one-unit redemptions against quota Q admit exactly
/// `min(N, Q)`.
///
/// # Dyn Compatibility
///
/// Methods return explicit `Pin<Box<dyn Future>>` instead of `async fn` so
/// the trait can be used as `Arc<dyn LedgerStore>` across services.
pub trait LedgerStore: Send + Sync {
    /// Persist a freshly created allocation together with its line items.
    ///
    /// # Errors
    ///
    /// - `Storage`: persistence failed
    fn insert_allocation(
        &self,
        allocation: Allocation,
    ) -> Pin<Box<dyn Future<Output = Result<Allocation, LedgerError>> + Send + '_>>;

    /// Load one allocation by id, `None` when absent.
    ///
    /// # Errors
    ///
    /// - `Storage`: persistence failed
    fn allocation(
        &self,
        id: AllocationId,
    ) -> Pin<Box<dyn Future<Output = Result<Option<Allocation>, LedgerError>> + Send + '_>>;

    /// List allocations of one event, newest first, optionally filtered by
    /// status.
    ///
    /// # Errors
    ///
    /// - `Storage`: persistence failed
    fn allocations_for_event(
        &self,
        event_id: EventId,
        status: Option<AllocationStatus>,
    ) -> Pin<Box<dyn Future<Output = Result<Vec<Allocation>, LedgerError>> + Send + '_>>;

    /// Apply a content patch to an editable allocation.
    ///
    /// Editability and the post-patch content invariant are re-checked
    /// against the persisted row inside the same atomic unit that writes.
    ///
    /// # Errors
    ///
    /// - `AllocationNotFound`: no such allocation
    /// - `NotEditable`: status does not permit edits
    /// - `EmptyAllocation` / `NegativeQuota` / `QuantityNotPositive`: the
    ///   patched contents would violate the creation invariant
    /// - `Storage`: persistence failed
    fn update_allocation(
        &self,
        id: AllocationId,
        patch: AllocationPatch,
    ) -> Pin<Box<dyn Future<Output = Result<Allocation, LedgerError>> + Send + '_>>;

    /// Apply a status transition as a compare-and-swap conditioned on the
    /// transition's allowed source statuses.
    ///
    /// Exactly one of two racing transitions succeeds; the loser observes
    /// the winner's persisted status in the returned error.
    ///
    /// # Errors
    ///
    /// - `AllocationNotFound`: no such allocation
    /// - `InvalidTransition`: persisted status was not an allowed source
    /// - `Storage`: persistence failed
    fn transition_allocation(
        &self,
        id: AllocationId,
        transition: Transition,
        change: StatusChange,
    ) -> Pin<Box<dyn Future<Output = Result<Allocation, LedgerError>> + Send + '_>>;

    /// Hard-delete an allocation, cascading its line items and pending
    /// intents in the same atomic unit.
    ///
    /// # Errors
    ///
    /// - `AllocationNotFound`: no such allocation
    /// - `LedgerNotEmpty`: ledger entries reference the allocation
    /// - `Storage`: persistence failed
    fn delete_allocation(
        &self,
        id: AllocationId,
    ) -> Pin<Box<dyn Future<Output = Result<(), LedgerError>> + Send + '_>>;

    /// Admit one entry to the append-only ledger and return the balance
    /// after the write.
    ///
    /// The allocation's redeemability and, for positive quantities, the
    /// remaining-balance cap are checked against current persisted state in
    /// the same atomic unit as the insert. Negative quantities
    /// (reassignments) have no upper bound.
    ///
    /// # Errors
    ///
    /// - `AllocationNotFound`: no such allocation
    /// - `NotRedeemable`: allocation is not approved
    /// - `ExceedsRemaining`: a positive quantity did not fit the remaining
    ///   balance; the ledger is left unchanged
    /// - `Storage`: persistence failed
    fn record_entry(
        &self,
        entry: RedemptionEntry,
    ) -> Pin<Box<dyn Future<Output = Result<Balance, LedgerError>> + Send + '_>>;

    /// List one participant's ledger entries for an allocation, newest
    /// first.
    ///
    /// # Errors
    ///
    /// - `AllocationNotFound`: no such allocation
    /// - `Storage`: persistence failed
    fn entries(
        &self,
        allocation_id: AllocationId,
        participant_id: ParticipantId,
    ) -> Pin<Box<dyn Future<Output = Result<Vec<RedemptionEntry>, LedgerError>> + Send + '_>>;

    /// Derive one participant's balance from the ledger.
    ///
    /// # Errors
    ///
    /// - `AllocationNotFound`: no such allocation
    /// - `Storage`: persistence failed
    fn balance(
        &self,
        allocation_id: AllocationId,
        participant_id: ParticipantId,
    ) -> Pin<Box<dyn Future<Output = Result<Balance, LedgerError>> + Send + '_>>;

    /// Persist a freshly issued redemption intent.
    ///
    /// # Errors
    ///
    /// - `Storage`: persistence failed
    fn insert_intent(
        &self,
        intent: PendingRedemption,
    ) -> Pin<Box<dyn Future<Output = Result<PendingRedemption, LedgerError>> + Send + '_>>;

    /// Load one intent by token, `None` when absent.
    ///
    /// Callers that must not leak intent state map both `None` and terminal
    /// statuses to `IntentNotFound`.
    ///
    /// # Errors
    ///
    /// - `Storage`: persistence failed
    fn intent(
        &self,
        token: &IntentToken,
    ) -> Pin<Box<dyn Future<Output = Result<Option<PendingRedemption>, LedgerError>> + Send + '_>>;

    /// Confirm a pending intent: compare-and-swap it to `Completed` and
    /// write its ledger entry, all or nothing.
    ///
    /// The swap is conditioned on the *current persisted* status being
    /// `Pending`, so exactly one of two racing confirms succeeds. When the
    /// stored quantity no longer fits the remaining balance the whole unit
    /// rolls back and the intent stays `Pending` for an explicit retry or
    /// cancel.
    ///
    /// # Errors
    ///
    /// - `IntentNotFound`: token unknown or not pending (reported
    ///   identically)
    /// - `AllocationNotFound`: the referenced allocation vanished
    /// - `NotRedeemable`: allocation is not approved
    /// - `ExceedsRemaining`: stored quantity exceeds the remaining balance
    ///   at confirm time; intent left pending
    /// - `Storage`: persistence failed
    fn confirm_intent(
        &self,
        token: &IntentToken,
        actor: ActorId,
        now: DateTime<Utc>,
    ) -> Pin<Box<dyn Future<Output = Result<ConfirmedRedemption, LedgerError>> + Send + '_>>;

    /// Compare-and-swap a pending intent to `Cancelled` or `Expired`
    /// without touching the ledger.
    ///
    /// # Errors
    ///
    /// - `IntentNotFound`: token unknown or not pending
    /// - `Storage`: persistence failed, or `to` was not a terminal status
    fn resolve_intent(
        &self,
        token: &IntentToken,
        to: IntentStatus,
        actor: ActorId,
        now: DateTime<Utc>,
    ) -> Pin<Box<dyn Future<Output = Result<PendingRedemption, LedgerError>> + Send + '_>>;

    /// Flip every intent still pending but created before `cutoff` to
    /// `Expired`. Returns how many were expired.
    ///
    /// # Errors
    ///
    /// - `Storage`: persistence failed
    fn expire_stale_intents(
        &self,
        cutoff: DateTime<Utc>,
        now: DateTime<Utc>,
    ) -> Pin<Box<dyn Future<Output = Result<u64, LedgerError>> + Send + '_>>;
}
