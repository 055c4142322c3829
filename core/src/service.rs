//! Application services over the ledger store.
//!
//! Services coordinate between validation, the store's atomic operations and
//! the notification dispatcher:
//! 1. Validate the request shape (pure checks, no state)
//! 2. Run the store operation that re-checks persisted state atomically
//! 3. Fire notifications for workflow events, logging failures
//! 4. Return a transport-agnostic outcome
//!
//! Anything that races (status transitions, ledger admission, intent
//! confirmation) lives entirely inside a single store call; services never
//! check state in one call and write in another.

use std::sync::Arc;

use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};

use crate::allocation::{
    validate_contents, validate_reject_comment, AllocationPatch, StatusChange, Transition,
};
use crate::catalog::InventoryCatalog;
use crate::clock::Clock;
use crate::error::{LedgerError, Result};
use crate::ledger::{
    validate_redeemable, validate_request_quantity, validate_within_remaining, Balance,
};
use crate::notify::{Notification, NotificationDispatcher};
use crate::store::LedgerStore;
use crate::token::IntentToken;
use crate::types::{
    ActorId, Allocation, AllocationId, AllocationStatus, EntryId, EventId, IntentStatus, LineItem,
    ParticipantId, PendingRedemption, RedemptionEntry, TenantId,
};

// ============================================================================
// Allocation service
// ============================================================================

/// Request to create an allocation.
#[derive(Clone, Debug)]
pub struct CreateAllocation {
    /// Event the allocation belongs to
    pub event_id: EventId,
    /// Tenant that owns the event
    pub tenant_id: TenantId,
    /// Inventory lines granted per participant
    pub line_items: Vec<LineItem>,
    /// Vouchers granted per participant (0 = items only)
    pub voucher_quota_per_participant: i64,
    /// Free-text notes
    pub notes: Option<String>,
    /// Admin creating the allocation
    pub created_by: ActorId,
    /// Create in draft instead of open
    pub draft: bool,
    /// Submit for approval immediately
    pub submit: bool,
}

/// One line item enriched with catalog data for display.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct LineItemView {
    /// Catalog item id
    pub item_id: crate::types::ItemId,
    /// Units granted per participant
    pub quantity_per_participant: i64,
    /// Catalog display name, or a placeholder when unknown
    pub name: String,
    /// Catalog category, when known
    pub category: Option<String>,
}

/// A single allocation with enriched line items and, when a participant was
/// named, their balance.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct AllocationDetail {
    /// The allocation itself
    pub allocation: Allocation,
    /// Line items enriched from the inventory catalog
    pub line_items: Vec<LineItemView>,
    /// Balance of the requested participant, if one was named
    pub balance: Option<Balance>,
}

/// Orchestrates the allocation lifecycle: creation, edits and the approval
/// state machine, with notification side effects.
pub struct AllocationService {
    store: Arc<dyn LedgerStore>,
    catalog: Arc<dyn InventoryCatalog>,
    dispatcher: Arc<dyn NotificationDispatcher>,
    clock: Arc<dyn Clock>,
}

impl AllocationService {
    /// Create a new allocation service
    #[must_use]
    pub fn new(
        store: Arc<dyn LedgerStore>,
        catalog: Arc<dyn InventoryCatalog>,
        dispatcher: Arc<dyn NotificationDispatcher>,
        clock: Arc<dyn Clock>,
    ) -> Self {
        Self {
            store,
            catalog,
            dispatcher,
            clock,
        }
    }

    /// Create an allocation in open, draft or (with `submit`) pending status.
    ///
    /// # Errors
    ///
    /// Content validation errors from [`validate_contents`], plus `Storage`.
    pub async fn create(&self, request: CreateAllocation) -> Result<Allocation> {
        validate_contents(&request.line_items, request.voucher_quota_per_participant)?;

        let status = if request.submit {
            AllocationStatus::Pending
        } else if request.draft {
            AllocationStatus::Draft
        } else {
            AllocationStatus::Open
        };

        let allocation = Allocation::new(
            AllocationId::new(),
            request.event_id,
            request.tenant_id,
            request.line_items,
            request.voucher_quota_per_participant,
            request.notes,
            status,
            request.created_by,
            self.clock.now(),
        );

        let allocation = self.store.insert_allocation(allocation).await?;
        tracing::info!(
            allocation_id = %allocation.id,
            event_id = %allocation.event_id,
            status = %allocation.status,
            "allocation created"
        );

        if allocation.status == AllocationStatus::Pending {
            self.notify(Notification::ApprovalRequested {
                allocation_id: allocation.id,
                event_id: allocation.event_id,
                tenant_id: allocation.tenant_id,
                submitted_by: request.created_by,
            })
            .await;
        }
        Ok(allocation)
    }

    /// Load one allocation with enriched line items.
    ///
    /// # Errors
    ///
    /// `AllocationNotFound`, `Storage`.
    pub async fn get(
        &self,
        id: AllocationId,
        participant: Option<ParticipantId>,
    ) -> Result<AllocationDetail> {
        let allocation = self
            .store
            .allocation(id)
            .await?
            .ok_or(LedgerError::AllocationNotFound { id })?;

        let mut line_items = Vec::with_capacity(allocation.line_items.len());
        for item in &allocation.line_items {
            line_items.push(self.enrich(item).await);
        }

        let balance = match participant {
            Some(participant_id) => Some(self.store.balance(id, participant_id).await?),
            None => None,
        };

        Ok(AllocationDetail {
            allocation,
            line_items,
            balance,
        })
    }

    /// List an event's allocations, newest first.
    ///
    /// # Errors
    ///
    /// `Storage`.
    pub async fn list(
        &self,
        event_id: EventId,
        status: Option<AllocationStatus>,
    ) -> Result<Vec<Allocation>> {
        self.store.allocations_for_event(event_id, status).await
    }

    /// Edit an open, draft or rejected allocation.
    ///
    /// # Errors
    ///
    /// `AllocationNotFound`, `NotEditable`, content validation errors,
    /// `Storage`.
    pub async fn update(&self, id: AllocationId, patch: AllocationPatch) -> Result<Allocation> {
        let allocation = self.store.update_allocation(id, patch).await?;
        tracing::info!(allocation_id = %allocation.id, "allocation updated");
        Ok(allocation)
    }

    /// Submit an open, draft or rejected allocation for approval.
    ///
    /// # Errors
    ///
    /// `AllocationNotFound`, `InvalidTransition`, `Storage`.
    pub async fn submit(&self, id: AllocationId, actor: ActorId) -> Result<Allocation> {
        self.submit_with(Transition::Submit, id, actor).await
    }

    /// Resubmit a rejected (or still open) allocation. Same rules as submit.
    ///
    /// # Errors
    ///
    /// `AllocationNotFound`, `InvalidTransition`, `Storage`.
    pub async fn resubmit(&self, id: AllocationId, actor: ActorId) -> Result<Allocation> {
        self.submit_with(Transition::Resubmit, id, actor).await
    }

    async fn submit_with(
        &self,
        transition: Transition,
        id: AllocationId,
        actor: ActorId,
    ) -> Result<Allocation> {
        let allocation = self
            .store
            .transition_allocation(id, transition, StatusChange::submit())
            .await?;
        tracing::info!(
            allocation_id = %allocation.id,
            action = transition.verb(),
            "allocation submitted for approval"
        );

        self.notify(Notification::ApprovalRequested {
            allocation_id: allocation.id,
            event_id: allocation.event_id,
            tenant_id: allocation.tenant_id,
            submitted_by: actor,
        })
        .await;
        Ok(allocation)
    }

    /// Approve a pending allocation, optionally appending a comment.
    ///
    /// # Errors
    ///
    /// `AllocationNotFound`, `InvalidTransition`, `Storage`.
    pub async fn approve(
        &self,
        id: AllocationId,
        approver: ActorId,
        comment: Option<String>,
    ) -> Result<Allocation> {
        let comment = comment.filter(|c| !c.trim().is_empty());
        let change = StatusChange::approve(approver, self.clock.now(), comment);
        let allocation = self
            .store
            .transition_allocation(id, Transition::Approve, change)
            .await?;
        tracing::info!(
            allocation_id = %allocation.id,
            approver = %approver,
            "allocation approved"
        );

        self.notify(Notification::AllocationApproved {
            allocation_id: allocation.id,
            event_id: allocation.event_id,
            approved_by: approver,
            creator: allocation.created_by,
        })
        .await;
        Ok(allocation)
    }

    /// Reject a pending allocation. The comment is mandatory.
    ///
    /// # Errors
    ///
    /// `CommentRequired`, `AllocationNotFound`, `InvalidTransition`,
    /// `Storage`.
    pub async fn reject(
        &self,
        id: AllocationId,
        approver: ActorId,
        comment: String,
    ) -> Result<Allocation> {
        validate_reject_comment(&comment)?;
        let change = StatusChange::reject(approver, self.clock.now(), comment.clone());
        let allocation = self
            .store
            .transition_allocation(id, Transition::Reject, change)
            .await?;
        tracing::info!(
            allocation_id = %allocation.id,
            approver = %approver,
            "allocation rejected"
        );

        self.notify(Notification::AllocationRejected {
            allocation_id: allocation.id,
            event_id: allocation.event_id,
            rejected_by: approver,
            creator: allocation.created_by,
            comment,
        })
        .await;
        Ok(allocation)
    }

    /// Withdraw a pending allocation back to open without a verdict.
    ///
    /// # Errors
    ///
    /// `AllocationNotFound`, `InvalidTransition`, `Storage`.
    pub async fn cancel(&self, id: AllocationId) -> Result<Allocation> {
        let allocation = self
            .store
            .transition_allocation(id, Transition::Cancel, StatusChange::cancel())
            .await?;
        tracing::info!(allocation_id = %allocation.id, "submission cancelled");
        Ok(allocation)
    }

    /// Hard-delete an allocation without ledger history.
    ///
    /// # Errors
    ///
    /// `AllocationNotFound`, `LedgerNotEmpty`, `Storage`.
    pub async fn delete(&self, id: AllocationId) -> Result<()> {
        self.store.delete_allocation(id).await?;
        tracing::info!(allocation_id = %id, "allocation deleted");
        Ok(())
    }

    async fn enrich(&self, item: &LineItem) -> LineItemView {
        match self.catalog.item(item.item_id).await {
            Some(found) => LineItemView {
                item_id: item.item_id,
                quantity_per_participant: item.quantity_per_participant,
                name: found.name,
                category: Some(found.category),
            },
            None => LineItemView {
                item_id: item.item_id,
                quantity_per_participant: item.quantity_per_participant,
                name: "(unknown item)".to_string(),
                category: None,
            },
        }
    }

    /// Fire a notification; failures are logged, never propagated.
    async fn notify(&self, notification: Notification) {
        if let Err(error) = self.dispatcher.dispatch(notification).await {
            tracing::warn!(error = %error, "notification dispatch failed");
        }
    }
}

// ============================================================================
// Direct redemption service
// ============================================================================

/// Request for a direct (non-QR) redemption or reassignment.
#[derive(Clone, Debug)]
pub struct RedemptionRequest {
    /// Allocation to draw against
    pub allocation_id: AllocationId,
    /// Participant whose quota is affected
    pub participant_id: ParticipantId,
    /// Positive quantity to redeem or reassign
    pub quantity: i64,
    /// Staff member performing the operation
    pub actor: ActorId,
    /// Optional free-text context
    pub note: Option<String>,
}

/// Outcome of a direct redemption.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct RedeemOutcome {
    /// Quantity admitted by this call
    pub redeemed_quantity: i64,
    /// Net redeemed after the write
    pub total_redeemed: i64,
    /// Remaining balance after the write
    pub remaining_quantity: i64,
    /// Over-redemption visible in historical data, zero when within quota
    pub over_redeemed: i64,
}

/// Outcome of a reassignment.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct ReassignOutcome {
    /// Quantity restored by this call
    pub reassigned_quantity: i64,
    /// Net redeemed after the write
    pub total_redeemed: i64,
    /// Remaining balance after the write
    pub remaining_quantity: i64,
}

/// Writes to the append-only ledger through the store's single admission
/// point and derives balances for reads.
pub struct RedemptionService {
    store: Arc<dyn LedgerStore>,
    clock: Arc<dyn Clock>,
}

impl RedemptionService {
    /// Create a new redemption service
    #[must_use]
    pub fn new(store: Arc<dyn LedgerStore>, clock: Arc<dyn Clock>) -> Self {
        Self { store, clock }
    }

    /// Redeem vouchers against a participant's remaining balance.
    ///
    /// The cap check and the ledger insert commit as one atomic unit in the
    /// store; two racing calls can never jointly over-redeem.
    ///
    /// # Errors
    ///
    /// `QuantityNotPositive`, `AllocationNotFound`, `NotRedeemable`,
    /// `ExceedsRemaining`, `Storage`.
    pub async fn redeem(&self, request: RedemptionRequest) -> Result<RedeemOutcome> {
        validate_request_quantity(request.quantity)?;

        let entry = RedemptionEntry::new(
            EntryId::new(),
            request.allocation_id,
            request.participant_id,
            request.quantity,
            request.actor,
            request.note,
            self.clock.now(),
        );
        let balance = self.store.record_entry(entry).await?;

        tracing::info!(
            allocation_id = %request.allocation_id,
            participant_id = %request.participant_id,
            quantity = request.quantity,
            remaining = balance.remaining,
            "vouchers redeemed"
        );
        Ok(RedeemOutcome {
            redeemed_quantity: request.quantity,
            total_redeemed: balance.net_redeemed,
            remaining_quantity: balance.remaining,
            over_redeemed: balance.over_redeemed,
        })
    }

    /// Reverse a prior redemption by appending a negative entry.
    ///
    /// # Errors
    ///
    /// `QuantityNotPositive`, `AllocationNotFound`, `NotRedeemable`,
    /// `Storage`.
    pub async fn reassign(&self, request: RedemptionRequest) -> Result<ReassignOutcome> {
        validate_request_quantity(request.quantity)?;

        let entry = RedemptionEntry::new(
            EntryId::new(),
            request.allocation_id,
            request.participant_id,
            -request.quantity,
            request.actor,
            request.note,
            self.clock.now(),
        );
        let balance = self.store.record_entry(entry).await?;

        tracing::info!(
            allocation_id = %request.allocation_id,
            participant_id = %request.participant_id,
            quantity = request.quantity,
            remaining = balance.remaining,
            "vouchers reassigned"
        );
        Ok(ReassignOutcome {
            reassigned_quantity: request.quantity,
            total_redeemed: balance.net_redeemed,
            remaining_quantity: balance.remaining,
        })
    }

    /// Current balance of one participant for one allocation.
    ///
    /// # Errors
    ///
    /// `AllocationNotFound`, `Storage`.
    pub async fn balance(
        &self,
        allocation_id: AllocationId,
        participant_id: ParticipantId,
    ) -> Result<Balance> {
        self.store.balance(allocation_id, participant_id).await
    }

    /// Audit view: the participant's ledger entries, newest first.
    ///
    /// # Errors
    ///
    /// `AllocationNotFound`, `Storage`.
    pub async fn history(
        &self,
        allocation_id: AllocationId,
        participant_id: ParticipantId,
    ) -> Result<Vec<RedemptionEntry>> {
        self.store.entries(allocation_id, participant_id).await
    }
}

// ============================================================================
// Two-phase QR workflow
// ============================================================================

/// Request to open a redemption intent.
#[derive(Clone, Debug)]
pub struct InitiateRequest {
    /// Allocation to draw against
    pub allocation_id: AllocationId,
    /// Participant opening the intent
    pub participant_id: ParticipantId,
    /// Positive quantity the participant intends to redeem
    pub quantity: i64,
    /// Optional free-text context carried into the eventual ledger entry
    pub notes: Option<String>,
}

/// Outcome of opening an intent: what the participant's device renders.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct InitiateOutcome {
    /// Single-use token identifying the intent
    pub token: IntentToken,
    /// Deep link for the QR code; embeds only the token
    pub qr_payload: String,
    /// The participant's voucher quota
    pub quota: i64,
    /// Remaining balance at initiation time (unaffected until confirm)
    pub remaining: i64,
    /// Quantity stored in the intent
    pub requested_quantity: i64,
}

/// What staff see after scanning a QR code, resolved server-side.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct ScanView {
    /// Allocation the intent draws against
    pub allocation_id: AllocationId,
    /// Participant who opened the intent
    pub participant_id: ParticipantId,
    /// Quantity to hand out on confirm
    pub quantity: i64,
    /// Context notes from the participant
    pub notes: Option<String>,
    /// When the intent was opened
    pub created_at: DateTime<Utc>,
    /// The participant's current balance, for staff review
    pub balance: Balance,
}

/// Outcome of a confirmed intent.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct ConfirmOutcome {
    /// Net redeemed after the ledger write
    pub total_redeemed: i64,
    /// Remaining balance after the ledger write
    pub remaining_quantity: i64,
}

/// The intent → scan → confirm workflow.
///
/// `initiate` runs a best-effort balance check and issues the token; the
/// binding decision happens at `confirm`, where the store re-validates the
/// current persisted intent status and balance in one atomic unit.
pub struct RedemptionWorkflow {
    store: Arc<dyn LedgerStore>,
    clock: Arc<dyn Clock>,
    link_base: String,
}

impl RedemptionWorkflow {
    /// Create a new workflow over the given store.
    ///
    /// `link_base` is the deep-link prefix QR payloads are rendered with.
    #[must_use]
    pub fn new(store: Arc<dyn LedgerStore>, clock: Arc<dyn Clock>, link_base: String) -> Self {
        Self {
            store,
            clock,
            link_base,
        }
    }

    /// Open an intent and return the token plus QR payload.
    ///
    /// The balance check here is best-effort, not a reservation; quota can
    /// still be consumed by other writers before confirm.
    ///
    /// # Errors
    ///
    /// `QuantityNotPositive`, `AllocationNotFound`, `NotRedeemable`,
    /// `ExceedsRemaining`, `Storage`.
    pub async fn initiate(&self, request: InitiateRequest) -> Result<InitiateOutcome> {
        validate_request_quantity(request.quantity)?;

        let allocation = self
            .store
            .allocation(request.allocation_id)
            .await?
            .ok_or(LedgerError::AllocationNotFound {
                id: request.allocation_id,
            })?;
        validate_redeemable(allocation.status)?;

        let balance = self
            .store
            .balance(request.allocation_id, request.participant_id)
            .await?;
        validate_within_remaining(&balance, request.quantity)?;

        let token = IntentToken::generate();
        let intent = PendingRedemption::new(
            token.clone(),
            request.allocation_id,
            request.participant_id,
            request.quantity,
            request.notes,
            self.clock.now(),
        );
        let intent = self.store.insert_intent(intent).await?;

        tracing::info!(
            allocation_id = %intent.allocation_id,
            participant_id = %intent.participant_id,
            quantity = intent.quantity,
            "redemption intent issued"
        );
        Ok(InitiateOutcome {
            qr_payload: token.deep_link(&self.link_base),
            token,
            quota: balance.quota,
            remaining: balance.remaining,
            requested_quantity: request.quantity,
        })
    }

    /// Resolve a scanned token into its context for staff review.
    ///
    /// Read-only; the intent stays pending.
    ///
    /// # Errors
    ///
    /// `IntentNotFound` for unknown and non-pending tokens alike,
    /// `AllocationNotFound`, `Storage`.
    pub async fn scan(&self, token: &IntentToken) -> Result<ScanView> {
        let intent = self
            .store
            .intent(token)
            .await?
            .filter(|intent| intent.status == IntentStatus::Pending)
            .ok_or(LedgerError::IntentNotFound)?;

        let balance = self
            .store
            .balance(intent.allocation_id, intent.participant_id)
            .await?;

        Ok(ScanView {
            allocation_id: intent.allocation_id,
            participant_id: intent.participant_id,
            quantity: intent.quantity,
            notes: intent.notes,
            created_at: intent.created_at,
            balance,
        })
    }

    /// Commit a pending intent: ledger write plus flip to completed, all or
    /// nothing.
    ///
    /// # Errors
    ///
    /// `IntentNotFound` for unknown and already-resolved tokens alike,
    /// `ExceedsRemaining` when the stored quantity no longer fits (the
    /// intent stays pending), `AllocationNotFound`, `NotRedeemable`,
    /// `Storage`.
    pub async fn confirm(&self, token: &IntentToken, actor: ActorId) -> Result<ConfirmOutcome> {
        let confirmed = self
            .store
            .confirm_intent(token, actor, self.clock.now())
            .await?;

        tracing::info!(
            allocation_id = %confirmed.intent.allocation_id,
            participant_id = %confirmed.intent.participant_id,
            quantity = confirmed.intent.quantity,
            remaining = confirmed.balance.remaining,
            "redemption intent confirmed"
        );
        Ok(ConfirmOutcome {
            total_redeemed: confirmed.balance.net_redeemed,
            remaining_quantity: confirmed.balance.remaining,
        })
    }

    /// Cancel a pending intent without a ledger write.
    ///
    /// # Errors
    ///
    /// `IntentNotFound`, `Storage`.
    pub async fn cancel(&self, token: &IntentToken, actor: ActorId) -> Result<PendingRedemption> {
        let intent = self
            .store
            .resolve_intent(token, IntentStatus::Cancelled, actor, self.clock.now())
            .await?;
        tracing::info!(
            allocation_id = %intent.allocation_id,
            "redemption intent cancelled"
        );
        Ok(intent)
    }

    /// Administratively expire a pending intent without a ledger write.
    ///
    /// # Errors
    ///
    /// `IntentNotFound`, `Storage`.
    pub async fn expire(&self, token: &IntentToken, actor: ActorId) -> Result<PendingRedemption> {
        let intent = self
            .store
            .resolve_intent(token, IntentStatus::Expired, actor, self.clock.now())
            .await?;
        tracing::info!(
            allocation_id = %intent.allocation_id,
            "redemption intent expired"
        );
        Ok(intent)
    }

    /// Expire every intent pending for longer than `ttl`. Returns the count.
    ///
    /// Called from the operational sweep; safe to run concurrently with
    /// confirms because both condition on current persisted status.
    ///
    /// # Errors
    ///
    /// `Storage`.
    pub async fn expire_stale(&self, ttl: Duration) -> Result<u64> {
        let now = self.clock.now();
        let expired = self.store.expire_stale_intents(now - ttl, now).await?;
        if expired > 0 {
            tracing::info!(expired, "stale redemption intents expired");
        }
        Ok(expired)
    }
}
