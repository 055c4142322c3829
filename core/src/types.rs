//! Domain types for the allocation and redemption ledger.
//!
//! This module contains the value objects and entities shared by every crate
//! in the workspace: identifiers, the allocation aggregate with its approval
//! status, the append-only ledger entry, and the two-phase redemption intent.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use uuid::Uuid;

use crate::token::IntentToken;

// ============================================================================
// Identifiers
// ============================================================================

/// Unique identifier for an allocation
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct AllocationId(Uuid);

impl AllocationId {
    /// Creates a new random `AllocationId`
    #[must_use]
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }

    /// Create an `AllocationId` from a `Uuid`
    #[must_use]
    pub const fn from_uuid(uuid: Uuid) -> Self {
        Self(uuid)
    }

    /// Get the inner UUID
    #[must_use]
    pub const fn as_uuid(&self) -> &Uuid {
        &self.0
    }
}

impl Default for AllocationId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for AllocationId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Unique identifier for an event
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct EventId(Uuid);

impl EventId {
    /// Creates a new random `EventId`
    #[must_use]
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }

    /// Create an `EventId` from a `Uuid`
    #[must_use]
    pub const fn from_uuid(uuid: Uuid) -> Self {
        Self(uuid)
    }

    /// Get the inner UUID
    #[must_use]
    pub const fn as_uuid(&self) -> &Uuid {
        &self.0
    }
}

impl Default for EventId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for EventId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Unique identifier for a tenant
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct TenantId(Uuid);

impl TenantId {
    /// Creates a new random `TenantId`
    #[must_use]
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }

    /// Create a `TenantId` from a `Uuid`
    #[must_use]
    pub const fn from_uuid(uuid: Uuid) -> Self {
        Self(uuid)
    }

    /// Get the inner UUID
    #[must_use]
    pub const fn as_uuid(&self) -> &Uuid {
        &self.0
    }
}

impl Default for TenantId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for TenantId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Unique identifier for a participant (voucher holder)
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ParticipantId(Uuid);

impl ParticipantId {
    /// Creates a new random `ParticipantId`
    #[must_use]
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }

    /// Create a `ParticipantId` from a `Uuid`
    #[must_use]
    pub const fn from_uuid(uuid: Uuid) -> Self {
        Self(uuid)
    }

    /// Get the inner UUID
    #[must_use]
    pub const fn as_uuid(&self) -> &Uuid {
        &self.0
    }
}

impl Default for ParticipantId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for ParticipantId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Identity of the user performing an operation (admin, approver or scanner).
///
/// Authentication happens upstream; the resolved identity is passed through
/// and recorded on every write for the audit trail.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ActorId(Uuid);

impl ActorId {
    /// Creates a new random `ActorId`
    #[must_use]
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }

    /// Create an `ActorId` from a `Uuid`
    #[must_use]
    pub const fn from_uuid(uuid: Uuid) -> Self {
        Self(uuid)
    }

    /// Get the inner UUID
    #[must_use]
    pub const fn as_uuid(&self) -> &Uuid {
        &self.0
    }
}

impl Default for ActorId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for ActorId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Unique identifier for an inventory item in the catalog
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ItemId(Uuid);

impl ItemId {
    /// Creates a new random `ItemId`
    #[must_use]
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }

    /// Create an `ItemId` from a `Uuid`
    #[must_use]
    pub const fn from_uuid(uuid: Uuid) -> Self {
        Self(uuid)
    }

    /// Get the inner UUID
    #[must_use]
    pub const fn as_uuid(&self) -> &Uuid {
        &self.0
    }
}

impl Default for ItemId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for ItemId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Unique identifier for a ledger entry
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct EntryId(Uuid);

impl EntryId {
    /// Creates a new random `EntryId`
    #[must_use]
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }

    /// Create an `EntryId` from a `Uuid`
    #[must_use]
    pub const fn from_uuid(uuid: Uuid) -> Self {
        Self(uuid)
    }

    /// Get the inner UUID
    #[must_use]
    pub const fn as_uuid(&self) -> &Uuid {
        &self.0
    }
}

impl Default for EntryId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for EntryId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

// ============================================================================
// Allocation
// ============================================================================

/// Approval lifecycle status of an allocation
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AllocationStatus {
    /// Freshly created, editable, not yet submitted
    Open,
    /// Saved as a draft, editable, not yet submitted
    Draft,
    /// Submitted and awaiting an approval verdict
    Pending,
    /// Approved; participants can redeem against it
    Approved,
    /// Rejected with a mandatory comment; editable and resubmittable
    Rejected,
}

impl AllocationStatus {
    /// Wire and storage representation of the status
    #[must_use]
    pub const fn as_str(&self) -> &'static str {
        match self {
            Self::Open => "open",
            Self::Draft => "draft",
            Self::Pending => "pending",
            Self::Approved => "approved",
            Self::Rejected => "rejected",
        }
    }

    /// Parse the storage representation back into a status
    #[must_use]
    pub fn parse(value: &str) -> Option<Self> {
        match value {
            "open" => Some(Self::Open),
            "draft" => Some(Self::Draft),
            "pending" => Some(Self::Pending),
            "approved" => Some(Self::Approved),
            "rejected" => Some(Self::Rejected),
            _ => None,
        }
    }

    /// Whether the allocation's contents may still be edited
    #[must_use]
    pub const fn is_editable(&self) -> bool {
        matches!(self, Self::Open | Self::Draft | Self::Rejected)
    }
}

impl fmt::Display for AllocationStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// One inventory line of an allocation: an item granted per participant
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct LineItem {
    /// Catalog item being allocated
    pub item_id: ItemId,
    /// How many units each participant receives
    pub quantity_per_participant: i64,
}

impl LineItem {
    /// Creates a new `LineItem`
    #[must_use]
    pub const fn new(item_id: ItemId, quantity_per_participant: i64) -> Self {
        Self {
            item_id,
            quantity_per_participant,
        }
    }
}

/// A pool of inventory items and/or voucher quota granted per participant for
/// one event, subject to the approval workflow.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct Allocation {
    /// Unique allocation identifier
    pub id: AllocationId,
    /// Event this allocation belongs to
    pub event_id: EventId,
    /// Tenant that owns the event
    pub tenant_id: TenantId,
    /// Inventory lines granted per participant
    pub line_items: Vec<LineItem>,
    /// Vouchers granted per participant (0 = items only)
    pub voucher_quota_per_participant: i64,
    /// Free-text notes, including appended approval comments
    pub notes: Option<String>,
    /// Current approval status
    pub status: AllocationStatus,
    /// Admin who created the allocation
    pub created_by: ActorId,
    /// Approver who decided it (set on approve/reject, cleared on cancel)
    pub approved_by: Option<ActorId>,
    /// When the allocation was created
    pub created_at: DateTime<Utc>,
    /// When the approval verdict was recorded
    pub approved_at: Option<DateTime<Utc>>,
}

impl Allocation {
    /// Creates a new `Allocation` in the given initial status.
    ///
    /// Content validation (at least one line item or a positive voucher
    /// quota) happens in [`crate::allocation::validate_contents`] before the
    /// allocation is persisted.
    #[must_use]
    #[allow(clippy::too_many_arguments)]
    pub const fn new(
        id: AllocationId,
        event_id: EventId,
        tenant_id: TenantId,
        line_items: Vec<LineItem>,
        voucher_quota_per_participant: i64,
        notes: Option<String>,
        status: AllocationStatus,
        created_by: ActorId,
        created_at: DateTime<Utc>,
    ) -> Self {
        Self {
            id,
            event_id,
            tenant_id,
            line_items,
            voucher_quota_per_participant,
            notes,
            status,
            created_by,
            approved_by: None,
            created_at,
            approved_at: None,
        }
    }

    /// Whether the allocation grants any voucher quota at all
    #[must_use]
    pub const fn has_vouchers(&self) -> bool {
        self.voucher_quota_per_participant > 0
    }
}

// ============================================================================
// Redemption ledger
// ============================================================================

/// One immutable row of the redemption ledger.
///
/// A redemption is a positive-quantity entry; a reassignment (reversal) is a
/// negative-quantity entry of the same shape. Entries are never updated or
/// deleted; the ledger is the only source of truth for consumption.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct RedemptionEntry {
    /// Unique entry identifier
    pub id: EntryId,
    /// Allocation the entry draws against
    pub allocation_id: AllocationId,
    /// Participant whose quota is affected
    pub participant_id: ParticipantId,
    /// Signed quantity: positive = redeemed, negative = reassigned back
    pub quantity: i64,
    /// Who recorded the entry (staff member or scanner)
    pub actor: ActorId,
    /// Optional free-text context
    pub note: Option<String>,
    /// When the entry was written
    pub recorded_at: DateTime<Utc>,
}

impl RedemptionEntry {
    /// Creates a new ledger entry
    #[must_use]
    #[allow(clippy::too_many_arguments)]
    pub const fn new(
        id: EntryId,
        allocation_id: AllocationId,
        participant_id: ParticipantId,
        quantity: i64,
        actor: ActorId,
        note: Option<String>,
        recorded_at: DateTime<Utc>,
    ) -> Self {
        Self {
            id,
            allocation_id,
            participant_id,
            quantity,
            actor,
            note,
            recorded_at,
        }
    }

    /// Whether this entry consumed quota
    #[must_use]
    pub const fn is_redemption(&self) -> bool {
        self.quantity > 0
    }

    /// Whether this entry restored quota
    #[must_use]
    pub const fn is_reassignment(&self) -> bool {
        self.quantity < 0
    }
}

// ============================================================================
// Two-phase redemption intent
// ============================================================================

/// Lifecycle status of a pending redemption intent
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum IntentStatus {
    /// Issued, awaiting scan and confirmation
    Pending,
    /// Confirmed; exactly one ledger entry was written for it
    Completed,
    /// Timed out before confirmation; no ledger entry
    Expired,
    /// Cancelled before confirmation; no ledger entry
    Cancelled,
}

impl IntentStatus {
    /// Wire and storage representation of the status
    #[must_use]
    pub const fn as_str(&self) -> &'static str {
        match self {
            Self::Pending => "pending",
            Self::Completed => "completed",
            Self::Expired => "expired",
            Self::Cancelled => "cancelled",
        }
    }

    /// Parse the storage representation back into a status
    #[must_use]
    pub fn parse(value: &str) -> Option<Self> {
        match value {
            "pending" => Some(Self::Pending),
            "completed" => Some(Self::Completed),
            "expired" => Some(Self::Expired),
            "cancelled" => Some(Self::Cancelled),
            _ => None,
        }
    }

    /// Terminal statuses never transition again and never reach the ledger
    #[must_use]
    pub const fn is_terminal(&self) -> bool {
        matches!(self, Self::Completed | Self::Expired | Self::Cancelled)
    }
}

impl fmt::Display for IntentStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// An unconfirmed redemption request: the first phase of the QR flow.
///
/// Created by `initiate`, displayed as a QR code, read by `scan`, and
/// resolved exactly once by `confirm` (ledger write + flip to `Completed`)
/// or abandoned via `cancel`/`expire`.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct PendingRedemption {
    /// Opaque single-use token identifying this intent
    pub token: IntentToken,
    /// Allocation the intent draws against
    pub allocation_id: AllocationId,
    /// Participant who initiated the intent
    pub participant_id: ParticipantId,
    /// Quantity the participant intends to redeem (always positive)
    pub quantity: i64,
    /// Optional free-text context carried into the ledger entry
    pub notes: Option<String>,
    /// Current intent status
    pub status: IntentStatus,
    /// When the intent was issued
    pub created_at: DateTime<Utc>,
    /// Staff member who resolved the intent
    pub processed_by: Option<ActorId>,
    /// When the intent was resolved
    pub processed_at: Option<DateTime<Utc>>,
}

impl PendingRedemption {
    /// Creates a new intent in `Pending` status
    #[must_use]
    pub const fn new(
        token: IntentToken,
        allocation_id: AllocationId,
        participant_id: ParticipantId,
        quantity: i64,
        notes: Option<String>,
        created_at: DateTime<Utc>,
    ) -> Self {
        Self {
            token,
            allocation_id,
            participant_id,
            quantity,
            notes,
            status: IntentStatus::Pending,
            created_at,
            processed_by: None,
            processed_at: None,
        }
    }
}
