//! Error types for allocation and redemption operations.

use crate::types::AllocationStatus;
use thiserror::Error;

/// Result type alias for ledger operations.
pub type Result<T> = std::result::Result<T, LedgerError>;

/// Broad failure category, used to map domain errors onto transport codes.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ErrorKind {
    /// Malformed or logically inconsistent input (400-class)
    Validation,
    /// Referenced resource absent, or a token not in the expected state (404-class)
    NotFound,
    /// Lost a race to a concurrent writer, or blocked by dependent data (409-class)
    Conflict,
    /// Persistence failure; the whole multi-step write was rolled back (500-class)
    Internal,
}

/// Error taxonomy for the allocation workflow, the redemption ledger and the
/// two-phase QR flow.
///
/// Variants are grouped by the categories surfaced to callers; every variant
/// carries the context needed for a precise message.
#[derive(Debug, Error, Clone, PartialEq)]
pub enum LedgerError {
    // ═══════════════════════════════════════════════════════════
    // Validation Errors
    // ═══════════════════════════════════════════════════════════

    /// Allocation created or updated with neither line items nor vouchers.
    #[error("An allocation needs at least one line item or a positive voucher quota")]
    EmptyAllocation,

    /// Voucher quota below zero makes no sense.
    #[error("Voucher quota per participant cannot be negative: {quota}")]
    NegativeQuota {
        /// The rejected quota value
        quota: i64,
    },

    /// Redemption and reassignment quantities must be positive integers.
    #[error("Quantity must be a positive integer, got {quantity}")]
    QuantityNotPositive {
        /// The rejected quantity
        quantity: i64,
    },

    /// Redeeming past the participant's remaining balance is refused.
    #[error("Cannot redeem more than the remaining balance: requested {requested}, remaining {remaining}")]
    ExceedsRemaining {
        /// Quantity the caller asked for
        requested: i64,
        /// Balance still available at decision time
        remaining: i64,
    },

    /// Rejecting an allocation requires an explanation for the creator.
    #[error("A rejection comment is required")]
    CommentRequired,

    /// Contents can only change while the allocation is open, draft or rejected.
    #[error("Allocation in status '{status}' cannot be edited")]
    NotEditable {
        /// Status at the time of the edit attempt
        status: AllocationStatus,
    },

    /// Only approved allocations accept redemptions.
    #[error("Allocation in status '{status}' is not redeemable")]
    NotRedeemable {
        /// Status at the time of the redemption attempt
        status: AllocationStatus,
    },

    // ═══════════════════════════════════════════════════════════
    // Not Found
    // ═══════════════════════════════════════════════════════════

    /// Referenced allocation does not exist.
    #[error("Allocation {id} not found")]
    AllocationNotFound {
        /// The missing allocation id
        id: crate::types::AllocationId,
    },

    /// Intent token unknown or no longer pending.
    ///
    /// Deliberately covers both cases with one message so an unauthorized
    /// scanner cannot probe whether a token exists or what state it is in.
    #[error("Redemption request not found or already processed")]
    IntentNotFound,

    // ═══════════════════════════════════════════════════════════
    // Conflicts
    // ═══════════════════════════════════════════════════════════

    /// A status transition found the allocation in a different state than the
    /// transition allows. Current status is reported as persisted at the
    /// moment of the atomic update, so a caller that lost a race sees the
    /// winner's result.
    #[error("Can only {action} from states [{allowed}]; current status is '{current}'")]
    InvalidTransition {
        /// The attempted transition verb
        action: &'static str,
        /// Status the allocation actually had
        current: AllocationStatus,
        /// Comma-separated list of valid source statuses
        allowed: &'static str,
    },

    /// Deletion blocked because the ledger references the allocation.
    #[error("Allocation has {entries} ledger entries and cannot be deleted")]
    LedgerNotEmpty {
        /// Number of ledger entries found
        entries: i64,
    },

    // ═══════════════════════════════════════════════════════════
    // System Errors
    // ═══════════════════════════════════════════════════════════

    /// Persistence layer failure.
    #[error("Storage error: {0}")]
    Storage(String),
}

impl LedgerError {
    /// The broad category this error belongs to.
    ///
    /// # Examples
    ///
    /// ```
    /// # use voucher_core::error::{ErrorKind, LedgerError};
    /// assert_eq!(LedgerError::CommentRequired.kind(), ErrorKind::Validation);
    /// assert_eq!(LedgerError::IntentNotFound.kind(), ErrorKind::NotFound);
    /// ```
    #[must_use]
    pub const fn kind(&self) -> ErrorKind {
        match self {
            Self::EmptyAllocation
            | Self::NegativeQuota { .. }
            | Self::QuantityNotPositive { .. }
            | Self::ExceedsRemaining { .. }
            | Self::CommentRequired
            | Self::NotEditable { .. }
            | Self::NotRedeemable { .. } => ErrorKind::Validation,
            Self::AllocationNotFound { .. } | Self::IntentNotFound => ErrorKind::NotFound,
            Self::InvalidTransition { .. } | Self::LedgerNotEmpty { .. } => ErrorKind::Conflict,
            Self::Storage(_) => ErrorKind::Internal,
        }
    }

    /// Stable machine-readable code for API responses.
    ///
    /// # Examples
    ///
    /// ```
    /// # use voucher_core::error::LedgerError;
    /// assert_eq!(LedgerError::CommentRequired.code(), "COMMENT_REQUIRED");
    /// ```
    #[must_use]
    pub const fn code(&self) -> &'static str {
        match self {
            Self::EmptyAllocation => "EMPTY_ALLOCATION",
            Self::NegativeQuota { .. } => "NEGATIVE_QUOTA",
            Self::QuantityNotPositive { .. } => "QUANTITY_NOT_POSITIVE",
            Self::ExceedsRemaining { .. } => "EXCEEDS_REMAINING",
            Self::CommentRequired => "COMMENT_REQUIRED",
            Self::NotEditable { .. } => "NOT_EDITABLE",
            Self::NotRedeemable { .. } => "NOT_REDEEMABLE",
            Self::AllocationNotFound { .. } => "ALLOCATION_NOT_FOUND",
            Self::IntentNotFound => "INTENT_NOT_FOUND",
            Self::InvalidTransition { .. } => "INVALID_TRANSITION",
            Self::LedgerNotEmpty { .. } => "LEDGER_NOT_EMPTY",
            Self::Storage(_) => "STORAGE",
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::AllocationId;

    #[test]
    fn kinds_cover_the_taxonomy() {
        assert_eq!(LedgerError::EmptyAllocation.kind(), ErrorKind::Validation);
        assert_eq!(
            LedgerError::ExceedsRemaining {
                requested: 3,
                remaining: 1
            }
            .kind(),
            ErrorKind::Validation
        );
        assert_eq!(
            LedgerError::AllocationNotFound {
                id: AllocationId::new()
            }
            .kind(),
            ErrorKind::NotFound
        );
        assert_eq!(
            LedgerError::InvalidTransition {
                action: "approve",
                current: AllocationStatus::Approved,
                allowed: "pending",
            }
            .kind(),
            ErrorKind::Conflict
        );
        assert_eq!(
            LedgerError::Storage("connection reset".to_string()).kind(),
            ErrorKind::Internal
        );
    }

    #[test]
    fn intent_errors_do_not_leak_state() {
        // Unknown token and completed token must render identically.
        assert_eq!(
            LedgerError::IntentNotFound.to_string(),
            "Redemption request not found or already processed"
        );
    }

    #[test]
    fn transition_error_names_the_allowed_sources() {
        let err = LedgerError::InvalidTransition {
            action: "approve",
            current: AllocationStatus::Open,
            allowed: "pending",
        };
        assert_eq!(
            err.to_string(),
            "Can only approve from states [pending]; current status is 'open'"
        );
    }
}
