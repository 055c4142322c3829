//! Balance computation over the append-only redemption ledger.
//!
//! The ledger never stores a running counter. Every balance is derived from
//! the signed entry quantities at read time, so the numbers shown in
//! listings, QR payloads and confirmation responses can never diverge from
//! the ledger of record.

use serde::{Deserialize, Serialize};

use crate::error::{LedgerError, Result};
use crate::types::AllocationStatus;

/// Derived per-participant balance for one allocation.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Balance {
    /// Vouchers granted per participant
    pub quota: i64,
    /// Net consumed quota, clamped to zero (never show negative "redeemed")
    pub net_redeemed: i64,
    /// Quota still available; negative only for pre-cap historical data
    pub remaining: i64,
    /// How far past the quota the participant went, zero when within it
    pub over_redeemed: i64,
}

impl Balance {
    /// Compute the balance from the signed quantities of a participant's
    /// ledger entries.
    #[must_use]
    pub fn compute(quota: i64, signed_quantities: impl IntoIterator<Item = i64>) -> Self {
        Self::from_net(quota, signed_quantities.into_iter().sum())
    }

    /// Compute the balance from an already-summed net quantity.
    ///
    /// The Postgres store sums in SQL and feeds the result through here so
    /// both backends share one set of clamping rules.
    #[must_use]
    pub const fn from_net(quota: i64, raw_net: i64) -> Self {
        let net_redeemed = if raw_net > 0 { raw_net } else { 0 };
        let remaining = quota - net_redeemed;
        let over_redeemed = if remaining < 0 { -remaining } else { 0 };
        Self {
            quota,
            net_redeemed,
            remaining,
            over_redeemed,
        }
    }

    /// Whether the remaining balance covers a requested quantity
    #[must_use]
    pub const fn covers(&self, quantity: i64) -> bool {
        quantity <= self.remaining
    }
}

/// Validate a redemption or reassignment request quantity.
///
/// # Errors
///
/// Returns [`LedgerError::QuantityNotPositive`] for zero or negative
/// quantities.
pub const fn validate_request_quantity(quantity: i64) -> Result<()> {
    if quantity > 0 {
        Ok(())
    } else {
        Err(LedgerError::QuantityNotPositive { quantity })
    }
}

/// Validate that a redemption fits within the remaining balance.
///
/// # Errors
///
/// Returns [`LedgerError::ExceedsRemaining`] when it does not.
pub const fn validate_within_remaining(balance: &Balance, quantity: i64) -> Result<()> {
    if balance.covers(quantity) {
        Ok(())
    } else {
        Err(LedgerError::ExceedsRemaining {
            requested: quantity,
            remaining: balance.remaining,
        })
    }
}

/// Validate that an allocation's status admits ledger writes.
///
/// # Errors
///
/// Returns [`LedgerError::NotRedeemable`] for any status but approved.
pub const fn validate_redeemable(status: AllocationStatus) -> Result<()> {
    match status {
        AllocationStatus::Approved => Ok(()),
        _ => Err(LedgerError::NotRedeemable { status }),
    }
}
