//! Approval state machine for allocations.
//!
//! Transitions are described as data (`Transition` + `StatusChange`) so that
//! every store backend can apply them as a single conditional write: the
//! allowed source statuses become the `WHERE` clause, the change becomes the
//! `SET` clause. Nothing in this module reads state and writes it later;
//! stale-read transitions are impossible by construction.
//!
//! ```text
//! open/draft ──submit──▶ pending ──approve──▶ approved
//!     ▲                  │   │
//!     └─────cancel───────┘   └──reject──▶ rejected ──resubmit──▶ pending
//! ```

use chrono::{DateTime, Utc};

use crate::error::{LedgerError, Result};
use crate::types::{ActorId, Allocation, AllocationStatus, LineItem};

/// A requested status transition, carrying its own admission rules.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Transition {
    /// Open, draft or rejected allocation goes to pending
    Submit,
    /// Pending allocation is approved
    Approve,
    /// Pending allocation is rejected
    Reject,
    /// Pending allocation returns to open without a verdict
    Cancel,
    /// Alias of submit for the explicit resubmission entry point
    Resubmit,
}

impl Transition {
    /// Verb used in error messages and logs
    #[must_use]
    pub const fn verb(&self) -> &'static str {
        match self {
            Self::Submit => "submit",
            Self::Approve => "approve",
            Self::Reject => "reject",
            Self::Cancel => "cancel",
            Self::Resubmit => "resubmit",
        }
    }

    /// Statuses this transition may start from
    #[must_use]
    pub const fn allowed_sources(&self) -> &'static [AllocationStatus] {
        match self {
            Self::Submit | Self::Resubmit => &[
                AllocationStatus::Open,
                AllocationStatus::Draft,
                AllocationStatus::Rejected,
            ],
            Self::Approve | Self::Reject | Self::Cancel => &[AllocationStatus::Pending],
        }
    }

    /// Human-readable rendering of [`Self::allowed_sources`]
    #[must_use]
    pub const fn allowed_label(&self) -> &'static str {
        match self {
            Self::Submit | Self::Resubmit => "open, draft, rejected",
            Self::Approve | Self::Reject | Self::Cancel => "pending",
        }
    }

    /// Status the allocation ends up in
    #[must_use]
    pub const fn target(&self) -> AllocationStatus {
        match self {
            Self::Submit | Self::Resubmit => AllocationStatus::Pending,
            Self::Approve => AllocationStatus::Approved,
            Self::Reject => AllocationStatus::Rejected,
            Self::Cancel => AllocationStatus::Open,
        }
    }

    /// Check whether the transition may start from `current`.
    ///
    /// # Errors
    ///
    /// Returns [`LedgerError::InvalidTransition`] when `current` is not an
    /// allowed source status.
    pub fn check(&self, current: AllocationStatus) -> Result<()> {
        if self.allowed_sources().contains(&current) {
            Ok(())
        } else {
            Err(self.stale_error(current))
        }
    }

    /// The error reported when the persisted status turned out to be
    /// `current` instead of an allowed source.
    #[must_use]
    pub const fn stale_error(&self, current: AllocationStatus) -> LedgerError {
        LedgerError::InvalidTransition {
            action: self.verb(),
            current,
            allowed: self.allowed_label(),
        }
    }
}

/// The write half of a transition: what the store sets once the status
/// condition holds.
#[derive(Clone, Debug, PartialEq)]
pub struct StatusChange {
    /// Status to move to
    pub to: AllocationStatus,
    /// Approver identity to record, if any
    pub approver: Option<ActorId>,
    /// Verdict timestamp to record, if any
    pub decided_at: Option<DateTime<Utc>>,
    /// Comment appended to the allocation's notes, if any
    pub append_note: Option<String>,
    /// Whether approver identity and verdict timestamp are cleared
    pub clear_approver: bool,
}

impl StatusChange {
    /// Change for `submit`/`resubmit`: status only.
    #[must_use]
    pub const fn submit() -> Self {
        Self {
            to: AllocationStatus::Pending,
            approver: None,
            decided_at: None,
            append_note: None,
            clear_approver: false,
        }
    }

    /// Change for `approve`: records the verdict, optionally appends a comment.
    #[must_use]
    pub const fn approve(approver: ActorId, decided_at: DateTime<Utc>, comment: Option<String>) -> Self {
        Self {
            to: AllocationStatus::Approved,
            approver: Some(approver),
            decided_at: Some(decided_at),
            append_note: comment,
            clear_approver: false,
        }
    }

    /// Change for `reject`: records the verdict and the mandatory comment.
    #[must_use]
    pub const fn reject(approver: ActorId, decided_at: DateTime<Utc>, comment: String) -> Self {
        Self {
            to: AllocationStatus::Rejected,
            approver: Some(approver),
            decided_at: Some(decided_at),
            append_note: Some(comment),
            clear_approver: false,
        }
    }

    /// Change for `cancel`: back to open, verdict fields wiped.
    #[must_use]
    pub const fn cancel() -> Self {
        Self {
            to: AllocationStatus::Open,
            approver: None,
            decided_at: None,
            append_note: None,
            clear_approver: true,
        }
    }

    /// Apply the change to an in-memory allocation.
    ///
    /// Store backends that hold rows as domain values (the in-memory store)
    /// call this under their lock; the Postgres backend mirrors the same
    /// field set in its conditional `UPDATE`.
    pub fn apply(&self, allocation: &mut Allocation) {
        allocation.status = self.to;
        if let Some(approver) = self.approver {
            allocation.approved_by = Some(approver);
        }
        if let Some(decided_at) = self.decided_at {
            allocation.approved_at = Some(decided_at);
        }
        if self.clear_approver {
            allocation.approved_by = None;
            allocation.approved_at = None;
        }
        if let Some(note) = &self.append_note {
            allocation.notes = Some(append_note(allocation.notes.take(), note));
        }
    }
}

/// Partial update of an allocation's editable contents.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct AllocationPatch {
    /// Replacement line items, if given
    pub line_items: Option<Vec<LineItem>>,
    /// Replacement voucher quota, if given
    pub voucher_quota_per_participant: Option<i64>,
    /// Notes change: `None` leaves them alone, `Some(None)` clears them,
    /// `Some(Some(_))` replaces them
    pub notes: Option<Option<String>>,
}

impl AllocationPatch {
    /// Whether the patch changes anything at all
    #[must_use]
    pub const fn is_empty(&self) -> bool {
        self.line_items.is_none()
            && self.voucher_quota_per_participant.is_none()
            && self.notes.is_none()
    }

    /// Validate the patch against the allocation it would be applied to.
    ///
    /// The resulting contents must still satisfy the creation invariant.
    ///
    /// # Errors
    ///
    /// Returns [`LedgerError::NotEditable`] when the allocation's status does
    /// not permit edits, and any error of [`validate_contents`] for the
    /// post-patch contents.
    pub fn check(&self, allocation: &Allocation) -> Result<()> {
        validate_editable(allocation.status)?;
        let line_items = self
            .line_items
            .as_deref()
            .unwrap_or(&allocation.line_items);
        let quota = self
            .voucher_quota_per_participant
            .unwrap_or(allocation.voucher_quota_per_participant);
        validate_contents(line_items, quota)
    }

    /// Apply the patch to an in-memory allocation. Call [`Self::check`] first.
    pub fn apply(&self, allocation: &mut Allocation) {
        if let Some(line_items) = &self.line_items {
            allocation.line_items = line_items.clone();
        }
        if let Some(quota) = self.voucher_quota_per_participant {
            allocation.voucher_quota_per_participant = quota;
        }
        if let Some(notes) = &self.notes {
            allocation.notes.clone_from(notes);
        }
    }
}

/// Validate the contents an allocation is created or updated with.
///
/// # Errors
///
/// - [`LedgerError::NegativeQuota`] for a quota below zero
/// - [`LedgerError::QuantityNotPositive`] for a line item granting nothing
/// - [`LedgerError::EmptyAllocation`] when there is neither a line item nor
///   a positive voucher quota
pub fn validate_contents(line_items: &[LineItem], voucher_quota: i64) -> Result<()> {
    if voucher_quota < 0 {
        return Err(LedgerError::NegativeQuota {
            quota: voucher_quota,
        });
    }
    for item in line_items {
        if item.quantity_per_participant <= 0 {
            return Err(LedgerError::QuantityNotPositive {
                quantity: item.quantity_per_participant,
            });
        }
    }
    if line_items.is_empty() && voucher_quota == 0 {
        return Err(LedgerError::EmptyAllocation);
    }
    Ok(())
}

/// Validate that an allocation in `status` accepts content edits.
///
/// # Errors
///
/// Returns [`LedgerError::NotEditable`] for pending and approved allocations.
pub fn validate_editable(status: AllocationStatus) -> Result<()> {
    if status.is_editable() {
        Ok(())
    } else {
        Err(LedgerError::NotEditable { status })
    }
}

/// Validate the mandatory comment on a rejection.
///
/// # Errors
///
/// Returns [`LedgerError::CommentRequired`] when the comment is missing or
/// blank.
pub fn validate_reject_comment(comment: &str) -> Result<()> {
    if comment.trim().is_empty() {
        Err(LedgerError::CommentRequired)
    } else {
        Ok(())
    }
}

/// Append an approval comment to existing notes, newline separated.
#[must_use]
pub fn append_note(notes: Option<String>, note: &str) -> String {
    match notes {
        Some(existing) if !existing.is_empty() => format!("{existing}\n{note}"),
        _ => note.to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::{AllocationId, EventId, ItemId, TenantId};

    fn open_allocation() -> Allocation {
        Allocation::new(
            AllocationId::new(),
            EventId::new(),
            TenantId::new(),
            vec![],
            2,
            None,
            AllocationStatus::Open,
            ActorId::new(),
            Utc::now(),
        )
    }

    #[test]
    fn submit_allowed_from_open_draft_rejected() {
        for status in [
            AllocationStatus::Open,
            AllocationStatus::Draft,
            AllocationStatus::Rejected,
        ] {
            assert!(Transition::Submit.check(status).is_ok());
        }
        assert!(Transition::Submit.check(AllocationStatus::Pending).is_err());
        assert!(Transition::Submit.check(AllocationStatus::Approved).is_err());
    }

    #[test]
    #[allow(clippy::expect_used)]
    fn approve_and_reject_only_from_pending() {
        assert!(Transition::Approve.check(AllocationStatus::Pending).is_ok());
        assert!(Transition::Reject.check(AllocationStatus::Pending).is_ok());

        let err = Transition::Approve
            .check(AllocationStatus::Approved)
            .expect_err("approve from approved must fail");
        assert_eq!(
            err,
            LedgerError::InvalidTransition {
                action: "approve",
                current: AllocationStatus::Approved,
                allowed: "pending",
            }
        );
    }

    #[test]
    fn cancel_clears_verdict_fields() {
        let mut allocation = open_allocation();
        StatusChange::approve(ActorId::new(), Utc::now(), None).apply(&mut allocation);
        assert!(allocation.approved_by.is_some());

        StatusChange::cancel().apply(&mut allocation);
        assert_eq!(allocation.status, AllocationStatus::Open);
        assert!(allocation.approved_by.is_none());
        assert!(allocation.approved_at.is_none());
    }

    #[test]
    fn reject_appends_comment_to_notes() {
        let mut allocation = open_allocation();
        allocation.notes = Some("initial request".to_string());

        StatusChange::reject(ActorId::new(), Utc::now(), "quota too high".to_string())
            .apply(&mut allocation);

        assert_eq!(allocation.status, AllocationStatus::Rejected);
        assert_eq!(
            allocation.notes.as_deref(),
            Some("initial request\nquota too high")
        );
    }

    #[test]
    fn contents_need_items_or_vouchers() {
        assert_eq!(validate_contents(&[], 0), Err(LedgerError::EmptyAllocation));
        assert!(validate_contents(&[], 2).is_ok());
        assert!(validate_contents(&[LineItem::new(ItemId::new(), 1)], 0).is_ok());
        assert_eq!(
            validate_contents(&[], -1),
            Err(LedgerError::NegativeQuota { quota: -1 })
        );
        assert_eq!(
            validate_contents(&[LineItem::new(ItemId::new(), 0)], 0),
            Err(LedgerError::QuantityNotPositive { quantity: 0 })
        );
    }

    #[test]
    fn blank_reject_comment_is_refused() {
        assert_eq!(
            validate_reject_comment("   "),
            Err(LedgerError::CommentRequired)
        );
        assert!(validate_reject_comment("needs revision").is_ok());
    }

    #[test]
    fn patch_refused_while_pending() {
        let mut allocation = open_allocation();
        allocation.status = AllocationStatus::Pending;

        let patch = AllocationPatch {
            voucher_quota_per_participant: Some(5),
            ..AllocationPatch::default()
        };
        assert_eq!(
            patch.check(&allocation),
            Err(LedgerError::NotEditable {
                status: AllocationStatus::Pending
            })
        );
    }

    #[test]
    fn patch_cannot_empty_an_allocation() {
        let allocation = open_allocation();
        let patch = AllocationPatch {
            voucher_quota_per_participant: Some(0),
            ..AllocationPatch::default()
        };
        assert_eq!(patch.check(&allocation), Err(LedgerError::EmptyAllocation));
    }

    #[test]
    #[allow(clippy::expect_used)]
    fn patch_applies_replacements() {
        let mut allocation = open_allocation();
        let item = LineItem::new(ItemId::new(), 3);
        let patch = AllocationPatch {
            line_items: Some(vec![item]),
            voucher_quota_per_participant: Some(4),
            notes: Some(Some("updated".to_string())),
        };
        patch.check(&allocation).expect("patch should be valid");
        patch.apply(&mut allocation);

        assert_eq!(allocation.line_items, vec![item]);
        assert_eq!(allocation.voucher_quota_per_participant, 4);
        assert_eq!(allocation.notes.as_deref(), Some("updated"));
    }

    #[test]
    fn patch_distinguishes_clearing_notes_from_leaving_them() {
        let mut allocation = open_allocation();
        allocation.notes = Some("keep me".to_string());

        // An absent notes field leaves the existing notes alone
        let untouched = AllocationPatch {
            voucher_quota_per_participant: Some(4),
            ..AllocationPatch::default()
        };
        untouched.apply(&mut allocation);
        assert_eq!(allocation.notes.as_deref(), Some("keep me"));

        // An explicit null wipes them
        let cleared = AllocationPatch {
            notes: Some(None),
            ..AllocationPatch::default()
        };
        cleared.apply(&mut allocation);
        assert_eq!(allocation.notes, None);
    }
}
