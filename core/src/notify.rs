//! Notification side effects of the approval workflow.
//!
//! The core only decides *that* a notification should fire; transport
//! (email, push) lives behind the [`NotificationDispatcher`] trait upstream.
//! Dispatch failures are logged by the calling service and never roll back
//! or fail the operation that triggered them.

use std::future::Future;
use std::pin::Pin;
use thiserror::Error;

use crate::types::{ActorId, AllocationId, EventId, TenantId};

/// A workflow event worth telling someone about.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum Notification {
    /// An allocation was submitted; the tenant's approvers should review it.
    ApprovalRequested {
        /// Allocation awaiting a verdict
        allocation_id: AllocationId,
        /// Event the allocation belongs to
        event_id: EventId,
        /// Tenant whose approvers are addressed
        tenant_id: TenantId,
        /// Admin who submitted
        submitted_by: ActorId,
    },
    /// An allocation was approved; the creator should hear about it.
    AllocationApproved {
        /// The approved allocation
        allocation_id: AllocationId,
        /// Event the allocation belongs to
        event_id: EventId,
        /// Approver who decided
        approved_by: ActorId,
        /// Creator being notified
        creator: ActorId,
    },
    /// An allocation was rejected; the creator gets the mandatory comment.
    AllocationRejected {
        /// The rejected allocation
        allocation_id: AllocationId,
        /// Event the allocation belongs to
        event_id: EventId,
        /// Approver who decided
        rejected_by: ActorId,
        /// Creator being notified
        creator: ActorId,
        /// The approver's comment
        comment: String,
    },
}

/// Errors a dispatcher may report. They are logged, never propagated.
#[derive(Debug, Error)]
pub enum DispatchError {
    /// Downstream delivery failed
    #[error("Notification delivery failed: {0}")]
    Delivery(String),
}

/// Delivery seam for workflow notifications.
pub trait NotificationDispatcher: Send + Sync {
    /// Hand a notification to the transport.
    ///
    /// # Errors
    ///
    /// Returns [`DispatchError::Delivery`] when the transport refuses the
    /// notification; callers log and continue.
    fn dispatch(
        &self,
        notification: Notification,
    ) -> Pin<Box<dyn Future<Output = Result<(), DispatchError>> + Send + '_>>;
}

/// Default dispatcher: writes the notification to the log and succeeds.
///
/// Deployments wire a real transport here; the workflow does not care.
#[derive(Clone, Copy, Debug, Default)]
pub struct LogDispatcher;

impl NotificationDispatcher for LogDispatcher {
    fn dispatch(
        &self,
        notification: Notification,
    ) -> Pin<Box<dyn Future<Output = Result<(), DispatchError>> + Send + '_>> {
        Box::pin(async move {
            match &notification {
                Notification::ApprovalRequested {
                    allocation_id,
                    tenant_id,
                    ..
                } => {
                    tracing::info!(
                        allocation_id = %allocation_id,
                        tenant_id = %tenant_id,
                        "notification: approval requested"
                    );
                },
                Notification::AllocationApproved {
                    allocation_id,
                    creator,
                    ..
                } => {
                    tracing::info!(
                        allocation_id = %allocation_id,
                        creator = %creator,
                        "notification: allocation approved"
                    );
                },
                Notification::AllocationRejected {
                    allocation_id,
                    creator,
                    ..
                } => {
                    tracing::info!(
                        allocation_id = %allocation_id,
                        creator = %creator,
                        "notification: allocation rejected"
                    );
                },
            }
            Ok(())
        })
    }
}
