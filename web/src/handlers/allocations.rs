//! Allocation management API endpoints.
//!
//! Covers allocation CRUD and the approval state machine:
//! - POST /api/allocations - Create a new allocation
//! - GET /api/allocations/:id - Get allocation details
//! - GET /api/events/:event_id/allocations - List an event's allocations
//! - PUT /api/allocations/:id - Edit an open, draft or rejected allocation
//! - DELETE /api/allocations/:id - Delete an allocation without ledger history
//! - POST /api/allocations/:id/submit - Submit for approval
//! - POST /api/allocations/:id/approve - Approve a pending allocation
//! - POST /api/allocations/:id/reject - Reject with a mandatory comment
//! - POST /api/allocations/:id/cancel - Withdraw a pending submission
//! - POST /api/allocations/:id/resubmit - Resubmit after rejection

use crate::error::AppError;
use crate::state::AppState;
use axum::{
    extract::{Path, Query, State},
    http::StatusCode,
    Json,
};
use serde::Deserialize;
use uuid::Uuid;
use voucher_core::allocation::AllocationPatch;
use voucher_core::service::{AllocationDetail, CreateAllocation};
use voucher_core::types::{
    ActorId, Allocation, AllocationId, AllocationStatus, EventId, LineItem, ParticipantId,
    TenantId,
};

// ============================================================================
// Request/Response Types
// ============================================================================

/// Request to create a new allocation.
#[derive(Debug, Deserialize)]
pub struct CreateAllocationRequest {
    /// Event the allocation belongs to
    pub event_id: EventId,
    /// Tenant that owns the event
    pub tenant_id: TenantId,
    /// Inventory lines granted per participant
    #[serde(default)]
    pub line_items: Vec<LineItem>,
    /// Vouchers granted per participant (0 = items only)
    #[serde(default)]
    pub voucher_quota_per_participant: i64,
    /// Free-text notes
    #[serde(default)]
    pub notes: Option<String>,
    /// Admin creating the allocation
    pub created_by: ActorId,
    /// Save as a draft instead of open
    #[serde(default)]
    pub draft: bool,
    /// Submit for approval immediately
    #[serde(default)]
    pub submit: bool,
}

/// Request to edit an allocation's contents. Absent fields are left as-is.
#[derive(Debug, Deserialize)]
pub struct UpdateAllocationRequest {
    /// Replacement line items
    pub line_items: Option<Vec<LineItem>>,
    /// Replacement voucher quota
    pub voucher_quota_per_participant: Option<i64>,
    /// Replacement notes; an explicit `null` clears them
    #[serde(default, deserialize_with = "present_or_null")]
    pub notes: Option<Option<String>>,
}

/// Deserialize a field where `null` and absent mean different things:
/// absent stays `None` via the default, while any present value (including
/// `null`) becomes `Some(_)`.
fn present_or_null<'de, D>(deserializer: D) -> Result<Option<Option<String>>, D::Error>
where
    D: serde::Deserializer<'de>,
{
    Option::<String>::deserialize(deserializer).map(Some)
}

/// Query parameters for the allocation detail view.
#[derive(Debug, Deserialize)]
pub struct AllocationDetailQuery {
    /// Include this participant's balance in the response
    pub participant_id: Option<Uuid>,
}

/// Query parameters for listing an event's allocations.
#[derive(Debug, Deserialize)]
pub struct ListAllocationsQuery {
    /// Only return allocations in this status
    pub status: Option<AllocationStatus>,
}

/// Body naming the actor performing a submit or resubmit.
#[derive(Debug, Deserialize)]
pub struct SubmitRequest {
    /// Staff member submitting the allocation
    pub actor: ActorId,
}

/// Request to approve a pending allocation.
#[derive(Debug, Deserialize)]
pub struct ApproveRequest {
    /// Approver deciding the allocation
    pub approver: ActorId,
    /// Optional comment appended to the allocation's notes
    #[serde(default)]
    pub comment: Option<String>,
}

/// Request to reject a pending allocation.
#[derive(Debug, Deserialize)]
pub struct RejectRequest {
    /// Approver deciding the allocation
    pub approver: ActorId,
    /// Mandatory explanation for the creator
    pub comment: String,
}

// ============================================================================
// Handlers
// ============================================================================

/// Create a new allocation.
///
/// The allocation starts in `open` status, `draft` when the `draft` flag is
/// set, or goes straight to `pending` with the `submit` flag.
///
/// # Example
///
/// ```bash
/// curl -X POST http://localhost:8080/api/allocations \
///   -H "Content-Type: application/json" \
///   -d '{
///     "event_id": "550e8400-e29b-41d4-a716-446655440000",
///     "tenant_id": "660e8400-e29b-41d4-a716-446655440000",
///     "line_items": [{"item_id": "770e8400-e29b-41d4-a716-446655440000", "quantity_per_participant": 2}],
///     "voucher_quota_per_participant": 5,
///     "created_by": "880e8400-e29b-41d4-a716-446655440000"
///   }'
/// ```
pub async fn create_allocation(
    State(state): State<AppState>,
    Json(request): Json<CreateAllocationRequest>,
) -> Result<(StatusCode, Json<Allocation>), AppError> {
    let allocation = state
        .allocations
        .create(CreateAllocation {
            event_id: request.event_id,
            tenant_id: request.tenant_id,
            line_items: request.line_items,
            voucher_quota_per_participant: request.voucher_quota_per_participant,
            notes: request.notes,
            created_by: request.created_by,
            draft: request.draft,
            submit: request.submit,
        })
        .await?;

    Ok((StatusCode::CREATED, Json(allocation)))
}

/// Get allocation details with catalog-enriched line items.
///
/// Pass `?participant_id=<uuid>` to include that participant's balance.
pub async fn get_allocation(
    Path(id): Path<Uuid>,
    Query(query): Query<AllocationDetailQuery>,
    State(state): State<AppState>,
) -> Result<Json<AllocationDetail>, AppError> {
    let participant = query.participant_id.map(ParticipantId::from_uuid);
    let detail = state
        .allocations
        .get(AllocationId::from_uuid(id), participant)
        .await?;
    Ok(Json(detail))
}

/// List an event's allocations, newest first.
///
/// Pass `?status=pending` to filter by approval status.
pub async fn list_allocations(
    Path(event_id): Path<Uuid>,
    Query(query): Query<ListAllocationsQuery>,
    State(state): State<AppState>,
) -> Result<Json<Vec<Allocation>>, AppError> {
    let allocations = state
        .allocations
        .list(EventId::from_uuid(event_id), query.status)
        .await?;
    Ok(Json(allocations))
}

/// Edit an allocation's contents.
///
/// Only open, draft and rejected allocations are editable.
pub async fn update_allocation(
    Path(id): Path<Uuid>,
    State(state): State<AppState>,
    Json(request): Json<UpdateAllocationRequest>,
) -> Result<Json<Allocation>, AppError> {
    let patch = AllocationPatch {
        line_items: request.line_items,
        voucher_quota_per_participant: request.voucher_quota_per_participant,
        notes: request.notes,
    };
    let allocation = state
        .allocations
        .update(AllocationId::from_uuid(id), patch)
        .await?;
    Ok(Json(allocation))
}

/// Delete an allocation.
///
/// Refused with 409 once the ledger holds entries for it.
pub async fn delete_allocation(
    Path(id): Path<Uuid>,
    State(state): State<AppState>,
) -> Result<StatusCode, AppError> {
    state.allocations.delete(AllocationId::from_uuid(id)).await?;
    Ok(StatusCode::NO_CONTENT)
}

/// Submit an allocation for approval.
pub async fn submit_allocation(
    Path(id): Path<Uuid>,
    State(state): State<AppState>,
    Json(request): Json<SubmitRequest>,
) -> Result<Json<Allocation>, AppError> {
    let allocation = state
        .allocations
        .submit(AllocationId::from_uuid(id), request.actor)
        .await?;
    Ok(Json(allocation))
}

/// Resubmit a rejected allocation for a fresh verdict.
pub async fn resubmit_allocation(
    Path(id): Path<Uuid>,
    State(state): State<AppState>,
    Json(request): Json<SubmitRequest>,
) -> Result<Json<Allocation>, AppError> {
    let allocation = state
        .allocations
        .resubmit(AllocationId::from_uuid(id), request.actor)
        .await?;
    Ok(Json(allocation))
}

/// Approve a pending allocation.
///
/// # Example
///
/// ```bash
/// curl -X POST http://localhost:8080/api/allocations/<id>/approve \
///   -H "Content-Type: application/json" \
///   -d '{"approver": "990e8400-e29b-41d4-a716-446655440000", "comment": "Looks good"}'
/// ```
pub async fn approve_allocation(
    Path(id): Path<Uuid>,
    State(state): State<AppState>,
    Json(request): Json<ApproveRequest>,
) -> Result<Json<Allocation>, AppError> {
    let allocation = state
        .allocations
        .approve(AllocationId::from_uuid(id), request.approver, request.comment)
        .await?;
    Ok(Json(allocation))
}

/// Reject a pending allocation. The comment is mandatory and is appended
/// to the allocation's notes for the creator to read.
pub async fn reject_allocation(
    Path(id): Path<Uuid>,
    State(state): State<AppState>,
    Json(request): Json<RejectRequest>,
) -> Result<Json<Allocation>, AppError> {
    let allocation = state
        .allocations
        .reject(AllocationId::from_uuid(id), request.approver, request.comment)
        .await?;
    Ok(Json(allocation))
}

/// Withdraw a pending submission back to open, clearing any verdict.
pub async fn cancel_submission(
    Path(id): Path<Uuid>,
    State(state): State<AppState>,
) -> Result<Json<Allocation>, AppError> {
    let allocation = state.allocations.cancel(AllocationId::from_uuid(id)).await?;
    Ok(Json(allocation))
}
