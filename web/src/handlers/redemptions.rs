//! Direct redemption API endpoints.
//!
//! Staff-facing ledger operations against an approved allocation:
//! - POST /api/allocations/:id/redeem - Redeem vouchers for a participant
//! - POST /api/allocations/:id/reassign - Reverse a prior redemption
//! - GET /api/allocations/:id/balance - A participant's current balance
//! - GET /api/allocations/:id/entries - A participant's ledger history

use crate::error::AppError;
use crate::state::AppState;
use axum::{
    extract::{Path, Query, State},
    Json,
};
use serde::Deserialize;
use uuid::Uuid;
use voucher_core::ledger::Balance;
use voucher_core::service::{RedeemOutcome, ReassignOutcome, RedemptionRequest};
use voucher_core::types::{ActorId, AllocationId, ParticipantId, RedemptionEntry};

// ============================================================================
// Request/Response Types
// ============================================================================

/// Request to redeem or reassign vouchers.
#[derive(Debug, Deserialize)]
pub struct LedgerWriteRequest {
    /// Participant whose quota is affected
    pub participant_id: ParticipantId,
    /// Positive quantity to redeem or reassign
    pub quantity: i64,
    /// Staff member performing the operation
    pub actor: ActorId,
    /// Optional free-text context
    #[serde(default)]
    pub note: Option<String>,
}

/// Query naming the participant a read applies to.
#[derive(Debug, Deserialize)]
pub struct ParticipantQuery {
    /// Participant whose balance or history to read
    pub participant_id: Option<Uuid>,
}

impl ParticipantQuery {
    fn require(self) -> Result<ParticipantId, AppError> {
        self.participant_id
            .map(ParticipantId::from_uuid)
            .ok_or_else(|| AppError::bad_request("participant_id query parameter is required"))
    }
}

// ============================================================================
// Handlers
// ============================================================================

/// Redeem vouchers against a participant's remaining balance.
///
/// Admission is atomic: the cap check and the ledger write commit together,
/// so racing requests can never jointly exceed the quota.
///
/// # Example
///
/// ```bash
/// curl -X POST http://localhost:8080/api/allocations/<id>/redeem \
///   -H "Content-Type: application/json" \
///   -d '{
///     "participant_id": "550e8400-e29b-41d4-a716-446655440000",
///     "quantity": 2,
///     "actor": "660e8400-e29b-41d4-a716-446655440000",
///     "note": "window A"
///   }'
/// ```
pub async fn redeem(
    Path(id): Path<Uuid>,
    State(state): State<AppState>,
    Json(request): Json<LedgerWriteRequest>,
) -> Result<Json<RedeemOutcome>, AppError> {
    let outcome = state
        .redemptions
        .redeem(RedemptionRequest {
            allocation_id: AllocationId::from_uuid(id),
            participant_id: request.participant_id,
            quantity: request.quantity,
            actor: request.actor,
            note: request.note,
        })
        .await?;
    Ok(Json(outcome))
}

/// Return previously redeemed vouchers to a participant's balance.
pub async fn reassign(
    Path(id): Path<Uuid>,
    State(state): State<AppState>,
    Json(request): Json<LedgerWriteRequest>,
) -> Result<Json<ReassignOutcome>, AppError> {
    let outcome = state
        .redemptions
        .reassign(RedemptionRequest {
            allocation_id: AllocationId::from_uuid(id),
            participant_id: request.participant_id,
            quantity: request.quantity,
            actor: request.actor,
            note: request.note,
        })
        .await?;
    Ok(Json(outcome))
}

/// A participant's current balance for one allocation.
pub async fn balance(
    Path(id): Path<Uuid>,
    Query(query): Query<ParticipantQuery>,
    State(state): State<AppState>,
) -> Result<Json<Balance>, AppError> {
    let participant_id = query.require()?;
    let balance = state
        .redemptions
        .balance(AllocationId::from_uuid(id), participant_id)
        .await?;
    Ok(Json(balance))
}

/// A participant's ledger entries for one allocation, newest first.
pub async fn history(
    Path(id): Path<Uuid>,
    Query(query): Query<ParticipantQuery>,
    State(state): State<AppState>,
) -> Result<Json<Vec<RedemptionEntry>>, AppError> {
    let participant_id = query.require()?;
    let entries = state
        .redemptions
        .history(AllocationId::from_uuid(id), participant_id)
        .await?;
    Ok(Json(entries))
}
