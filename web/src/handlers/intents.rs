//! Two-phase QR redemption API endpoints.
//!
//! A participant opens an intent and renders the returned payload as a QR
//! code; staff scan it for review and confirm it at handout:
//! - POST /api/redemptions/intents - Open an intent, returns token and QR payload
//! - GET /api/redemptions/intents/:token - Resolve a scanned token (read-only)
//! - POST /api/redemptions/intents/:token/confirm - Write the ledger entry
//! - POST /api/redemptions/intents/:token/cancel - Abandon a pending intent
//! - POST /api/redemptions/intents/:token/expire - Administratively expire one
//!
//! Unknown tokens and already-resolved tokens are indistinguishable in
//! responses; both read as 404 with the same message.

use crate::error::AppError;
use crate::state::AppState;
use axum::{
    extract::{Path, State},
    http::StatusCode,
    Json,
};
use serde::Deserialize;
use voucher_core::service::{ConfirmOutcome, InitiateOutcome, InitiateRequest, ScanView};
use voucher_core::token::IntentToken;
use voucher_core::types::{ActorId, AllocationId, ParticipantId, PendingRedemption};

// ============================================================================
// Request/Response Types
// ============================================================================

/// Request to open a redemption intent.
#[derive(Debug, Deserialize)]
pub struct InitiateIntentRequest {
    /// Allocation to draw against
    pub allocation_id: AllocationId,
    /// Participant opening the intent
    pub participant_id: ParticipantId,
    /// Positive quantity the participant intends to redeem
    pub quantity: i64,
    /// Optional free-text context carried into the eventual ledger entry
    #[serde(default)]
    pub notes: Option<String>,
}

/// Body naming the staff member resolving an intent.
#[derive(Debug, Deserialize)]
pub struct ResolveIntentRequest {
    /// Scanner or admin performing the resolution
    pub actor: ActorId,
}

// ============================================================================
// Handlers
// ============================================================================

/// Open a redemption intent.
///
/// The response carries the single-use token and the QR payload (a deep
/// link embedding only the token). Balance figures are a snapshot; nothing
/// is reserved until confirm.
///
/// # Example
///
/// ```bash
/// curl -X POST http://localhost:8080/api/redemptions/intents \
///   -H "Content-Type: application/json" \
///   -d '{
///     "allocation_id": "550e8400-e29b-41d4-a716-446655440000",
///     "participant_id": "660e8400-e29b-41d4-a716-446655440000",
///     "quantity": 2
///   }'
/// ```
pub async fn initiate_intent(
    State(state): State<AppState>,
    Json(request): Json<InitiateIntentRequest>,
) -> Result<(StatusCode, Json<InitiateOutcome>), AppError> {
    let outcome = state
        .workflow
        .initiate(InitiateRequest {
            allocation_id: request.allocation_id,
            participant_id: request.participant_id,
            quantity: request.quantity,
            notes: request.notes,
        })
        .await?;
    Ok((StatusCode::CREATED, Json(outcome)))
}

/// Resolve a scanned token into its context for staff review.
///
/// Read-only; the intent stays pending and can be scanned again.
pub async fn scan_intent(
    Path(token): Path<String>,
    State(state): State<AppState>,
) -> Result<Json<ScanView>, AppError> {
    let token = IntentToken::from_string(token);
    let view = state.workflow.scan(&token).await?;
    Ok(Json(view))
}

/// Confirm a pending intent, writing its ledger entry.
///
/// Exactly one confirm can succeed per token. A confirm refused for
/// insufficient balance leaves the intent pending so staff can retry
/// after a reassignment.
pub async fn confirm_intent(
    Path(token): Path<String>,
    State(state): State<AppState>,
    Json(request): Json<ResolveIntentRequest>,
) -> Result<Json<ConfirmOutcome>, AppError> {
    let token = IntentToken::from_string(token);
    let outcome = state.workflow.confirm(&token, request.actor).await?;
    Ok(Json(outcome))
}

/// Cancel a pending intent without a ledger write.
pub async fn cancel_intent(
    Path(token): Path<String>,
    State(state): State<AppState>,
    Json(request): Json<ResolveIntentRequest>,
) -> Result<Json<PendingRedemption>, AppError> {
    let token = IntentToken::from_string(token);
    let intent = state.workflow.cancel(&token, request.actor).await?;
    Ok(Json(intent))
}

/// Administratively expire a pending intent without a ledger write.
pub async fn expire_intent(
    Path(token): Path<String>,
    State(state): State<AppState>,
    Json(request): Json<ResolveIntentRequest>,
) -> Result<Json<PendingRedemption>, AppError> {
    let token = IntentToken::from_string(token);
    let intent = state.workflow.expire(&token, request.actor).await?;
    Ok(Json(intent))
}
