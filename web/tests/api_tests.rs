//! Router-level API tests over the in-memory ledger store.
//!
//! These drive the full HTTP surface: JSON bodies in, status codes and
//! JSON bodies out, with the correlation-id middleware in the path.

#![allow(clippy::unwrap_used)] // Tests can unwrap
#![allow(clippy::expect_used)] // Tests can expect

use axum_test::TestServer;
use serde_json::{json, Value};
use std::sync::Arc;
use uuid::Uuid;
use voucher_core::catalog::StaticCatalog;
use voucher_core::ledger::Balance;
use voucher_core::service::{ConfirmOutcome, InitiateOutcome, RedeemOutcome, ScanView};
use voucher_core::types::{Allocation, AllocationStatus, RedemptionEntry};
use voucher_testing::{test_clock, MemoryLedgerStore, RecordingDispatcher};
use voucher_web::{build_router, AppState};

const LINK_BASE: &str = "https://vouchers.example.com";

fn server() -> (TestServer, Arc<MemoryLedgerStore>) {
    let store = Arc::new(MemoryLedgerStore::new());
    let state = AppState::new(
        store.clone(),
        Arc::new(StaticCatalog::new()),
        Arc::new(RecordingDispatcher::new()),
        Arc::new(test_clock()),
        LINK_BASE.to_string(),
    );
    let server = TestServer::new(build_router(state)).unwrap();
    (server, store)
}

fn create_request(quota: i64, event_id: Uuid, submit: bool) -> Value {
    json!({
        "event_id": event_id,
        "tenant_id": Uuid::new_v4(),
        "voucher_quota_per_participant": quota,
        "created_by": Uuid::new_v4(),
        "submit": submit,
    })
}

/// Create an allocation with the given voucher quota and walk it to approved.
async fn approved_allocation(server: &TestServer, quota: i64) -> Uuid {
    let response = server
        .post("/api/allocations")
        .json(&create_request(quota, Uuid::new_v4(), true))
        .await;
    assert_eq!(response.status_code(), 201);
    let allocation: Allocation = response.json();

    let id = *allocation.id.as_uuid();
    let response = server
        .post(&format!("/api/allocations/{id}/approve"))
        .json(&json!({"approver": Uuid::new_v4()}))
        .await;
    assert_eq!(response.status_code(), 200);
    id
}

fn error_code(response: &axum_test::TestResponse) -> String {
    let body: Value = response.json();
    body["code"].as_str().unwrap().to_string()
}

// ============================================================================
// Health
// ============================================================================

#[tokio::test]
async fn test_health_endpoints() {
    let (server, _) = server();

    let response = server.get("/health").await;
    assert_eq!(response.status_code(), 200);
    let body: Value = response.json();
    assert_eq!(body["status"], "ok");

    // No pool attached: readiness does not require a database round trip
    let response = server.get("/health/ready").await;
    assert_eq!(response.status_code(), 200);
    let body: Value = response.json();
    assert_eq!(body["ready"], true);
}

// ============================================================================
// Allocation CRUD
// ============================================================================

#[tokio::test]
async fn test_create_allocation_starts_open() {
    let (server, _) = server();

    let response = server
        .post("/api/allocations")
        .json(&create_request(5, Uuid::new_v4(), false))
        .await;

    assert_eq!(response.status_code(), 201);
    let allocation: Allocation = response.json();
    assert_eq!(allocation.status, AllocationStatus::Open);
    assert_eq!(allocation.voucher_quota_per_participant, 5);
    assert!(allocation.approved_by.is_none());
}

#[tokio::test]
async fn test_create_with_submit_flag_starts_pending() {
    let (server, _) = server();

    let response = server
        .post("/api/allocations")
        .json(&create_request(3, Uuid::new_v4(), true))
        .await;

    assert_eq!(response.status_code(), 201);
    let allocation: Allocation = response.json();
    assert_eq!(allocation.status, AllocationStatus::Pending);
}

#[tokio::test]
async fn test_create_empty_allocation_rejected() {
    let (server, store) = server();

    // Neither line items nor voucher quota
    let response = server
        .post("/api/allocations")
        .json(&create_request(0, Uuid::new_v4(), false))
        .await;

    assert_eq!(response.status_code(), 400);
    assert_eq!(error_code(&response), "EMPTY_ALLOCATION");
    assert_eq!(store.allocation_count(), 0);
}

#[tokio::test]
async fn test_get_unknown_allocation_is_404() {
    let (server, _) = server();

    let response = server
        .get(&format!("/api/allocations/{}", Uuid::new_v4()))
        .await;

    assert_eq!(response.status_code(), 404);
    assert_eq!(error_code(&response), "ALLOCATION_NOT_FOUND");
}

#[tokio::test]
async fn test_list_allocations_filters_by_status() {
    let (server, _) = server();
    let event_id = Uuid::new_v4();

    server
        .post("/api/allocations")
        .json(&create_request(1, event_id, false))
        .await
        .assert_status_success();
    server
        .post("/api/allocations")
        .json(&create_request(2, event_id, true))
        .await
        .assert_status_success();

    let response = server
        .get(&format!("/api/events/{event_id}/allocations"))
        .await;
    assert_eq!(response.status_code(), 200);
    let all: Vec<Allocation> = response.json();
    assert_eq!(all.len(), 2);

    let response = server
        .get(&format!("/api/events/{event_id}/allocations"))
        .add_query_param("status", "pending")
        .await;
    let pending: Vec<Allocation> = response.json();
    assert_eq!(pending.len(), 1);
    assert_eq!(pending[0].status, AllocationStatus::Pending);
}

#[tokio::test]
async fn test_update_pending_allocation_rejected() {
    let (server, _) = server();

    let response = server
        .post("/api/allocations")
        .json(&create_request(2, Uuid::new_v4(), true))
        .await;
    let allocation: Allocation = response.json();

    let response = server
        .put(&format!("/api/allocations/{}", allocation.id.as_uuid()))
        .json(&json!({"voucher_quota_per_participant": 9}))
        .await;

    assert_eq!(response.status_code(), 400);
    assert_eq!(error_code(&response), "NOT_EDITABLE");
}

#[tokio::test]
async fn test_update_distinguishes_clearing_notes_from_omitting_them() {
    let (server, _) = server();

    let mut body = create_request(2, Uuid::new_v4(), false);
    body["notes"] = json!("original note");
    let response = server.post("/api/allocations").json(&body).await;
    let allocation: Allocation = response.json();
    let id = *allocation.id.as_uuid();

    // Omitting the field leaves the notes alone
    let response = server
        .put(&format!("/api/allocations/{id}"))
        .json(&json!({"voucher_quota_per_participant": 4}))
        .await;
    assert_eq!(response.status_code(), 200);
    let updated: Allocation = response.json();
    assert_eq!(updated.notes.as_deref(), Some("original note"));

    // An explicit null clears them
    let response = server
        .put(&format!("/api/allocations/{id}"))
        .json(&json!({"notes": null}))
        .await;
    assert_eq!(response.status_code(), 200);
    let cleared: Allocation = response.json();
    assert_eq!(cleared.notes, None);
}

#[tokio::test]
async fn test_delete_clean_allocation() {
    let (server, store) = server();

    let response = server
        .post("/api/allocations")
        .json(&create_request(2, Uuid::new_v4(), false))
        .await;
    let allocation: Allocation = response.json();
    let id = *allocation.id.as_uuid();

    let response = server.delete(&format!("/api/allocations/{id}")).await;
    assert_eq!(response.status_code(), 204);
    assert_eq!(store.allocation_count(), 0);

    let response = server.get(&format!("/api/allocations/{id}")).await;
    assert_eq!(response.status_code(), 404);
}

#[tokio::test]
async fn test_delete_blocked_by_ledger_history() {
    let (server, store) = server();
    let id = approved_allocation(&server, 2).await;

    server
        .post(&format!("/api/allocations/{id}/redeem"))
        .json(&json!({
            "participant_id": Uuid::new_v4(),
            "quantity": 1,
            "actor": Uuid::new_v4(),
        }))
        .await
        .assert_status_success();

    let response = server.delete(&format!("/api/allocations/{id}")).await;
    assert_eq!(response.status_code(), 409);
    assert_eq!(error_code(&response), "LEDGER_NOT_EMPTY");
    assert_eq!(store.allocation_count(), 1);
}

// ============================================================================
// Approval state machine
// ============================================================================

#[tokio::test]
async fn test_submit_approve_flow() {
    let (server, _) = server();

    let response = server
        .post("/api/allocations")
        .json(&create_request(4, Uuid::new_v4(), false))
        .await;
    let allocation: Allocation = response.json();
    let id = *allocation.id.as_uuid();

    let response = server
        .post(&format!("/api/allocations/{id}/submit"))
        .json(&json!({"actor": Uuid::new_v4()}))
        .await;
    assert_eq!(response.status_code(), 200);
    let submitted: Allocation = response.json();
    assert_eq!(submitted.status, AllocationStatus::Pending);

    let approver = Uuid::new_v4();
    let response = server
        .post(&format!("/api/allocations/{id}/approve"))
        .json(&json!({"approver": approver, "comment": "Looks good"}))
        .await;
    assert_eq!(response.status_code(), 200);
    let approved: Allocation = response.json();
    assert_eq!(approved.status, AllocationStatus::Approved);
    assert_eq!(*approved.approved_by.unwrap().as_uuid(), approver);
    assert!(approved.approved_at.is_some());
    assert!(approved.notes.unwrap().contains("Looks good"));
}

#[tokio::test]
async fn test_reject_requires_comment() {
    let (server, _) = server();

    let response = server
        .post("/api/allocations")
        .json(&create_request(4, Uuid::new_v4(), true))
        .await;
    let allocation: Allocation = response.json();
    let id = *allocation.id.as_uuid();

    let response = server
        .post(&format!("/api/allocations/{id}/reject"))
        .json(&json!({"approver": Uuid::new_v4(), "comment": "  "}))
        .await;
    assert_eq!(response.status_code(), 400);
    assert_eq!(error_code(&response), "COMMENT_REQUIRED");

    // Still pending; a proper rejection goes through
    let response = server
        .post(&format!("/api/allocations/{id}/reject"))
        .json(&json!({"approver": Uuid::new_v4(), "comment": "Budget exceeded"}))
        .await;
    assert_eq!(response.status_code(), 200);
    let rejected: Allocation = response.json();
    assert_eq!(rejected.status, AllocationStatus::Rejected);
}

#[tokio::test]
async fn test_approve_from_open_conflicts() {
    let (server, _) = server();

    let response = server
        .post("/api/allocations")
        .json(&create_request(4, Uuid::new_v4(), false))
        .await;
    let allocation: Allocation = response.json();

    let response = server
        .post(&format!(
            "/api/allocations/{}/approve",
            allocation.id.as_uuid()
        ))
        .json(&json!({"approver": Uuid::new_v4()}))
        .await;

    assert_eq!(response.status_code(), 409);
    assert_eq!(error_code(&response), "INVALID_TRANSITION");
}

// ============================================================================
// Direct ledger operations
// ============================================================================

#[tokio::test]
async fn test_redeem_balance_and_history() {
    let (server, _) = server();
    let id = approved_allocation(&server, 3).await;
    let participant = Uuid::new_v4();

    let response = server
        .post(&format!("/api/allocations/{id}/redeem"))
        .json(&json!({
            "participant_id": participant,
            "quantity": 2,
            "actor": Uuid::new_v4(),
            "note": "window A",
        }))
        .await;
    assert_eq!(response.status_code(), 200);
    let outcome: RedeemOutcome = response.json();
    assert_eq!(outcome.redeemed_quantity, 2);
    assert_eq!(outcome.total_redeemed, 2);
    assert_eq!(outcome.remaining_quantity, 1);
    assert_eq!(outcome.over_redeemed, 0);

    let response = server
        .get(&format!("/api/allocations/{id}/balance"))
        .add_query_param("participant_id", participant)
        .await;
    assert_eq!(response.status_code(), 200);
    let balance: Balance = response.json();
    assert_eq!(balance.quota, 3);
    assert_eq!(balance.net_redeemed, 2);
    assert_eq!(balance.remaining, 1);

    let response = server
        .get(&format!("/api/allocations/{id}/entries"))
        .add_query_param("participant_id", participant)
        .await;
    let entries: Vec<RedemptionEntry> = response.json();
    assert_eq!(entries.len(), 1);
    assert_eq!(entries[0].quantity, 2);
    assert_eq!(entries[0].note.as_deref(), Some("window A"));
}

#[tokio::test]
async fn test_redeem_beyond_remaining_rejected() {
    let (server, store) = server();
    let id = approved_allocation(&server, 2).await;

    let response = server
        .post(&format!("/api/allocations/{id}/redeem"))
        .json(&json!({
            "participant_id": Uuid::new_v4(),
            "quantity": 3,
            "actor": Uuid::new_v4(),
        }))
        .await;

    assert_eq!(response.status_code(), 400);
    assert_eq!(error_code(&response), "EXCEEDS_REMAINING");
    assert_eq!(store.entry_count(), 0);
}

#[tokio::test]
async fn test_redeem_unapproved_allocation_rejected() {
    let (server, store) = server();

    let response = server
        .post("/api/allocations")
        .json(&create_request(2, Uuid::new_v4(), true))
        .await;
    let allocation: Allocation = response.json();

    let response = server
        .post(&format!(
            "/api/allocations/{}/redeem",
            allocation.id.as_uuid()
        ))
        .json(&json!({
            "participant_id": Uuid::new_v4(),
            "quantity": 1,
            "actor": Uuid::new_v4(),
        }))
        .await;

    assert_eq!(response.status_code(), 400);
    assert_eq!(error_code(&response), "NOT_REDEEMABLE");
    assert_eq!(store.entry_count(), 0);
}

#[tokio::test]
async fn test_reassign_restores_balance() {
    let (server, _) = server();
    let id = approved_allocation(&server, 2).await;
    let participant = Uuid::new_v4();
    let write = |quantity: i64| {
        json!({
            "participant_id": participant,
            "quantity": quantity,
            "actor": Uuid::new_v4(),
        })
    };

    server
        .post(&format!("/api/allocations/{id}/redeem"))
        .json(&write(2))
        .await
        .assert_status_success();

    let response = server
        .post(&format!("/api/allocations/{id}/reassign"))
        .json(&write(1))
        .await;
    assert_eq!(response.status_code(), 200);
    let body: Value = response.json();
    assert_eq!(body["reassigned_quantity"], 1);
    assert_eq!(body["total_redeemed"], 1);
    assert_eq!(body["remaining_quantity"], 1);
}

#[tokio::test]
async fn test_balance_requires_participant_query() {
    let (server, _) = server();
    let id = approved_allocation(&server, 2).await;

    let response = server.get(&format!("/api/allocations/{id}/balance")).await;
    assert_eq!(response.status_code(), 400);
}

// ============================================================================
// Two-phase QR workflow
// ============================================================================

#[tokio::test]
async fn test_qr_flow_end_to_end() {
    let (server, store) = server();
    let id = approved_allocation(&server, 2).await;
    let participant = Uuid::new_v4();

    // Initiate: token plus deep-link payload, nothing written yet
    let response = server
        .post("/api/redemptions/intents")
        .json(&json!({
            "allocation_id": id,
            "participant_id": participant,
            "quantity": 2,
        }))
        .await;
    assert_eq!(response.status_code(), 201);
    let initiated: InitiateOutcome = response.json();
    assert_eq!(
        initiated.qr_payload,
        format!("{LINK_BASE}/redeem/{}", initiated.token.as_str())
    );
    assert_eq!(initiated.remaining, 2);
    assert_eq!(store.entry_count(), 0);

    let token = initiated.token.as_str().to_string();

    // Scan: read-only context resolution for staff
    let response = server.get(&format!("/api/redemptions/intents/{token}")).await;
    assert_eq!(response.status_code(), 200);
    let view: ScanView = response.json();
    assert_eq!(view.quantity, 2);
    assert_eq!(view.balance.remaining, 2);

    // Confirm: the one ledger write
    let response = server
        .post(&format!("/api/redemptions/intents/{token}/confirm"))
        .json(&json!({"actor": Uuid::new_v4()}))
        .await;
    assert_eq!(response.status_code(), 200);
    let confirmed: ConfirmOutcome = response.json();
    assert_eq!(confirmed.total_redeemed, 2);
    assert_eq!(confirmed.remaining_quantity, 0);
    assert_eq!(store.entry_count(), 1);

    // Second confirm reads like an unknown token and writes nothing
    let response = server
        .post(&format!("/api/redemptions/intents/{token}/confirm"))
        .json(&json!({"actor": Uuid::new_v4()}))
        .await;
    assert_eq!(response.status_code(), 404);
    assert_eq!(error_code(&response), "INTENT_NOT_FOUND");
    assert_eq!(store.entry_count(), 1);
}

#[tokio::test]
async fn test_scan_unknown_token_is_404() {
    let (server, _) = server();

    let response = server
        .get("/api/redemptions/intents/not-a-real-token")
        .await;

    assert_eq!(response.status_code(), 404);
    assert_eq!(error_code(&response), "INTENT_NOT_FOUND");
}

#[tokio::test]
async fn test_cancel_intent_leaves_ledger_untouched() {
    let (server, store) = server();
    let id = approved_allocation(&server, 2).await;

    let response = server
        .post("/api/redemptions/intents")
        .json(&json!({
            "allocation_id": id,
            "participant_id": Uuid::new_v4(),
            "quantity": 1,
        }))
        .await;
    let initiated: InitiateOutcome = response.json();
    let token = initiated.token.as_str().to_string();

    let response = server
        .post(&format!("/api/redemptions/intents/{token}/cancel"))
        .json(&json!({"actor": Uuid::new_v4()}))
        .await;
    assert_eq!(response.status_code(), 200);
    assert_eq!(store.entry_count(), 0);

    // Cancelled tokens can no longer be confirmed
    let response = server
        .post(&format!("/api/redemptions/intents/{token}/confirm"))
        .json(&json!({"actor": Uuid::new_v4()}))
        .await;
    assert_eq!(response.status_code(), 404);
}

// ============================================================================
// Correlation IDs
// ============================================================================

#[tokio::test]
async fn test_correlation_id_echoed_on_response() {
    let (server, _) = server();
    let correlation_id = Uuid::new_v4().to_string();

    let response = server
        .get("/health")
        .add_header(
            http::HeaderName::from_static("x-correlation-id"),
            http::HeaderValue::from_str(&correlation_id).unwrap(),
        )
        .await;

    assert_eq!(response.status_code(), 200);
    let echoed = response.header("x-correlation-id");
    assert_eq!(echoed.to_str().unwrap(), correlation_id);
}

#[tokio::test]
async fn test_correlation_id_generated_when_absent() {
    let (server, _) = server();

    let response = server.get("/health").await;

    let generated = response.header("x-correlation-id");
    assert!(Uuid::parse_str(generated.to_str().unwrap()).is_ok());
}
