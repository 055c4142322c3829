//! Tests for direct redemption, reassignment and balance derivation

#![allow(clippy::unwrap_used)] // Tests can unwrap
#![allow(clippy::expect_used)] // Tests can expect

use std::sync::Arc;

use voucher_core::catalog::StaticCatalog;
use voucher_core::error::LedgerError;
use voucher_core::service::{
    AllocationService, CreateAllocation, RedemptionRequest, RedemptionService,
};
use voucher_core::types::{ActorId, AllocationId, AllocationStatus, EventId, ParticipantId, TenantId};
use voucher_testing::{MemoryLedgerStore, RecordingDispatcher, test_clock};

struct World {
    store: Arc<MemoryLedgerStore>,
    allocations: AllocationService,
    redemptions: RedemptionService,
}

fn world() -> World {
    let store = Arc::new(MemoryLedgerStore::new());
    let clock = Arc::new(test_clock());
    World {
        allocations: AllocationService::new(
            store.clone(),
            Arc::new(StaticCatalog::new()),
            Arc::new(RecordingDispatcher::new()),
            clock.clone(),
        ),
        redemptions: RedemptionService::new(store.clone(), clock),
        store,
    }
}

async fn approved_allocation(world: &World, quota: i64) -> AllocationId {
    let created = world
        .allocations
        .create(CreateAllocation {
            event_id: EventId::new(),
            tenant_id: TenantId::new(),
            line_items: vec![],
            voucher_quota_per_participant: quota,
            notes: None,
            created_by: ActorId::new(),
            draft: false,
            submit: true,
        })
        .await
        .unwrap();
    world
        .allocations
        .approve(created.id, ActorId::new(), None)
        .await
        .unwrap();
    created.id
}

fn redeem_request(
    allocation_id: AllocationId,
    participant_id: ParticipantId,
    quantity: i64,
) -> RedemptionRequest {
    RedemptionRequest {
        allocation_id,
        participant_id,
        quantity,
        actor: ActorId::new(),
        note: None,
    }
}

#[tokio::test]
async fn test_quota_enforced_across_a_sequence() {
    let world = world();
    let allocation_id = approved_allocation(&world, 2).await;
    let participant = ParticipantId::new();

    let first = world
        .redemptions
        .redeem(redeem_request(allocation_id, participant, 1))
        .await
        .unwrap();
    assert_eq!(first.redeemed_quantity, 1);
    assert_eq!(first.total_redeemed, 1);
    assert_eq!(first.remaining_quantity, 1);
    assert_eq!(first.over_redeemed, 0);

    // Two more would overshoot the single remaining voucher
    let err = world
        .redemptions
        .redeem(redeem_request(allocation_id, participant, 2))
        .await
        .unwrap_err();
    assert_eq!(
        err,
        LedgerError::ExceedsRemaining {
            requested: 2,
            remaining: 1,
        }
    );

    let second = world
        .redemptions
        .redeem(redeem_request(allocation_id, participant, 1))
        .await
        .unwrap();
    assert_eq!(second.remaining_quantity, 0);

    let err = world
        .redemptions
        .redeem(redeem_request(allocation_id, participant, 1))
        .await
        .unwrap_err();
    assert_eq!(
        err,
        LedgerError::ExceedsRemaining {
            requested: 1,
            remaining: 0,
        }
    );

    // Only the two admitted redemptions reached the ledger
    assert_eq!(world.store.entry_count(), 2);
}

#[tokio::test]
async fn test_reassignment_restores_quota() {
    let world = world();
    let allocation_id = approved_allocation(&world, 2).await;
    let participant = ParticipantId::new();

    world
        .redemptions
        .redeem(redeem_request(allocation_id, participant, 2))
        .await
        .unwrap();

    let reassigned = world
        .redemptions
        .reassign(redeem_request(allocation_id, participant, 1))
        .await
        .unwrap();
    assert_eq!(reassigned.reassigned_quantity, 1);
    assert_eq!(reassigned.total_redeemed, 1);
    assert_eq!(reassigned.remaining_quantity, 1);

    // The freed voucher can be redeemed again
    let outcome = world
        .redemptions
        .redeem(redeem_request(allocation_id, participant, 1))
        .await
        .unwrap();
    assert_eq!(outcome.remaining_quantity, 0);

    // All three movements stay in the ledger, newest first
    let history = world
        .redemptions
        .history(allocation_id, participant)
        .await
        .unwrap();
    let quantities: Vec<_> = history.iter().map(|e| e.quantity).collect();
    assert_eq!(quantities, vec![1, -1, 2]);
    assert!(history[0].is_redemption());
    assert!(history[1].is_reassignment());
}

#[tokio::test]
async fn test_net_consumption_clamps_at_zero() {
    let world = world();
    let allocation_id = approved_allocation(&world, 2).await;
    let participant = ParticipantId::new();

    world
        .redemptions
        .redeem(redeem_request(allocation_id, participant, 1))
        .await
        .unwrap();

    // Reassigning more than was redeemed never creates negative consumption
    let outcome = world
        .redemptions
        .reassign(redeem_request(allocation_id, participant, 2))
        .await
        .unwrap();
    assert_eq!(outcome.total_redeemed, 0);
    assert_eq!(outcome.remaining_quantity, 2);

    let balance = world
        .redemptions
        .balance(allocation_id, participant)
        .await
        .unwrap();
    assert_eq!(balance.net_redeemed, 0);
    assert_eq!(balance.remaining, 2);
    assert_eq!(balance.over_redeemed, 0);
}

#[tokio::test]
async fn test_participants_draw_from_separate_balances() {
    let world = world();
    let allocation_id = approved_allocation(&world, 2).await;
    let alice = ParticipantId::new();
    let bob = ParticipantId::new();

    world
        .redemptions
        .redeem(redeem_request(allocation_id, alice, 2))
        .await
        .unwrap();

    let bob_balance = world
        .redemptions
        .balance(allocation_id, bob)
        .await
        .unwrap();
    assert_eq!(bob_balance.remaining, 2);

    // Bob's full quota is still redeemable
    world
        .redemptions
        .redeem(redeem_request(allocation_id, bob, 2))
        .await
        .unwrap();
}

#[tokio::test]
async fn test_redeem_rejects_non_positive_quantities() {
    let world = world();
    let allocation_id = approved_allocation(&world, 2).await;
    let participant = ParticipantId::new();

    for quantity in [0, -1] {
        let err = world
            .redemptions
            .redeem(redeem_request(allocation_id, participant, quantity))
            .await
            .unwrap_err();
        assert_eq!(err, LedgerError::QuantityNotPositive { quantity });

        let err = world
            .redemptions
            .reassign(redeem_request(allocation_id, participant, quantity))
            .await
            .unwrap_err();
        assert_eq!(err, LedgerError::QuantityNotPositive { quantity });
    }
    assert_eq!(world.store.entry_count(), 0);
}

#[tokio::test]
async fn test_only_approved_allocations_accept_entries() {
    let world = world();
    let participant = ParticipantId::new();

    let open = world
        .allocations
        .create(CreateAllocation {
            event_id: EventId::new(),
            tenant_id: TenantId::new(),
            line_items: vec![],
            voucher_quota_per_participant: 2,
            notes: None,
            created_by: ActorId::new(),
            draft: false,
            submit: false,
        })
        .await
        .unwrap();

    let err = world
        .redemptions
        .redeem(redeem_request(open.id, participant, 1))
        .await
        .unwrap_err();
    assert_eq!(
        err,
        LedgerError::NotRedeemable {
            status: AllocationStatus::Open
        }
    );

    let err = world
        .redemptions
        .reassign(redeem_request(open.id, participant, 1))
        .await
        .unwrap_err();
    assert_eq!(
        err,
        LedgerError::NotRedeemable {
            status: AllocationStatus::Open
        }
    );
    assert_eq!(world.store.entry_count(), 0);
}

#[tokio::test]
async fn test_redeem_against_unknown_allocation() {
    let world = world();
    let id = AllocationId::new();

    let err = world
        .redemptions
        .redeem(redeem_request(id, ParticipantId::new(), 1))
        .await
        .unwrap_err();
    assert_eq!(err, LedgerError::AllocationNotFound { id });

    let err = world
        .redemptions
        .balance(id, ParticipantId::new())
        .await
        .unwrap_err();
    assert_eq!(err, LedgerError::AllocationNotFound { id });

    let err = world
        .redemptions
        .history(id, ParticipantId::new())
        .await
        .unwrap_err();
    assert_eq!(err, LedgerError::AllocationNotFound { id });
}

#[tokio::test]
async fn test_entry_notes_survive_into_history() {
    let world = world();
    let allocation_id = approved_allocation(&world, 2).await;
    let participant = ParticipantId::new();
    let actor = ActorId::new();

    world
        .redemptions
        .redeem(RedemptionRequest {
            allocation_id,
            participant_id: participant,
            quantity: 1,
            actor,
            note: Some("steak dinner".to_string()),
        })
        .await
        .unwrap();

    let history = world
        .redemptions
        .history(allocation_id, participant)
        .await
        .unwrap();
    assert_eq!(history.len(), 1);
    assert_eq!(history[0].note.as_deref(), Some("steak dinner"));
    assert_eq!(history[0].actor, actor);
}
