mod common;

use assert_matches::assert_matches;
use common::{day, TestLedger};
use farm_ledger::{
    entities::{
        mutation::MutationStatus,
        rollback::RollbackType,
        stock_lot::{self, BookingKind},
        usage::UsageStatus,
    },
    errors::ServiceError,
    events::Event,
};
use rust_decimal::Decimal;
use rust_decimal_macros::dec;
use sea_orm::EntityTrait;
use uuid::Uuid;

#[tokio::test]
async fn mutation_rollback_restores_both_owners() {
    let mut t = TestLedger::new().await;
    let (farm_a, farm_b) = (t.owner(), t.owner());
    let corn = t.feed();
    let lot = t.receive(farm_a, corn, dec!(100)).await;

    let mutation = t
        .services
        .mutations
        .mutate(&t.scope, t.mutation(farm_a, farm_b, &[(corn, dec!(50))]))
        .await
        .unwrap();
    assert_eq!(t.balance(farm_a, corn).await, dec!(50));
    assert_eq!(t.balance(farm_b, corn).await, dec!(50));

    let actor = Uuid::new_v4();
    let record = t
        .services
        .rollback
        .rollback_mutation(&t.scope, mutation.mutation.id, actor, Some("wrong farm".into()))
        .await
        .unwrap();

    assert_eq!(t.balance(farm_a, corn).await, dec!(100));
    assert_eq!(t.balance(farm_b, corn).await, Decimal::ZERO);
    let b_rows = t
        .services
        .ledger
        .balances_for_owner(&t.scope, farm_b)
        .await
        .unwrap();
    assert!(b_rows.is_empty(), "zero balance row must be deleted");

    let source = stock_lot::Entity::find_by_id(lot.id)
        .one(t.db.as_ref())
        .await
        .unwrap()
        .unwrap();
    assert_eq!(source.quantity_mutated, Decimal::ZERO);
    assert_eq!(source.available(), dec!(100));

    let stored = t
        .services
        .mutations
        .get_mutation(&t.scope, mutation.mutation.id)
        .await
        .unwrap();
    assert_eq!(stored.status(), Some(MutationStatus::RolledBack));
    assert_eq!(stored.mutation.rolled_back_by, Some(actor));

    assert_eq!(record.rollback.rollback_type, RollbackType::Mutation.as_str());
    assert_eq!(record.rollback.target_id, mutation.mutation.id);
    assert_eq!(record.rollback.restored_quantity, dec!(50));
    assert_eq!(record.rollback.reason.as_deref(), Some("wrong farm"));
    let kinds: Vec<&str> = record.details.iter().map(|d| d.booking_kind.as_str()).collect();
    assert_eq!(
        kinds,
        vec![BookingKind::In.as_str(), BookingKind::Mutated.as_str()]
    );

    let snapshot = record.snapshot().unwrap();
    let lot_changes: Vec<_> = snapshot.changes_for(lot.id).collect();
    assert_eq!(lot_changes.len(), 1);
    assert_eq!(lot_changes[0].field, "quantity_mutated");
    assert!(snapshot
        .changes_for(mutation.mutation.id)
        .any(|c| c.field == "status"));
    assert_eq!(record.logs.len(), snapshot.changes.len());

    let stored = t
        .services
        .rollback
        .get_rollback(&t.scope, record.rollback.id)
        .await
        .unwrap();
    assert_eq!(stored.details.len(), record.details.len());
    assert_eq!(stored.logs.len(), record.logs.len());
    assert_eq!(stored.snapshot().unwrap().changes.len(), snapshot.changes.len());
    assert_matches!(
        t.services
            .rollback
            .get_rollback(&farm_ledger::common::TenantScope::new(Uuid::new_v4()), record.rollback.id)
            .await,
        Err(ServiceError::NotFound(_))
    );

    let events = t.drain_events();
    assert!(events.iter().any(|e| matches!(
        e,
        Event::RollbackPerformed { rollback_type: RollbackType::Mutation, target_id, .. }
            if *target_id == mutation.mutation.id
    )));
}

#[tokio::test]
async fn second_rollback_is_refused() {
    let t = TestLedger::new().await;
    let (farm_a, farm_b) = (t.owner(), t.owner());
    let corn = t.feed();
    t.receive(farm_a, corn, dec!(100)).await;
    let mutation = t
        .services
        .mutations
        .mutate(&t.scope, t.mutation(farm_a, farm_b, &[(corn, dec!(30))]))
        .await
        .unwrap();

    t.services
        .rollback
        .rollback_mutation(&t.scope, mutation.mutation.id, Uuid::new_v4(), None)
        .await
        .unwrap();
    let err = t
        .services
        .rollback
        .rollback_mutation(&t.scope, mutation.mutation.id, Uuid::new_v4(), None)
        .await
        .unwrap_err();

    assert_matches!(err, ServiceError::AlreadyRolledBack(_));
    assert_eq!(t.balance(farm_a, corn).await, dec!(100));
    assert_eq!(
        t.services
            .rollback
            .rollbacks_for(&t.scope, mutation.mutation.id)
            .await
            .unwrap()
            .len(),
        1
    );
}

#[tokio::test]
async fn rollback_of_consumed_credit_is_an_integrity_violation() {
    let t = TestLedger::new().await;
    let (farm_a, farm_b) = (t.owner(), t.owner());
    let corn = t.feed();
    t.receive(farm_a, corn, dec!(100)).await;
    let mutation = t
        .services
        .mutations
        .mutate(&t.scope, t.mutation(farm_a, farm_b, &[(corn, dec!(50))]))
        .await
        .unwrap();
    t.services
        .usage
        .record_usage(&t.scope, t.usage(farm_b, &[(corn, dec!(30))]))
        .await
        .unwrap();

    let err = t
        .services
        .rollback
        .rollback_mutation(&t.scope, mutation.mutation.id, Uuid::new_v4(), None)
        .await
        .unwrap_err();

    assert_matches!(err, ServiceError::IntegrityViolation { .. });
    assert_eq!(t.balance(farm_a, corn).await, dec!(50));
    assert_eq!(t.balance(farm_b, corn).await, dec!(20));
    let stored = t
        .services
        .mutations
        .get_mutation(&t.scope, mutation.mutation.id)
        .await
        .unwrap();
    assert_eq!(stored.status(), Some(MutationStatus::Committed));
}

#[tokio::test]
async fn multi_lot_mutation_rolls_back_every_source() {
    let t = TestLedger::new().await;
    let (farm_a, farm_b) = (t.owner(), t.owner());
    let corn = t.feed();
    let older = t.receive_on(farm_a, corn, dec!(30), day(1)).await;
    let newer = t.receive_on(farm_a, corn, dec!(40), day(2)).await;
    let mutation = t
        .services
        .mutations
        .mutate(&t.scope, t.mutation(farm_a, farm_b, &[(corn, dec!(50))]))
        .await
        .unwrap();

    let record = t
        .services
        .rollback
        .rollback_mutation(&t.scope, mutation.mutation.id, Uuid::new_v4(), None)
        .await
        .unwrap();

    assert_eq!(record.details.len(), 3);
    for id in [older.id, newer.id] {
        let lot = stock_lot::Entity::find_by_id(id)
            .one(t.db.as_ref())
            .await
            .unwrap()
            .unwrap();
        assert_eq!(lot.quantity_mutated, Decimal::ZERO);
    }
    assert_eq!(t.balance(farm_a, corn).await, dec!(70));
}

#[tokio::test]
async fn usage_detail_rolls_back_in_parts() {
    let mut t = TestLedger::new().await;
    let farm = t.owner();
    let corn = t.feed();
    t.receive(farm, corn, dec!(100)).await;
    let usage = t
        .services
        .usage
        .record_usage(&t.scope, t.usage(farm, &[(corn, dec!(20))]))
        .await
        .unwrap();
    let detail_id = usage.details[0].id;
    assert_eq!(t.balance(farm, corn).await, dec!(80));

    let partial = t
        .services
        .rollback
        .rollback_usage_detail(&t.scope, detail_id, Some(dec!(5)), Uuid::new_v4(), None)
        .await
        .unwrap();
    assert_eq!(partial.rollback.restored_quantity, dec!(5));
    assert_eq!(t.balance(farm, corn).await, dec!(85));
    let stored = t.services.usage.get_usage(&t.scope, usage.usage.id).await.unwrap();
    assert_eq!(stored.details[0].quantity_taken, dec!(15));

    assert_matches!(
        t.services
            .rollback
            .rollback_usage_detail(&t.scope, detail_id, Some(dec!(16)), Uuid::new_v4(), None)
            .await,
        Err(ServiceError::IntegrityViolation { .. })
    );

    t.services
        .rollback
        .rollback_usage_detail(&t.scope, detail_id, None, Uuid::new_v4(), None)
        .await
        .unwrap();
    assert_eq!(t.balance(farm, corn).await, dec!(100));
    let stored = t.services.usage.get_usage(&t.scope, usage.usage.id).await.unwrap();
    assert!(stored.details.is_empty());

    assert_matches!(
        t.services
            .rollback
            .rollback_usage_detail(&t.scope, detail_id, None, Uuid::new_v4(), None)
            .await,
        Err(ServiceError::AlreadyRolledBack(_))
    );

    // Nothing is left linked, so cancelling must not restore anything twice.
    t.services
        .usage
        .transition(&t.scope, usage.usage.id, UsageStatus::Cancelled)
        .await
        .unwrap();
    assert_eq!(t.balance(farm, corn).await, dec!(100));

    let usage_rollbacks = t
        .drain_events()
        .into_iter()
        .filter(|e| matches!(e, Event::RollbackPerformed { rollback_type: RollbackType::Usage, .. }))
        .count();
    assert_eq!(usage_rollbacks, 2);
}

#[tokio::test]
async fn rollback_targets_must_exist_in_the_tenant() {
    let t = TestLedger::new().await;
    let (farm_a, farm_b) = (t.owner(), t.owner());
    let corn = t.feed();
    t.receive(farm_a, corn, dec!(10)).await;
    let mutation = t
        .services
        .mutations
        .mutate(&t.scope, t.mutation(farm_a, farm_b, &[(corn, dec!(5))]))
        .await
        .unwrap();

    let other_tenant = farm_ledger::common::TenantScope::new(Uuid::new_v4());
    assert_matches!(
        t.services
            .rollback
            .rollback_mutation(&other_tenant, mutation.mutation.id, Uuid::new_v4(), None)
            .await,
        Err(ServiceError::NotFound(_))
    );
    assert_matches!(
        t.services
            .rollback
            .rollback_usage_detail(&t.scope, Uuid::new_v4(), None, Uuid::new_v4(), None)
            .await,
        Err(ServiceError::NotFound(_))
    );
    assert_eq!(t.balance(farm_b, corn).await, dec!(5));
}
