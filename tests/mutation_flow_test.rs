mod common;

use std::sync::Arc;

use assert_matches::assert_matches;
use common::{day, TestLedger};
use farm_ledger::{
    entities::mutation::MutationStatus, errors::ServiceError, events::Event,
};
use rust_decimal::Decimal;
use rust_decimal_macros::dec;
use uuid::Uuid;

#[tokio::test]
async fn mutation_moves_stock_between_owners() {
    let mut t = TestLedger::new().await;
    let (farm_a, farm_b) = (t.owner(), t.owner());
    let corn = t.feed();
    t.receive(farm_a, corn, dec!(100)).await;

    let record = t
        .services
        .mutations
        .mutate(&t.scope, t.mutation(farm_a, farm_b, &[(corn, dec!(40))]))
        .await
        .expect("mutation");

    assert_eq!(record.status(), Some(MutationStatus::Committed));
    assert_eq!(t.balance(farm_a, corn).await, dec!(60));
    assert_eq!(t.balance(farm_b, corn).await, dec!(40));

    assert_eq!(record.lines.len(), 1);
    let line = &record.lines[0];
    assert_eq!(line.detail.quantity, dec!(40));
    assert_eq!(line.sources.len(), 1);
    assert_eq!(line.sources[0].quantity, dec!(40));

    let b_lots = t
        .services
        .ledger
        .lots(&t.scope.key(farm_b, corn.id, corn.item_type))
        .await
        .unwrap();
    assert_eq!(b_lots.len(), 1);
    assert_eq!(b_lots[0].id, line.detail.destination_lot_id);
    assert_eq!(b_lots[0].source_type, "mutation_credit");
    assert_eq!(b_lots[0].source_id, Some(record.mutation.id));
    assert_eq!(b_lots[0].acquired_on, day(10));

    let events = t.drain_events();
    assert!(events.iter().any(|e| matches!(
        e,
        Event::MutationCommitted { mutation_id, changes, .. }
            if *mutation_id == record.mutation.id && changes.len() == 2
    )));
}

#[tokio::test]
async fn mutation_draws_oldest_lots_first() {
    let t = TestLedger::new().await;
    let (farm_a, farm_b) = (t.owner(), t.owner());
    let corn = t.feed();
    let newer = t.receive_on(farm_a, corn, dec!(40), day(5)).await;
    let older = t.receive_on(farm_a, corn, dec!(30), day(2)).await;

    let record = t
        .services
        .mutations
        .mutate(&t.scope, t.mutation(farm_a, farm_b, &[(corn, dec!(50))]))
        .await
        .unwrap();

    let sources = &record.lines[0].sources;
    assert_eq!(sources.len(), 2);
    assert_eq!((sources[0].lot_id, sources[0].quantity), (older.id, dec!(30)));
    assert_eq!((sources[1].lot_id, sources[1].quantity), (newer.id, dec!(20)));
    assert_eq!(t.balance(farm_a, corn).await, dec!(20));
}

#[tokio::test]
async fn insufficient_stock_changes_nothing() {
    let t = TestLedger::new().await;
    let (farm_a, farm_b) = (t.owner(), t.owner());
    let corn = t.feed();
    t.receive(farm_a, corn, dec!(50)).await;

    let err = t
        .services
        .mutations
        .mutate(&t.scope, t.mutation(farm_a, farm_b, &[(corn, dec!(999))]))
        .await
        .unwrap_err();

    assert_matches!(
        err,
        ServiceError::InsufficientStock { requested, available, .. }
            if requested == dec!(999) && available == dec!(50)
    );
    assert_eq!(t.balance(farm_a, corn).await, dec!(50));
    assert_eq!(t.balance(farm_b, corn).await, Decimal::ZERO);
}

#[tokio::test]
async fn failing_item_rolls_back_the_whole_mutation() {
    let t = TestLedger::new().await;
    let (farm_a, farm_b) = (t.owner(), t.owner());
    let (corn, soy) = (t.feed(), t.feed());
    t.receive(farm_a, corn, dec!(100)).await;
    t.receive(farm_a, soy, dec!(10)).await;

    let err = t
        .services
        .mutations
        .mutate(
            &t.scope,
            t.mutation(farm_a, farm_b, &[(corn, dec!(60)), (soy, dec!(25))]),
        )
        .await
        .unwrap_err();

    assert_matches!(err, ServiceError::InsufficientStock { item_id, .. } if item_id == soy.id);
    assert_eq!(t.balance(farm_a, corn).await, dec!(100));
    assert_eq!(t.balance(farm_a, soy).await, dec!(10));
    assert_eq!(t.balance(farm_b, corn).await, Decimal::ZERO);
    assert!(t
        .services
        .ledger
        .lots(&t.scope.key(farm_b, corn.id, corn.item_type))
        .await
        .unwrap()
        .is_empty());
}

#[tokio::test]
async fn mutation_rejects_bad_requests() {
    let t = TestLedger::new().await;
    let farm_a = t.owner();
    let corn = t.feed();
    t.receive(farm_a, corn, dec!(10)).await;

    let same_owner = t.mutation(farm_a, farm_a, &[(corn, dec!(1))]);
    assert_matches!(
        t.services.mutations.mutate(&t.scope, same_owner).await,
        Err(ServiceError::ValidationError(_))
    );

    let empty = t.mutation(farm_a, t.owner(), &[]);
    assert_matches!(
        t.services.mutations.mutate(&t.scope, empty).await,
        Err(ServiceError::ValidationError(_))
    );

    let unknown_owner = t.mutation(farm_a, Uuid::new_v4(), &[(corn, dec!(1))]);
    assert_matches!(
        t.services.mutations.mutate(&t.scope, unknown_owner).await,
        Err(ServiceError::InvalidOwner(_))
    );

    let negative = t.mutation(farm_a, t.owner(), &[(corn, dec!(-1))]);
    assert_matches!(
        t.services.mutations.mutate(&t.scope, negative).await,
        Err(ServiceError::ValidationError(_))
    );
    assert_eq!(t.balance(farm_a, corn).await, dec!(10));
}

// The harness pool holds one connection, so the two calls queue on it and
// this checks serialised execution rather than contended row locks.
#[tokio::test]
async fn overlapping_mutations_run_serialised_without_overselling() {
    let t = TestLedger::new().await;
    let (farm_a, farm_b, farm_c) = (t.owner(), t.owner(), t.owner());
    let corn = t.feed();
    t.receive(farm_a, corn, dec!(60)).await;

    let mutations = Arc::clone(&t.services.mutations);
    let (first, second) = tokio::join!(
        mutations.mutate(&t.scope, t.mutation(farm_a, farm_b, &[(corn, dec!(50))])),
        mutations.mutate(&t.scope, t.mutation(farm_a, farm_c, &[(corn, dec!(50))])),
    );

    let successes = [first.is_ok(), second.is_ok()]
        .iter()
        .filter(|ok| **ok)
        .count();
    assert_eq!(successes, 1);
    let failure = first.err().or(second.err()).unwrap();
    assert_matches!(failure, ServiceError::InsufficientStock { .. });

    assert_eq!(t.balance(farm_a, corn).await, dec!(10));
    let moved = t.balance(farm_b, corn).await + t.balance(farm_c, corn).await;
    assert_eq!(moved, dec!(50));
}

#[tokio::test]
async fn stored_mutation_can_be_loaded_back() {
    let t = TestLedger::new().await;
    let (farm_a, farm_b) = (t.owner(), t.owner());
    let corn = t.feed();
    t.receive(farm_a, corn, dec!(20)).await;

    let created = t
        .services
        .mutations
        .mutate(&t.scope, t.mutation(farm_a, farm_b, &[(corn, dec!(5))]))
        .await
        .unwrap();
    let loaded = t
        .services
        .mutations
        .get_mutation(&t.scope, created.mutation.id)
        .await
        .unwrap();

    assert_eq!(loaded.mutation.id, created.mutation.id);
    assert_eq!(loaded.status(), Some(MutationStatus::Committed));
    assert_eq!(loaded.lines.len(), 1);
    assert_eq!(loaded.lines[0].sources, created.lines[0].sources);
}
