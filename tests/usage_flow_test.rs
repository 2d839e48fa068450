mod common;

use assert_matches::assert_matches;
use common::TestLedger;
use farm_ledger::{
    entities::usage::UsageStatus, errors::ServiceError, events::Event,
};
use rust_decimal_macros::dec;
use uuid::Uuid;

#[tokio::test]
async fn confirm_then_cancel_restores_stock() {
    let mut t = TestLedger::new().await;
    let farm = t.owner();
    let corn = t.feed();
    t.receive(farm, corn, dec!(50)).await;

    let draft = t
        .services
        .usage
        .submit(&t.scope, t.usage(farm, &[(corn, dec!(20))]))
        .await
        .unwrap();
    assert_eq!(draft.status().unwrap(), UsageStatus::Draft);
    assert!(draft.details.is_empty());
    assert_eq!(t.balance(farm, corn).await, dec!(50));

    let confirmed = t
        .services
        .usage
        .transition(&t.scope, draft.usage.id, UsageStatus::Confirmed)
        .await
        .unwrap();
    assert_eq!(confirmed.status().unwrap(), UsageStatus::Confirmed);
    assert!(confirmed.usage.confirmed_at.is_some());
    assert_eq!(confirmed.details.len(), 1);
    assert_eq!(confirmed.details[0].quantity_taken, dec!(20));
    assert_eq!(t.balance(farm, corn).await, dec!(30));

    let cancelled = t
        .services
        .usage
        .transition(&t.scope, draft.usage.id, UsageStatus::Cancelled)
        .await
        .unwrap();
    assert_eq!(cancelled.status().unwrap(), UsageStatus::Cancelled);
    assert!(cancelled.details.is_empty());
    assert_eq!(t.balance(farm, corn).await, dec!(50));

    let transitions: Vec<(UsageStatus, UsageStatus)> = t
        .drain_events()
        .into_iter()
        .filter_map(|e| match e {
            Event::UsageStatusChanged { from, to, .. } => Some((from, to)),
            _ => None,
        })
        .collect();
    assert_eq!(
        transitions,
        vec![
            (UsageStatus::Draft, UsageStatus::Confirmed),
            (UsageStatus::Confirmed, UsageStatus::Cancelled),
        ]
    );
}

#[tokio::test]
async fn cancelled_usage_cannot_be_confirmed_again() {
    let t = TestLedger::new().await;
    let farm = t.owner();
    let corn = t.feed();
    t.receive(farm, corn, dec!(50)).await;

    let record = t
        .services
        .usage
        .record_usage(&t.scope, t.usage(farm, &[(corn, dec!(10))]))
        .await
        .unwrap();
    t.services
        .usage
        .transition(&t.scope, record.usage.id, UsageStatus::Cancelled)
        .await
        .unwrap();

    let err = t
        .services
        .usage
        .transition(&t.scope, record.usage.id, UsageStatus::Confirmed)
        .await
        .unwrap_err();
    assert_matches!(
        err,
        ServiceError::InvalidTransition { from: UsageStatus::Cancelled, to: UsageStatus::Confirmed, .. }
    );
    assert_eq!(t.balance(farm, corn).await, dec!(50));
}

#[tokio::test]
async fn repeating_the_current_status_books_nothing() {
    let t = TestLedger::new().await;
    let farm = t.owner();
    let corn = t.feed();
    t.receive(farm, corn, dec!(50)).await;

    let record = t
        .services
        .usage
        .record_usage(&t.scope, t.usage(farm, &[(corn, dec!(10))]))
        .await
        .unwrap();
    assert_eq!(t.balance(farm, corn).await, dec!(40));

    let again = t
        .services
        .usage
        .transition(&t.scope, record.usage.id, UsageStatus::Confirmed)
        .await
        .unwrap();
    assert!(again.changes.is_empty());
    assert_eq!(t.balance(farm, corn).await, dec!(40));
}

#[tokio::test]
async fn confirming_beyond_stock_keeps_the_draft() {
    let t = TestLedger::new().await;
    let farm = t.owner();
    let corn = t.feed();
    t.receive(farm, corn, dec!(15)).await;

    let draft = t
        .services
        .usage
        .submit(&t.scope, t.usage(farm, &[(corn, dec!(20))]))
        .await
        .unwrap();
    let err = t
        .services
        .usage
        .transition(&t.scope, draft.usage.id, UsageStatus::Confirmed)
        .await
        .unwrap_err();
    assert_matches!(err, ServiceError::InsufficientStock { .. });

    let stored = t.services.usage.get_usage(&t.scope, draft.usage.id).await.unwrap();
    assert_eq!(stored.status().unwrap(), UsageStatus::Draft);
    assert!(stored.details.is_empty());
    assert_eq!(t.balance(farm, corn).await, dec!(15));
}

#[tokio::test]
async fn usage_spanning_lots_links_each_lot() {
    let t = TestLedger::new().await;
    let farm = t.owner();
    let corn = t.feed();
    let first = t.receive_on(farm, corn, dec!(10), common::day(1)).await;
    let second = t.receive_on(farm, corn, dec!(10), common::day(2)).await;

    let record = t
        .services
        .usage
        .record_usage(&t.scope, t.usage(farm, &[(corn, dec!(15))]))
        .await
        .unwrap();

    let taken: Vec<_> = record
        .details
        .iter()
        .map(|d| (d.lot_id, d.quantity_taken))
        .collect();
    assert_eq!(taken, vec![(first.id, dec!(10)), (second.id, dec!(5))]);
    assert_eq!(t.balance(farm, corn).await, dec!(5));
}

#[tokio::test]
async fn draft_can_be_cancelled_without_bookings() {
    let t = TestLedger::new().await;
    let farm = t.owner();
    let corn = t.feed();
    t.receive(farm, corn, dec!(5)).await;

    let draft = t
        .services
        .usage
        .submit(&t.scope, t.usage(farm, &[(corn, dec!(100))]))
        .await
        .unwrap();
    let cancelled = t
        .services
        .usage
        .transition(&t.scope, draft.usage.id, UsageStatus::Cancelled)
        .await
        .unwrap();

    assert_eq!(cancelled.status().unwrap(), UsageStatus::Cancelled);
    assert!(cancelled.usage.cancelled_at.is_some());
    assert_eq!(t.balance(farm, corn).await, dec!(5));
}

#[tokio::test]
async fn usage_converts_to_the_base_unit() {
    let t = TestLedger::new().await;
    let farm = t.owner();
    let mut corn = t.feed();
    t.receive(farm, corn, dec!(200)).await;

    let sack = Uuid::new_v4();
    t.converter.set_factor(corn.id, sack, dec!(50));
    corn.unit = sack;

    let record = t
        .services
        .usage
        .record_usage(&t.scope, t.usage(farm, &[(corn, dec!(2))]))
        .await
        .unwrap();
    assert_eq!(record.items[0].requested_quantity, dec!(2));
    assert_eq!(record.items[0].quantity, dec!(100));
    assert_eq!(t.balance(farm, corn).await, dec!(100));
}

#[tokio::test]
async fn unknown_usage_is_not_found() {
    let t = TestLedger::new().await;
    assert_matches!(
        t.services
            .usage
            .transition(&t.scope, Uuid::new_v4(), UsageStatus::Confirmed)
            .await,
        Err(ServiceError::NotFound(_))
    );
}
