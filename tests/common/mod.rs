#![allow(dead_code)]

use std::sync::Arc;

use chrono::NaiveDate;
use farm_ledger::{
    common::TenantScope,
    config::AppConfig,
    db::{self, DbPool},
    entities::stock_lot::{self, ItemType, LotSource},
    events::{Event, EventSender},
    services::{
        collaborators::{ConversionTable, InMemoryOwnerDirectory},
        mutations::{MutateStock, MutationItem},
        receiving::ReceiveStock,
        usage::{SubmitUsage, UsageLine},
        LedgerServices,
    },
};
use rust_decimal::Decimal;
use tempfile::TempDir;
use tokio::sync::mpsc;
use uuid::Uuid;

/// A feed item with its base unit registered in the conversion table.
#[derive(Debug, Clone, Copy)]
pub struct Item {
    pub id: Uuid,
    pub unit: Uuid,
    pub item_type: ItemType,
}

/// Ledger services over a fresh SQLite file with one tenant ready to use.
pub struct TestLedger {
    pub db: Arc<DbPool>,
    pub services: LedgerServices,
    pub scope: TenantScope,
    pub converter: Arc<ConversionTable>,
    pub owners: Arc<InMemoryOwnerDirectory>,
    pub event_sender: Arc<EventSender>,
    events: mpsc::Receiver<Event>,
    _dir: TempDir,
}

impl TestLedger {
    pub async fn new() -> Self {
        let dir = tempfile::tempdir().expect("temp dir");
        let db_file = dir.path().join("ledger.db");
        let mut cfg = AppConfig::new(
            format!("sqlite://{}?mode=rwc", db_file.display()),
            "test".to_string(),
        );
        cfg.auto_migrate = true;
        cfg.db_max_connections = 1;
        cfg.db_min_connections = 1;

        let db = Arc::new(
            db::establish_connection_from_app_config(&cfg)
                .await
                .expect("test database"),
        );

        let (tx, events) = mpsc::channel(1024);
        let event_sender = Arc::new(EventSender::new(tx));
        let converter = Arc::new(ConversionTable::new());
        let owners = Arc::new(InMemoryOwnerDirectory::new());
        let services = LedgerServices::new(
            db.clone(),
            converter.clone(),
            owners.clone(),
            event_sender.clone(),
        );

        Self {
            db,
            services,
            scope: TenantScope::new(Uuid::new_v4()),
            converter,
            owners,
            event_sender,
            events,
            _dir: dir,
        }
    }

    /// Registers a new owner (farm or livestock batch) for the tenant.
    pub fn owner(&self) -> Uuid {
        let id = Uuid::new_v4();
        self.owners.register(&self.scope, id);
        id
    }

    pub fn owner_in(&self, scope: &TenantScope) -> Uuid {
        let id = Uuid::new_v4();
        self.owners.register(scope, id);
        id
    }

    pub fn feed(&self) -> Item {
        let item = Item {
            id: Uuid::new_v4(),
            unit: Uuid::new_v4(),
            item_type: ItemType::Feed,
        };
        self.converter.set_base_unit(item.id, item.unit);
        item
    }

    pub async fn receive(&self, owner: Uuid, item: Item, quantity: Decimal) -> stock_lot::Model {
        self.receive_on(owner, item, quantity, day(1)).await
    }

    pub async fn receive_on(
        &self,
        owner: Uuid,
        item: Item,
        quantity: Decimal,
        acquired_on: NaiveDate,
    ) -> stock_lot::Model {
        self.services
            .receiving
            .receive(
                &self.scope,
                ReceiveStock {
                    owner_id: owner,
                    item_id: item.id,
                    item_type: item.item_type,
                    unit_id: item.unit,
                    quantity,
                    acquired_on,
                    source: LotSource::Purchase,
                    source_id: None,
                },
            )
            .await
            .expect("receive stock")
    }

    pub async fn balance(&self, owner: Uuid, item: Item) -> Decimal {
        self.services
            .ledger
            .balance(&self.scope.key(owner, item.id, item.item_type))
            .await
            .expect("balance")
    }

    pub fn mutation(&self, from: Uuid, to: Uuid, items: &[(Item, Decimal)]) -> MutateStock {
        MutateStock {
            source_owner_id: from,
            destination_owner_id: to,
            items: items
                .iter()
                .map(|(item, quantity)| MutationItem {
                    item_type: item.item_type,
                    item_id: item.id,
                    unit_id: item.unit,
                    quantity: *quantity,
                })
                .collect(),
            mutated_on: day(10),
            notes: None,
            actor_id: Uuid::new_v4(),
        }
    }

    pub fn usage(&self, owner: Uuid, items: &[(Item, Decimal)]) -> SubmitUsage {
        SubmitUsage {
            owner_id: owner,
            used_on: day(12),
            items: items
                .iter()
                .map(|(item, quantity)| UsageLine {
                    item_type: item.item_type,
                    item_id: item.id,
                    unit_id: item.unit,
                    quantity: *quantity,
                })
                .collect(),
            notes: None,
            actor_id: Uuid::new_v4(),
        }
    }

    /// Everything published since the last call.
    pub fn drain_events(&mut self) -> Vec<Event> {
        let mut out = Vec::new();
        while let Ok(event) = self.events.try_recv() {
            out.push(event);
        }
        out
    }
}

pub fn day(d: u32) -> NaiveDate {
    NaiveDate::from_ymd_opt(2024, 3, d).expect("valid date")
}
