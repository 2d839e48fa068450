//! Farm Ledger Library
//!
//! Stock ledger and mutation engine for multi-tenant farm management. Every
//! quantity lives in per-owner stock lots with `in`/`used`/`mutated`
//! counters, mirrored by a cached aggregate balance per
//! (tenant, owner, item, item type). Receiving, usage, owner-to-owner
//! mutation and audited rollback all book through the same primitives.
#![forbid(unsafe_code)]
#![deny(rust_2018_idioms)]
#![allow(elided_lifetimes_in_paths)]
#![warn(clippy::all, clippy::perf, clippy::dbg_macro)]

// Core modules
pub mod common;
pub mod config;
pub mod db;
pub mod entities;
pub mod errors;
pub mod events;
pub mod jobs;
pub mod metrics;
pub mod migrator;
pub mod services;

// Re-exports for callers and tests
pub mod prelude {
    pub use crate::common::{StockKey, TenantScope};
    pub use crate::config::{AppConfig, StockJobConfig};
    pub use crate::db::DbPool;
    pub use crate::entities::{
        rollback::RollbackType,
        stock_lot::{BookingKind, ItemType, LotSource},
        usage::UsageStatus,
    };
    pub use crate::errors::{LedgerResult, ServiceError};
    pub use crate::events::{BalanceChange, Event, EventSender};
    pub use crate::jobs::{RetryConfig, UsageStockJob};
    pub use crate::services::{
        collaborators::{ConversionTable, InMemoryOwnerDirectory, OwnerDirectory, UnitConverter},
        ledger::LedgerService,
        mutations::{MutateStock, MutationItem},
        receiving::ReceiveStock,
        usage::{SubmitUsage, UsageLine},
        LedgerServices,
    };
}
