// Ledger core: every quantity write goes through here
pub mod ledger;

// Lookups supplied by the host application
pub mod collaborators;

// Document services
pub mod mutations;
pub mod receiving;
pub mod rollback;
pub mod usage;

use std::sync::Arc;

use crate::{db::DbPool, events::EventSender};
use collaborators::{OwnerDirectory, UnitConverter};
use ledger::LedgerService;
use mutations::MutationService;
use receiving::ReceivingService;
use rollback::RollbackService;
use usage::UsageService;

/// Service container holding every ledger service over one pool.
#[derive(Clone)]
pub struct LedgerServices {
    pub ledger: LedgerService,
    pub receiving: Arc<ReceivingService>,
    pub mutations: Arc<MutationService>,
    pub usage: Arc<UsageService>,
    pub rollback: Arc<RollbackService>,
}

impl LedgerServices {
    pub fn new(
        db_pool: Arc<DbPool>,
        converter: Arc<dyn UnitConverter>,
        owners: Arc<dyn OwnerDirectory>,
        event_sender: Arc<EventSender>,
    ) -> Self {
        let ledger = LedgerService::new(db_pool.clone());

        Self {
            receiving: Arc::new(ReceivingService::new(
                db_pool.clone(),
                ledger.clone(),
                converter.clone(),
                owners.clone(),
                event_sender.clone(),
            )),
            mutations: Arc::new(MutationService::new(
                db_pool.clone(),
                ledger.clone(),
                converter.clone(),
                owners.clone(),
                event_sender.clone(),
            )),
            usage: Arc::new(UsageService::new(
                db_pool.clone(),
                ledger.clone(),
                converter,
                owners,
                event_sender.clone(),
            )),
            rollback: Arc::new(RollbackService::new(db_pool, ledger.clone(), event_sender)),
            ledger,
        }
    }
}
