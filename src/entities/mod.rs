// Stock position
pub mod aggregate_supply;
pub mod stock_lot;

// Mutations between owners
pub mod mutation;
pub mod mutation_detail;
pub mod mutation_source;

// Consumption
pub mod usage;
pub mod usage_detail;
pub mod usage_item;

// Append-only rollback audit
pub mod rollback;
pub mod rollback_detail;
pub mod rollback_log;
