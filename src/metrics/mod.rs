//! Prometheus counters for the stock ledger.
//!
//! Everything registers into [`REGISTRY`] so the CLI `metrics` command (or an
//! embedding service) can expose the text format without a global default
//! registry.

use lazy_static::lazy_static;
use prometheus::{Encoder, IntCounter, IntCounterVec, Opts, Registry, TextEncoder};
use tracing::error;

lazy_static! {
    pub static ref REGISTRY: Registry = Registry::new_custom(Some("farm_ledger".into()), None)
        .expect("registry can be created");
    pub static ref BOOKINGS: IntCounterVec = register_counter_vec(
        "bookings_total",
        "Lot bookings by counter kind",
        &["kind"]
    );
    pub static ref UNBOOKINGS: IntCounterVec = register_counter_vec(
        "unbookings_total",
        "Lot unbookings by counter kind",
        &["kind"]
    );
    pub static ref MUTATIONS: IntCounter =
        register_counter("mutations_total", "Committed stock mutations");
    pub static ref MUTATION_FAILURES: IntCounter =
        register_counter("mutation_failures_total", "Stock mutations that were rejected");
    pub static ref USAGE_TRANSITIONS: IntCounterVec = register_counter_vec(
        "usage_transitions_total",
        "Usage status transitions by target status",
        &["to"]
    );
    pub static ref ROLLBACKS: IntCounterVec = register_counter_vec(
        "rollbacks_total",
        "Rollbacks by document type",
        &["type"]
    );
    pub static ref INSUFFICIENT_STOCK: IntCounter = register_counter(
        "insufficient_stock_total",
        "Bookings refused for lack of stock"
    );
    pub static ref INTEGRITY_VIOLATIONS: IntCounter = register_counter(
        "integrity_violations_total",
        "Ledger integrity violations detected"
    );
    pub static ref STOCK_JOB_RETRIES: IntCounter =
        register_counter("stock_job_retries_total", "Usage stock job retry attempts");
    pub static ref STOCK_JOB_FAILURES: IntCounter = register_counter(
        "stock_job_failures_total",
        "Usage stock jobs that exhausted their retries"
    );
    pub static ref EVENTS_DROPPED: IntCounter =
        register_counter("events_dropped_total", "Ledger events that could not be published");
}

fn register_counter(name: &str, help: &str) -> IntCounter {
    let counter = IntCounter::new(name, help).expect("metric can be created");
    if let Err(e) = REGISTRY.register(Box::new(counter.clone())) {
        error!(metric = name, error = %e, "Failed to register metric");
    }
    counter
}

fn register_counter_vec(name: &str, help: &str, labels: &[&str]) -> IntCounterVec {
    let counter = IntCounterVec::new(Opts::new(name, help), labels).expect("metric can be created");
    if let Err(e) = REGISTRY.register(Box::new(counter.clone())) {
        error!(metric = name, error = %e, "Failed to register metric");
    }
    counter
}

/// Renders every registered metric in the Prometheus text exposition format.
pub fn gather_text() -> Result<String, prometheus::Error> {
    // Touch the lazies so an idle process still reports zeroed series.
    lazy_static::initialize(&MUTATIONS);
    lazy_static::initialize(&MUTATION_FAILURES);
    lazy_static::initialize(&INSUFFICIENT_STOCK);
    lazy_static::initialize(&INTEGRITY_VIOLATIONS);
    lazy_static::initialize(&STOCK_JOB_RETRIES);
    lazy_static::initialize(&STOCK_JOB_FAILURES);
    lazy_static::initialize(&EVENTS_DROPPED);

    let mut buffer = Vec::new();
    TextEncoder::new().encode(&REGISTRY.gather(), &mut buffer)?;
    String::from_utf8(buffer).map_err(|e| prometheus::Error::Msg(e.to_string()))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn text_output_contains_namespaced_counters() {
        INTEGRITY_VIOLATIONS.inc();
        BOOKINGS.with_label_values(&["used"]).inc();
        let text = gather_text().unwrap();
        assert!(text.contains("farm_ledger_integrity_violations_total"));
        assert!(text.contains("farm_ledger_bookings_total{kind=\"used\"}"));
    }
}
