use lazy_static::lazy_static;
use prometheus::{IntCounter, IntCounterVec, register_int_counter, register_int_counter_vec};


lazy_static! {
    pub static ref GATE_DECISIONS: IntCounterVec = register_int_counter_vec!(
        "gate_decisions_total",
        "Rate limit decisions by route and outcome",
        &["route", "outcome"]
    )
    .unwrap();
    pub static ref STORE_FAILURES: IntCounterVec = register_int_counter_vec!(
        "gate_store_failures_total",
        "Counter store failures by applied failure mode",
        &["mode"]
    )
    .unwrap();
    pub static ref VIOLATIONS: IntCounter =
        register_int_counter!("gate_violations_total", "Repeated rate limit violations recorded").unwrap();
}
