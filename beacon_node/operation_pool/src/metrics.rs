use crate::attestation_group::InsertOutcome;
pub use metrics::*;
use std::sync::LazyLock;

pub static ATTESTATION_POOL_INSERT_OUTCOMES: LazyLock<Result<IntCounterVec>> =
    LazyLock::new(|| {
        try_create_int_counter_vec(
            "op_pool_attestation_insert_outcomes_total",
            "Count of attestation pool insertions by outcome",
            &["outcome"],
        )
    });
pub static ATTESTATION_POOL_INSERT_OLD: LazyLock<Result<IntCounter>> = LazyLock::new(|| {
    try_create_int_counter(
        "op_pool_attestation_insert_old_total",
        "Count of attestations rejected for being below the lowest permissible slot",
    )
});
pub static ATTESTATION_POOL_PACKING_TIME: LazyLock<Result<Histogram>> = LazyLock::new(|| {
    try_create_histogram(
        "op_pool_attestation_packing_seconds",
        "Time taken to pack attestations into a block",
    )
});
pub static ATTESTATION_POOL_NUM_ATTESTATIONS: LazyLock<Result<IntGauge>> = LazyLock::new(|| {
    try_create_int_gauge(
        "op_pool_num_attestations",
        "Number of aggregates currently retained in the attestation pool",
    )
});

pub fn observe_insert_outcome(outcome: &InsertOutcome) {
    let label = match outcome {
        InsertOutcome::AlreadyKnown => "already_known",
        InsertOutcome::Aggregated => "aggregated",
        InsertOutcome::NewData => "new_data",
        InsertOutcome::Old => "old",
    };
    inc_counter_vec(&ATTESTATION_POOL_INSERT_OUTCOMES, &[label]);
}
