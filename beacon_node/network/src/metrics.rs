pub use metrics::*;
use std::sync::LazyLock;

pub static SYNC_LOOKUPS_DROPPED: LazyLock<Result<IntCounter>> = LazyLock::new(|| {
    try_create_int_counter(
        "sync_lookups_dropped_total",
        "Count of block lookups dropped because the pending queue was full",
    )
});
pub static SYNC_BATCHES_STARTED: LazyLock<Result<IntCounter>> = LazyLock::new(|| {
    try_create_int_counter(
        "sync_range_batches_started_total",
        "Count of range-sync batches that started downloading",
    )
});
