pub use metrics::*;
use std::sync::LazyLock;

pub static DATA_AVAILABILITY_CACHE_DUPLICATE_BLOCK: LazyLock<Result<IntCounter>> =
    LazyLock::new(|| {
        try_create_int_counter(
            "beacon_data_availability_cache_duplicate_block_total",
            "Count of blocks ingested into the availability cache that were already present",
        )
    });
pub static DATA_AVAILABILITY_CACHE_SIZE: LazyLock<Result<IntGauge>> = LazyLock::new(|| {
    try_create_int_gauge(
        "beacon_data_availability_cache_size",
        "Number of entries in the availability cache",
    )
});
pub static DATA_AVAILABILITY_RECONSTRUCTION_TIME: LazyLock<Result<Histogram>> =
    LazyLock::new(|| {
        try_create_histogram(
            "beacon_data_availability_reconstruction_time_seconds",
            "Time taken to reconstruct missing data columns",
        )
    });
pub static DATA_AVAILABILITY_RECONSTRUCTED_COLUMNS: LazyLock<Result<IntCounter>> =
    LazyLock::new(|| {
        try_create_int_counter(
            "beacon_data_availability_reconstructed_columns_total",
            "Total count of data columns recovered via erasure coding",
        )
    });
pub static KZG_DATA_COLUMN_RECONSTRUCTION_ATTEMPTS: LazyLock<Result<IntCounter>> =
    LazyLock::new(|| {
        try_create_int_counter(
            "kzg_data_column_reconstruction_attempts",
            "Count of times data column reconstruction has been attempted",
        )
    });
pub static KZG_DATA_COLUMN_RECONSTRUCTION_FAILURES: LazyLock<Result<IntCounter>> =
    LazyLock::new(|| {
        try_create_int_counter(
            "kzg_data_column_reconstruction_failures",
            "Count of times data column reconstruction has failed",
        )
    });
pub static BLOBS_FROM_EL_EXPECTED: LazyLock<Result<Histogram>> = LazyLock::new(|| {
    try_create_histogram(
        "beacon_blobs_from_el_expected",
        "Number of blobs expected from the execution layer",
    )
});
pub static BLOBS_FROM_EL_RECEIVED: LazyLock<Result<Histogram>> = LazyLock::new(|| {
    try_create_histogram(
        "beacon_blobs_from_el_received",
        "Number of blobs fetched from the execution layer",
    )
});
pub static BLOBS_FROM_EL_HIT_TOTAL: LazyLock<Result<IntCounter>> = LazyLock::new(|| {
    try_create_int_counter(
        "beacon_blobs_from_el_hit_total",
        "Count of engine blob requests that returned at least one blob",
    )
});
pub static BLOBS_FROM_EL_MISS_TOTAL: LazyLock<Result<IntCounter>> = LazyLock::new(|| {
    try_create_int_counter(
        "beacon_blobs_from_el_miss_total",
        "Count of engine blob requests that returned nothing useful",
    )
});
pub static BLOBS_FROM_EL_ERROR_TOTAL: LazyLock<Result<IntCounter>> = LazyLock::new(|| {
    try_create_int_counter(
        "beacon_blobs_from_el_error_total",
        "Count of failed engine blob requests",
    )
});
pub static BEACON_EARLY_ATTESTER_CACHE_HITS: LazyLock<Result<IntCounter>> = LazyLock::new(|| {
    try_create_int_counter(
        "beacon_early_attester_cache_hits",
        "Count of times the early attester cache returns an attestation",
    )
});
