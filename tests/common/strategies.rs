use proptest::prelude::*;

/// Dataset start and length, kept small enough for exhaustive checks
pub fn dataset_strategy() -> impl Strategy<Value = (u64, u64)> {
    (0u64..1_000_000, 0u64..20_000)
}

/// Non-zero desired batch sizes
pub fn batch_size_strategy() -> impl Strategy<Value = u64> {
    prop_oneof![1u64..10, 10u64..500, 500u64..25_000]
}

/// Tree depths seen in practice
pub fn num_levels_strategy() -> impl Strategy<Value = u32> {
    1u32..=4
}

/// Parallelism ceilings, including ones far below the batch count
pub fn max_parallelism_strategy() -> impl Strategy<Value = u64> {
    prop_oneof![1u64..10, 10u64..3_000]
}
