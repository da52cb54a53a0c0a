//! Output rendering for command results.

mod generator;

pub use generator::{
    generate_aggregation_json, generate_aggregation_text, generate_cycle_env,
    generate_cycle_plain, generate_json, generate_partition_text, generate_sweep_text,
    generate_verdict_json, generate_verdict_text,
};
