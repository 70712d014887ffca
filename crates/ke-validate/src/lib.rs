//! `ke-validate` - Validation harness for `ke-core` engines.
//!
//! Generates seeded reference data, runs a case on the engine its
//! descriptor targets, recomputes the result on the host and compares the
//! two within a tolerance. Cases can be marked as expected to fail.

pub mod buffer;
pub mod case;
pub mod check;
pub mod data;
pub mod error;
pub mod reference;

pub use buffer::HostBuffer;
pub use case::{gen_matmul_case, OpArgs, TestParams};
pub use check::{check_result, reference_output, run_on_engine};
pub use data::{make_data, DataSpec};
pub use error::{Result, ValidateError};
pub use reference::{compare_data, first_mismatch, reference_matmul, DEFAULT_TOLERANCE};

/// Install `env_logger` for tests and tools. Safe to call more than once.
pub fn init_logging() {
    let _ = env_logger::builder().is_test(true).try_init();
}
