//! Run table and acquisition planning.
//!
//! - **RunTable**: the UI-owned list of test rows, reloaded every pass
//! - **TestRow**: a validated active row, ready for dispatch
//! - **Sweep**: expansion of one row into several acquisitions across a
//!   frequency range

pub mod run_table;
pub mod sweep;

pub use run_table::{date_fname, RawRow, RunTable, TestRow};
pub use sweep::{expand, AcquisitionInstance, FrequencySpec, SweepContext, SweepSpec};
