//! Data storage modules.

pub mod storage;

pub use storage::{JsonStore, RunStore, SaveReceipt};
