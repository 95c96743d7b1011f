//! Application layer orchestrating round progression.
//!
//! `ProgressionEngine` owns every mutation of tours, `SchedulerDriver` runs it
//! on a recurring interval, and `PaymentReconciliation` gates round closure on
//! payment settlement when that policy is selected.

pub mod progression;
pub mod reconciliation;
pub mod scheduler;
