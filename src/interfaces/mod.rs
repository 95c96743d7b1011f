//! Adapters between the engine and the outside world: JSON documents in and
//! out, CSV reports.

pub mod csv;
pub mod json;
