//! Domain model: the tour aggregate, its schedule arithmetic, round payment
//! records and the ports through which the application reaches collaborators.

pub mod clock;
pub mod group;
pub mod payment;
pub mod ports;
pub mod schedule;
pub mod tour;
