pub mod responses;
pub mod seed_reader;
