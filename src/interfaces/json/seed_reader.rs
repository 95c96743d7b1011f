use crate::domain::group::Group;
use crate::domain::tour::Tour;
use crate::error::Result;
use serde::Deserialize;
use std::io::Read;

/// Initial groups and tours to load into the stores.
#[derive(Debug, Default, Deserialize)]
pub struct Seed {
    #[serde(default)]
    pub groups: Vec<Group>,
    #[serde(default)]
    pub tours: Vec<Tour>,
}

/// Reads a JSON seed document from any `Read` source.
pub struct SeedReader<R: Read> {
    source: R,
}

impl<R: Read> SeedReader<R> {
    pub fn new(source: R) -> Self {
        Self { source }
    }

    pub fn read(self) -> Result<Seed> {
        Ok(serde_json::from_reader(self.source)?)
    }
}
