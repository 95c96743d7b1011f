use crate::application::progression::RoundState;
use crate::error::Result;
use serde::Serialize;
use std::io::Write;

#[derive(Serialize)]
struct RoundStateRow<'a> {
    tour: u64,
    name: &'a str,
    status: String,
    current_round: u32,
    total_rounds: u32,
    next_round_date: Option<String>,
    overdue: bool,
    current_beneficiary: Option<&'a str>,
    next_beneficiary: Option<&'a str>,
    complete: bool,
}

impl<'a> From<&'a RoundState> for RoundStateRow<'a> {
    fn from(state: &'a RoundState) -> Self {
        Self {
            tour: state.tour_id.0,
            name: &state.tour_name,
            status: state.status.to_string(),
            current_round: state.current_round,
            total_rounds: state.total_rounds,
            next_round_date: state.next_round_date.map(|d| d.to_rfc3339()),
            overdue: state.is_overdue,
            current_beneficiary: state.current_beneficiary.as_ref().map(|m| m.username.as_str()),
            next_beneficiary: state.next_beneficiary.as_ref().map(|m| m.username.as_str()),
            complete: state.is_complete,
        }
    }
}

/// Writes round-state reports as CSV, one row per tour.
pub struct RoundStateWriter<W: Write> {
    writer: csv::Writer<W>,
}

impl<W: Write> RoundStateWriter<W> {
    pub fn new(sink: W) -> Self {
        Self {
            writer: csv::Writer::from_writer(sink),
        }
    }

    pub fn write_states<'a>(&mut self, states: impl IntoIterator<Item = &'a RoundState>) -> Result<()> {
        for state in states {
            self.writer.serialize(RoundStateRow::from(state))?;
        }
        self.writer.flush()?;
        Ok(())
    }
}
