use crate::domain::tour::Tour;
use crate::error::TontineError;
use serde::Serialize;

/// Body returned after a manual advance.
#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct AdvanceResponse<'a> {
    pub message: String,
    pub current_round: u32,
    pub tour: &'a Tour,
}

impl<'a> AdvanceResponse<'a> {
    pub fn new(tour: &'a Tour) -> Self {
        Self {
            message: format!("Tour advanced to round {}", tour.current_round),
            current_round: tour.current_round,
            tour,
        }
    }
}

/// Body returned for any user-visible failure.
#[derive(Debug, Serialize)]
pub struct ErrorBody {
    pub error: &'static str,
    pub message: String,
}

impl From<&TontineError> for ErrorBody {
    fn from(error: &TontineError) -> Self {
        Self {
            error: error.kind(),
            message: error.to_string(),
        }
    }
}
