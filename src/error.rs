use crate::domain::tour::{TourId, TourStatus};
use thiserror::Error;

#[derive(Error, Debug)]
pub enum TontineError {
    #[error("Invalid round topology: {0}")]
    InvalidRoundTopology(String),
    #[error("Tour cannot advance past round {current_round} of {total_rounds}")]
    NotAdvanceable {
        current_round: u32,
        total_rounds: u32,
    },
    #[error("Tour {0} is already complete")]
    TourAlreadyComplete(TourId),
    #[error("Cannot advance tour with status: {0}")]
    TourNotActive(TourStatus),
    #[error("Tour {0} was modified concurrently, re-fetch before retrying")]
    ConcurrentModification(TourId),
    #[error("Not authorized: {0}")]
    NotAuthorized(String),
    #[error("Not found: {0}")]
    NotFound(String),
    #[error("Already exists: {0}")]
    AlreadyExists(String),
    #[error("Validation error: {0}")]
    ValidationError(String),
    #[error("Payment error: {0}")]
    PaymentError(String),
    #[error("IO error: {0}")]
    IoError(#[from] std::io::Error),
    #[error("Serialization error: {0}")]
    SerializationError(#[from] serde_json::Error),
    #[error("CSV error: {0}")]
    CsvError(#[from] csv::Error),
    #[cfg(feature = "storage-rocksdb")]
    #[error("RocksDB error: {0}")]
    RocksDBError(#[from] rocksdb::Error),
    #[error("Internal error: {0}")]
    InternalError(Box<dyn std::error::Error + Send + Sync>),
}

impl TontineError {
    /// Stable, machine-readable name of the failure, used in response bodies.
    pub fn kind(&self) -> &'static str {
        match self {
            Self::InvalidRoundTopology(_) => "InvalidRoundTopology",
            Self::NotAdvanceable { .. } => "NotAdvanceable",
            Self::TourAlreadyComplete(_) => "TourAlreadyComplete",
            Self::TourNotActive(_) => "TourNotActive",
            Self::ConcurrentModification(_) => "ConcurrentModification",
            Self::NotAuthorized(_) => "NotAuthorized",
            Self::NotFound(_) => "NotFound",
            Self::AlreadyExists(_) => "AlreadyExists",
            Self::ValidationError(_) => "ValidationError",
            Self::PaymentError(_) => "PaymentError",
            Self::IoError(_)
            | Self::SerializationError(_)
            | Self::CsvError(_)
            | Self::InternalError(_) => "InternalError",
            #[cfg(feature = "storage-rocksdb")]
            Self::RocksDBError(_) => "InternalError",
        }
    }
}

pub type Result<T> = std::result::Result<T, TontineError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_kind_names_are_stable() {
        assert_eq!(
            TontineError::ConcurrentModification(TourId(7)).kind(),
            "ConcurrentModification"
        );
        assert_eq!(
            TontineError::TourNotActive(TourStatus::Paused).kind(),
            "TourNotActive"
        );
        assert_eq!(
            TontineError::NotAdvanceable {
                current_round: 3,
                total_rounds: 3
            }
            .kind(),
            "NotAdvanceable"
        );
    }

    #[test]
    fn test_display_includes_reason() {
        let err = TontineError::TourNotActive(TourStatus::Pending);
        assert_eq!(err.to_string(), "Cannot advance tour with status: pending");
    }
}
