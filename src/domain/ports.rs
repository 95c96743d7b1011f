use super::group::{Group, GroupId};
use super::payment::{ChargeRef, ChargeRequest, ChargeStatus, RoundLedger};
use super::tour::{MemberId, Tour, TourId};
use crate::error::Result;
use async_trait::async_trait;
use rust_decimal::Decimal;

/// Persistence of tour aggregates.
///
/// Implementations must run `Tour::validate` before every write and reject
/// the write on failure. Each successful write stores the tour with its
/// version incremented by one.
#[async_trait]
pub trait TourStore: Send + Sync {
    /// Allocates a fresh tour id.
    async fn next_id(&self) -> Result<TourId>;
    /// Stores a new tour. Fails with `AlreadyExists` if the id is taken.
    async fn insert(&self, tour: Tour) -> Result<Tour>;
    async fn get(&self, tour_id: TourId) -> Result<Option<Tour>>;
    /// Replaces the stored tour only if its version still equals
    /// `expected_version`, otherwise fails with `ConcurrentModification`.
    async fn compare_and_swap(&self, tour: Tour, expected_version: u64) -> Result<Tour>;
    async fn all_tours(&self) -> Result<Vec<Tour>>;
}

/// Round payment records owned by the reconciliation bridge.
#[async_trait]
pub trait LedgerStore: Send + Sync {
    /// Opens the ledger of a round and returns it at version 1. Fails with
    /// `AlreadyExists` if the round already has one, which keeps a round from
    /// being charged twice.
    async fn create(&self, ledger: RoundLedger) -> Result<RoundLedger>;
    /// Replaces the stored ledger only if its version still equals
    /// `expected_version`, otherwise fails with `ConcurrentModification`.
    async fn compare_and_swap(&self, ledger: RoundLedger, expected_version: u64)
    -> Result<RoundLedger>;
    async fn get(&self, tour_id: TourId, round: u32) -> Result<Option<RoundLedger>>;
}

/// Read access to group definitions from the membership store.
#[async_trait]
pub trait GroupDirectory: Send + Sync {
    async fn get(&self, group_id: GroupId) -> Result<Option<Group>>;
}

/// The external payment provider.
#[async_trait]
pub trait PaymentProcessor: Send + Sync {
    /// Initiates a charge and returns its external reference. Settlement is
    /// reported later through `charge_status`.
    async fn charge(&self, request: &ChargeRequest) -> Result<ChargeRef>;
    async fn charge_status(&self, reference: &ChargeRef) -> Result<ChargeStatus>;
    async fn payout(&self, recipient: &MemberId, amount: Decimal) -> Result<()>;
}

pub type TourStoreBox = Box<dyn TourStore>;
pub type LedgerStoreBox = Box<dyn LedgerStore>;
pub type GroupDirectoryBox = Box<dyn GroupDirectory>;
pub type PaymentProcessorBox = Box<dyn PaymentProcessor>;
