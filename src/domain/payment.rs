use super::tour::{MemberId, TourId};
use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

/// External reference of a charge at the payment processor.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ChargeRef(pub String);

#[derive(Debug, Serialize, Deserialize, PartialEq, Eq, Clone, Copy)]
#[serde(rename_all = "lowercase")]
pub enum ChargeStatus {
    Pending,
    Succeeded,
    Failed,
}

impl ChargeStatus {
    pub fn is_terminal(&self) -> bool {
        !matches!(self, Self::Pending)
    }
}

/// Everything the processor needs to move one member's contribution.
#[derive(Debug, Clone, PartialEq)]
pub struct ChargeRequest {
    pub tour_id: TourId,
    pub round: u32,
    pub payer: MemberId,
    pub recipient: MemberId,
    pub amount: Decimal,
}

/// One payer's contribution for a round.
#[derive(Debug, Serialize, Deserialize, PartialEq, Clone)]
#[serde(rename_all = "camelCase")]
pub struct Charge {
    pub payer: MemberId,
    pub amount: Decimal,
    /// `None` when the processor refused to open the charge at all.
    pub reference: Option<ChargeRef>,
    pub status: ChargeStatus,
    pub completed_at: Option<DateTime<Utc>>,
}

/// Lifecycle of a round ledger.
///
/// `Opening` while charges are being opened, `Processing` while they settle,
/// `PayingOut` while the beneficiary payout is in flight. Only the writer that
/// moves a ledger into `PayingOut` may pay the beneficiary.
#[derive(Debug, Serialize, Deserialize, PartialEq, Eq, Clone, Copy)]
#[serde(rename_all = "snake_case")]
pub enum RoundSettlement {
    Opening,
    Processing,
    PayingOut,
    Settled,
    Failed,
}

/// Payment record for a single round of a tour.
#[derive(Debug, Serialize, Deserialize, PartialEq, Clone)]
#[serde(rename_all = "camelCase")]
pub struct RoundLedger {
    pub tour_id: TourId,
    pub round: u32,
    pub recipient: MemberId,
    pub charges: Vec<Charge>,
    pub status: RoundSettlement,
    pub opened_at: DateTime<Utc>,
    pub settled_at: Option<DateTime<Utc>>,
    /// Set once the pooled amount has been paid to the recipient.
    pub paid_out_at: Option<DateTime<Utc>>,
    /// Compare-and-swap token, bumped by the store on every write.
    #[serde(default)]
    pub version: u64,
}

impl RoundLedger {
    pub fn new(tour_id: TourId, round: u32, recipient: MemberId, opened_at: DateTime<Utc>) -> Self {
        Self {
            tour_id,
            round,
            recipient,
            charges: Vec::new(),
            status: RoundSettlement::Opening,
            opened_at,
            settled_at: None,
            paid_out_at: None,
            version: 0,
        }
    }

    /// At least one charge was opened and every charge has reached terminal
    /// success.
    pub fn is_settled(&self) -> bool {
        !self.charges.is_empty()
            && self
                .charges
                .iter()
                .all(|c| c.status == ChargeStatus::Succeeded)
    }

    pub fn has_failures(&self) -> bool {
        self.charges.iter().any(|c| c.status == ChargeStatus::Failed)
    }

    pub fn total_charged(&self) -> Decimal {
        self.charges.iter().map(|c| c.amount).sum()
    }
}
