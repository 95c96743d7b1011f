use super::progression::{ProgressionEngine, ScanReport};
use crate::config::ReconciliationConfig;
use crate::domain::payment::{
    Charge, ChargeRequest, ChargeStatus, RoundLedger, RoundSettlement,
};
use crate::domain::ports::{LedgerStoreBox, PaymentProcessorBox};
use crate::domain::tour::{MemberId, Tour, TourId, TourStatus};
use crate::error::{Result, TontineError};
use rust_decimal::Decimal;
use serde::Serialize;
use std::sync::Arc;
use tracing::{debug, error, info, warn};

/// Money moved for one round, as opened by `charge_all_members`.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ChargeSummary {
    pub tour_id: TourId,
    pub round: u32,
    pub recipient: MemberId,
    pub total_amount: Decimal,
    pub fee_amount: Decimal,
    pub recipient_amount: Decimal,
    pub charges: Vec<Charge>,
}

/// Result of polling the charges of a tour's current round.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Settlement {
    /// The current round has not been charged yet.
    NotCharged,
    /// At least one charge is still in flight.
    Pending,
    /// At least one charge failed. Needs manual intervention.
    Failed,
    /// Every charge succeeded. `new_round` is `None` when the settled round
    /// was the last one and the tour is now completed.
    Settled { new_round: Option<u32> },
}

/// Glue between the payment processor and the progression engine.
///
/// In the settlement-gated flow a due round is first charged to every member
/// except its beneficiary, and only advances once all of those charges have
/// succeeded and the beneficiary has been paid.
pub struct PaymentReconciliation {
    engine: Arc<ProgressionEngine>,
    ledgers: LedgerStoreBox,
    processor: PaymentProcessorBox,
    config: ReconciliationConfig,
}

impl PaymentReconciliation {
    pub fn new(
        engine: Arc<ProgressionEngine>,
        ledgers: LedgerStoreBox,
        processor: PaymentProcessorBox,
        config: ReconciliationConfig,
    ) -> Self {
        Self {
            engine,
            ledgers,
            processor,
            config,
        }
    }

    pub async fn ledger(&self, tour_id: TourId, round: u32) -> Result<Option<RoundLedger>> {
        self.ledgers.get(tour_id, round).await
    }

    fn summarize(&self, ledger: &RoundLedger) -> ChargeSummary {
        let total_amount: Decimal = ledger.total_charged();
        let fee_amount = (total_amount * self.config.platform_fee_rate).round_dp(2);
        ChargeSummary {
            tour_id: ledger.tour_id,
            round: ledger.round,
            recipient: ledger.recipient.clone(),
            total_amount,
            fee_amount,
            recipient_amount: total_amount - fee_amount,
            charges: ledger.charges.clone(),
        }
    }

    /// Charges every member except the current beneficiary for the current
    /// round and records one pending ledger entry per charge.
    ///
    /// A round that already has a ledger is not charged again; its existing
    /// summary is returned instead. Charges the processor refuses to open are
    /// recorded as failed.
    pub async fn charge_all_members(self: &Arc<Self>, tour_id: TourId) -> Result<ChargeSummary> {
        let tour = self.engine.tour(tour_id).await?;
        if tour.status != TourStatus::Active {
            return Err(TontineError::TourNotActive(tour.status));
        }
        let beneficiary = tour
            .current_beneficiary()
            .ok_or_else(|| {
                TontineError::ValidationError(format!(
                    "Tour {tour_id} has no beneficiary for round {}",
                    tour.current_round
                ))
            })?
            .clone();
        let round = tour.current_round;

        let opening = RoundLedger::new(
            tour_id,
            round,
            beneficiary.member_id.clone(),
            self.engine.now(),
        );
        let mut ledger = match self.ledgers.create(opening).await {
            Ok(created) => created,
            Err(TontineError::AlreadyExists(_)) => {
                debug!(%tour_id, round, "Round already charged");
                let existing = self.ledgers.get(tour_id, round).await?.ok_or_else(|| {
                    TontineError::NotFound(format!("ledger for tour {tour_id} round {round}"))
                })?;
                return Ok(self.summarize(&existing));
            }
            Err(e) => return Err(e),
        };
        let opened_version = ledger.version;

        let amount = tour.amount.value();
        for payer in tour.members.iter().filter(|m| m.position != round) {
            let request = ChargeRequest {
                tour_id,
                round,
                payer: payer.member_id.clone(),
                recipient: beneficiary.member_id.clone(),
                amount,
            };
            let charge = match self.processor.charge(&request).await {
                Ok(reference) => Charge {
                    payer: request.payer,
                    amount,
                    reference: Some(reference),
                    status: ChargeStatus::Pending,
                    completed_at: None,
                },
                Err(e) => {
                    warn!(%tour_id, round, payer = %request.payer, "Charge could not be opened: {e}");
                    Charge {
                        payer: request.payer,
                        amount,
                        reference: None,
                        status: ChargeStatus::Failed,
                        completed_at: None,
                    }
                }
            };
            ledger.charges.push(charge);
        }
        // Polls leave an opening ledger alone, so this write only loses to a
        // writer outside the bridge.
        ledger.status = RoundSettlement::Processing;
        let ledger = self
            .ledgers
            .compare_and_swap(ledger, opened_version)
            .await?;
        info!(%tour_id, round, charges = ledger.charges.len(), "Round charged");

        if let Some(delay) = self.config.status_check_delay {
            let bridge = Arc::clone(self);
            tokio::spawn(async move {
                tokio::time::sleep(delay).await;
                if let Err(e) = bridge.check_payment_status_and_advance(tour_id).await {
                    warn!(%tour_id, kind = e.kind(), "Payment status check failed: {e}");
                }
            });
        }

        Ok(self.summarize(&ledger))
    }

    /// Polls the charges of the current round and, once every one of them has
    /// succeeded, pays the beneficiary and closes the round.
    ///
    /// Pending charges leave everything in place for the next poll. Failed
    /// charges are never retried here. Overlapping polls race on the ledger
    /// version: the loser fails with `ConcurrentModification` before any
    /// money moves.
    pub async fn check_payment_status_and_advance(&self, tour_id: TourId) -> Result<Settlement> {
        let tour = self.engine.tour(tour_id).await?;
        if tour.status != TourStatus::Active {
            return Err(TontineError::TourNotActive(tour.status));
        }
        let round = tour.current_round;
        let Some(mut ledger) = self.ledgers.get(tour_id, round).await? else {
            return Ok(Settlement::NotCharged);
        };
        match ledger.status {
            RoundSettlement::Failed => return Ok(Settlement::Failed),
            RoundSettlement::Opening => {
                debug!(%tour_id, round, "Round is still being charged");
                return Ok(Settlement::Pending);
            }
            RoundSettlement::PayingOut => {
                debug!(%tour_id, round, "Payout already in flight");
                return Ok(Settlement::Pending);
            }
            // Paid out by an earlier poll whose round close did not go through.
            RoundSettlement::Settled => return self.close_round(tour).await,
            RoundSettlement::Processing => {}
        }

        let expected_version = ledger.version;
        let now = self.engine.now();
        for charge in ledger
            .charges
            .iter_mut()
            .filter(|c| !c.status.is_terminal())
        {
            let Some(reference) = &charge.reference else {
                continue;
            };
            match self.processor.charge_status(reference).await {
                Ok(status) => {
                    charge.status = status;
                    if status == ChargeStatus::Succeeded {
                        charge.completed_at = Some(now);
                    }
                }
                Err(e) => {
                    warn!(%tour_id, round, reference = %reference.0, "Could not fetch charge status: {e}");
                }
            }
        }

        if ledger.has_failures() {
            ledger.status = RoundSettlement::Failed;
            self.ledgers
                .compare_and_swap(ledger, expected_version)
                .await?;
            error!(%tour_id, round, "Round has failed charges and needs manual intervention");
            return Ok(Settlement::Failed);
        }
        if !ledger.is_settled() {
            self.ledgers
                .compare_and_swap(ledger, expected_version)
                .await?;
            debug!(%tour_id, round, "Round still has pending charges");
            return Ok(Settlement::Pending);
        }

        // Claim the payout. Only the poll whose write lands here pays out.
        ledger.status = RoundSettlement::PayingOut;
        ledger.settled_at = Some(now);
        let mut ledger = self
            .ledgers
            .compare_and_swap(ledger, expected_version)
            .await?;
        info!(%tour_id, round, "Round settled");

        let claimed_version = ledger.version;
        let summary = self.summarize(&ledger);
        if let Err(e) = self
            .processor
            .payout(&ledger.recipient, summary.recipient_amount)
            .await
        {
            ledger.status = RoundSettlement::Processing;
            ledger.settled_at = None;
            self.ledgers
                .compare_and_swap(ledger, claimed_version)
                .await?;
            return Err(e);
        }
        ledger.status = RoundSettlement::Settled;
        ledger.paid_out_at = Some(now);
        self.ledgers
            .compare_and_swap(ledger, claimed_version)
            .await?;
        info!(%tour_id, round, amount = %summary.recipient_amount, "Beneficiary paid out");

        self.close_round(tour).await
    }

    async fn close_round(&self, tour: Tour) -> Result<Settlement> {
        if tour.current_round < tour.total_rounds {
            let new_round = self.engine.advance_one(tour).await?;
            Ok(Settlement::Settled {
                new_round: Some(new_round),
            })
        } else {
            self.engine.complete_final_round(tour).await?;
            Ok(Settlement::Settled { new_round: None })
        }
    }

    /// Charges or polls a due tour depending on whether its round has been
    /// charged yet.
    pub async fn reconcile(self: &Arc<Self>, tour: &Tour) -> Result<Settlement> {
        match self.ledgers.get(tour.id, tour.current_round).await? {
            None => {
                self.charge_all_members(tour.id).await?;
                Ok(Settlement::Pending)
            }
            Some(_) => self.check_payment_status_and_advance(tour.id).await,
        }
    }

    /// Settlement-gated counterpart of the bulk pass.
    ///
    /// Tours whose rules do not require every payment before distribution
    /// still move on their due date alone.
    pub async fn reconcile_due_tours(self: &Arc<Self>) -> Result<ScanReport> {
        let now = self.engine.now();
        let mut due = self.engine.scan_finishing_tours(now).await?;
        due.extend(self.engine.scan_due_tours(now).await?);

        let mut report = ScanReport::default();
        for tour in due {
            let tour_id = tour.id;
            let outcome = if tour.rules.require_all_payments_before_distribution {
                self.reconcile(&tour).await
            } else {
                self.close_round(tour).await
            };
            match outcome {
                Ok(Settlement::Settled { new_round: Some(_) }) => report.tours_advanced += 1,
                Ok(Settlement::Settled { new_round: None }) => report.tours_completed += 1,
                Ok(Settlement::Failed) => report.failures += 1,
                Ok(Settlement::Pending | Settlement::NotCharged) => {}
                Err(e) => {
                    report.failures += 1;
                    warn!(%tour_id, kind = e.kind(), "Error reconciling tour: {e}");
                }
            }
        }
        Ok(report)
    }
}
