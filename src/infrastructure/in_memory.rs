use crate::domain::group::{Group, GroupId};
use crate::domain::payment::{ChargeRef, ChargeRequest, ChargeStatus, RoundLedger};
use crate::domain::ports::{GroupDirectory, LedgerStore, PaymentProcessor, TourStore};
use crate::domain::tour::{MemberId, Tour, TourId};
use crate::error::{Result, TontineError};
use async_trait::async_trait;
use rust_decimal::Decimal;
use std::collections::{HashMap, HashSet};
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use tokio::sync::RwLock;

/// A thread-safe in-memory store for tours.
///
/// Compare-and-swap holds the write lock across the version check and the
/// write, so it is atomic for every clone sharing the same map.
#[derive(Default, Clone)]
pub struct InMemoryTourStore {
    tours: Arc<RwLock<HashMap<TourId, Tour>>>,
    last_id: Arc<AtomicU64>,
}

impl InMemoryTourStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl TourStore for InMemoryTourStore {
    async fn next_id(&self) -> Result<TourId> {
        Ok(TourId(self.last_id.fetch_add(1, Ordering::SeqCst) + 1))
    }

    async fn insert(&self, mut tour: Tour) -> Result<Tour> {
        tour.validate()?;
        let mut tours = self.tours.write().await;
        if tours.contains_key(&tour.id) {
            return Err(TontineError::AlreadyExists(format!("tour {}", tour.id)));
        }
        self.last_id.fetch_max(tour.id.0, Ordering::SeqCst);
        tour.version = 1;
        tours.insert(tour.id, tour.clone());
        Ok(tour)
    }

    async fn get(&self, tour_id: TourId) -> Result<Option<Tour>> {
        let tours = self.tours.read().await;
        Ok(tours.get(&tour_id).cloned())
    }

    async fn compare_and_swap(&self, mut tour: Tour, expected_version: u64) -> Result<Tour> {
        tour.validate()?;
        let mut tours = self.tours.write().await;
        let stored = tours
            .get(&tour.id)
            .ok_or_else(|| TontineError::NotFound(format!("tour {}", tour.id)))?;
        if stored.version != expected_version {
            return Err(TontineError::ConcurrentModification(tour.id));
        }
        tour.version = expected_version + 1;
        tours.insert(tour.id, tour.clone());
        Ok(tour)
    }

    async fn all_tours(&self) -> Result<Vec<Tour>> {
        let tours = self.tours.read().await;
        let mut all: Vec<Tour> = tours.values().cloned().collect();
        all.sort_by_key(|t| t.id);
        Ok(all)
    }
}

/// In-memory round ledgers keyed by (tour, round).
#[derive(Default, Clone)]
pub struct InMemoryLedgerStore {
    ledgers: Arc<RwLock<HashMap<(TourId, u32), RoundLedger>>>,
}

impl InMemoryLedgerStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl LedgerStore for InMemoryLedgerStore {
    async fn create(&self, mut ledger: RoundLedger) -> Result<RoundLedger> {
        let mut ledgers = self.ledgers.write().await;
        let key = (ledger.tour_id, ledger.round);
        if ledgers.contains_key(&key) {
            return Err(TontineError::AlreadyExists(format!(
                "ledger for tour {} round {}",
                ledger.tour_id, ledger.round
            )));
        }
        ledger.version = 1;
        ledgers.insert(key, ledger.clone());
        Ok(ledger)
    }

    async fn compare_and_swap(
        &self,
        mut ledger: RoundLedger,
        expected_version: u64,
    ) -> Result<RoundLedger> {
        let mut ledgers = self.ledgers.write().await;
        let key = (ledger.tour_id, ledger.round);
        let stored = ledgers.get(&key).ok_or_else(|| {
            TontineError::NotFound(format!(
                "ledger for tour {} round {}",
                ledger.tour_id, ledger.round
            ))
        })?;
        if stored.version != expected_version {
            return Err(TontineError::ConcurrentModification(ledger.tour_id));
        }
        ledger.version = expected_version + 1;
        ledgers.insert(key, ledger.clone());
        Ok(ledger)
    }

    async fn get(&self, tour_id: TourId, round: u32) -> Result<Option<RoundLedger>> {
        let ledgers = self.ledgers.read().await;
        Ok(ledgers.get(&(tour_id, round)).cloned())
    }
}

/// In-memory stand-in for the membership store.
#[derive(Default, Clone)]
pub struct InMemoryGroupDirectory {
    groups: Arc<RwLock<HashMap<GroupId, Group>>>,
}

impl InMemoryGroupDirectory {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn add(&self, group: Group) {
        let mut groups = self.groups.write().await;
        groups.insert(group.id, group);
    }
}

#[async_trait]
impl GroupDirectory for InMemoryGroupDirectory {
    async fn get(&self, group_id: GroupId) -> Result<Option<Group>> {
        let groups = self.groups.read().await;
        Ok(groups.get(&group_id).cloned())
    }
}

#[derive(Default)]
struct ProcessorState {
    charges: HashMap<ChargeRef, (ChargeRequest, ChargeStatus)>,
    payouts: Vec<(MemberId, Decimal)>,
    issued: u64,
}

/// A scriptable payment processor.
///
/// New charges start in `initial_status`. Members listed as missing an
/// account cannot be charged. Statuses can be moved afterwards with
/// `set_status` / `settle_all` to simulate asynchronous settlement.
#[derive(Clone)]
pub struct SimulatedPaymentProcessor {
    state: Arc<RwLock<ProcessorState>>,
    initial_status: ChargeStatus,
    missing_accounts: Arc<HashSet<MemberId>>,
}

impl Default for SimulatedPaymentProcessor {
    fn default() -> Self {
        Self::new(ChargeStatus::Succeeded)
    }
}

impl SimulatedPaymentProcessor {
    pub fn new(initial_status: ChargeStatus) -> Self {
        Self {
            state: Arc::default(),
            initial_status,
            missing_accounts: Arc::default(),
        }
    }

    pub fn with_missing_accounts(mut self, members: impl IntoIterator<Item = MemberId>) -> Self {
        self.missing_accounts = Arc::new(members.into_iter().collect());
        self
    }

    pub async fn set_status_for_payer(&self, payer: &MemberId, status: ChargeStatus) {
        let mut state = self.state.write().await;
        for (request, current) in state.charges.values_mut() {
            if &request.payer == payer {
                *current = status;
            }
        }
    }

    pub async fn settle_all(&self) {
        let mut state = self.state.write().await;
        for (_, status) in state.charges.values_mut() {
            *status = ChargeStatus::Succeeded;
        }
    }

    pub async fn charge_requests(&self) -> Vec<ChargeRequest> {
        let state = self.state.read().await;
        let mut requests: Vec<(ChargeRef, ChargeRequest)> = state
            .charges
            .iter()
            .map(|(reference, (request, _))| (reference.clone(), request.clone()))
            .collect();
        requests.sort_by(|a, b| a.0.0.cmp(&b.0.0));
        requests.into_iter().map(|(_, request)| request).collect()
    }

    pub async fn payouts(&self) -> Vec<(MemberId, Decimal)> {
        self.state.read().await.payouts.clone()
    }
}

#[async_trait]
impl PaymentProcessor for SimulatedPaymentProcessor {
    async fn charge(&self, request: &ChargeRequest) -> Result<ChargeRef> {
        if self.missing_accounts.contains(&request.payer) {
            return Err(TontineError::PaymentError(format!(
                "Member {} has no payment method",
                request.payer
            )));
        }
        let mut state = self.state.write().await;
        state.issued += 1;
        let reference = ChargeRef(format!("ch_{:08}", state.issued));
        state
            .charges
            .insert(reference.clone(), (request.clone(), self.initial_status));
        Ok(reference)
    }

    async fn charge_status(&self, reference: &ChargeRef) -> Result<ChargeStatus> {
        let state = self.state.read().await;
        state
            .charges
            .get(reference)
            .map(|(_, status)| *status)
            .ok_or_else(|| TontineError::PaymentError(format!("Unknown charge {}", reference.0)))
    }

    async fn payout(&self, recipient: &MemberId, amount: Decimal) -> Result<()> {
        if self.missing_accounts.contains(recipient) {
            return Err(TontineError::PaymentError(format!(
                "Member {recipient} has no payout account"
            )));
        }
        let mut state = self.state.write().await;
        state.payouts.push((recipient.clone(), amount));
        Ok(())
    }
}
