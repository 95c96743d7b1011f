use crate::domain::clock::Clock;
use crate::domain::group::GroupId;
use crate::domain::ports::{GroupDirectoryBox, TourStoreBox};
use crate::domain::schedule::Frequency;
use crate::domain::tour::{
    Amount, Member, MemberId, Tour, TourId, TourRules, TourStatus, round_number,
};
use crate::error::{Result, TontineError};
use chrono::{DateTime, Utc};
use rand::seq::SliceRandom;
use serde::Serialize;
use std::sync::Arc;
use tracing::{debug, info, instrument, warn};

/// Outcome of one bulk pass over the active tours.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ScanReport {
    pub tours_advanced: usize,
    pub tours_completed: usize,
    pub failures: usize,
}

/// Read-only view of where a tour stands, computed on request.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct RoundState {
    pub tour_id: TourId,
    pub tour_name: String,
    pub current_round: u32,
    pub total_rounds: u32,
    pub next_round_date: Option<DateTime<Utc>>,
    pub is_overdue: bool,
    pub status: TourStatus,
    pub current_beneficiary: Option<Member>,
    pub next_beneficiary: Option<Member>,
    pub is_complete: bool,
}

impl RoundState {
    pub fn of(tour: &Tour, now: DateTime<Utc>) -> Self {
        Self {
            tour_id: tour.id,
            tour_name: tour.name.clone(),
            current_round: tour.current_round,
            total_rounds: tour.total_rounds,
            next_round_date: tour.next_round_date,
            is_overdue: tour.is_overdue(now),
            status: tour.status,
            current_beneficiary: tour.current_beneficiary().cloned(),
            next_beneficiary: tour.next_beneficiary().cloned(),
            is_complete: tour.is_complete(),
        }
    }
}

/// Parameters for opening a tour over an existing group.
#[derive(Debug, Clone)]
pub struct NewTour {
    pub name: String,
    pub description: Option<String>,
    pub group_id: GroupId,
    pub amount: Amount,
    pub frequency: Frequency,
    /// Defaults to the current time.
    pub start_date: Option<DateTime<Utc>>,
    pub rules: Option<TourRules>,
}

/// Owns every mutation of tour aggregates.
///
/// All writes go through the store's compare-and-swap, so two callers racing
/// on the same snapshot can never both advance it.
pub struct ProgressionEngine {
    tours: TourStoreBox,
    groups: GroupDirectoryBox,
    clock: Arc<dyn Clock>,
}

impl ProgressionEngine {
    pub fn new(tours: TourStoreBox, groups: GroupDirectoryBox, clock: Arc<dyn Clock>) -> Self {
        Self {
            tours,
            groups,
            clock,
        }
    }

    pub fn now(&self) -> DateTime<Utc> {
        self.clock.now()
    }

    pub async fn tour(&self, tour_id: TourId) -> Result<Tour> {
        self.tours
            .get(tour_id)
            .await?
            .ok_or_else(|| TontineError::NotFound(format!("tour {tour_id}")))
    }

    pub async fn all_tours(&self) -> Result<Vec<Tour>> {
        self.tours.all_tours().await
    }

    async fn scan(&self, due: impl Fn(&Tour) -> bool) -> Result<Vec<Tour>> {
        let tours = self.tours.all_tours().await?;
        Ok(tours.into_iter().filter(|t| due(t)).collect())
    }

    /// Snapshot of the active tours whose next round is due at `now`.
    pub async fn scan_due_tours(&self, now: DateTime<Utc>) -> Result<Vec<Tour>> {
        self.scan(|t| t.is_due_for_advance(now)).await
    }

    /// Snapshot of the active tours whose final round is due at `now`.
    pub async fn scan_finishing_tours(&self, now: DateTime<Utc>) -> Result<Vec<Tour>> {
        self.scan(|t| t.is_due_for_completion(now)).await
    }

    /// Closes the current round of `tour` and opens the next one.
    ///
    /// The beneficiary of the closing round is marked first, then the round
    /// advances, then the aggregate is written against the snapshot's version.
    /// Returns the new current round.
    pub async fn advance_one(&self, tour: Tour) -> Result<u32> {
        let stored = self.apply_advance(tour).await?;
        Ok(stored.current_round)
    }

    #[instrument(skip_all, fields(tour_id = %tour.id, round = tour.current_round))]
    async fn apply_advance(&self, mut tour: Tour) -> Result<Tour> {
        let now = self.clock.now();
        let expected_version = tour.version;

        if tour.mark_current_beneficiary_received(now) {
            debug!("Marked current beneficiary as received");
        }
        let round = tour.advance_to_next_round(now)?;
        let stored = self.tours.compare_and_swap(tour, expected_version).await?;

        info!(new_round = round, status = %stored.status, "Tour advanced");
        Ok(stored)
    }

    /// Pays out the last round of `tour` and marks it completed.
    #[instrument(skip_all, fields(tour_id = %tour.id))]
    pub async fn complete_final_round(&self, mut tour: Tour) -> Result<Tour> {
        let now = self.clock.now();
        let expected_version = tour.version;
        tour.close_final_round(now)?;
        let stored = self.tours.compare_and_swap(tour, expected_version).await?;
        info!(status = %stored.status, "Final round closed");
        Ok(stored)
    }

    /// Bulk pass: advances every due tour by exactly one round and closes
    /// final rounds that have fallen due.
    ///
    /// Both selections are taken before any write, so a tour advanced into
    /// its final round by this pass is not also closed by it. Per-tour
    /// failures are logged and counted, never propagated.
    pub async fn check_and_advance_tours(&self) -> Result<ScanReport> {
        let now = self.clock.now();
        let finishing = self.scan_finishing_tours(now).await?;
        let due = self.scan_due_tours(now).await?;

        info!(
            due = due.len(),
            finishing = finishing.len(),
            "Found tours ready to advance"
        );

        let mut report = ScanReport::default();
        for tour in due {
            let tour_id = tour.id;
            match self.advance_one(tour).await {
                Ok(_) => report.tours_advanced += 1,
                Err(e) => {
                    report.failures += 1;
                    warn!(%tour_id, kind = e.kind(), "Error advancing tour: {e}");
                }
            }
        }
        for tour in finishing {
            let tour_id = tour.id;
            match self.complete_final_round(tour).await {
                Ok(_) => report.tours_completed += 1,
                Err(e) => {
                    report.failures += 1;
                    warn!(%tour_id, kind = e.kind(), "Error completing tour: {e}");
                }
            }
        }
        Ok(report)
    }

    /// Manual single-tour advance on behalf of `requester`.
    ///
    /// Unlike the bulk pass this reports why a tour cannot move instead of
    /// skipping it.
    pub async fn advance_tour_round(&self, tour_id: TourId, requester: &MemberId) -> Result<Tour> {
        let tour = self.tour(tour_id).await?;

        if !tour.is_creator(requester) {
            return Err(TontineError::NotAuthorized(format!(
                "only the creator can advance tour {tour_id}"
            )));
        }
        if tour.status != TourStatus::Active {
            return Err(TontineError::TourNotActive(tour.status));
        }
        if tour.current_round >= tour.total_rounds {
            return Err(TontineError::TourAlreadyComplete(tour_id));
        }

        self.apply_advance(tour).await
    }

    /// A tour as seen by one of its members or its creator.
    pub async fn tour_for(&self, tour_id: TourId, requester: &MemberId) -> Result<Tour> {
        let tour = self.tour(tour_id).await?;
        if !tour.is_member(requester) && !tour.is_creator(requester) {
            return Err(TontineError::NotAuthorized(format!(
                "{requester} does not take part in tour {tour_id}"
            )));
        }
        Ok(tour)
    }

    /// Tours `requester` created or takes part in, newest first.
    pub async fn tours_for_member(&self, requester: &MemberId) -> Result<Vec<Tour>> {
        let mut tours: Vec<Tour> = self
            .tours
            .all_tours()
            .await?
            .into_iter()
            .filter(|t| t.is_creator(requester) || t.is_member(requester))
            .collect();
        tours.sort_by(|a, b| b.created_at.cmp(&a.created_at));
        Ok(tours)
    }

    /// Tours of a group, newest first. Restricted to the group's owner and
    /// members.
    pub async fn tours_for_group(
        &self,
        group_id: GroupId,
        requester: &MemberId,
    ) -> Result<Vec<Tour>> {
        let group = self
            .groups
            .get(group_id)
            .await?
            .ok_or_else(|| TontineError::NotFound(format!("group {group_id}")))?;
        if !group.includes(requester) {
            return Err(TontineError::NotAuthorized(format!(
                "{requester} is not part of group {group_id}"
            )));
        }
        let mut tours: Vec<Tour> = self
            .tours
            .all_tours()
            .await?
            .into_iter()
            .filter(|t| t.group_id == group_id)
            .collect();
        tours.sort_by(|a, b| b.created_at.cmp(&a.created_at));
        Ok(tours)
    }

    /// Current round view for a member or the creator of the tour.
    pub async fn round_state(&self, tour_id: TourId, requester: &MemberId) -> Result<RoundState> {
        let tour = self.tour(tour_id).await?;
        if !tour.is_member(requester) && !tour.is_creator(requester) {
            return Err(TontineError::NotAuthorized(format!(
                "{requester} does not take part in tour {tour_id}"
            )));
        }
        Ok(RoundState::of(&tour, self.clock.now()))
    }

    /// Opens a pending tour over the owner and members of a group, in a
    /// random rotation order.
    pub async fn create_tour(&self, new_tour: NewTour, requester: &MemberId) -> Result<Tour> {
        let group = self
            .groups
            .get(new_tour.group_id)
            .await?
            .ok_or_else(|| TontineError::NotFound(format!("group {}", new_tour.group_id)))?;

        if !group.is_owner(requester) {
            return Err(TontineError::NotAuthorized(
                "only the group owner can create tours".to_string(),
            ));
        }

        let mut participants = group.participants();
        if participants.len() < 2 {
            return Err(TontineError::ValidationError(
                "A group needs at least 2 members to create a tour".to_string(),
            ));
        }
        participants.shuffle(&mut rand::thread_rng());

        let now = self.clock.now();
        let members = participants
            .into_iter()
            .enumerate()
            .map(|(index, p)| {
                let position = round_number(index + 1)?;
                Ok(Member::new(p.member_id, p.username, position, now))
            })
            .collect::<Result<Vec<_>>>()?;

        let id = self.tours.next_id().await?;
        let mut tour = Tour::new(
            id,
            new_tour.name,
            group.id,
            new_tour.amount,
            new_tour.frequency,
            new_tour.start_date.unwrap_or(now),
            requester.clone(),
            members,
            now,
        )?;
        tour.description = new_tour.description;
        tour.rules = new_tour.rules.unwrap_or_default();

        let stored = self.tours.insert(tour).await?;
        info!(tour_id = %stored.id, members = stored.members.len(), "Tour created");
        Ok(stored)
    }

    /// Moves a pending tour to active. Only its creator may do so.
    pub async fn start_tour(&self, tour_id: TourId, requester: &MemberId) -> Result<Tour> {
        let mut tour = self.tour(tour_id).await?;
        if !tour.is_creator(requester) {
            return Err(TontineError::NotAuthorized(format!(
                "only the creator can start tour {tour_id}"
            )));
        }
        let expected_version = tour.version;
        tour.start()?;
        let stored = self.tours.compare_and_swap(tour, expected_version).await?;
        info!(%tour_id, "Tour started");
        Ok(stored)
    }
}
