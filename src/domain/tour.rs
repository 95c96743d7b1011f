use super::group::GroupId;
use super::schedule::{Frequency, next_due_date};
use crate::error::{Result, TontineError};
use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use std::fmt;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct TourId(pub u64);

impl fmt::Display for TourId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Stable identifier of a participant, as issued by the identity store.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct MemberId(pub String);

impl MemberId {
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }
}

impl fmt::Display for MemberId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Fixed per-round contribution. Always strictly positive.
#[derive(Debug, Clone, Copy, PartialEq, PartialOrd, Serialize, Deserialize)]
#[serde(try_from = "Decimal", into = "Decimal")]
pub struct Amount(Decimal);

impl Amount {
    pub fn new(value: Decimal) -> Result<Self> {
        if value > Decimal::ZERO {
            Ok(Self(value))
        } else {
            Err(TontineError::ValidationError(
                "Amount must be positive".to_string(),
            ))
        }
    }

    pub fn value(&self) -> Decimal {
        self.0
    }
}

impl TryFrom<Decimal> for Amount {
    type Error = TontineError;

    fn try_from(value: Decimal) -> std::result::Result<Self, Self::Error> {
        Self::new(value)
    }
}

impl From<Amount> for Decimal {
    fn from(amount: Amount) -> Self {
        amount.0
    }
}

#[derive(Debug, Serialize, Deserialize, PartialEq, Eq, Clone, Copy, Default)]
#[serde(rename_all = "lowercase")]
pub enum TourStatus {
    #[default]
    Pending,
    Active,
    Paused,
    Completed,
    Cancelled,
}

impl fmt::Display for TourStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Self::Pending => "pending",
            Self::Active => "active",
            Self::Paused => "paused",
            Self::Completed => "completed",
            Self::Cancelled => "cancelled",
        };
        f.write_str(s)
    }
}

/// Late-payment policy attached to a tour.
#[derive(Debug, Serialize, Deserialize, PartialEq, Clone)]
#[serde(rename_all = "camelCase", default)]
pub struct TourRules {
    pub allow_late_payments: bool,
    pub late_penalty_amount: Decimal,
    pub max_lateness_days: u32,
    pub require_all_payments_before_distribution: bool,
}

impl Default for TourRules {
    fn default() -> Self {
        Self {
            allow_late_payments: false,
            late_penalty_amount: Decimal::ZERO,
            max_lateness_days: 7,
            require_all_payments_before_distribution: true,
        }
    }
}

/// A position in the rotation.
#[derive(Debug, Serialize, Deserialize, PartialEq, Clone)]
#[serde(rename_all = "camelCase")]
pub struct Member {
    pub member_id: MemberId,
    pub username: String,
    pub position: u32,
    #[serde(default)]
    pub has_received: bool,
    #[serde(default)]
    pub received_date: Option<DateTime<Utc>>,
    pub joined_at: DateTime<Utc>,
}

impl Member {
    pub fn new(
        member_id: MemberId,
        username: impl Into<String>,
        position: u32,
        joined_at: DateTime<Utc>,
    ) -> Self {
        Self {
            member_id,
            username: username.into(),
            position,
            has_received: false,
            received_date: None,
            joined_at,
        }
    }
}

/// The rotating-savings aggregate: round bookkeeping plus the embedded roster.
///
/// The whole document is written atomically. `version` is bumped by the store
/// on every successful write and is the compare-and-swap token for updates.
#[derive(Debug, Serialize, Deserialize, PartialEq, Clone)]
#[serde(rename_all = "camelCase")]
pub struct Tour {
    pub id: TourId,
    pub name: String,
    #[serde(default)]
    pub description: Option<String>,
    pub group_id: GroupId,
    pub amount: Amount,
    pub frequency: Frequency,
    pub total_rounds: u32,
    #[serde(default = "first_round")]
    pub current_round: u32,
    #[serde(default)]
    pub status: TourStatus,
    pub start_date: DateTime<Utc>,
    #[serde(default)]
    pub next_round_date: Option<DateTime<Utc>>,
    #[serde(default)]
    pub completed_at: Option<DateTime<Utc>>,
    pub members: Vec<Member>,
    pub created_by: MemberId,
    pub created_at: DateTime<Utc>,
    #[serde(default)]
    pub rules: TourRules,
    #[serde(default)]
    pub version: u64,
}

fn first_round() -> u32 {
    1
}

/// Converts a roster size or position into a round number.
pub(crate) fn round_number(value: usize) -> Result<u32> {
    u32::try_from(value).map_err(|_| {
        TontineError::ValidationError(format!("{value} does not fit in a round number"))
    })
}

impl Tour {
    /// Creates a pending tour whose round count matches its roster and whose
    /// first due date is one interval after `start_date`.
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        id: TourId,
        name: impl Into<String>,
        group_id: GroupId,
        amount: Amount,
        frequency: Frequency,
        start_date: DateTime<Utc>,
        created_by: MemberId,
        members: Vec<Member>,
        now: DateTime<Utc>,
    ) -> Result<Self> {
        Ok(Self {
            id,
            name: name.into(),
            description: None,
            group_id,
            amount,
            frequency,
            total_rounds: round_number(members.len())?,
            current_round: 1,
            status: TourStatus::Pending,
            start_date,
            next_round_date: Some(next_due_date(start_date, frequency)),
            completed_at: None,
            members,
            created_by,
            created_at: now,
            rules: TourRules::default(),
            version: 0,
        })
    }

    /// Member whose position equals the current round.
    pub fn current_beneficiary(&self) -> Option<&Member> {
        self.member_at(self.current_round)
    }

    /// Member who receives in the following round, if there is one.
    pub fn next_beneficiary(&self) -> Option<&Member> {
        let next_round = self.current_round.saturating_add(1);
        if next_round <= self.total_rounds {
            self.member_at(next_round)
        } else {
            None
        }
    }

    fn member_at(&self, position: u32) -> Option<&Member> {
        self.members.iter().find(|m| m.position == position)
    }

    /// A tour is complete once the round counter overflows OR every member has
    /// received. Either condition is sufficient.
    pub fn is_complete(&self) -> bool {
        self.current_round > self.total_rounds || self.members.iter().all(|m| m.has_received)
    }

    pub fn total_tour_value(&self) -> Decimal {
        self.amount.value() * Decimal::from(self.total_rounds)
    }

    pub fn is_creator(&self, member: &MemberId) -> bool {
        &self.created_by == member
    }

    pub fn is_member(&self, member: &MemberId) -> bool {
        self.members.iter().any(|m| &m.member_id == member)
    }

    pub fn is_overdue(&self, now: DateTime<Utc>) -> bool {
        self.next_round_date.is_some_and(|due| now > due)
    }

    fn round_due(&self, now: DateTime<Utc>) -> bool {
        self.status == TourStatus::Active && self.next_round_date.is_some_and(|due| due <= now)
    }

    /// Active, past its due date, and with at least one round left to open.
    pub fn is_due_for_advance(&self, now: DateTime<Utc>) -> bool {
        self.round_due(now) && self.current_round < self.total_rounds
    }

    /// Active, past its due date, on the last round and not yet complete.
    pub fn is_due_for_completion(&self, now: DateTime<Utc>) -> bool {
        self.round_due(now) && self.current_round == self.total_rounds && !self.is_complete()
    }

    /// Flags the current beneficiary as paid out. Returns `false` when there is
    /// no beneficiary for the round or it was already marked.
    pub fn mark_current_beneficiary_received(&mut self, now: DateTime<Utc>) -> bool {
        let round = self.current_round;
        match self.members.iter_mut().find(|m| m.position == round) {
            Some(member) if !member.has_received => {
                member.has_received = true;
                member.received_date = Some(now);
                true
            }
            _ => false,
        }
    }

    /// Moves to the next round and schedules its due date from the previous one.
    ///
    /// Fails with `NotAdvanceable`, leaving the tour untouched, when the current
    /// round is already the last one.
    pub fn advance_to_next_round(&mut self, now: DateTime<Utc>) -> Result<u32> {
        if self.current_round >= self.total_rounds {
            return Err(TontineError::NotAdvanceable {
                current_round: self.current_round,
                total_rounds: self.total_rounds,
            });
        }

        self.current_round += 1;
        let base = self.next_round_date.unwrap_or(self.start_date);
        self.next_round_date = Some(next_due_date(base, self.frequency));

        if self.is_complete() {
            self.status = TourStatus::Completed;
            self.completed_at = Some(now);
        }
        Ok(self.current_round)
    }

    /// Pays out the last round and closes the tour.
    pub fn close_final_round(&mut self, now: DateTime<Utc>) -> Result<()> {
        if self.current_round < self.total_rounds {
            return Err(TontineError::ValidationError(format!(
                "Round {} of {} is not the final round",
                self.current_round, self.total_rounds
            )));
        }
        self.mark_current_beneficiary_received(now);
        if self.is_complete() && self.status != TourStatus::Completed {
            self.status = TourStatus::Completed;
            self.completed_at = Some(now);
        }
        Ok(())
    }

    /// Transitions a pending tour with at least two members to active.
    pub fn start(&mut self) -> Result<()> {
        if self.status != TourStatus::Pending {
            return Err(TontineError::ValidationError(format!(
                "Cannot start tour with status: {}",
                self.status
            )));
        }
        if self.members.len() < 2 {
            return Err(TontineError::ValidationError(
                "A tour needs at least 2 members".to_string(),
            ));
        }
        self.status = TourStatus::Active;
        Ok(())
    }

    /// Checks the round topology. Stores call this before every write.
    pub fn validate(&self) -> Result<()> {
        if !self.members.is_empty() && self.total_rounds as usize != self.members.len() {
            return Err(TontineError::InvalidRoundTopology(format!(
                "total rounds ({}) must equal number of members ({})",
                self.total_rounds,
                self.members.len()
            )));
        }

        let mut positions: Vec<u32> = self.members.iter().map(|m| m.position).collect();
        positions.sort_unstable();
        for (index, position) in positions.iter().enumerate() {
            if *position as usize != index + 1 {
                return Err(TontineError::InvalidRoundTopology(
                    "member positions must be sequential starting from 1".to_string(),
                ));
            }
        }

        let last_round = self.total_rounds.saturating_add(1);
        if self.current_round < 1 || self.current_round > last_round {
            return Err(TontineError::InvalidRoundTopology(format!(
                "current round {} is outside 1..={last_round}",
                self.current_round
            )));
        }
        Ok(())
    }
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use chrono::{Duration, TimeZone};
    use rust_decimal_macros::dec;

    pub(crate) fn sample_tour(members: u32, frequency: Frequency) -> Tour {
        let start = Utc.with_ymd_and_hms(2024, 1, 1, 12, 0, 0).unwrap();
        let roster = (1..=members)
            .map(|p| Member::new(MemberId::new(format!("user-{p}")), format!("user{p}"), p, start))
            .collect();
        Tour::new(
            TourId(1),
            "Savings circle",
            GroupId(1),
            Amount::new(dec!(100)).unwrap(),
            frequency,
            start,
            MemberId::new("user-1"),
            roster,
            start,
        )
        .unwrap()
    }

    #[test]
    fn test_amount_validation() {
        assert!(Amount::new(dec!(1)).is_ok());
        assert!(matches!(
            Amount::new(dec!(0)),
            Err(TontineError::ValidationError(_))
        ));
        assert!(serde_json::from_str::<Amount>("\"-5\"").is_err());
    }

    #[test]
    fn test_new_tour_defaults() {
        let tour = sample_tour(3, Frequency::Weekly);
        assert_eq!(tour.total_rounds, 3);
        assert_eq!(tour.current_round, 1);
        assert_eq!(tour.status, TourStatus::Pending);
        assert_eq!(tour.next_round_date, Some(tour.start_date + Duration::days(7)));
        assert_eq!(tour.total_tour_value(), dec!(300));
        assert!(tour.validate().is_ok());
    }

    #[test]
    fn test_validate_at_round_counter_limit() {
        let mut tour = sample_tour(0, Frequency::Daily);
        tour.total_rounds = u32::MAX;
        tour.current_round = u32::MAX;
        assert!(tour.validate().is_ok());
        assert!(tour.next_beneficiary().is_none());
    }

    #[test]
    #[cfg(target_pointer_width = "64")]
    fn test_round_number_rejects_oversized_roster() {
        assert_eq!(round_number(4).unwrap(), 4);
        assert!(matches!(
            round_number(u32::MAX as usize + 1),
            Err(TontineError::ValidationError(_))
        ));
    }

    #[test]
    fn test_beneficiaries() {
        let mut tour = sample_tour(2, Frequency::Daily);
        assert_eq!(tour.current_beneficiary().unwrap().position, 1);
        assert_eq!(tour.next_beneficiary().unwrap().position, 2);

        tour.current_round = 2;
        assert_eq!(tour.current_beneficiary().unwrap().position, 2);
        assert!(tour.next_beneficiary().is_none());

        tour.current_round = 3;
        assert!(tour.current_beneficiary().is_none());
    }

    #[test]
    fn test_advance_recomputes_from_previous_due_date() {
        let mut tour = sample_tour(3, Frequency::Daily);
        tour.status = TourStatus::Active;
        let previous = tour.next_round_date.unwrap();
        let now = previous + Duration::hours(30);

        let round = tour.advance_to_next_round(now).unwrap();
        assert_eq!(round, 2);
        assert_eq!(tour.next_round_date, Some(previous + Duration::days(1)));
        assert_eq!(tour.status, TourStatus::Active);
    }

    #[test]
    fn test_advance_falls_back_to_start_date() {
        let mut tour = sample_tour(2, Frequency::Weekly);
        tour.next_round_date = None;
        tour.advance_to_next_round(tour.start_date).unwrap();
        assert_eq!(tour.next_round_date, Some(tour.start_date + Duration::days(7)));
    }

    #[test]
    fn test_advance_on_last_round_is_rejected_without_mutation() {
        let mut tour = sample_tour(2, Frequency::Daily);
        tour.status = TourStatus::Active;
        tour.current_round = 2;
        let before = tour.clone();

        let result = tour.advance_to_next_round(Utc::now());
        assert!(matches!(
            result,
            Err(TontineError::NotAdvanceable {
                current_round: 2,
                total_rounds: 2
            })
        ));
        assert_eq!(tour, before);
    }

    #[test]
    fn test_advance_completes_when_everyone_received() {
        let mut tour = sample_tour(2, Frequency::Daily);
        tour.status = TourStatus::Active;
        for member in &mut tour.members {
            member.has_received = true;
        }
        let now = Utc::now();
        tour.advance_to_next_round(now).unwrap();
        assert_eq!(tour.status, TourStatus::Completed);
        assert_eq!(tour.completed_at, Some(now));
    }

    #[test]
    fn test_is_complete_or_semantics() {
        let mut tour = sample_tour(2, Frequency::Daily);
        assert!(!tour.is_complete());

        tour.current_round = 3;
        assert!(tour.is_complete(), "round overflow alone is sufficient");

        tour.current_round = 2;
        tour.members[0].has_received = true;
        assert!(!tour.is_complete());
        tour.members[1].has_received = true;
        assert!(tour.is_complete());
    }

    #[test]
    fn test_mark_current_beneficiary_is_idempotent() {
        let mut tour = sample_tour(2, Frequency::Daily);
        let first = Utc::now();
        assert!(tour.mark_current_beneficiary_received(first));
        assert!(!tour.mark_current_beneficiary_received(first + Duration::hours(1)));
        assert_eq!(tour.members[0].received_date, Some(first));
    }

    #[test]
    fn test_close_final_round() {
        let mut tour = sample_tour(2, Frequency::Daily);
        tour.status = TourStatus::Active;
        assert!(tour.close_final_round(Utc::now()).is_err());

        tour.members[0].has_received = true;
        tour.current_round = 2;
        let now = Utc::now();
        tour.close_final_round(now).unwrap();
        assert!(tour.members[1].has_received);
        assert_eq!(tour.status, TourStatus::Completed);
        assert_eq!(tour.completed_at, Some(now));
    }

    #[test]
    fn test_start_requires_pending_and_two_members() {
        let mut tour = sample_tour(2, Frequency::Weekly);
        tour.start().unwrap();
        assert_eq!(tour.status, TourStatus::Active);
        assert!(matches!(tour.start(), Err(TontineError::ValidationError(_))));

        let mut solo = sample_tour(1, Frequency::Weekly);
        assert!(solo.start().is_err());
        assert_eq!(solo.status, TourStatus::Pending);
    }

    #[test]
    fn test_validate_rejects_gapped_positions() {
        let mut tour = sample_tour(3, Frequency::Weekly);
        tour.members[2].position = 4;
        assert!(matches!(
            tour.validate(),
            Err(TontineError::InvalidRoundTopology(_))
        ));
    }

    #[test]
    fn test_validate_rejects_duplicate_positions_and_round_mismatch() {
        let mut tour = sample_tour(3, Frequency::Weekly);
        tour.members[1].position = 1;
        assert!(matches!(
            tour.validate(),
            Err(TontineError::InvalidRoundTopology(_))
        ));

        let mut tour = sample_tour(3, Frequency::Weekly);
        tour.total_rounds = 4;
        assert!(matches!(
            tour.validate(),
            Err(TontineError::InvalidRoundTopology(_))
        ));

        let mut tour = sample_tour(3, Frequency::Weekly);
        tour.current_round = 5;
        assert!(tour.validate().is_err());
    }

    #[test]
    fn test_due_predicates() {
        let mut tour = sample_tour(2, Frequency::Daily);
        let due = tour.next_round_date.unwrap();
        assert!(!tour.is_due_for_advance(due), "pending tours are never due");

        tour.status = TourStatus::Active;
        assert!(tour.is_due_for_advance(due));
        assert!(!tour.is_due_for_advance(due - Duration::seconds(1)));
        assert!(!tour.is_overdue(due));
        assert!(tour.is_overdue(due + Duration::seconds(1)));

        tour.current_round = 2;
        assert!(!tour.is_due_for_advance(due));
        assert!(tour.is_due_for_completion(due));
    }

    #[test]
    fn test_document_round_trip_uses_camel_case() {
        let tour = sample_tour(2, Frequency::Monthly);
        let json = serde_json::to_value(&tour).unwrap();
        assert_eq!(json["currentRound"], 1);
        assert_eq!(json["totalRounds"], 2);
        assert_eq!(json["status"], "pending");
        assert_eq!(json["members"][0]["hasReceived"], false);

        let back: Tour = serde_json::from_value(json).unwrap();
        assert_eq!(back, tour);
    }
}
