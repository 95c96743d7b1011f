#![allow(dead_code)]

use chrono::{DateTime, TimeZone, Utc};
use rust_decimal_macros::dec;
use std::io::Write;
use std::sync::Arc;
use tempfile::NamedTempFile;
use tontine::application::progression::ProgressionEngine;
use tontine::domain::clock::FixedClock;
use tontine::domain::group::GroupId;
use tontine::domain::ports::TourStore;
use tontine::domain::schedule::Frequency;
use tontine::domain::tour::{Amount, Member, MemberId, Tour, TourId};
use tontine::infrastructure::in_memory::{InMemoryGroupDirectory, InMemoryTourStore};

pub const MEMBERS: [&str; 4] = ["alice", "bob", "carol", "dave"];

pub fn start_date() -> DateTime<Utc> {
    Utc.with_ymd_and_hms(2024, 1, 1, 9, 0, 0).unwrap()
}

/// An active tour over the first `size` entries of `MEMBERS`, created by alice.
pub fn active_tour(id: u64, size: usize, frequency: Frequency) -> Tour {
    let start = start_date();
    let roster = MEMBERS
        .iter()
        .take(size)
        .enumerate()
        .map(|(i, name)| Member::new(MemberId::new(*name), *name, i as u32 + 1, start))
        .collect();
    let mut tour = Tour::new(
        TourId(id),
        format!("Circle {id}"),
        GroupId(1),
        Amount::new(dec!(100)).unwrap(),
        frequency,
        start,
        MemberId::new("alice"),
        roster,
        start,
    )
    .unwrap();
    tour.start().unwrap();
    tour
}

/// Engine over an in-memory store preloaded with `tours`, plus the store and
/// clock so tests can inspect and steer them.
pub async fn engine_with(
    tours: Vec<Tour>,
    now: DateTime<Utc>,
) -> (Arc<ProgressionEngine>, InMemoryTourStore, FixedClock) {
    let store = InMemoryTourStore::new();
    for tour in tours {
        store.insert(tour).await.unwrap();
    }
    let clock = FixedClock::new(now);
    let engine = Arc::new(ProgressionEngine::new(
        Box::new(store.clone()),
        Box::new(InMemoryGroupDirectory::new()),
        Arc::new(clock.clone()),
    ));
    (engine, store, clock)
}

/// JSON seed with one four-member weekly tour created by alice.
pub fn seed_document(status: &str, next_round_date: &str) -> String {
    let members: Vec<String> = MEMBERS
        .iter()
        .enumerate()
        .map(|(i, name)| {
            format!(
                r#"{{"memberId": "{name}", "username": "{name}", "position": {}, "joinedAt": "2024-01-01T09:00:00Z"}}"#,
                i + 1
            )
        })
        .collect();
    format!(
        r#"{{
            "groups": [{{"id": 1, "name": "Neighbours", "owner": {{"memberId": "alice", "username": "alice"}}}}],
            "tours": [{{
                "id": 1, "name": "Neighbours circle", "groupId": 1, "amount": 100,
                "frequency": "weekly", "totalRounds": 4, "status": "{status}",
                "startDate": "2024-01-01T09:00:00Z", "nextRoundDate": "{next_round_date}",
                "createdBy": "alice", "createdAt": "2024-01-01T09:00:00Z",
                "members": [{}]
            }}]
        }}"#,
        members.join(", ")
    )
}

pub fn write_seed(document: &str) -> NamedTempFile {
    let mut file = NamedTempFile::new().unwrap();
    write!(file, "{document}").unwrap();
    file
}
