use crate::domain::payment::RoundLedger;
use crate::domain::ports::{LedgerStore, TourStore};
use crate::domain::tour::{Tour, TourId};
use crate::error::{Result, TontineError};
use async_trait::async_trait;
use rocksdb::{
    ColumnFamily, ColumnFamilyDescriptor, ErrorKind, IteratorMode, OptimisticTransactionDB,
    Options,
};
use std::path::Path;
use std::sync::Arc;

/// Column Family for tour aggregates, keyed by tour id.
pub const CF_TOURS: &str = "tours";
/// Column Family for round ledgers, keyed by (tour id, round).
pub const CF_LEDGERS: &str = "ledgers";
/// Column Family for counters.
pub const CF_META: &str = "meta";

const LAST_TOUR_ID: &[u8] = b"last_tour_id";
const ID_ALLOCATION_ATTEMPTS: usize = 8;

/// A persistent store implementation using RocksDB.
///
/// Writes go through optimistic transactions: the stored document is read
/// with `get_for_update` and the commit fails if another writer touched the
/// key in between, in this process or any other opening the same database.
///
/// This struct is thread-safe (`Clone` shares the underlying `Arc`).
#[derive(Clone)]
pub struct RocksDBStore {
    db: Arc<OptimisticTransactionDB>,
}

fn is_conflict(error: &rocksdb::Error) -> bool {
    matches!(error.kind(), ErrorKind::Busy | ErrorKind::TryAgain)
}

fn ledger_key(tour_id: TourId, round: u32) -> Vec<u8> {
    let mut key = tour_id.0.to_be_bytes().to_vec();
    key.extend_from_slice(&round.to_be_bytes());
    key
}

impl RocksDBStore {
    /// Opens or creates a RocksDB instance at the specified path, creating the
    /// required column families.
    pub fn open<P: AsRef<Path>>(path: P) -> Result<Self> {
        let mut opts = Options::default();
        opts.create_if_missing(true);
        opts.create_missing_column_families(true);

        let cfs = [CF_TOURS, CF_LEDGERS, CF_META]
            .into_iter()
            .map(|name| ColumnFamilyDescriptor::new(name, Options::default()));
        let db = OptimisticTransactionDB::open_cf_descriptors(&opts, path, cfs)?;

        Ok(Self { db: Arc::new(db) })
    }

    fn cf(&self, name: &str) -> Result<&ColumnFamily> {
        self.db.cf_handle(name).ok_or_else(|| {
            TontineError::InternalError(Box::new(std::io::Error::other(format!(
                "{name} column family not found"
            ))))
        })
    }

    fn commit_tour(&self, tour: &Tour, expected_version: Option<u64>) -> Result<()> {
        let cf = self.cf(CF_TOURS)?;
        let key = tour.id.0.to_be_bytes();
        let txn = self.db.transaction();

        let current = txn.get_for_update_cf(cf, key, true)?;
        match (expected_version, current) {
            (None, Some(_)) => {
                return Err(TontineError::AlreadyExists(format!("tour {}", tour.id)));
            }
            (Some(_), None) => {
                return Err(TontineError::NotFound(format!("tour {}", tour.id)));
            }
            (Some(expected), Some(bytes)) => {
                let stored: Tour = serde_json::from_slice(&bytes)?;
                if stored.version != expected {
                    return Err(TontineError::ConcurrentModification(tour.id));
                }
            }
            (None, None) => {}
        }

        txn.put_cf(cf, key, serde_json::to_vec(tour)?)?;
        match txn.commit() {
            Ok(()) => Ok(()),
            Err(e) if is_conflict(&e) => Err(TontineError::ConcurrentModification(tour.id)),
            Err(e) => Err(e.into()),
        }
    }

    fn commit_ledger(&self, ledger: &RoundLedger, expected_version: Option<u64>) -> Result<()> {
        let cf = self.cf(CF_LEDGERS)?;
        let key = ledger_key(ledger.tour_id, ledger.round);
        let label = || format!("ledger for tour {} round {}", ledger.tour_id, ledger.round);
        let txn = self.db.transaction();

        let current = txn.get_for_update_cf(cf, &key, true)?;
        match (expected_version, current) {
            (None, Some(_)) => return Err(TontineError::AlreadyExists(label())),
            (Some(_), None) => return Err(TontineError::NotFound(label())),
            (Some(expected), Some(bytes)) => {
                let stored: RoundLedger = serde_json::from_slice(&bytes)?;
                if stored.version != expected {
                    return Err(TontineError::ConcurrentModification(ledger.tour_id));
                }
            }
            (None, None) => {}
        }

        txn.put_cf(cf, &key, serde_json::to_vec(ledger)?)?;
        match txn.commit() {
            Ok(()) => Ok(()),
            Err(e) if is_conflict(&e) && expected_version.is_none() => {
                Err(TontineError::AlreadyExists(label()))
            }
            Err(e) if is_conflict(&e) => Err(TontineError::ConcurrentModification(ledger.tour_id)),
            Err(e) => Err(e.into()),
        }
    }

    fn raise_last_id(&self, id: TourId) -> Result<()> {
        let cf = self.cf(CF_META)?;
        for _ in 0..ID_ALLOCATION_ATTEMPTS {
            let txn = self.db.transaction();
            let last = read_counter(txn.get_for_update_cf(cf, LAST_TOUR_ID, true)?);
            if last >= id.0 {
                return Ok(());
            }
            txn.put_cf(cf, LAST_TOUR_ID, id.0.to_be_bytes())?;
            match txn.commit() {
                Ok(()) => return Ok(()),
                Err(e) if is_conflict(&e) => continue,
                Err(e) => return Err(e.into()),
            }
        }
        Err(TontineError::InternalError(Box::new(std::io::Error::other(
            "could not update tour id counter",
        ))))
    }
}

fn read_counter(bytes: Option<Vec<u8>>) -> u64 {
    bytes
        .and_then(|b| <[u8; 8]>::try_from(b.as_slice()).ok())
        .map(u64::from_be_bytes)
        .unwrap_or(0)
}

#[async_trait]
impl TourStore for RocksDBStore {
    async fn next_id(&self) -> Result<TourId> {
        let cf = self.cf(CF_META)?;
        for _ in 0..ID_ALLOCATION_ATTEMPTS {
            let txn = self.db.transaction();
            let next = read_counter(txn.get_for_update_cf(cf, LAST_TOUR_ID, true)?) + 1;
            txn.put_cf(cf, LAST_TOUR_ID, next.to_be_bytes())?;
            match txn.commit() {
                Ok(()) => return Ok(TourId(next)),
                Err(e) if is_conflict(&e) => continue,
                Err(e) => return Err(e.into()),
            }
        }
        Err(TontineError::InternalError(Box::new(std::io::Error::other(
            "could not allocate a tour id",
        ))))
    }

    async fn insert(&self, mut tour: Tour) -> Result<Tour> {
        tour.validate()?;
        tour.version = 1;
        self.commit_tour(&tour, None)?;
        self.raise_last_id(tour.id)?;
        Ok(tour)
    }

    async fn get(&self, tour_id: TourId) -> Result<Option<Tour>> {
        let cf = self.cf(CF_TOURS)?;
        match self.db.get_cf(cf, tour_id.0.to_be_bytes())? {
            Some(bytes) => Ok(Some(serde_json::from_slice(&bytes)?)),
            None => Ok(None),
        }
    }

    async fn compare_and_swap(&self, mut tour: Tour, expected_version: u64) -> Result<Tour> {
        tour.validate()?;
        tour.version = expected_version + 1;
        self.commit_tour(&tour, Some(expected_version))?;
        Ok(tour)
    }

    async fn all_tours(&self) -> Result<Vec<Tour>> {
        let cf = self.cf(CF_TOURS)?;
        let mut tours = Vec::new();
        for item in self.db.iterator_cf(cf, IteratorMode::Start) {
            let (_key, value) = item?;
            tours.push(serde_json::from_slice(&value)?);
        }
        Ok(tours)
    }
}

#[async_trait]
impl LedgerStore for RocksDBStore {
    async fn create(&self, mut ledger: RoundLedger) -> Result<RoundLedger> {
        ledger.version = 1;
        self.commit_ledger(&ledger, None)?;
        Ok(ledger)
    }

    async fn compare_and_swap(
        &self,
        mut ledger: RoundLedger,
        expected_version: u64,
    ) -> Result<RoundLedger> {
        ledger.version = expected_version + 1;
        self.commit_ledger(&ledger, Some(expected_version))?;
        Ok(ledger)
    }

    async fn get(&self, tour_id: TourId, round: u32) -> Result<Option<RoundLedger>> {
        let cf = self.cf(CF_LEDGERS)?;
        match self.db.get_cf(cf, ledger_key(tour_id, round))? {
            Some(bytes) => Ok(Some(serde_json::from_slice(&bytes)?)),
            None => Ok(None),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::payment::RoundSettlement;
    use crate::domain::schedule::Frequency;
    use crate::domain::tour::MemberId;
    use crate::domain::tour::tests::sample_tour;
    use tempfile::tempdir;

    #[tokio::test]
    async fn test_rocksdb_open_cf() {
        let dir = tempdir().unwrap();
        let store = RocksDBStore::open(dir.path()).expect("Failed to open RocksDB");

        assert!(store.db.cf_handle(CF_TOURS).is_some());
        assert!(store.db.cf_handle(CF_LEDGERS).is_some());
        assert!(store.db.cf_handle(CF_META).is_some());
    }

    #[tokio::test]
    async fn test_rocksdb_tour_store() {
        let dir = tempdir().unwrap();
        let store = RocksDBStore::open(dir.path()).unwrap();

        let stored = TourStore::insert(&store, sample_tour(2, Frequency::Weekly))
            .await
            .unwrap();
        assert_eq!(stored.version, 1);
        assert_eq!(TourStore::get(&store, TourId(1)).await.unwrap(), Some(stored.clone()));
        assert!(matches!(
            TourStore::insert(&store, sample_tour(2, Frequency::Weekly)).await,
            Err(TontineError::AlreadyExists(_))
        ));
        assert_eq!(store.next_id().await.unwrap(), TourId(2));
        assert_eq!(store.all_tours().await.unwrap().len(), 1);
    }

    #[tokio::test]
    async fn test_rocksdb_compare_and_swap() {
        let dir = tempdir().unwrap();
        let store = RocksDBStore::open(dir.path()).unwrap();
        let stored = TourStore::insert(&store, sample_tour(3, Frequency::Weekly))
            .await
            .unwrap();

        let mut next = stored.clone();
        next.current_round = 2;
        let updated = store.compare_and_swap(next, 1).await.unwrap();
        assert_eq!(updated.version, 2);

        let result = store.compare_and_swap(stored, 1).await;
        assert!(matches!(
            result,
            Err(TontineError::ConcurrentModification(TourId(1)))
        ));

        let mut broken = updated.clone();
        broken.members[0].position = 9;
        assert!(matches!(
            store.compare_and_swap(broken, 2).await,
            Err(TontineError::InvalidRoundTopology(_))
        ));
    }

    #[tokio::test]
    async fn test_rocksdb_ledger_store() {
        let dir = tempdir().unwrap();
        let store = RocksDBStore::open(dir.path()).unwrap();
        let ledger = RoundLedger::new(TourId(1), 1, MemberId::new("a"), chrono::Utc::now());

        let created = LedgerStore::create(&store, ledger.clone()).await.unwrap();
        assert_eq!(created.version, 1);
        assert!(matches!(
            LedgerStore::create(&store, ledger).await,
            Err(TontineError::AlreadyExists(_))
        ));
        assert_eq!(
            LedgerStore::get(&store, TourId(1), 1).await.unwrap(),
            Some(created.clone())
        );
        assert!(LedgerStore::get(&store, TourId(1), 2).await.unwrap().is_none());

        let mut paying = created.clone();
        paying.status = RoundSettlement::PayingOut;
        let claimed = LedgerStore::compare_and_swap(&store, paying.clone(), 1)
            .await
            .unwrap();
        assert_eq!(claimed.version, 2);
        assert!(matches!(
            LedgerStore::compare_and_swap(&store, paying, 1).await,
            Err(TontineError::ConcurrentModification(TourId(1)))
        ));
    }

    #[tokio::test]
    async fn test_rocksdb_persistence_across_reopen() {
        let dir = tempdir().unwrap();
        {
            let store = RocksDBStore::open(dir.path()).unwrap();
            TourStore::insert(&store, sample_tour(2, Frequency::Daily))
                .await
                .unwrap();
        }
        let reopened = RocksDBStore::open(dir.path()).unwrap();
        let tour = TourStore::get(&reopened, TourId(1)).await.unwrap().unwrap();
        assert_eq!(tour.version, 1);
        assert_eq!(reopened.next_id().await.unwrap(), TourId(2));
    }
}
