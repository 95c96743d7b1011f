use clap::{Parser, Subcommand};
use miette::{IntoDiagnostic, Result};
use rust_decimal::Decimal;
use serde::Serialize;
use std::fs::File;
use std::io;
use std::path::PathBuf;
use std::process::ExitCode;
use std::sync::Arc;
use std::time::Duration;
use tontine::application::progression::{ProgressionEngine, RoundState};
use tontine::application::reconciliation::PaymentReconciliation;
use tontine::application::scheduler::SchedulerDriver;
use tontine::config::{AdvancePolicy, ReconciliationConfig, SchedulerConfig};
use tontine::domain::clock::SystemClock;
use tontine::domain::group::GroupId;
use tontine::domain::ports::{LedgerStoreBox, TourStoreBox};
use tontine::domain::tour::{MemberId, TourId};
use tontine::error::TontineError;
use tontine::infrastructure::in_memory::{
    InMemoryGroupDirectory, InMemoryLedgerStore, InMemoryTourStore, SimulatedPaymentProcessor,
};
use tontine::interfaces::csv::round_writer::RoundStateWriter;
use tontine::interfaces::json::responses::{AdvanceResponse, ErrorBody};
use tontine::interfaces::json::seed_reader::SeedReader;
use tracing::{debug, warn};
use tracing_subscriber::EnvFilter;

#[derive(Parser)]
#[command(author, version, about, long_about = None)]
struct Cli {
    /// JSON file with groups and tours to load before running the command
    #[arg(long, env = "TONTINE_SEED")]
    seed: Option<PathBuf>,

    /// Path to persistent database (optional). If provided, uses RocksDB.
    #[arg(long, env = "TONTINE_DB_PATH")]
    db_path: Option<PathBuf>,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Run one progression pass over every active tour
    CheckProgress,
    /// Advance a single tour on behalf of its creator
    Advance {
        #[arg(long)]
        tour: u64,
        /// Member id of the caller
        #[arg(long = "as")]
        requester: String,
    },
    /// Show where a tour stands
    CurrentRound {
        #[arg(long)]
        tour: u64,
        #[arg(long = "as")]
        requester: String,
    },
    /// Show one tour to a member or its creator
    Show {
        #[arg(long)]
        tour: u64,
        #[arg(long = "as")]
        requester: String,
    },
    /// List the tours the caller created or takes part in, newest first
    MyTours {
        #[arg(long = "as")]
        requester: String,
    },
    /// List the tours of a group the caller belongs to, newest first
    GroupTours {
        #[arg(long)]
        group: u64,
        #[arg(long = "as")]
        requester: String,
    },
    /// Activate a pending tour
    Start {
        #[arg(long)]
        tour: u64,
        #[arg(long = "as")]
        requester: String,
    },
    /// Print the round state of every tour as CSV
    Report,
    /// Run the recurring progression scheduler until interrupted
    Run {
        #[arg(long, env = "TONTINE_SCAN_INTERVAL_SECS", default_value_t = 3600)]
        interval_secs: u64,

        #[arg(long, env = "TONTINE_POLICY", value_enum, default_value_t = AdvancePolicy::TimeDriven)]
        policy: AdvancePolicy,

        /// Share of each pot kept by the platform
        #[arg(long, env = "TONTINE_FEE_RATE", default_value = "0.03")]
        fee_rate: Decimal,

        /// Delay before polling charges opened by a settlement-gated pass
        #[arg(long, env = "TONTINE_STATUS_CHECK_DELAY_SECS", default_value_t = 5)]
        status_check_delay_secs: u64,
    },
}

#[cfg(feature = "storage-rocksdb")]
fn open_stores(db_path: Option<PathBuf>) -> Result<(TourStoreBox, LedgerStoreBox)> {
    use tontine::infrastructure::rocksdb::RocksDBStore;

    if let Some(db_path) = db_path {
        let store = RocksDBStore::open(db_path).into_diagnostic()?;
        return Ok((Box::new(store.clone()), Box::new(store)));
    }
    Ok((
        Box::new(InMemoryTourStore::new()),
        Box::new(InMemoryLedgerStore::new()),
    ))
}

#[cfg(not(feature = "storage-rocksdb"))]
fn open_stores(db_path: Option<PathBuf>) -> Result<(TourStoreBox, LedgerStoreBox)> {
    if db_path.is_some() {
        warn!(
            "WARNING: Persistent storage requested via --db-path, but 'storage-rocksdb' feature is not enabled. Falling back to In-Memory storage."
        );
    }
    Ok((
        Box::new(InMemoryTourStore::new()),
        Box::new(InMemoryLedgerStore::new()),
    ))
}

/// Prints the body on success, or the error kind and reason on failure.
fn respond<T: Serialize>(result: tontine::error::Result<T>) -> Result<ExitCode> {
    match result {
        Ok(body) => {
            println!("{}", serde_json::to_string(&body).into_diagnostic()?);
            Ok(ExitCode::SUCCESS)
        }
        Err(e) => {
            println!(
                "{}",
                serde_json::to_string(&ErrorBody::from(&e)).into_diagnostic()?
            );
            Ok(ExitCode::FAILURE)
        }
    }
}

#[tokio::main]
async fn main() -> Result<ExitCode> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .with_writer(io::stderr)
        .init();

    let cli = Cli::parse();
    let (tours, ledgers) = open_stores(cli.db_path)?;
    let groups = InMemoryGroupDirectory::new();

    if let Some(seed_path) = cli.seed {
        let file = File::open(seed_path).into_diagnostic()?;
        let seed = SeedReader::new(file).read().into_diagnostic()?;
        for group in seed.groups {
            groups.add(group).await;
        }
        for tour in seed.tours {
            let tour_id = tour.id;
            match tours.insert(tour).await {
                Ok(_) => {}
                Err(TontineError::AlreadyExists(_)) => {
                    debug!(%tour_id, "Tour already stored, keeping stored copy");
                }
                Err(e) => warn!(%tour_id, kind = e.kind(), "Skipping seeded tour: {e}"),
            }
        }
    }

    let engine = Arc::new(ProgressionEngine::new(
        tours,
        Box::new(groups),
        Arc::new(SystemClock),
    ));

    match cli.command {
        Command::CheckProgress => respond(engine.check_and_advance_tours().await),
        Command::Advance { tour, requester } => {
            match engine
                .advance_tour_round(TourId(tour), &MemberId::new(requester))
                .await
            {
                Ok(advanced) => respond(Ok(AdvanceResponse::new(&advanced))),
                Err(e) => respond::<AdvanceResponse<'_>>(Err(e)),
            }
        }
        Command::CurrentRound { tour, requester } => respond(
            engine
                .round_state(TourId(tour), &MemberId::new(requester))
                .await,
        ),
        Command::Show { tour, requester } => respond(
            engine
                .tour_for(TourId(tour), &MemberId::new(requester))
                .await,
        ),
        Command::MyTours { requester } => {
            respond(engine.tours_for_member(&MemberId::new(requester)).await)
        }
        Command::GroupTours { group, requester } => respond(
            engine
                .tours_for_group(GroupId(group), &MemberId::new(requester))
                .await,
        ),
        Command::Start { tour, requester } => respond(
            engine
                .start_tour(TourId(tour), &MemberId::new(requester))
                .await,
        ),
        Command::Report => {
            let now = engine.now();
            let states: Vec<RoundState> = engine
                .all_tours()
                .await
                .into_diagnostic()?
                .iter()
                .map(|t| RoundState::of(t, now))
                .collect();
            let stdout = io::stdout();
            let mut writer = RoundStateWriter::new(stdout.lock());
            writer.write_states(&states).into_diagnostic()?;
            Ok(ExitCode::SUCCESS)
        }
        Command::Run {
            interval_secs,
            policy,
            fee_rate,
            status_check_delay_secs,
        } => {
            let reconciliation = Arc::new(PaymentReconciliation::new(
                engine.clone(),
                ledgers,
                Box::new(SimulatedPaymentProcessor::default()),
                ReconciliationConfig {
                    platform_fee_rate: fee_rate,
                    status_check_delay: Some(Duration::from_secs(status_check_delay_secs)),
                },
            ));
            let driver = Arc::new(
                SchedulerDriver::new(
                    engine,
                    SchedulerConfig {
                        scan_interval: Duration::from_secs(interval_secs),
                        policy,
                    },
                )
                .with_reconciliation(reconciliation),
            );

            let handle = driver.start();
            tokio::signal::ctrl_c().await.into_diagnostic()?;
            handle.stop().await.into_diagnostic()?;
            Ok(ExitCode::SUCCESS)
        }
    }
}
