#![allow(dead_code)]

use std::{fs, path::PathBuf, time::Duration};

use bonus_hunt_engine::{
    broadcast::Broadcaster,
    lifecycle::HuntController,
    state::{Balances, Hunt, NewHunt, Outcome, OutcomeSpec},
    store::Store,
};
use chrono::NaiveDate;

pub const TEST_WINNER_POINTS: i64 = 1_000;
pub const TEST_STARTING_BALANCE: i64 = 1_000;
pub const TEST_STORE_TIMEOUT: Duration = Duration::from_secs(5);
pub const TEST_BROADCAST_CAPACITY: usize = 64;
pub const TEST_SHARED_CONNECTIONS: u32 = 8;

pub async fn setup() -> HuntController {
    let store = Store::connect("sqlite::memory:", 1, TEST_STORE_TIMEOUT)
        .await
        .unwrap();
    HuntController::new(
        store,
        Broadcaster::new(TEST_BROADCAST_CAPACITY),
        TEST_WINNER_POINTS,
    )
}

/// Sqlite file removed, with its WAL side files, when dropped.
pub struct TempDatabase {
    path: PathBuf,
}

impl TempDatabase {
    fn new() -> Self {
        let name = format!("bonus-hunt-{}-{:016x}.db", std::process::id(), rand::random::<u64>());
        Self {
            path: std::env::temp_dir().join(name),
        }
    }

    fn url(&self) -> String {
        format!("sqlite://{}", self.path.display())
    }
}

impl Drop for TempDatabase {
    fn drop(&mut self) {
        for suffix in ["", "-wal", "-shm"] {
            let _ = fs::remove_file(format!("{}{suffix}", self.path.display()));
        }
    }
}

/// A controller over a file database in WAL mode with a multi-connection
/// pool, so concurrent callers really hold separate connections.
pub async fn setup_shared() -> (HuntController, TempDatabase) {
    let database = TempDatabase::new();
    let store = Store::connect(&database.url(), TEST_SHARED_CONNECTIONS, TEST_STORE_TIMEOUT)
        .await
        .unwrap();
    let controller = HuntController::new(
        store,
        Broadcaster::new(TEST_BROADCAST_CAPACITY),
        TEST_WINNER_POINTS,
    );
    (controller, database)
}

pub fn new_hunt(title: &str) -> NewHunt {
    NewHunt {
        title: title.to_string(),
        hunt_date: NaiveDate::from_ymd_opt(2024, 5, 1).unwrap(),
        currency: "eur".to_string(),
        starting_balance: None,
        target_balance: None,
        winner_points: None,
    }
}

pub fn outcome_spec(sort_order: i64, bet_amount: Option<i64>) -> OutcomeSpec {
    OutcomeSpec {
        slot_name: format!("Slot {sort_order}"),
        provider: "Pragmatic Play".to_string(),
        bet_amount,
        sort_order,
    }
}

/// A hunt with a starting balance of 1000 and one outcome per bet, in order.
pub async fn hunt_with_outcomes(
    controller: &HuntController,
    bets: &[Option<i64>],
) -> (Hunt, Vec<Outcome>) {
    let hunt = controller.create_hunt(new_hunt("Friday hunt")).await.unwrap();
    let hunt = controller
        .set_balances(
            hunt.id,
            Balances {
                starting_balance: Some(TEST_STARTING_BALANCE),
                target_balance: None,
            },
        )
        .await
        .unwrap();
    let specs: Vec<OutcomeSpec> = bets
        .iter()
        .enumerate()
        .map(|(i, bet)| outcome_spec(i as i64 + 1, *bet))
        .collect();
    let outcomes = controller.create_outcomes(hunt.id, &specs).await.unwrap();
    (hunt, outcomes)
}
