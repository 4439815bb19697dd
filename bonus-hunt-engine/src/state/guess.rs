use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sqlx::FromRow;

/// A participant's prediction of a hunt's final collected-win total.
/// Only `points_earned` ever changes after insertion.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, FromRow)]
#[serde(rename_all = "camelCase")]
pub struct Guess {
    pub id: i64,
    pub hunt_id: i64,
    pub user_id: String,
    pub guess_amount: i64,
    pub points_earned: Option<i64>,
    pub submitted_at: DateTime<Utc>,
}

impl Guess {
    pub fn distance_to(&self, ending_balance: i64) -> u64 {
        self.guess_amount.abs_diff(ending_balance)
    }
}

#[derive(Debug, Clone, Copy, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct GuessRequest {
    pub amount: i64,
}
