use std::{fmt, str::FromStr};

use chrono::{DateTime, NaiveDate, Utc};
use serde::{Deserialize, Serialize};
use sqlx::FromRow;

use crate::{
    constants::{CURRENCY_CODE_LEN, MAX_TITLE_LEN},
    error::{Error, Result},
};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum HuntStatus {
    ToBePlayed,
    Ongoing,
    Complete,
}

impl HuntStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::ToBePlayed => "to_be_played",
            Self::Ongoing => "ongoing",
            Self::Complete => "complete",
        }
    }

    pub fn accepts_guesses(&self) -> bool {
        !self.is_complete()
    }

    pub fn is_complete(&self) -> bool {
        matches!(self, Self::Complete)
    }
}

impl fmt::Display for HuntStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for HuntStatus {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        match s {
            "to_be_played" => Ok(Self::ToBePlayed),
            "ongoing" => Ok(Self::Ongoing),
            "complete" => Ok(Self::Complete),
            other => Err(Error::Internal(format!("unknown hunt status {other}"))),
        }
    }
}

/// One instance of the bonus-opening prediction game.
///
/// `ending_balance` is present exactly when `status` is `Complete`; the store
/// enforces this with a check constraint.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Hunt {
    pub id: i64,
    pub title: String,
    pub hunt_date: NaiveDate,
    pub status: HuntStatus,
    pub starting_balance: Option<i64>,
    pub target_balance: Option<i64>,
    pub ending_balance: Option<i64>,
    pub currency: String,
    pub winner_points: i64,
    pub winner_user_id: Option<String>,
    pub highest_win: Option<i64>,
    pub highest_multiplier: Option<f64>,
    pub revision: i64,
    pub created_at: DateTime<Utc>,
    pub completed_at: Option<DateTime<Utc>>,
}

#[derive(Debug, FromRow)]
pub(crate) struct HuntRow {
    pub id: i64,
    pub title: String,
    pub hunt_date: NaiveDate,
    pub status: String,
    pub starting_balance: Option<i64>,
    pub target_balance: Option<i64>,
    pub ending_balance: Option<i64>,
    pub currency: String,
    pub winner_points: i64,
    pub winner_user_id: Option<String>,
    pub highest_win: Option<i64>,
    pub highest_multiplier: Option<f64>,
    pub revision: i64,
    pub created_at: DateTime<Utc>,
    pub completed_at: Option<DateTime<Utc>>,
}

impl TryFrom<HuntRow> for Hunt {
    type Error = Error;

    fn try_from(row: HuntRow) -> Result<Self> {
        Ok(Self {
            id: row.id,
            title: row.title,
            hunt_date: row.hunt_date,
            status: row.status.parse()?,
            starting_balance: row.starting_balance,
            target_balance: row.target_balance,
            ending_balance: row.ending_balance,
            currency: row.currency,
            winner_points: row.winner_points,
            winner_user_id: row.winner_user_id,
            highest_win: row.highest_win,
            highest_multiplier: row.highest_multiplier,
            revision: row.revision,
            created_at: row.created_at,
            completed_at: row.completed_at,
        })
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct NewHunt {
    pub title: String,
    pub hunt_date: NaiveDate,
    pub currency: String,
    #[serde(default)]
    pub starting_balance: Option<i64>,
    #[serde(default)]
    pub target_balance: Option<i64>,
    #[serde(default)]
    pub winner_points: Option<i64>,
}

impl NewHunt {
    pub fn validate(&self) -> Result<()> {
        let title = self.title.trim();
        if title.is_empty() {
            return Err(Error::validation("title must not be empty"));
        }
        if title.len() > MAX_TITLE_LEN {
            return Err(Error::validation(format!(
                "title longer than {MAX_TITLE_LEN} characters"
            )));
        }
        if self.currency.len() != CURRENCY_CODE_LEN
            || !self.currency.chars().all(|c| c.is_ascii_alphabetic())
        {
            return Err(Error::validation("currency must be a 3-letter code"));
        }
        validate_balances(self.starting_balance, self.target_balance)?;
        if let Some(points) = self.winner_points {
            if points < 0 {
                return Err(Error::validation("winner points must not be negative"));
            }
        }
        Ok(())
    }
}

pub fn validate_balances(starting: Option<i64>, target: Option<i64>) -> Result<()> {
    if starting.is_some_and(|b| b < 0) || target.is_some_and(|b| b < 0) {
        return Err(Error::validation("balances must not be negative"));
    }
    Ok(())
}

#[derive(Debug, Clone, Copy, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Balances {
    #[serde(default)]
    pub starting_balance: Option<i64>,
    #[serde(default)]
    pub target_balance: Option<i64>,
}
