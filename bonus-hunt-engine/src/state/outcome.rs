use std::collections::HashSet;

use serde::{Deserialize, Serialize};
use sqlx::FromRow;

use crate::{
    constants::{MAX_OUTCOMES_PER_HUNT, MAX_SLOT_NAME_LEN},
    error::{Error, Result},
};

/// A single bonus slot entry within a hunt.
#[derive(Debug, Clone, PartialEq, Serialize, FromRow)]
#[serde(rename_all = "camelCase")]
pub struct Outcome {
    pub id: i64,
    pub hunt_id: i64,
    pub slot_name: String,
    pub provider: String,
    pub bet_amount: Option<i64>,
    pub win_amount: Option<i64>,
    pub multiplier: Option<f64>,
    pub is_played: bool,
    pub sort_order: i64,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct OutcomeSpec {
    pub slot_name: String,
    #[serde(default)]
    pub provider: String,
    #[serde(default)]
    pub bet_amount: Option<i64>,
    pub sort_order: i64,
}

impl OutcomeSpec {
    pub fn validate_batch(specs: &[OutcomeSpec]) -> Result<()> {
        if specs.is_empty() {
            return Err(Error::validation("at least one outcome is required"));
        }
        if specs.len() > MAX_OUTCOMES_PER_HUNT {
            return Err(Error::validation(format!(
                "at most {MAX_OUTCOMES_PER_HUNT} outcomes per hunt"
            )));
        }
        let mut seen = HashSet::with_capacity(specs.len());
        for spec in specs {
            let name = spec.slot_name.trim();
            if name.is_empty() || name.len() > MAX_SLOT_NAME_LEN {
                return Err(Error::validation("slot name must be 1-120 characters"));
            }
            if spec.bet_amount.is_some_and(|bet| bet < 0) {
                return Err(Error::validation("bet amount must not be negative"));
            }
            if !seen.insert(spec.sort_order) {
                return Err(Error::validation(format!(
                    "sort order {} appears more than once",
                    spec.sort_order
                )));
            }
        }
        Ok(())
    }
}
