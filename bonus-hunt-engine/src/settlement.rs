//! Settlement resolver: picks the single winning guess of a completed hunt.
//!
//! The winner is the guess closest to the hunt's ending balance. Equal
//! distances go to the earliest submission, and equal submission times to the
//! lower guess id, so the result is reproducible from stored rows alone.

use serde::Serialize;
use sqlx::SqliteConnection;
use tracing::info;

use crate::{
    error::{Error, Result},
    state::{Guess, Hunt},
    store::{guesses, hunts},
};

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Settlement {
    pub hunt_id: i64,
    pub ending_balance: i64,
    pub winner_user_id: Option<String>,
    pub winning_guess: Option<Guess>,
    pub points_awarded: i64,
    pub guess_count: usize,
}

pub fn pick_winner(guesses: &[Guess], ending_balance: i64) -> Option<&Guess> {
    guesses.iter().min_by(|a, b| {
        a.distance_to(ending_balance)
            .cmp(&b.distance_to(ending_balance))
            .then_with(|| a.submitted_at.cmp(&b.submitted_at))
            .then_with(|| a.id.cmp(&b.id))
    })
}

/// Award the hunt's winner points inside the completion transaction. Any points
/// from an earlier settlement of the same hunt are cleared first, so re-running
/// after a correction never leaves two winners.
pub async fn settle_in_tx(conn: &mut SqliteConnection, hunt: &Hunt) -> Result<Settlement> {
    let ending_balance = hunt
        .ending_balance
        .ok_or_else(|| Error::state(format!("hunt {} has no ending balance", hunt.id)))?;

    guesses::clear_points(conn, hunt.id).await?;
    let all = guesses::list_guesses(conn, hunt.id).await?;
    let guess_count = all.len();

    let winner = pick_winner(&all, ending_balance).map(|g| g.id);
    let winning_guess = match winner {
        Some(guess_id) => {
            guesses::award_points(conn, guess_id, hunt.winner_points).await?;
            all.into_iter().find(|g| g.id == guess_id).map(|mut g| {
                g.points_earned = Some(hunt.winner_points);
                g
            })
        }
        None => None,
    };
    let winner_user_id = winning_guess.as_ref().map(|g| g.user_id.clone());
    hunts::set_winner(conn, hunt.id, winner_user_id.as_deref()).await?;

    info!(
        hunt_id = hunt.id,
        ending_balance,
        guess_count,
        winner = ?winner_user_id,
        "hunt settled"
    );

    Ok(Settlement {
        hunt_id: hunt.id,
        ending_balance,
        points_awarded: if winning_guess.is_some() {
            hunt.winner_points
        } else {
            0
        },
        winner_user_id,
        winning_guess,
        guess_count,
    })
}

/// Reconstruct the settlement of a completed hunt from stored rows. Reading it
/// any number of times never changes the winner or the awarded points.
pub async fn load_settlement(conn: &mut SqliteConnection, hunt: &Hunt) -> Result<Settlement> {
    let ending_balance = match (hunt.status.is_complete(), hunt.ending_balance) {
        (true, Some(balance)) => balance,
        _ => {
            return Err(Error::not_found(format!(
                "settlement for hunt {} (not complete)",
                hunt.id
            )))
        }
    };
    let all = guesses::list_guesses(conn, hunt.id).await?;
    let guess_count = all.len();
    let winning_guess = all.into_iter().find(|g| g.points_earned.is_some());

    Ok(Settlement {
        hunt_id: hunt.id,
        ending_balance,
        winner_user_id: hunt.winner_user_id.clone(),
        points_awarded: winning_guess
            .as_ref()
            .and_then(|g| g.points_earned)
            .unwrap_or(0),
        winning_guess,
        guess_count,
    })
}
