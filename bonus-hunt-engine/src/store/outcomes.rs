use sqlx::SqliteConnection;
use tracing::debug;

use crate::{
    error::{Error, Result},
    state::{Hunt, Outcome, OutcomeSpec},
    utils::multiplier_for,
};

/// An outcome write plus the signal the lifecycle controller acts on.
#[derive(Debug, Clone)]
pub struct RecordedWin {
    pub outcome: Outcome,
    /// Unplayed outcomes left in the hunt, read under the same lock as the
    /// write.
    pub remaining: i64,
}

impl RecordedWin {
    pub fn all_played(&self) -> bool {
        self.remaining == 0
    }
}

/// Bulk insert outcomes for a locked hunt. `sort_order` collisions, either
/// inside the batch or against existing rows, are validation errors.
pub async fn create_outcomes(
    conn: &mut SqliteConnection,
    hunt: &Hunt,
    specs: &[OutcomeSpec],
) -> Result<Vec<Outcome>> {
    OutcomeSpec::validate_batch(specs)?;
    if hunt.status.is_complete() {
        return Err(Error::conflict(format!("hunt {} is complete", hunt.id)));
    }

    let mut created = Vec::with_capacity(specs.len());
    for spec in specs {
        let outcome = sqlx::query_as::<_, Outcome>(
            r#"
            INSERT INTO outcomes (hunt_id, slot_name, provider, bet_amount, is_played, sort_order)
            VALUES (?, ?, ?, ?, 0, ?)
            RETURNING *
            "#,
        )
        .bind(hunt.id)
        .bind(spec.slot_name.trim())
        .bind(spec.provider.trim())
        .bind(spec.bet_amount)
        .bind(spec.sort_order)
        .fetch_one(&mut *conn)
        .await
        .map_err(|err| match Error::from(err) {
            Error::Conflict(_) => Error::validation(format!(
                "sort order {} already used in hunt {}",
                spec.sort_order, hunt.id
            )),
            other => other,
        })?;
        created.push(outcome);
    }
    debug!(hunt_id = hunt.id, count = created.len(), "outcomes created");
    Ok(created)
}

pub async fn fetch_outcome(conn: &mut SqliteConnection, outcome_id: i64) -> Result<Outcome> {
    sqlx::query_as::<_, Outcome>("SELECT * FROM outcomes WHERE id = ?")
        .bind(outcome_id)
        .fetch_optional(&mut *conn)
        .await?
        .ok_or_else(|| Error::not_found(format!("outcome {outcome_id}")))
}

pub async fn list_outcomes(conn: &mut SqliteConnection, hunt_id: i64) -> Result<Vec<Outcome>> {
    Ok(
        sqlx::query_as::<_, Outcome>(
            "SELECT * FROM outcomes WHERE hunt_id = ? ORDER BY sort_order",
        )
        .bind(hunt_id)
        .fetch_all(&mut *conn)
        .await?,
    )
}

pub async fn count_unplayed(conn: &mut SqliteConnection, hunt_id: i64) -> Result<i64> {
    Ok(sqlx::query_scalar::<_, i64>(
        "SELECT COUNT(*) FROM outcomes WHERE hunt_id = ? AND is_played = 0",
    )
    .bind(hunt_id)
    .fetch_one(&mut *conn)
    .await?)
}

/// Record a win on an outcome of a locked hunt. Fails with a conflict once the
/// hunt is complete, leaving the outcome untouched.
pub async fn record_win(
    conn: &mut SqliteConnection,
    hunt: &Hunt,
    outcome_id: i64,
    win_amount: i64,
) -> Result<RecordedWin> {
    if win_amount < 0 {
        return Err(Error::validation("win amount must not be negative"));
    }
    if hunt.status.is_complete() {
        return Err(Error::conflict(format!(
            "hunt {} is complete; outcomes can no longer be recorded",
            hunt.id
        )));
    }
    let outcome = write_win(conn, hunt, outcome_id, win_amount).await?;
    let remaining = count_unplayed(conn, hunt.id).await?;
    debug!(hunt_id = hunt.id, outcome_id, win_amount, remaining, "win recorded");
    Ok(RecordedWin { outcome, remaining })
}

/// Overwrite the win of an outcome regardless of hunt status. Used for
/// operator corrections on completed hunts.
pub async fn correct_win(
    conn: &mut SqliteConnection,
    hunt: &Hunt,
    outcome_id: i64,
    win_amount: i64,
) -> Result<Outcome> {
    if win_amount < 0 {
        return Err(Error::validation("win amount must not be negative"));
    }
    write_win(conn, hunt, outcome_id, win_amount).await
}

// win, multiplier and played flag land in one statement
async fn write_win(
    conn: &mut SqliteConnection,
    hunt: &Hunt,
    outcome_id: i64,
    win_amount: i64,
) -> Result<Outcome> {
    let current = fetch_outcome(conn, outcome_id).await?;
    if current.hunt_id != hunt.id {
        return Err(Error::not_found(format!(
            "outcome {outcome_id} in hunt {}",
            hunt.id
        )));
    }
    let multiplier = multiplier_for(current.bet_amount, Some(win_amount));
    Ok(sqlx::query_as::<_, Outcome>(
        r#"
        UPDATE outcomes SET win_amount = ?, multiplier = ?, is_played = 1
        WHERE id = ?
        RETURNING *
        "#,
    )
    .bind(win_amount)
    .bind(multiplier)
    .bind(outcome_id)
    .fetch_one(&mut *conn)
    .await?)
}

/// Enter or change the bet of an outcome while its hunt is still open. The
/// multiplier of an already played outcome follows the new bet.
pub async fn set_bet(
    conn: &mut SqliteConnection,
    hunt: &Hunt,
    outcome_id: i64,
    bet_amount: i64,
) -> Result<Outcome> {
    if bet_amount < 0 {
        return Err(Error::validation("bet amount must not be negative"));
    }
    if hunt.status.is_complete() {
        return Err(Error::conflict(format!("hunt {} is complete", hunt.id)));
    }
    let current = fetch_outcome(conn, outcome_id).await?;
    if current.hunt_id != hunt.id {
        return Err(Error::not_found(format!(
            "outcome {outcome_id} in hunt {}",
            hunt.id
        )));
    }
    let multiplier = multiplier_for(Some(bet_amount), current.win_amount);
    Ok(sqlx::query_as::<_, Outcome>(
        "UPDATE outcomes SET bet_amount = ?, multiplier = ? WHERE id = ? RETURNING *",
    )
    .bind(bet_amount)
    .bind(multiplier)
    .bind(outcome_id)
    .fetch_one(&mut *conn)
    .await?)
}
