use chrono::{DateTime, Utc};
use sqlx::SqliteConnection;

use crate::{
    error::{Error, Result},
    state::{Hunt, HuntRow, HuntStatus, NewHunt},
};

pub async fn insert_hunt(
    conn: &mut SqliteConnection,
    new: &NewHunt,
    winner_points: i64,
    now: DateTime<Utc>,
) -> Result<Hunt> {
    sqlx::query_as::<_, HuntRow>(
        r#"
        INSERT INTO hunts (title, hunt_date, status, starting_balance, target_balance,
                           currency, winner_points, revision, created_at)
        VALUES (?, ?, 'to_be_played', ?, ?, ?, ?, 1, ?)
        RETURNING *
        "#,
    )
    .bind(new.title.trim())
    .bind(new.hunt_date)
    .bind(new.starting_balance)
    .bind(new.target_balance)
    .bind(new.currency.to_ascii_uppercase())
    .bind(winner_points)
    .bind(now)
    .fetch_one(&mut *conn)
    .await?
    .try_into()
}

pub async fn fetch_hunt(conn: &mut SqliteConnection, hunt_id: i64) -> Result<Hunt> {
    sqlx::query_as::<_, HuntRow>("SELECT * FROM hunts WHERE id = ?")
        .bind(hunt_id)
        .fetch_optional(&mut *conn)
        .await?
        .ok_or_else(|| hunt_not_found(hunt_id))?
        .try_into()
}

/// Take the store write lock for a hunt by bumping its revision, returning the
/// row as of that moment. Every mutating transaction on a hunt or its outcomes
/// starts here, so later reads in the same transaction see a stable snapshot
/// and concurrent writers on the hunt are ordered by commit.
pub async fn lock_hunt(conn: &mut SqliteConnection, hunt_id: i64) -> Result<Hunt> {
    sqlx::query_as::<_, HuntRow>(
        "UPDATE hunts SET revision = revision + 1 WHERE id = ? RETURNING *",
    )
    .bind(hunt_id)
    .fetch_optional(&mut *conn)
    .await?
    .ok_or_else(|| hunt_not_found(hunt_id))?
    .try_into()
}

pub async fn set_status(
    conn: &mut SqliteConnection,
    hunt_id: i64,
    status: HuntStatus,
) -> Result<Hunt> {
    sqlx::query_as::<_, HuntRow>("UPDATE hunts SET status = ? WHERE id = ? RETURNING *")
        .bind(status.as_str())
        .bind(hunt_id)
        .fetch_optional(&mut *conn)
        .await?
        .ok_or_else(|| hunt_not_found(hunt_id))?
        .try_into()
}

pub async fn set_balances(
    conn: &mut SqliteConnection,
    hunt_id: i64,
    starting_balance: Option<i64>,
    target_balance: Option<i64>,
) -> Result<Hunt> {
    sqlx::query_as::<_, HuntRow>(
        "UPDATE hunts SET starting_balance = ?, target_balance = ? WHERE id = ? RETURNING *",
    )
    .bind(starting_balance)
    .bind(target_balance)
    .bind(hunt_id)
    .fetch_optional(&mut *conn)
    .await?
    .ok_or_else(|| hunt_not_found(hunt_id))?
    .try_into()
}

pub struct CompletionFigures {
    pub ending_balance: i64,
    pub highest_win: i64,
    pub highest_multiplier: f64,
}

/// Flip a hunt to `Complete`. Returns `false` if another caller already did;
/// only the caller that performs the flip may settle.
pub async fn mark_complete(
    conn: &mut SqliteConnection,
    hunt_id: i64,
    figures: &CompletionFigures,
    now: DateTime<Utc>,
) -> Result<bool> {
    let result = sqlx::query(
        r#"
        UPDATE hunts
        SET status = 'complete', ending_balance = ?, highest_win = ?,
            highest_multiplier = ?, completed_at = ?
        WHERE id = ? AND status <> 'complete'
        "#,
    )
    .bind(figures.ending_balance)
    .bind(figures.highest_win)
    .bind(figures.highest_multiplier)
    .bind(now)
    .bind(hunt_id)
    .execute(&mut *conn)
    .await?;
    Ok(result.rows_affected() == 1)
}

/// Rewrite the completion figures of an already completed hunt after a
/// corrected win.
pub async fn rewrite_completion(
    conn: &mut SqliteConnection,
    hunt_id: i64,
    figures: &CompletionFigures,
) -> Result<()> {
    let result = sqlx::query(
        r#"
        UPDATE hunts
        SET ending_balance = ?, highest_win = ?, highest_multiplier = ?
        WHERE id = ? AND status = 'complete'
        "#,
    )
    .bind(figures.ending_balance)
    .bind(figures.highest_win)
    .bind(figures.highest_multiplier)
    .bind(hunt_id)
    .execute(&mut *conn)
    .await?;
    if result.rows_affected() != 1 {
        return Err(Error::state(format!("hunt {hunt_id} is not complete")));
    }
    Ok(())
}

pub async fn set_winner(
    conn: &mut SqliteConnection,
    hunt_id: i64,
    winner_user_id: Option<&str>,
) -> Result<()> {
    sqlx::query("UPDATE hunts SET winner_user_id = ? WHERE id = ?")
        .bind(winner_user_id)
        .bind(hunt_id)
        .execute(&mut *conn)
        .await?;
    Ok(())
}

/// Hunts that are not complete but have at least one outcome and no unplayed
/// ones.
pub async fn eligible_for_completion(conn: &mut SqliteConnection) -> Result<Vec<i64>> {
    let ids = sqlx::query_scalar::<_, i64>(
        r#"
        SELECT h.id FROM hunts h
        WHERE h.status <> 'complete'
          AND EXISTS (SELECT 1 FROM outcomes o WHERE o.hunt_id = h.id)
          AND NOT EXISTS (SELECT 1 FROM outcomes o WHERE o.hunt_id = h.id AND o.is_played = 0)
        "#,
    )
    .fetch_all(&mut *conn)
    .await?;
    Ok(ids)
}

fn hunt_not_found(hunt_id: i64) -> Error {
    Error::not_found(format!("hunt {hunt_id}"))
}
