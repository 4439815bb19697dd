use chrono::{DateTime, Utc};
use sqlx::SqliteConnection;

use crate::{
    error::{Error, Result},
    state::Guess,
    store::hunts,
};

/// Insert a guess in a single statement that only matches while the hunt is
/// still open. Uniqueness of (hunt, user) is left to the store's index, so
/// concurrent submissions from one user produce exactly one row.
pub async fn submit_guess(
    conn: &mut SqliteConnection,
    hunt_id: i64,
    user_id: &str,
    amount: i64,
    now: DateTime<Utc>,
) -> Result<Guess> {
    if amount < 0 {
        return Err(Error::validation("guess amount must not be negative"));
    }
    if user_id.trim().is_empty() {
        return Err(Error::Unauthorized);
    }

    let inserted = sqlx::query_as::<_, Guess>(
        r#"
        INSERT INTO guesses (hunt_id, user_id, guess_amount, submitted_at)
        SELECT id, ?, ?, ? FROM hunts WHERE id = ? AND status <> 'complete'
        RETURNING *
        "#,
    )
    .bind(user_id)
    .bind(amount)
    .bind(now)
    .bind(hunt_id)
    .fetch_optional(&mut *conn)
    .await
    .map_err(|err| match Error::from(err) {
        Error::Conflict(_) => Error::already_guessed(),
        other => other,
    })?;

    match inserted {
        Some(guess) => Ok(guess),
        // nothing matched: either no such hunt or it is closed
        None => {
            hunts::fetch_hunt(conn, hunt_id).await?;
            Err(Error::guessing_closed())
        }
    }
}

pub async fn get_guess(
    conn: &mut SqliteConnection,
    hunt_id: i64,
    user_id: &str,
) -> Result<Option<Guess>> {
    Ok(
        sqlx::query_as::<_, Guess>("SELECT * FROM guesses WHERE hunt_id = ? AND user_id = ?")
            .bind(hunt_id)
            .bind(user_id)
            .fetch_optional(&mut *conn)
            .await?,
    )
}

/// All guesses of a hunt, earliest submission first (id breaks timestamp ties).
pub async fn list_guesses(conn: &mut SqliteConnection, hunt_id: i64) -> Result<Vec<Guess>> {
    Ok(sqlx::query_as::<_, Guess>(
        "SELECT * FROM guesses WHERE hunt_id = ? ORDER BY submitted_at, id",
    )
    .bind(hunt_id)
    .fetch_all(&mut *conn)
    .await?)
}

pub async fn clear_points(conn: &mut SqliteConnection, hunt_id: i64) -> Result<()> {
    sqlx::query("UPDATE guesses SET points_earned = NULL WHERE hunt_id = ?")
        .bind(hunt_id)
        .execute(&mut *conn)
        .await?;
    Ok(())
}

pub async fn award_points(conn: &mut SqliteConnection, guess_id: i64, points: i64) -> Result<()> {
    sqlx::query("UPDATE guesses SET points_earned = ? WHERE id = ?")
        .bind(points)
        .bind(guess_id)
        .execute(&mut *conn)
        .await?;
    Ok(())
}
