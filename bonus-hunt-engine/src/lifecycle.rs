//! Hunt lifecycle controller.
//!
//! Every write follows the same shape: open a transaction, bump the hunt's
//! revision to take the write lock, apply the change, reserve a publish ticket,
//! commit, then publish. Only the work before the commit runs under the store
//! timeout; a commit that has started is awaited, so a caller never sees a
//! timeout for a write that landed. Completion (automatic or manual) happens
//! inside the transaction of the write that triggers it, so a hunt is never
//! observed as `Complete` without its ending balance and settlement.

use std::sync::Arc;

use chrono::{DateTime, Utc};
use futures::Stream;
use serde::Serialize;
use sqlx::{Acquire, SqliteConnection};
use tracing::{debug, error, info};

use crate::{
    broadcast::{Broadcaster, HuntEvent},
    error::{Error, Result},
    metrics::{GUESSES_ACCEPTED, GUESSES_REJECTED, HUNTS_COMPLETED, SETTLEMENTS, WINS_RECORDED},
    settlement::{self, Settlement},
    state::{validate_balances, Balances, Guess, Hunt, HuntStatus, NewHunt, Outcome, OutcomeSpec},
    store::{
        guesses,
        hunts::{self, CompletionFigures},
        outcomes, Store,
    },
    utils::{compute_stats, DerivedStats},
};

/// Full state of a hunt, as served to clients that (re)connect.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct HuntSnapshot {
    pub hunt: Hunt,
    pub outcomes: Vec<Outcome>,
    pub stats: DerivedStats,
}

/// Result of an outcome write: the committed row and the stats after it.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct OutcomeChange {
    pub outcome: Outcome,
    pub stats: DerivedStats,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct WinRecorded {
    pub outcome: Outcome,
    pub stats: DerivedStats,
    pub completed: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub settlement: Option<Settlement>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct CorrectionApplied {
    pub outcome: Outcome,
    pub stats: DerivedStats,
    pub settlement: Settlement,
}

#[derive(Debug, Clone, Copy)]
enum Trigger {
    Auto,
    Manual,
    Reconcile,
}

impl Trigger {
    fn as_str(&self) -> &'static str {
        match self {
            Self::Auto => "auto",
            Self::Manual => "manual",
            Self::Reconcile => "reconcile",
        }
    }
}

struct Completion {
    hunt: Hunt,
    stats: DerivedStats,
    settlement: Settlement,
}

#[derive(Clone)]
pub struct HuntController {
    store: Store,
    broadcaster: Arc<Broadcaster>,
    default_winner_points: i64,
}

impl HuntController {
    pub fn new(store: Store, broadcaster: Arc<Broadcaster>, default_winner_points: i64) -> Self {
        Self {
            store,
            broadcaster,
            default_winner_points,
        }
    }

    pub fn store(&self) -> &Store {
        &self.store
    }

    pub async fn create_hunt(&self, new: NewHunt) -> Result<Hunt> {
        new.validate()?;
        let winner_points = new.winner_points.unwrap_or(self.default_winner_points);
        let (tx, ticket, hunt) = self
            .store
            .timed(async {
                let mut tx = self.store.begin().await?;
                let hunt = hunts::insert_hunt(&mut tx, &new, winner_points, Utc::now()).await?;
                let ticket = self.broadcaster.reserve(hunt.id);
                Ok((tx, ticket, hunt))
            })
            .await?;
        tx.commit().await?;
        ticket.publish(vec![HuntEvent::hunt_updated(&hunt, DerivedStats::default())]);
        info!(hunt_id = hunt.id, title = %hunt.title, "hunt created");
        Ok(hunt)
    }

    /// Operator action moving a hunt from `ToBePlayed` to `Ongoing`.
    pub async fn start_hunt(&self, hunt_id: i64) -> Result<Hunt> {
        let (tx, ticket, hunt, stats) = self
            .store
            .timed(async {
                let mut tx = self.store.begin().await?;
                let hunt = hunts::lock_hunt(&mut tx, hunt_id).await?;
                if hunt.status != HuntStatus::ToBePlayed {
                    return Err(Error::state(format!(
                        "hunt {hunt_id} is {} and cannot be started",
                        hunt.status
                    )));
                }
                let hunt = hunts::set_status(&mut tx, hunt_id, HuntStatus::Ongoing).await?;
                let stats = current_stats(&mut tx, &hunt).await?;
                let ticket = self.broadcaster.reserve(hunt_id);
                Ok((tx, ticket, hunt, stats))
            })
            .await?;
        tx.commit().await?;
        ticket.publish(vec![HuntEvent::hunt_updated(&hunt, stats)]);
        info!(hunt_id, revision = hunt.revision, "hunt started");
        Ok(hunt)
    }

    pub async fn set_balances(&self, hunt_id: i64, balances: Balances) -> Result<Hunt> {
        validate_balances(balances.starting_balance, balances.target_balance)?;
        let (tx, ticket, hunt, stats) = self
            .store
            .timed(async {
                let mut tx = self.store.begin().await?;
                let hunt = hunts::lock_hunt(&mut tx, hunt_id).await?;
                if hunt.status.is_complete() {
                    return Err(Error::state(format!(
                        "hunt {hunt_id} is complete; balances are final"
                    )));
                }
                let hunt = hunts::set_balances(
                    &mut tx,
                    hunt_id,
                    balances.starting_balance,
                    balances.target_balance,
                )
                .await?;
                let stats = current_stats(&mut tx, &hunt).await?;
                let ticket = self.broadcaster.reserve(hunt_id);
                Ok((tx, ticket, hunt, stats))
            })
            .await?;
        tx.commit().await?;
        ticket.publish(vec![HuntEvent::hunt_updated(&hunt, stats)]);
        debug!(hunt_id, revision = hunt.revision, "balances updated");
        Ok(hunt)
    }

    pub async fn create_outcomes(&self, hunt_id: i64, specs: &[OutcomeSpec]) -> Result<Vec<Outcome>> {
        let (tx, ticket, hunt, created, stats) = self
            .store
            .timed(async {
                let mut tx = self.store.begin().await?;
                let hunt = hunts::lock_hunt(&mut tx, hunt_id).await?;
                let created = outcomes::create_outcomes(&mut tx, &hunt, specs).await?;
                let stats = current_stats(&mut tx, &hunt).await?;
                let ticket = self.broadcaster.reserve(hunt_id);
                Ok((tx, ticket, hunt, created, stats))
            })
            .await?;
        tx.commit().await?;

        let mut events: Vec<HuntEvent> = created
            .iter()
            .map(|outcome| HuntEvent::outcome_updated(&hunt, outcome))
            .collect();
        events.push(HuntEvent::hunt_updated(&hunt, stats));
        ticket.publish(events);
        info!(hunt_id, count = created.len(), "outcomes configured");
        Ok(created)
    }

    pub async fn set_bet(&self, hunt_id: i64, outcome_id: i64, bet_amount: i64) -> Result<OutcomeChange> {
        let (tx, ticket, hunt, outcome, stats) = self
            .store
            .timed(async {
                let mut tx = self.store.begin().await?;
                let hunt = hunts::lock_hunt(&mut tx, hunt_id).await?;
                let outcome = outcomes::set_bet(&mut tx, &hunt, outcome_id, bet_amount).await?;
                let stats = current_stats(&mut tx, &hunt).await?;
                let ticket = self.broadcaster.reserve(hunt_id);
                Ok((tx, ticket, hunt, outcome, stats))
            })
            .await?;
        tx.commit().await?;
        ticket.publish(vec![
            HuntEvent::outcome_updated(&hunt, &outcome),
            HuntEvent::hunt_updated(&hunt, stats),
        ]);
        debug!(hunt_id, outcome_id, bet_amount, "bet entered");
        Ok(OutcomeChange { outcome, stats })
    }

    /// Record the win of one outcome. When this was the last unplayed outcome
    /// the hunt completes and settles in the same transaction. A failure of
    /// that completion step is logged and rolled back on its own; the win
    /// still commits and the reconciler retries the completion later.
    pub async fn record_win(&self, hunt_id: i64, outcome_id: i64, win_amount: i64) -> Result<WinRecorded> {
        let (tx, ticket, hunt, recorded, completion, stats) = self
            .store
            .timed(async {
                let mut tx = self.store.begin().await?;
                let mut hunt = hunts::lock_hunt(&mut tx, hunt_id).await?;
                let recorded = outcomes::record_win(&mut tx, &hunt, outcome_id, win_amount).await?;
                if hunt.status == HuntStatus::ToBePlayed {
                    hunt = hunts::set_status(&mut tx, hunt_id, HuntStatus::Ongoing).await?;
                    info!(hunt_id, "first outcome recorded, hunt is ongoing");
                }

                let completion = if recorded.all_played() {
                    attempt_completion(&mut tx, &hunt, Trigger::Auto).await
                } else {
                    None
                };

                let ticket = self.broadcaster.reserve(hunt_id);
                let stats = match &completion {
                    Some(completion) => completion.stats,
                    None => current_stats(&mut tx, &hunt).await?,
                };
                Ok((tx, ticket, hunt, recorded, completion, stats))
            })
            .await?;
        tx.commit().await?;

        let mut events = vec![HuntEvent::outcome_updated(&hunt, &recorded.outcome)];
        match &completion {
            Some(completion) => {
                events.push(HuntEvent::hunt_updated(&completion.hunt, completion.stats));
                events.push(HuntEvent::settled(&completion.hunt, &completion.settlement));
            }
            None => events.push(HuntEvent::hunt_updated(&hunt, stats)),
        }
        ticket.publish(events);

        let recorded = WinRecorded {
            outcome: recorded.outcome,
            stats,
            completed: completion.is_some(),
            settlement: completion.map(|c| c.settlement),
        };
        WINS_RECORDED.inc();
        if let Some(settlement) = &recorded.settlement {
            record_completion(Trigger::Auto, settlement);
        }
        Ok(recorded)
    }

    /// Manual operator override. Uses `ending_balance` when given, otherwise
    /// the collected-win total of the played outcomes. Completing a hunt that
    /// is already complete is a conflict and never settles twice.
    pub async fn complete_hunt(&self, hunt_id: i64, ending_balance: Option<i64>) -> Result<Settlement> {
        if ending_balance.is_some_and(|balance| balance < 0) {
            return Err(Error::validation("ending balance must not be negative"));
        }
        let (tx, ticket, completion) = self
            .store
            .timed(async {
                let mut tx = self.store.begin().await?;
                let hunt = hunts::lock_hunt(&mut tx, hunt_id).await?;
                if hunt.status.is_complete() {
                    return Err(Error::conflict(format!("hunt {hunt_id} is already settled")));
                }
                let Some(completion) =
                    complete_locked(&mut tx, &hunt, ending_balance, Utc::now()).await?
                else {
                    return Err(Error::conflict(format!("hunt {hunt_id} is already settled")));
                };
                let ticket = self.broadcaster.reserve(hunt_id);
                Ok((tx, ticket, completion))
            })
            .await?;
        tx.commit().await?;
        ticket.publish(vec![
            HuntEvent::hunt_updated(&completion.hunt, completion.stats),
            HuntEvent::settled(&completion.hunt, &completion.settlement),
        ]);
        record_completion(Trigger::Manual, &completion.settlement);
        Ok(completion.settlement)
    }

    /// Complete the hunt if every outcome is played and it is not complete
    /// yet. Safe to call any number of times from any number of callers;
    /// returns the settlement only to the caller that performed completion.
    pub async fn complete_if_eligible(&self, hunt_id: i64) -> Result<Option<Settlement>> {
        let locked = self
            .store
            .timed(async {
                let mut tx = self.store.begin().await?;
                let hunt = hunts::lock_hunt(&mut tx, hunt_id).await?;
                if hunt.status.is_complete() {
                    tx.rollback().await?;
                    return Ok(None);
                }
                let total = outcomes::list_outcomes(&mut tx, hunt_id).await?.len();
                let remaining = outcomes::count_unplayed(&mut tx, hunt_id).await?;
                if total == 0 || remaining > 0 {
                    tx.rollback().await?;
                    return Ok(None);
                }
                let Some(completion) = complete_locked(&mut tx, &hunt, None, Utc::now()).await?
                else {
                    tx.rollback().await?;
                    return Ok(None);
                };
                let ticket = self.broadcaster.reserve(hunt_id);
                Ok(Some((tx, ticket, completion)))
            })
            .await?;
        let Some((tx, ticket, completion)) = locked else {
            return Ok(None);
        };
        tx.commit().await?;
        ticket.publish(vec![
            HuntEvent::hunt_updated(&completion.hunt, completion.stats),
            HuntEvent::settled(&completion.hunt, &completion.settlement),
        ]);
        record_completion(Trigger::Reconcile, &completion.settlement);
        Ok(Some(completion.settlement))
    }

    /// Sweep every hunt whose outcomes are all played but which is not
    /// complete, completing each one. Returns how many were completed.
    pub async fn reconcile(&self) -> Result<usize> {
        let eligible = self
            .store
            .timed(async {
                let mut conn = self.store.pool().acquire().await?;
                hunts::eligible_for_completion(&mut conn).await
            })
            .await?;

        let mut completed = 0;
        for hunt_id in eligible {
            match self.complete_if_eligible(hunt_id).await {
                Ok(Some(_)) => completed += 1,
                Ok(None) => {}
                Err(err) => error!(hunt_id, %err, "reconcile completion failed"),
            }
        }
        if completed > 0 {
            info!(completed, "reconciled hunts");
        }
        Ok(completed)
    }

    /// Operator correction of a win on a completed hunt. The ending balance
    /// is re-derived from the corrected outcomes and settlement runs again,
    /// replacing the previous winner.
    pub async fn correct_win(
        &self,
        hunt_id: i64,
        outcome_id: i64,
        win_amount: i64,
    ) -> Result<CorrectionApplied> {
        let (tx, ticket, hunt, outcome, stats, settlement) = self
            .store
            .timed(async {
                let mut tx = self.store.begin().await?;
                let hunt = hunts::lock_hunt(&mut tx, hunt_id).await?;
                if !hunt.status.is_complete() {
                    return Err(Error::state(format!(
                        "hunt {hunt_id} is not complete; record the win instead"
                    )));
                }
                let outcome = outcomes::correct_win(&mut tx, &hunt, outcome_id, win_amount).await?;
                let all = outcomes::list_outcomes(&mut tx, hunt_id).await?;
                let stats = compute_stats(&all, hunt.starting_balance);
                hunts::rewrite_completion(&mut tx, hunt_id, &figures_from(&stats, None)).await?;
                let mut hunt = hunts::fetch_hunt(&mut tx, hunt_id).await?;
                let settlement = settlement::settle_in_tx(&mut tx, &hunt).await?;
                hunt.winner_user_id = settlement.winner_user_id.clone();

                let ticket = self.broadcaster.reserve(hunt_id);
                Ok((tx, ticket, hunt, outcome, stats, settlement))
            })
            .await?;
        tx.commit().await?;
        ticket.publish(vec![
            HuntEvent::outcome_updated(&hunt, &outcome),
            HuntEvent::hunt_updated(&hunt, stats),
            HuntEvent::settled(&hunt, &settlement),
        ]);
        info!(
            hunt_id,
            outcome_id,
            win_amount,
            winner = ?settlement.winner_user_id,
            "win corrected, hunt re-settled"
        );
        SETTLEMENTS.with_label_values(&["resettled"]).inc();
        Ok(CorrectionApplied {
            outcome,
            stats,
            settlement,
        })
    }

    /// Settlement of a completed hunt. Reading it never changes the winner or
    /// awards points again.
    pub async fn settle(&self, hunt_id: i64) -> Result<Settlement> {
        self.store
            .timed(async {
                let mut tx = self.store.begin().await?;
                let hunt = hunts::fetch_hunt(&mut tx, hunt_id).await?;
                let settlement = settlement::load_settlement(&mut tx, &hunt).await?;
                tx.commit().await?;
                Ok(settlement)
            })
            .await
    }

    pub async fn submit_guess(&self, hunt_id: i64, user_id: &str, amount: i64) -> Result<Guess> {
        let result = self
            .store
            .timed(async {
                let mut conn = self.store.pool().acquire().await?;
                guesses::submit_guess(&mut conn, hunt_id, user_id, amount, Utc::now()).await
            })
            .await;
        match &result {
            Ok(guess) => {
                GUESSES_ACCEPTED.inc();
                info!(hunt_id, user_id, guess_id = guess.id, "guess accepted");
            }
            Err(err) => {
                GUESSES_REJECTED.with_label_values(&[err.kind()]).inc();
                debug!(hunt_id, user_id, %err, "guess rejected");
            }
        }
        result
    }

    /// The user's guess in this hunt if it carries `amount` and was submitted
    /// at or after `since`. Lets a retried submission whose first attempt
    /// timed out after the insert landed report that insert as its result.
    pub async fn guess_accepted_since(
        &self,
        hunt_id: i64,
        user_id: &str,
        amount: i64,
        since: DateTime<Utc>,
    ) -> Result<Option<Guess>> {
        let guess = self
            .store
            .timed(async {
                let mut conn = self.store.pool().acquire().await?;
                guesses::get_guess(&mut conn, hunt_id, user_id).await
            })
            .await?;
        Ok(guess.filter(|guess| guess.guess_amount == amount && guess.submitted_at >= since))
    }

    pub async fn get_guess(&self, hunt_id: i64, user_id: &str) -> Result<Guess> {
        self.store
            .timed(async {
                let mut conn = self.store.pool().acquire().await?;
                guesses::get_guess(&mut conn, hunt_id, user_id)
                    .await?
                    .ok_or_else(|| Error::not_found(format!("guess of {user_id} in hunt {hunt_id}")))
            })
            .await
    }

    pub async fn list_guesses(&self, hunt_id: i64) -> Result<Vec<Guess>> {
        self.store
            .timed(async {
                let mut tx = self.store.begin().await?;
                hunts::fetch_hunt(&mut tx, hunt_id).await?;
                let all = guesses::list_guesses(&mut tx, hunt_id).await?;
                tx.commit().await?;
                Ok(all)
            })
            .await
    }

    pub async fn stats(&self, hunt_id: i64) -> Result<DerivedStats> {
        Ok(self.snapshot(hunt_id).await?.stats)
    }

    pub async fn snapshot(&self, hunt_id: i64) -> Result<HuntSnapshot> {
        self.store
            .timed(async {
                let mut tx = self.store.begin().await?;
                let hunt = hunts::fetch_hunt(&mut tx, hunt_id).await?;
                let outcomes = outcomes::list_outcomes(&mut tx, hunt_id).await?;
                tx.commit().await?;
                let stats = compute_stats(&outcomes, hunt.starting_balance);
                Ok(HuntSnapshot {
                    hunt,
                    outcomes,
                    stats,
                })
            })
            .await
    }

    pub fn subscribe(&self, hunt_id: i64) -> impl Stream<Item = HuntEvent> + Send + 'static {
        self.broadcaster.subscribe_stream(hunt_id)
    }

    pub fn broadcaster(&self) -> &Arc<Broadcaster> {
        &self.broadcaster
    }
}

async fn current_stats(conn: &mut SqliteConnection, hunt: &Hunt) -> Result<DerivedStats> {
    let all = outcomes::list_outcomes(conn, hunt.id).await?;
    Ok(compute_stats(&all, hunt.starting_balance))
}

fn figures_from(stats: &DerivedStats, ending_balance: Option<i64>) -> CompletionFigures {
    CompletionFigures {
        ending_balance: ending_balance.unwrap_or(stats.ending_balance_so_far),
        highest_win: stats.highest_win,
        highest_multiplier: stats.highest_multiplier,
    }
}

/// Flip the locked hunt to `Complete`, write its final figures and settle.
/// Returns `None` when the hunt was already complete, in which case nothing
/// was written.
async fn complete_locked(
    conn: &mut SqliteConnection,
    hunt: &Hunt,
    ending_balance: Option<i64>,
    now: DateTime<Utc>,
) -> Result<Option<Completion>> {
    let all = outcomes::list_outcomes(conn, hunt.id).await?;
    let stats = compute_stats(&all, hunt.starting_balance);
    if !hunts::mark_complete(conn, hunt.id, &figures_from(&stats, ending_balance), now).await? {
        return Ok(None);
    }
    let mut hunt = hunts::fetch_hunt(conn, hunt.id).await?;
    let settlement = settlement::settle_in_tx(conn, &hunt).await?;
    hunt.winner_user_id = settlement.winner_user_id.clone();
    info!(
        hunt_id = hunt.id,
        ending_balance = settlement.ending_balance,
        revision = hunt.revision,
        "hunt complete"
    );
    Ok(Some(Completion {
        hunt,
        stats,
        settlement,
    }))
}

/// Run completion inside a savepoint so a failure undoes only the completion
/// and leaves the surrounding write intact.
async fn attempt_completion(
    conn: &mut SqliteConnection,
    hunt: &Hunt,
    trigger: Trigger,
) -> Option<Completion> {
    let attempt = async {
        let mut savepoint = Acquire::begin(&mut *conn).await?;
        let completion = complete_locked(&mut savepoint, hunt, None, Utc::now()).await?;
        savepoint.commit().await?;
        Ok::<_, Error>(completion)
    };
    match attempt.await {
        Ok(completion) => completion,
        Err(err) => {
            error!(
                hunt_id = hunt.id,
                trigger = trigger.as_str(),
                %err,
                "completion failed, left for reconcile"
            );
            None
        }
    }
}

fn record_completion(trigger: Trigger, settlement: &Settlement) {
    HUNTS_COMPLETED.with_label_values(&[trigger.as_str()]).inc();
    let outcome = if settlement.winner_user_id.is_some() {
        "winner"
    } else {
        "no_guesses"
    };
    SETTLEMENTS.with_label_values(&[outcome]).inc();
}
