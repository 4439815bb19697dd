use std::sync::atomic::{AtomicBool, Ordering};

use chrono::Utc;
use futures::{future, stream, StreamExt};
use serde::{Deserialize, Serialize};
use tracing::debug;
use warp::{
    http::StatusCode,
    reply::{Reply, Response},
    sse::Event,
    Rejection,
};

use crate::{
    api::{reject, ApiContext, Identity},
    error::Error,
    state::{Balances, GuessRequest, NewHunt, OutcomeSpec},
};

#[derive(Debug, Clone, Copy, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct WinRequest {
    pub win_amount: i64,
}

#[derive(Debug, Clone, Copy, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BetRequest {
    pub bet_amount: i64,
}

#[derive(Debug, Clone, Copy, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CompleteRequest {
    #[serde(default)]
    pub ending_balance: Option<i64>,
}

fn ok<T: Serialize>(value: &T) -> Response {
    warp::reply::json(value).into_response()
}

fn created<T: Serialize>(value: &T) -> Response {
    warp::reply::with_status(warp::reply::json(value), StatusCode::CREATED).into_response()
}

pub async fn create_hunt(
    _operator: Identity,
    body: NewHunt,
    ctx: ApiContext,
) -> Result<Response, Rejection> {
    let controller = &ctx.controller;
    let hunt = ctx
        .retry
        .run("create_hunt", move || controller.create_hunt(body.clone()))
        .await
        .map_err(reject)?;
    Ok(created(&hunt))
}

pub async fn get_hunt(hunt_id: i64, ctx: ApiContext) -> Result<Response, Rejection> {
    let controller = &ctx.controller;
    let snapshot = ctx
        .retry
        .run("snapshot", move || controller.snapshot(hunt_id))
        .await
        .map_err(reject)?;
    Ok(ok(&snapshot))
}

pub async fn start_hunt(
    hunt_id: i64,
    _operator: Identity,
    ctx: ApiContext,
) -> Result<Response, Rejection> {
    let controller = &ctx.controller;
    let hunt = ctx
        .retry
        .run("start_hunt", move || controller.start_hunt(hunt_id))
        .await
        .map_err(reject)?;
    Ok(ok(&hunt))
}

pub async fn set_balances(
    hunt_id: i64,
    _operator: Identity,
    body: Balances,
    ctx: ApiContext,
) -> Result<Response, Rejection> {
    let controller = &ctx.controller;
    let hunt = ctx
        .retry
        .run("set_balances", move || controller.set_balances(hunt_id, body))
        .await
        .map_err(reject)?;
    Ok(ok(&hunt))
}

pub async fn create_outcomes(
    hunt_id: i64,
    _operator: Identity,
    body: Vec<OutcomeSpec>,
    ctx: ApiContext,
) -> Result<Response, Rejection> {
    let controller = &ctx.controller;
    let specs = body.as_slice();
    let outcomes = ctx
        .retry
        .run("create_outcomes", move || controller.create_outcomes(hunt_id, specs))
        .await
        .map_err(reject)?;
    Ok(created(&outcomes))
}

pub async fn set_bet(
    hunt_id: i64,
    outcome_id: i64,
    _operator: Identity,
    body: BetRequest,
    ctx: ApiContext,
) -> Result<Response, Rejection> {
    let controller = &ctx.controller;
    let change = ctx
        .retry
        .run("set_bet", move || {
            controller.set_bet(hunt_id, outcome_id, body.bet_amount)
        })
        .await
        .map_err(reject)?;
    Ok(ok(&change))
}

pub async fn record_win(
    hunt_id: i64,
    outcome_id: i64,
    operator: Identity,
    body: WinRequest,
    ctx: ApiContext,
) -> Result<Response, Rejection> {
    debug!(hunt_id, outcome_id, operator = ?operator.user_id, "record win");
    let controller = &ctx.controller;
    let recorded = ctx
        .retry
        .run("record_win", move || {
            controller.record_win(hunt_id, outcome_id, body.win_amount)
        })
        .await
        .map_err(reject)?;
    Ok(ok(&recorded))
}

pub async fn correct_win(
    hunt_id: i64,
    outcome_id: i64,
    operator: Identity,
    body: WinRequest,
    ctx: ApiContext,
) -> Result<Response, Rejection> {
    debug!(hunt_id, outcome_id, operator = ?operator.user_id, "correct win");
    let controller = &ctx.controller;
    let applied = ctx
        .retry
        .run("correct_win", move || {
            controller.correct_win(hunt_id, outcome_id, body.win_amount)
        })
        .await
        .map_err(reject)?;
    Ok(ok(&applied))
}

pub async fn complete_hunt(
    hunt_id: i64,
    _operator: Identity,
    body: CompleteRequest,
    ctx: ApiContext,
) -> Result<Response, Rejection> {
    let controller = &ctx.controller;
    let settlement = ctx
        .retry
        .run("complete_hunt", move || {
            controller.complete_hunt(hunt_id, body.ending_balance)
        })
        .await
        .map_err(reject)?;
    Ok(ok(&settlement))
}

pub async fn submit_guess(
    hunt_id: i64,
    user_id: String,
    body: GuessRequest,
    ctx: ApiContext,
) -> Result<Response, Rejection> {
    let controller = &ctx.controller;
    let user_id = user_id.as_str();
    let started = Utc::now();
    let timed_out = &AtomicBool::new(false);
    let result = ctx
        .retry
        .run("submit_guess", move || async move {
            let result = controller.submit_guess(hunt_id, user_id, body.amount).await;
            if matches!(result, Err(Error::Transient(_))) {
                timed_out.store(true, Ordering::Relaxed);
            }
            result
        })
        .await;
    let guess = match result {
        // an earlier attempt may have inserted before its timeout fired
        Err(err @ Error::Conflict(_)) if timed_out.load(Ordering::Relaxed) => controller
            .guess_accepted_since(hunt_id, user_id, body.amount, started)
            .await
            .map_err(reject)?
            .ok_or_else(|| reject(err))?,
        result => result.map_err(reject)?,
    };
    Ok(created(&guess))
}

pub async fn my_guess(hunt_id: i64, user_id: String, ctx: ApiContext) -> Result<Response, Rejection> {
    let controller = &ctx.controller;
    let user_id = user_id.as_str();
    let guess = ctx
        .retry
        .run("get_guess", move || controller.get_guess(hunt_id, user_id))
        .await
        .map_err(reject)?;
    Ok(ok(&guess))
}

pub async fn list_guesses(hunt_id: i64, ctx: ApiContext) -> Result<Response, Rejection> {
    let controller = &ctx.controller;
    let guesses = ctx
        .retry
        .run("list_guesses", move || controller.list_guesses(hunt_id))
        .await
        .map_err(reject)?;
    Ok(ok(&guesses))
}

pub async fn stats(hunt_id: i64, ctx: ApiContext) -> Result<Response, Rejection> {
    let controller = &ctx.controller;
    let stats = ctx
        .retry
        .run("stats", move || controller.stats(hunt_id))
        .await
        .map_err(reject)?;
    Ok(ok(&stats))
}

pub async fn settlement(hunt_id: i64, ctx: ApiContext) -> Result<Response, Rejection> {
    let controller = &ctx.controller;
    let settlement = ctx
        .retry
        .run("settle", move || controller.settle(hunt_id))
        .await
        .map_err(reject)?;
    Ok(ok(&settlement))
}

/// Server-sent events for one hunt. The first event is a full snapshot; live
/// events follow in commit order. Events of one commit share its revision, so
/// clients drop only events whose revision is older than the last one applied.
pub async fn events(hunt_id: i64, ctx: ApiContext) -> Result<Response, Rejection> {
    // subscribe before the snapshot so nothing committed in between is missed
    let live = ctx.controller.subscribe(hunt_id);
    let snapshot = ctx.controller.snapshot(hunt_id).await.map_err(reject)?;

    let initial = Event::default()
        .event("snapshot")
        .id(snapshot.hunt.revision.to_string())
        .json_data(&snapshot);
    let updates = live.map(|event| {
        Event::default()
            .event(event.kind())
            .id(event.revision.to_string())
            .json_data(&event)
    });
    let stream = stream::once(future::ready(initial)).chain(updates);

    Ok(warp::sse::reply(warp::sse::keep_alive().stream(stream)).into_response())
}
