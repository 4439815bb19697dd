//! HTTP and server-sent-events surface, built from warp filters.

use std::convert::Infallible;

use serde::{de::DeserializeOwned, Serialize};
use tracing::error;
use warp::{
    http::StatusCode,
    reject::Reject,
    reply::{Reply, Response},
    Filter, Rejection,
};

use crate::{error::Error, lifecycle::HuntController, retry::RetryPolicy};

mod handlers;
mod identity;

pub use handlers::{BetRequest, CompleteRequest, WinRequest};
pub use identity::{identity, operator, participant, Identity};

const MAX_BODY_BYTES: u64 = 64 * 1024;

#[derive(Clone)]
pub struct ApiContext {
    pub controller: HuntController,
    pub retry: RetryPolicy,
}

#[derive(Debug)]
pub struct ApiError(pub Error);

impl Reject for ApiError {}

pub(crate) fn reject(err: Error) -> Rejection {
    warp::reject::custom(ApiError(err))
}

#[derive(Debug, Serialize)]
struct ErrorBody {
    error: &'static str,
    message: String,
}

pub fn status_for(err: &Error) -> StatusCode {
    match err {
        Error::Validation(_) => StatusCode::BAD_REQUEST,
        Error::Conflict(_) => StatusCode::CONFLICT,
        Error::State(_) | Error::Forbidden => StatusCode::FORBIDDEN,
        Error::NotFound(_) => StatusCode::NOT_FOUND,
        Error::Transient(_) => StatusCode::SERVICE_UNAVAILABLE,
        Error::Unauthorized => StatusCode::UNAUTHORIZED,
        Error::Internal(_) => StatusCode::INTERNAL_SERVER_ERROR,
    }
}

fn with_context(ctx: ApiContext) -> impl Filter<Extract = (ApiContext,), Error = Infallible> + Clone {
    warp::any().map(move || ctx.clone())
}

fn json_body<T: DeserializeOwned + Send>() -> impl Filter<Extract = (T,), Error = Rejection> + Clone {
    warp::body::content_length_limit(MAX_BODY_BYTES).and(warp::body::json())
}

/// Every route matches its path before its method, so an unknown path is a
/// 404 and a known path with the wrong method is a 405.
pub fn routes(ctx: ApiContext) -> impl Filter<Extract = (impl Reply,), Error = Infallible> + Clone {
    let create_hunt = warp::path!("hunts")
        .and(warp::post())
        .and(operator())
        .and(json_body::<crate::state::NewHunt>())
        .and(with_context(ctx.clone()))
        .and_then(handlers::create_hunt);
    let get_hunt = warp::path!("hunts" / i64)
        .and(warp::get())
        .and(with_context(ctx.clone()))
        .and_then(handlers::get_hunt);
    let start_hunt = warp::path!("hunts" / i64 / "start")
        .and(warp::post())
        .and(operator())
        .and(with_context(ctx.clone()))
        .and_then(handlers::start_hunt);
    let set_balances = warp::path!("hunts" / i64 / "balances")
        .and(warp::post())
        .and(operator())
        .and(json_body())
        .and(with_context(ctx.clone()))
        .and_then(handlers::set_balances);
    let create_outcomes = warp::path!("hunts" / i64 / "outcomes")
        .and(warp::post())
        .and(operator())
        .and(json_body())
        .and(with_context(ctx.clone()))
        .and_then(handlers::create_outcomes);
    let set_bet = warp::path!("hunts" / i64 / "outcomes" / i64 / "bet")
        .and(warp::post())
        .and(operator())
        .and(json_body())
        .and(with_context(ctx.clone()))
        .and_then(handlers::set_bet);
    let record_win = warp::path!("hunts" / i64 / "outcomes" / i64 / "win")
        .and(warp::post())
        .and(operator())
        .and(json_body())
        .and(with_context(ctx.clone()))
        .and_then(handlers::record_win);
    let correct_win = warp::path!("hunts" / i64 / "outcomes" / i64 / "correction")
        .and(warp::post())
        .and(operator())
        .and(json_body())
        .and(with_context(ctx.clone()))
        .and_then(handlers::correct_win);
    let complete_hunt = warp::path!("hunts" / i64 / "complete")
        .and(warp::post())
        .and(operator())
        .and(json_body())
        .and(with_context(ctx.clone()))
        .and_then(handlers::complete_hunt);
    let submit_guess = warp::path!("hunts" / i64 / "guesses")
        .and(warp::post())
        .and(participant())
        .and(json_body())
        .and(with_context(ctx.clone()))
        .and_then(handlers::submit_guess);
    let my_guess = warp::path!("hunts" / i64 / "guesses" / "mine")
        .and(warp::get())
        .and(participant())
        .and(with_context(ctx.clone()))
        .and_then(handlers::my_guess);
    let list_guesses = warp::path!("hunts" / i64 / "guesses")
        .and(warp::get())
        .and(with_context(ctx.clone()))
        .and_then(handlers::list_guesses);
    let stats = warp::path!("hunts" / i64 / "stats")
        .and(warp::get())
        .and(with_context(ctx.clone()))
        .and_then(handlers::stats);
    let settlement = warp::path!("hunts" / i64 / "settlement")
        .and(warp::get())
        .and(with_context(ctx.clone()))
        .and_then(handlers::settlement);
    let events = warp::path!("hunts" / i64 / "events")
        .and(warp::get())
        .and(with_context(ctx))
        .and_then(handlers::events);

    create_hunt
        .or(get_hunt)
        .unify()
        .or(start_hunt)
        .unify()
        .or(set_balances)
        .unify()
        .or(create_outcomes)
        .unify()
        .or(set_bet)
        .unify()
        .or(record_win)
        .unify()
        .or(correct_win)
        .unify()
        .or(complete_hunt)
        .unify()
        .or(submit_guess)
        .unify()
        .or(my_guess)
        .unify()
        .or(list_guesses)
        .unify()
        .or(stats)
        .unify()
        .or(settlement)
        .unify()
        .or(events)
        .unify()
        .recover(handle_rejection)
}

pub async fn handle_rejection(rejection: Rejection) -> Result<Response, Infallible> {
    let (status, kind, message) = if let Some(ApiError(err)) = rejection.find::<ApiError>() {
        if matches!(err, Error::Internal(_)) {
            error!(%err, "request failed");
        }
        (status_for(err), err.kind(), err.to_string())
    } else if rejection.is_not_found() {
        (StatusCode::NOT_FOUND, "not_found", "no such route".to_string())
    } else if let Some(err) = rejection.find::<warp::filters::body::BodyDeserializeError>() {
        (StatusCode::BAD_REQUEST, "validation", err.to_string())
    } else if let Some(err) = rejection.find::<warp::reject::InvalidHeader>() {
        (StatusCode::BAD_REQUEST, "validation", err.to_string())
    } else if rejection.find::<warp::reject::PayloadTooLarge>().is_some() {
        (
            StatusCode::PAYLOAD_TOO_LARGE,
            "validation",
            "request body too large".to_string(),
        )
    } else if rejection.find::<warp::reject::MethodNotAllowed>().is_some() {
        (
            StatusCode::METHOD_NOT_ALLOWED,
            "method_not_allowed",
            "method not allowed".to_string(),
        )
    } else {
        error!(?rejection, "unhandled rejection");
        (
            StatusCode::INTERNAL_SERVER_ERROR,
            "internal",
            "internal error".to_string(),
        )
    };

    Ok(warp::reply::with_status(warp::reply::json(&ErrorBody { error: kind, message }), status)
        .into_response())
}
