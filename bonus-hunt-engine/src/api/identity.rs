use warp::{Filter, Rejection};

use crate::{
    api::reject,
    constants::{OPERATOR_ROLE, USER_ID_HEADER, USER_ROLE_HEADER},
    error::Error,
};

/// Caller identity as asserted by the upstream identity provider.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Identity {
    pub user_id: Option<String>,
    pub is_operator: bool,
}

pub fn identity() -> impl Filter<Extract = (Identity,), Error = Rejection> + Clone {
    warp::header::optional::<String>(USER_ID_HEADER)
        .and(warp::header::optional::<String>(USER_ROLE_HEADER))
        .map(|user_id: Option<String>, role: Option<String>| Identity {
            user_id: user_id
                .map(|id| id.trim().to_string())
                .filter(|id| !id.is_empty()),
            is_operator: role.is_some_and(|role| role.trim().eq_ignore_ascii_case(OPERATOR_ROLE)),
        })
}

/// Any authenticated user. Extracts the user id.
pub fn participant() -> impl Filter<Extract = (String,), Error = Rejection> + Clone {
    identity().and_then(|identity: Identity| async move {
        identity.user_id.ok_or_else(|| reject(Error::Unauthorized))
    })
}

/// An authenticated user holding the operator capability.
pub fn operator() -> impl Filter<Extract = (Identity,), Error = Rejection> + Clone {
    identity().and_then(|identity: Identity| async move {
        match (&identity.user_id, identity.is_operator) {
            (None, _) => Err(reject(Error::Unauthorized)),
            (Some(_), false) => Err(reject(Error::Forbidden)),
            (Some(_), true) => Ok(identity),
        }
    })
}
