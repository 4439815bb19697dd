use serde::Serialize;

use crate::state::Outcome;

/// Running statistics for a hunt. A pure projection of the outcome set plus
/// the starting balance; never persisted.
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct DerivedStats {
    /// Collected-win total: sum of `win_amount` over played outcomes.
    pub ending_balance_so_far: i64,
    pub average_bet: f64,
    pub average_multiplier: f64,
    pub break_even_multiplier: f64,
    pub highest_win: i64,
    pub highest_multiplier: f64,
    pub played_count: usize,
    pub remaining_count: usize,
    pub total_bets: i64,
}

/// `win / bet`, or `None` when either side is missing or the bet is not
/// positive. Never yields NaN or infinity.
pub fn multiplier_for(bet_amount: Option<i64>, win_amount: Option<i64>) -> Option<f64> {
    match (bet_amount, win_amount) {
        (Some(bet), Some(win)) if bet > 0 => Some(win as f64 / bet as f64),
        _ => None,
    }
}

pub fn compute_stats(outcomes: &[Outcome], starting_balance: Option<i64>) -> DerivedStats {
    if outcomes.is_empty() {
        return DerivedStats::default();
    }

    let total_count = outcomes.len();
    let total_bets = outcomes
        .iter()
        .map(|o| o.bet_amount.unwrap_or(0))
        .fold(0i64, i64::saturating_add);

    let played: Vec<&Outcome> = outcomes.iter().filter(|o| o.is_played).collect();
    let played_count = played.len();
    let remaining_count = total_count - played_count;

    let ending_balance_so_far = played
        .iter()
        .map(|o| o.win_amount.unwrap_or(0))
        .fold(0i64, i64::saturating_add);
    let highest_win = played
        .iter()
        .filter_map(|o| o.win_amount)
        .max()
        .unwrap_or(0);

    // recomputed from bet/win so a stale stored multiplier can't leak in
    let multipliers: Vec<f64> = played
        .iter()
        .filter_map(|o| multiplier_for(o.bet_amount, o.win_amount))
        .collect();
    let average_multiplier = if multipliers.is_empty() {
        0.0
    } else {
        multipliers.iter().sum::<f64>() / multipliers.len() as f64
    };
    let highest_multiplier = multipliers.iter().copied().fold(0.0, f64::max);

    let average_bet = total_bets as f64 / total_count as f64;

    DerivedStats {
        ending_balance_so_far,
        average_bet,
        average_multiplier,
        break_even_multiplier: break_even_multiplier(
            starting_balance.unwrap_or(0),
            ending_balance_so_far,
            average_bet,
            remaining_count,
        ),
        highest_win,
        highest_multiplier,
        played_count,
        remaining_count,
        total_bets,
    }
}

/// Average multiplier still needed on the remaining outcomes to collect back
/// the starting balance. Zero once break-even is reached or nothing remains.
pub fn break_even_multiplier(
    starting_balance: i64,
    ending_balance_so_far: i64,
    average_bet: f64,
    remaining_count: usize,
) -> f64 {
    let deficit = starting_balance.saturating_sub(ending_balance_so_far);
    let remaining_stake = average_bet * remaining_count as f64;
    if remaining_count == 0 || deficit <= 0 || remaining_stake <= 0.0 {
        return 0.0;
    }
    deficit as f64 / remaining_stake
}
