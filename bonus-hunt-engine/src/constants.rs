// settlement constants
pub const DEFAULT_WINNER_POINTS: i64 = 1_000; // points for the single closest guess

// validation limits
pub const MAX_TITLE_LEN: usize = 200;
pub const MAX_SLOT_NAME_LEN: usize = 120;
pub const MAX_OUTCOMES_PER_HUNT: usize = 500;
pub const CURRENCY_CODE_LEN: usize = 3;

// broadcast constants
pub const DEFAULT_BROADCAST_CAPACITY: usize = 256;

// identity headers set by the upstream identity provider
pub const USER_ID_HEADER: &str = "x-user-id";
pub const USER_ROLE_HEADER: &str = "x-user-role";
pub const OPERATOR_ROLE: &str = "operator";
