pub mod api;
pub mod broadcast;
pub mod constants;
pub mod error;
pub mod lifecycle;
pub mod metrics;
pub mod retry;
pub mod settings;
pub mod settlement;
pub mod state;
pub mod store;
pub mod utils;

pub use error::{Error, Result};
pub use lifecycle::HuntController;
