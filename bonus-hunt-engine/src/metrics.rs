use lazy_static::lazy_static;
use prometheus::{opts, IntCounter, IntCounterVec, IntGauge, Registry};

lazy_static! {
    pub static ref REGISTRY: Registry = Registry::new();
    pub static ref WINS_RECORDED: IntCounter = IntCounter::with_opts(
        opts!("bonus_hunt_wins_recorded", "Outcome wins recorded")
            .const_label("version", env!("CARGO_PKG_VERSION")),
    )
    .expect("metric can be created");
    pub static ref GUESSES_ACCEPTED: IntCounter = IntCounter::with_opts(
        opts!("bonus_hunt_guesses_accepted", "Guesses accepted")
            .const_label("version", env!("CARGO_PKG_VERSION")),
    )
    .expect("metric can be created");
    pub static ref GUESSES_REJECTED: IntCounterVec = IntCounterVec::new(
        opts!("bonus_hunt_guesses_rejected", "Guesses rejected")
            .const_label("version", env!("CARGO_PKG_VERSION")),
        &["reason"]
    )
    .expect("metric can be created");
    pub static ref HUNTS_COMPLETED: IntCounterVec = IntCounterVec::new(
        opts!("bonus_hunt_hunts_completed", "Hunts completed")
            .const_label("version", env!("CARGO_PKG_VERSION")),
        &["trigger"]
    )
    .expect("metric can be created");
    pub static ref SETTLEMENTS: IntCounterVec = IntCounterVec::new(
        opts!("bonus_hunt_settlements", "Settlement runs")
            .const_label("version", env!("CARGO_PKG_VERSION")),
        &["outcome"]
    )
    .expect("metric can be created");
    pub static ref TRANSIENT_RETRIES: IntCounterVec = IntCounterVec::new(
        opts!("bonus_hunt_transient_retries", "Retries after transient store failures")
            .const_label("version", env!("CARGO_PKG_VERSION")),
        &["operation"]
    )
    .expect("metric can be created");
    pub static ref LIVE_SUBSCRIBERS: IntGauge = IntGauge::with_opts(
        opts!("bonus_hunt_live_subscribers", "Connected event subscribers")
            .const_label("version", env!("CARGO_PKG_VERSION")),
    )
    .expect("metric can be created");
    pub static ref EVENTS_SKIPPED: IntCounter = IntCounter::with_opts(
        opts!(
            "bonus_hunt_events_skipped",
            "Publish tickets released without events"
        )
        .const_label("version", env!("CARGO_PKG_VERSION")),
    )
    .expect("metric can be created");
}

pub fn register_custom_metrics() {
    REGISTRY
        .register(Box::new(WINS_RECORDED.clone()))
        .expect("collector can be registered");
    REGISTRY
        .register(Box::new(GUESSES_ACCEPTED.clone()))
        .expect("collector can be registered");
    REGISTRY
        .register(Box::new(GUESSES_REJECTED.clone()))
        .expect("collector can be registered");
    REGISTRY
        .register(Box::new(HUNTS_COMPLETED.clone()))
        .expect("collector can be registered");
    REGISTRY
        .register(Box::new(SETTLEMENTS.clone()))
        .expect("collector can be registered");
    REGISTRY
        .register(Box::new(TRANSIENT_RETRIES.clone()))
        .expect("collector can be registered");
    REGISTRY
        .register(Box::new(LIVE_SUBSCRIBERS.clone()))
        .expect("collector can be registered");
    REGISTRY
        .register(Box::new(EVENTS_SKIPPED.clone()))
        .expect("collector can be registered");
}
