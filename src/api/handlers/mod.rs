pub mod control;
pub mod health;
pub mod intents;
pub mod metrics;
pub mod queue;
