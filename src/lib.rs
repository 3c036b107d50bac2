pub mod alert;
pub mod config;
pub mod market_hours;
pub mod monitor;
pub mod notifier;
pub mod portfolio;
pub mod quote;
pub mod server;
pub mod state;
