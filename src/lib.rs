pub mod cli;
pub mod commands;
pub mod config;
pub mod diff;
pub mod events;
pub mod files;
pub mod hub;
pub mod logging;
pub mod metrics;
pub mod paths;
pub mod snapshot;
pub mod watcher;
pub mod web;

pub use config::Config;
pub use events::EventManager;
pub use hub::{Subscription, WatchHub};
