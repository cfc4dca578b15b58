pub mod log;

pub mod classifier;
pub mod config;
pub mod daemon;
pub mod error;
pub mod governor;
pub mod janitor;
pub mod reconciler;
pub mod registry;
pub mod tracker;
pub mod types;
