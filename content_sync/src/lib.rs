pub mod bootstrap;
pub mod config;
pub mod content;
pub mod database;
pub mod handlers;
pub mod node;
pub mod pending;
pub mod pipeline;
pub mod projections;
pub mod push;
pub mod reconciler;
pub mod scheduler;
pub mod source;
pub mod telemetry;
pub mod utils;
