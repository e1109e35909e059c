pub mod activity;
pub mod assistant;
pub mod auth;
pub mod bot;
pub mod config;
pub mod connector;
pub mod error;
pub mod handlers;
pub mod server;
pub mod token;
mod types;
