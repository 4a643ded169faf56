// Public API for integration tests and potential library usage

pub mod api;
pub mod app;
pub mod auth;
pub mod config;
pub mod hub;
pub mod origin;
pub mod protocol;
pub mod registry;
pub mod state;
pub mod store;
pub mod types;
pub mod ws;
