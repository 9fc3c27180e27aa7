// Library entry point for chirp
// Exposes modules for testing

pub mod api;
pub mod auth;
pub mod config;
pub mod error;
pub mod forms;
pub mod models;
pub mod social;
pub mod store;
pub mod tweets;
