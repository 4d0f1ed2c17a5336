pub mod api;
pub mod common;
pub mod config;
pub mod models;
pub mod store;
pub mod utils;
pub mod workflow;
