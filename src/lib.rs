pub mod api;
pub mod auth;
pub mod cache;
pub mod config;
pub mod errors;
pub mod fetch;
pub mod filters;
pub mod http;
pub mod map;
pub mod models;
pub mod parking;
pub mod resources;
pub mod search;
pub mod session;
pub mod tracing;
