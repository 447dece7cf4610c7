pub mod auth;
pub mod config;
pub mod error;
pub mod gateway;
pub mod json;
pub mod transport;
