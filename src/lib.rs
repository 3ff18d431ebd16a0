pub mod api;
pub mod chunk;
pub mod client;
pub mod config;
pub mod events;
pub mod metrics;
pub mod permission;
pub mod session;
pub mod storage;
