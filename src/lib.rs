pub mod client;
pub mod config;
pub mod constants;
pub mod engine;
pub mod error;
pub mod protocol;
pub mod rate_limiter;
pub mod room;
pub mod types;
pub mod world;
