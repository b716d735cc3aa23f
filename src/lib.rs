pub mod cache;
pub mod config;
pub mod error;
pub mod pipeline;
pub mod platform;
pub mod shutdown;
pub mod transport;
