pub mod client;
pub mod models;
pub mod rate_limit;

pub use broker_core::BrokerClient;
pub use client::RobinhoodClient;
pub use models::*;
pub use rate_limit::SlidingWindowLimiter;
