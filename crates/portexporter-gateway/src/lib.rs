//! Gateway: exposes local TCP addresses to a relay through an outbound tunnel

pub mod config;
pub mod exposure;
pub mod gateway;

pub use config::GatewayConfig;
pub use exposure::{EmptyExposure, ExposurePolicy};
pub use gateway::{host_ip, Gateway, GatewayError};
