pub mod config;
pub mod error;

pub use config::RelayConfig;
pub use error::RelayError;
