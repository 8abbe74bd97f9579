pub mod config;
pub mod error;
pub mod period;

pub use config::Config;
pub use error::*;
pub use period::{next_period, Period};
