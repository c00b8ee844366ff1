#![warn(clippy::unwrap_used)]

pub mod config;
pub mod error;
pub mod types;

pub use config::AppConfig;
pub use error::{SpotlineError, SpotlineResult};
pub use types::{Ad, Campaign, Impression, ANY_REGION};
