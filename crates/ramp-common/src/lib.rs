#![doc = "Common types shared across the filter-ramp workspace."]

pub mod config;
pub mod error;
pub mod metrics;
pub mod shutdown;
pub mod state;
pub mod time;

pub use config::*;
pub use error::*;
pub use metrics::*;
pub use shutdown::*;
pub use state::*;
pub use time::*;
