#![doc = "Fixed-rate parameter ramp driver."]

pub mod driver;
pub mod ticker;

pub use driver::*;
pub use ticker::*;
