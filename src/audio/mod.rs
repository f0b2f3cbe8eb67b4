// Audio host integration

pub mod driver;

pub use driver::{AudioDriver, DriverError};
